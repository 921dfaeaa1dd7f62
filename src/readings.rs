//! The per-poll readings record and the catalog of attributes to read.

use std::time::SystemTime;

use crate::ObisCode;

/// COSEM interface class 3, Register.
pub const REGISTER_CLASS_ID: u16 = 3;

/// One snapshot of the meter's electrical measurements, in engineering
/// units. Created fresh each poll cycle and overwritten, never merged
/// across cycles.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct MeterReadings {
    /// Per-phase voltages (V).
    pub voltage_r: f64,
    pub voltage_s: f64,
    pub voltage_t: f64,

    /// Per-phase currents (A).
    pub current_r: f64,
    pub current_s: f64,
    pub current_t: f64,

    /// Per-phase active power (kW).
    pub active_power_r: f64,
    pub active_power_s: f64,
    pub active_power_t: f64,

    /// Per-phase reactive power (kvar).
    pub reactive_power_r: f64,
    pub reactive_power_s: f64,
    pub reactive_power_t: f64,

    /// Per-phase apparent power (kVA).
    pub apparent_power_r: f64,
    pub apparent_power_s: f64,
    pub apparent_power_t: f64,

    /// Per-phase power factor (dimensionless).
    pub power_factor_r: f64,
    pub power_factor_s: f64,
    pub power_factor_t: f64,

    /// Three-phase totals.
    pub total_active_power: f64,
    pub total_reactive_power: f64,
    pub total_apparent_power: f64,
    pub total_power_factor: f64,

    /// Cumulative energy (kWh / kvarh / kVAh).
    pub active_energy: f64,
    pub reactive_energy: f64,
    pub apparent_energy: f64,

    /// Line frequency (Hz).
    pub frequency: f64,
    /// Neutral current (A).
    pub neutral_current: f64,

    /// True if at least one attribute read succeeded this cycle.
    pub valid: bool,
    /// Number of successful attribute reads.
    pub success_count: u32,
    /// Number of failed attribute reads.
    pub error_count: u32,
    /// When this cycle's readings were taken.
    pub timestamp: SystemTime,
}

impl MeterReadings {
    /// A fresh, all-zero record stamped with the current time.
    pub fn new() -> Self {
        Self {
            voltage_r: 0.0,
            voltage_s: 0.0,
            voltage_t: 0.0,
            current_r: 0.0,
            current_s: 0.0,
            current_t: 0.0,
            active_power_r: 0.0,
            active_power_s: 0.0,
            active_power_t: 0.0,
            reactive_power_r: 0.0,
            reactive_power_s: 0.0,
            reactive_power_t: 0.0,
            apparent_power_r: 0.0,
            apparent_power_s: 0.0,
            apparent_power_t: 0.0,
            power_factor_r: 0.0,
            power_factor_s: 0.0,
            power_factor_t: 0.0,
            total_active_power: 0.0,
            total_reactive_power: 0.0,
            total_apparent_power: 0.0,
            total_power_factor: 0.0,
            active_energy: 0.0,
            reactive_energy: 0.0,
            apparent_energy: 0.0,
            frequency: 0.0,
            neutral_current: 0.0,
            valid: false,
            success_count: 0,
            error_count: 0,
            timestamp: SystemTime::now(),
        }
    }

    /// The field a decoded value is stored in.
    pub fn slot_mut(&mut self, slot: ReadingSlot) -> &mut f64 {
        match slot {
            ReadingSlot::VoltageR => &mut self.voltage_r,
            ReadingSlot::VoltageS => &mut self.voltage_s,
            ReadingSlot::VoltageT => &mut self.voltage_t,
            ReadingSlot::CurrentR => &mut self.current_r,
            ReadingSlot::CurrentS => &mut self.current_s,
            ReadingSlot::CurrentT => &mut self.current_t,
            ReadingSlot::ActivePowerR => &mut self.active_power_r,
            ReadingSlot::ActivePowerS => &mut self.active_power_s,
            ReadingSlot::ActivePowerT => &mut self.active_power_t,
            ReadingSlot::ReactivePowerR => &mut self.reactive_power_r,
            ReadingSlot::ReactivePowerS => &mut self.reactive_power_s,
            ReadingSlot::ReactivePowerT => &mut self.reactive_power_t,
            ReadingSlot::ApparentPowerR => &mut self.apparent_power_r,
            ReadingSlot::ApparentPowerS => &mut self.apparent_power_s,
            ReadingSlot::ApparentPowerT => &mut self.apparent_power_t,
            ReadingSlot::PowerFactorR => &mut self.power_factor_r,
            ReadingSlot::PowerFactorS => &mut self.power_factor_s,
            ReadingSlot::PowerFactorT => &mut self.power_factor_t,
            ReadingSlot::TotalActivePower => &mut self.total_active_power,
            ReadingSlot::TotalReactivePower => &mut self.total_reactive_power,
            ReadingSlot::TotalApparentPower => &mut self.total_apparent_power,
            ReadingSlot::TotalPowerFactor => &mut self.total_power_factor,
            ReadingSlot::ActiveEnergy => &mut self.active_energy,
            ReadingSlot::ReactiveEnergy => &mut self.reactive_energy,
            ReadingSlot::ApparentEnergy => &mut self.apparent_energy,
            ReadingSlot::Frequency => &mut self.frequency,
            ReadingSlot::NeutralCurrent => &mut self.neutral_current,
        }
    }
}

impl Default for MeterReadings {
    fn default() -> Self {
        Self::new()
    }
}

/// Destination slot of one catalog entry, naming a [`MeterReadings`]
/// field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ReadingSlot {
    VoltageR,
    VoltageS,
    VoltageT,
    CurrentR,
    CurrentS,
    CurrentT,
    ActivePowerR,
    ActivePowerS,
    ActivePowerT,
    ReactivePowerR,
    ReactivePowerS,
    ReactivePowerT,
    ApparentPowerR,
    ApparentPowerS,
    ApparentPowerT,
    PowerFactorR,
    PowerFactorS,
    PowerFactorT,
    TotalActivePower,
    TotalReactivePower,
    TotalApparentPower,
    TotalPowerFactor,
    ActiveEnergy,
    ReactiveEnergy,
    ApparentEnergy,
    Frequency,
    NeutralCurrent,
}

/// One entry of the polling catalog: which attribute to read and where the
/// decoded value goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObisMapping {
    pub obis: ObisCode,
    pub class_id: u16,
    pub name: &'static str,
    pub slot: ReadingSlot,
}

const fn register(c: u8, d: u8, name: &'static str, slot: ReadingSlot) -> ObisMapping {
    ObisMapping {
        obis: ObisCode::new(1, 1, c, d, 0, 255),
        class_id: REGISTER_CLASS_ID,
        name,
        slot,
    }
}

/// The attributes polled each cycle: instantaneous `.7.0` quantities and
/// cumulative `.8.0` energy on metering channel 1, all class 3 Register.
/// Ordered, read-only.
#[rustfmt::skip]
pub const OBIS_TABLE: [ObisMapping; 27] = [
    // Phase A (R)
    register(32, 7, "Voltage_R",        ReadingSlot::VoltageR),
    register(31, 7, "Current_R",        ReadingSlot::CurrentR),
    register(21, 7, "ActivePower_R",    ReadingSlot::ActivePowerR),
    register(23, 7, "ReactivePower_R",  ReadingSlot::ReactivePowerR),
    register(29, 7, "ApparentPower_R",  ReadingSlot::ApparentPowerR),
    register(33, 7, "PowerFactor_R",    ReadingSlot::PowerFactorR),

    // Phase B (S)
    register(52, 7, "Voltage_S",        ReadingSlot::VoltageS),
    register(51, 7, "Current_S",        ReadingSlot::CurrentS),
    register(41, 7, "ActivePower_S",    ReadingSlot::ActivePowerS),
    register(43, 7, "ReactivePower_S",  ReadingSlot::ReactivePowerS),
    register(49, 7, "ApparentPower_S",  ReadingSlot::ApparentPowerS),
    register(53, 7, "PowerFactor_S",    ReadingSlot::PowerFactorS),

    // Phase C (T)
    register(72, 7, "Voltage_T",        ReadingSlot::VoltageT),
    register(71, 7, "Current_T",        ReadingSlot::CurrentT),
    register(61, 7, "ActivePower_T",    ReadingSlot::ActivePowerT),
    register(63, 7, "ReactivePower_T",  ReadingSlot::ReactivePowerT),
    register(69, 7, "ApparentPower_T",  ReadingSlot::ApparentPowerT),
    register(73, 7, "PowerFactor_T",    ReadingSlot::PowerFactorT),

    // Totals
    register(1, 7, "TotalActivePower",   ReadingSlot::TotalActivePower),
    register(3, 7, "TotalReactivePower", ReadingSlot::TotalReactivePower),
    register(9, 7, "TotalApparentPower", ReadingSlot::TotalApparentPower),
    register(13, 7, "TotalPowerFactor",   ReadingSlot::TotalPowerFactor),

    // Energy
    register(1, 8, "ActiveEnergy",   ReadingSlot::ActiveEnergy),
    register(3, 8, "ReactiveEnergy", ReadingSlot::ReactiveEnergy),
    register(9, 8, "ApparentEnergy", ReadingSlot::ApparentEnergy),

    // Other
    register(14, 7, "Frequency",      ReadingSlot::Frequency),
    register(91, 7, "NeutralCurrent", ReadingSlot::NeutralCurrent),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_is_invalid_and_zeroed() {
        let readings = MeterReadings::new();
        assert!(!readings.valid);
        assert_eq!(readings.success_count, 0);
        assert_eq!(readings.error_count, 0);
        assert_eq!(readings.voltage_r, 0.0);
        assert_eq!(readings.apparent_energy, 0.0);
    }

    #[test]
    fn test_slot_mut_targets_named_field() {
        let mut readings = MeterReadings::new();
        *readings.slot_mut(ReadingSlot::VoltageS) = 231.2;
        *readings.slot_mut(ReadingSlot::Frequency) = 50.02;

        assert_eq!(readings.voltage_s, 231.2);
        assert_eq!(readings.frequency, 50.02);
        assert_eq!(readings.voltage_r, 0.0);
    }

    #[test]
    fn test_table_shape() {
        assert_eq!(OBIS_TABLE.len(), 27);
        assert!(OBIS_TABLE.iter().all(|m| m.class_id == REGISTER_CLASS_ID));
        // Every entry targets a distinct slot.
        for (i, a) in OBIS_TABLE.iter().enumerate() {
            for b in &OBIS_TABLE[i + 1..] {
                assert_ne!(a.slot, b.slot);
                assert_ne!(a.obis, b.obis);
            }
        }
    }

    #[test]
    fn test_table_known_entries() {
        assert_eq!(OBIS_TABLE[0].obis, ObisCode::new(1, 1, 32, 7, 0, 255));
        assert_eq!(OBIS_TABLE[0].slot, ReadingSlot::VoltageR);
        let frequency = OBIS_TABLE.iter().find(|m| m.name == "Frequency").unwrap();
        assert_eq!(frequency.obis, ObisCode::new(1, 1, 14, 7, 0, 255));
    }
}
