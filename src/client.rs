//! The meter session orchestrator.
//!
//! Drives the full protocol sequence against one meter on one serial link:
//!
//! 1. HDLC SNRM → UA (data link)
//! 2. COSEM AARQ → AARE (application association, LLS password)
//! 3. per catalog entry: GET scaler_unit (once), then GET value
//! 4. COSEM RLRQ (best effort)
//! 5. HDLC DISC (best effort)
//!
//! The client owns all mutable session state — sequence numbers, invoke-id,
//! the scaler cache and the skip set — and the transport for the duration
//! of each transaction. One session per link; everything is synchronous
//! blocking I/O, one request in flight at a time.

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use crate::association::{self, AarqApdu, RlrqApdu};
use crate::get::{
    self, AttributeDescriptor, GetDataResult, GetRequestNormal, GetResponseNormal,
};
use crate::hdlc::{self, FrameSearch, HdlcFrame};
use crate::readings::{MeterReadings, OBIS_TABLE, ObisMapping};
use crate::transport::Transport;
use crate::unit::ScalerUnit;
use crate::{Data, Error};

/// LLC sub-header on every information field carrying a COSEM PDU,
/// client → server (IEC 62056-46 §6.4.4.4.3.2). Responses arrive with
/// `E6 E7 00` (or `E6 E6 00` from less conforming meters).
const LLC_SEND_HEADER: [u8; 3] = [0xE6, 0xE6, 0x00];
const LLC_HEADER_LEN: usize = 3;

/// Register class value attribute.
const VALUE_ATTRIBUTE: i8 = 2;
/// Register class scaler_unit attribute.
const SCALER_UNIT_ATTRIBUTE: i8 = 3;

/// Settle time between SNRM/UA and the AARQ; the meter needs a moment to
/// finish mode setup.
const ASSOCIATION_SETTLE: Duration = Duration::from_millis(100);
/// Pause between consecutive attribute requests.
const INTER_REQUEST_DELAY: Duration = Duration::from_millis(20);

/// Connection state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeterState {
    Disconnected,
    /// SNRM/UA done.
    LinkConnected,
    /// AARQ/AARE done.
    Associated,
    Error,
}

/// Addressing, authentication and timing settings for one meter.
#[derive(Debug, Clone)]
pub struct MeterConfig {
    /// Client SAP (logical client address).
    pub client_sap: u8,
    /// Server logical device address.
    pub server_logical: u8,
    /// Server physical device address.
    pub server_physical: u8,
    /// LLS password; empty disables authentication.
    pub password: String,
    /// Upper bound for outgoing information fields.
    pub max_info_len: u16,
    /// Deadline for each request/response transaction.
    pub response_timeout: Duration,
    /// Pause between a send and the first receive attempt.
    pub inter_frame_delay: Duration,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            client_sap: 1,
            server_logical: 0,
            server_physical: 1,
            password: String::from("22222222"),
            max_info_len: 128,
            response_timeout: Duration::from_millis(5000),
            inter_frame_delay: Duration::from_millis(30),
        }
    }
}

/// Errors surfaced by session operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientError<E> {
    /// Error from the underlying transport.
    Transport(E),
    /// Framing, codec or access failure.
    Link(Error),
    /// No response within the configured deadline.
    Timeout,
    /// An operation requiring association was attempted out of state.
    NotConnected,
    /// A whole poll cycle produced zero successful readings.
    NoReadings,
}

impl<E> From<E> for ClientError<E> {
    fn from(e: E) -> Self {
        ClientError::Transport(e)
    }
}

impl<E: fmt::Display> fmt::Display for ClientError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Transport(e) => write!(f, "transport error: {e}"),
            ClientError::Link(e) => write!(f, "{e}"),
            ClientError::Timeout => write!(f, "response timeout"),
            ClientError::NotConnected => write!(f, "not associated"),
            ClientError::NoReadings => write!(f, "no attribute could be read"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for ClientError<E> {}

/// Client HDLC address for a SAP: `(sap << 1) | 1`.
fn client_address(sap: u8) -> u8 {
    (sap << 1) | 1
}

/// Server HDLC address, combining logical and physical per IEC 62056-46:
/// `combined = (logical << 7) | physical`, 1-byte encoded. Combined values
/// needing 2-byte encoding are not implemented; those degrade to encoding
/// the logical address alone, with a warning.
fn server_address(logical: u8, physical: u8) -> u8 {
    let combined = (logical as u16) << 7 | physical as u16;
    if combined < 0x80 {
        ((combined << 1) | 1) as u8
    } else {
        log::warn!(
            "server address needs 2-byte encoding (combined=0x{combined:04X}), using 1-byte fallback"
        );
        (logical << 1) | 1
    }
}

/// A DLMS/COSEM client session over one half-duplex serial transport.
///
/// The scaler cache and skip set persist for the lifetime of the client,
/// across disconnect/reconnect cycles: they describe the attached meter
/// and its firmware, not the transient association.
#[derive(Debug)]
pub struct MeterClient<T: Transport> {
    transport: T,
    config: MeterConfig,
    targets: &'static [ObisMapping],
    state: MeterState,
    client_addr: u8,
    server_addr: u8,
    send_seq: u8,
    recv_seq: u8,
    invoke_id: u8,
    /// One multiplier per catalog entry, populated lazily from the
    /// scaler_unit attribute (1.0 fallback on failure, never re-read).
    scalers: Vec<Option<f64>>,
    /// Entries the meter refused with a data-access error; never read
    /// again for the lifetime of the client.
    skip: Vec<bool>,
}

impl<T: Transport> MeterClient<T> {
    /// A client polling the default catalog ([`OBIS_TABLE`]).
    pub fn new(transport: T, config: MeterConfig) -> Self {
        Self::with_targets(transport, config, &OBIS_TABLE)
    }

    /// A client polling a custom attribute catalog.
    pub fn with_targets(
        transport: T,
        config: MeterConfig,
        targets: &'static [ObisMapping],
    ) -> Self {
        Self {
            transport,
            config,
            targets,
            state: MeterState::Disconnected,
            client_addr: 0,
            server_addr: 0,
            send_seq: 0,
            recv_seq: 0,
            invoke_id: 0,
            scalers: vec![None; targets.len()],
            skip: vec![false; targets.len()],
        }
    }

    pub fn state(&self) -> MeterState {
        self.state
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Consumes the client, returning the transport.
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Establishes the HDLC link and the COSEM association.
    ///
    /// Any step failure transitions the session to [`MeterState::Error`]
    /// and returns the failure.
    pub fn connect(&mut self) -> Result<(), ClientError<T::Error>> {
        match self.try_connect() {
            Ok(()) => Ok(()),
            Err(err) => {
                self.state = MeterState::Error;
                Err(err)
            }
        }
    }

    fn try_connect(&mut self) -> Result<(), ClientError<T::Error>> {
        if matches!(self.state, MeterState::LinkConnected | MeterState::Associated) {
            log::warn!("already connected, disconnecting first");
            self.disconnect();
        }

        self.client_addr = client_address(self.config.client_sap);
        self.server_addr =
            server_address(self.config.server_logical, self.config.server_physical);
        self.send_seq = 0;
        self.recv_seq = 0;
        self.invoke_id = 0;

        log::info!(
            "connecting to meter (client=0x{:02X} server=0x{:02X}, logical={} physical={})",
            self.client_addr,
            self.server_addr,
            self.config.server_logical,
            self.config.server_physical
        );

        // Minimal SNRM, no negotiation parameters: the meter answers this
        // more reliably than a parameterized one.
        let snrm = hdlc::build_snrm(self.client_addr, self.server_addr, None);
        let resp = self.transact(&snrm)?;
        if resp.control != hdlc::CTRL_UA {
            log::error!("expected UA (0x73), got 0x{:02X}", resp.control);
            return Err(ClientError::Link(Error::ProtocolError));
        }
        self.state = MeterState::LinkConnected;
        log::info!("HDLC link established (UA received)");

        thread::sleep(ASSOCIATION_SETTLE);

        let password = &self.config.password;
        let aarq =
            AarqApdu::new((!password.is_empty()).then(|| password.as_bytes())).encode();
        let resp = self.send_pdu(&aarq)?;
        association::parse_aare(&resp.info).map_err(ClientError::Link)?;

        self.state = MeterState::Associated;
        log::info!("COSEM association established (AARE accepted)");
        Ok(())
    }

    /// Releases the association and the link, best effort.
    ///
    /// The RLRQ and DISC exchanges are cleanup; their outcome is
    /// deliberately ignored and the session always ends
    /// [`MeterState::Disconnected`]. Idempotent.
    pub fn disconnect(&mut self) {
        if self.state == MeterState::Disconnected {
            return;
        }

        if self.state == MeterState::Associated {
            let _ = self.send_pdu(&RlrqApdu.encode());
        }

        let disc = hdlc::build_disc(self.client_addr, self.server_addr);
        let _ = self.transact(&disc);

        self.state = MeterState::Disconnected;
        self.send_seq = 0;
        self.recv_seq = 0;
        log::info!("meter disconnected");
    }

    /// Reads every non-skipped catalog entry, returning the snapshot.
    ///
    /// Requires [`MeterState::Associated`]. Scalers are fetched once per
    /// client lifetime; a value read answered with a data-access error
    /// permanently adds the entry to the skip set. A cycle with at least
    /// one successful read is a (partial) success; zero successes fail
    /// with [`ClientError::NoReadings`].
    pub fn read_all(&mut self) -> Result<MeterReadings, ClientError<T::Error>> {
        if self.state != MeterState::Associated {
            log::error!("not associated with meter");
            return Err(ClientError::NotConnected);
        }

        let mut readings = MeterReadings::new();

        // Phase 1: scaler_unit for entries not yet cached. A missing
        // scaler must never block the value read, so every failure caches
        // the 1.0 fallback.
        for index in 0..self.targets.len() {
            if self.skip[index] || self.scalers[index].is_some() {
                continue;
            }
            let multiplier = match self.read_scaler(index) {
                Ok(multiplier) => multiplier,
                Err(err) => {
                    log::warn!(
                        "failed to read scaler for {}: {:?}",
                        self.targets[index].name,
                        err
                    );
                    1.0
                }
            };
            self.scalers[index] = Some(multiplier);
            thread::sleep(INTER_REQUEST_DELAY);
        }

        // Phase 2: values.
        let skipped = self.skip.iter().filter(|&&s| s).count();
        log::info!("reading {} attributes ({} skipped)", self.targets.len() - skipped, skipped);

        for index in 0..self.targets.len() {
            if self.skip[index] {
                continue;
            }
            let entry = self.targets[index];
            match self.read_value(index) {
                Ok(value) => {
                    *readings.slot_mut(entry.slot) = value;
                    readings.success_count += 1;
                    log::debug!("{} = {:.3}", entry.name, value);
                }
                Err(err) => {
                    readings.error_count += 1;
                    if let ClientError::Link(Error::AccessDenied(code)) = err {
                        self.skip[index] = true;
                        log::warn!(
                            "{}: access denied ({}), marked unsupported — skipping from now on",
                            entry.name,
                            get::describe_access_error(code)
                        );
                    } else {
                        log::warn!("{}: read failed: {:?}", entry.name, err);
                    }
                }
            }
            thread::sleep(INTER_REQUEST_DELAY);
        }

        readings.valid = readings.success_count > 0;
        log::info!(
            "meter read complete: {} ok, {} failed",
            readings.success_count,
            readings.error_count
        );

        if readings.valid { Ok(readings) } else { Err(ClientError::NoReadings) }
    }

    /// One full cycle: connect, read all, disconnect. Disconnect always
    /// runs, even when reading failed.
    pub fn poll(&mut self) -> Result<MeterReadings, ClientError<T::Error>> {
        if let Err(err) = self.connect() {
            log::error!("meter connect failed: {err:?}");
            self.disconnect();
            return Err(err);
        }

        let result = self.read_all();
        if let Err(err) = &result {
            log::error!("meter read failed: {err:?}");
        }

        self.disconnect();
        result
    }

    fn next_invoke_id(&mut self) -> u8 {
        let id = self.invoke_id;
        self.invoke_id = self.invoke_id.wrapping_add(1);
        id
    }

    /// Reads attribute 3 (scaler_unit) of one entry, returning the decimal
    /// multiplier.
    fn read_scaler(&mut self, index: usize) -> Result<f64, ClientError<T::Error>> {
        let entry = self.targets[index];
        let request = GetRequestNormal {
            invoke_id: self.next_invoke_id(),
            attribute: AttributeDescriptor {
                class_id: entry.class_id,
                obis: entry.obis,
                attribute_id: SCALER_UNIT_ATTRIBUTE,
            },
        };

        let resp = self.send_pdu(&request.encode())?;
        let response = GetResponseNormal::parse(&resp.info).map_err(ClientError::Link)?;
        match response.result {
            GetDataResult::Data(bytes) => {
                let scaler_unit = ScalerUnit::parse(bytes).map_err(ClientError::Link)?;
                log::debug!(
                    "{}: scaler={} (x{:.6}) unit={:?}",
                    entry.name,
                    scaler_unit.scaler,
                    scaler_unit.multiplier(),
                    scaler_unit.unit
                );
                Ok(scaler_unit.multiplier())
            }
            GetDataResult::DataAccessError(code) => {
                Err(ClientError::Link(Error::AccessDenied(code)))
            }
        }
    }

    /// Reads attribute 2 (value) of one entry, widening and scaling it.
    fn read_value(&mut self, index: usize) -> Result<f64, ClientError<T::Error>> {
        let entry = self.targets[index];
        let request = GetRequestNormal {
            invoke_id: self.next_invoke_id(),
            attribute: AttributeDescriptor {
                class_id: entry.class_id,
                obis: entry.obis,
                attribute_id: VALUE_ATTRIBUTE,
            },
        };

        let resp = self.send_pdu(&request.encode())?;
        let response = GetResponseNormal::parse(&resp.info).map_err(ClientError::Link)?;
        match response.result {
            GetDataResult::Data(bytes) => {
                let (value, _) = Data::decode(bytes).map_err(ClientError::Link)?;
                let raw = value.as_f64().unwrap_or_else(|| {
                    log::warn!("{}: unexpected data type {:?}", entry.name, value);
                    0.0
                });
                Ok(raw * self.scalers[index].unwrap_or(1.0))
            }
            GetDataResult::DataAccessError(code) => {
                Err(ClientError::Link(Error::AccessDenied(code)))
            }
        }
    }

    /// Wraps a COSEM PDU in LLC + I-frame, transacts it, and unwraps the
    /// response: updates the receive sequence from the peer's send
    /// sequence and strips the LLC header.
    fn send_pdu(&mut self, pdu: &[u8]) -> Result<HdlcFrame, ClientError<T::Error>> {
        let mut info = Vec::with_capacity(LLC_HEADER_LEN + pdu.len());
        info.extend_from_slice(&LLC_SEND_HEADER);
        info.extend_from_slice(pdu);

        let limit = (self.config.max_info_len as usize).min(hdlc::MAX_INFO_LEN);
        if info.len() > limit {
            return Err(ClientError::Link(Error::InvalidArgument));
        }

        let frame = hdlc::build_iframe(
            self.client_addr,
            self.server_addr,
            self.send_seq,
            self.recv_seq,
            &info,
        )
        .map_err(ClientError::Link)?;
        self.send_seq = (self.send_seq + 1) & 0x07;

        let mut resp = self.transact(&frame)?;

        // I-frame from the peer: its send sequence becomes our next
        // receive sequence.
        if resp.control & 0x01 == 0 {
            self.recv_seq = ((resp.control >> 1) + 1) & 0x07;
        }

        if resp.info.len() >= LLC_HEADER_LEN
            && resp.info[0] == 0xE6
            && (resp.info[1] == 0xE6 || resp.info[1] == 0xE7)
        {
            resp.info.drain(..LLC_HEADER_LEN);
        }

        Ok(resp)
    }

    /// Sends one frame and blocks for the response frame.
    ///
    /// Receives are accumulated and re-scanned until a complete
    /// flag-delimited frame shows up or the response deadline passes;
    /// partial reads are expected on slow serial links.
    fn transact(&mut self, frame: &[u8]) -> Result<HdlcFrame, ClientError<T::Error>> {
        self.transport.flush_rx();

        log::debug!("TX {} bytes to meter", frame.len());
        self.transport.send(frame)?;

        thread::sleep(self.config.inter_frame_delay);

        let deadline = Instant::now() + self.config.response_timeout;
        let mut rx: Vec<u8> = Vec::with_capacity(hdlc::MAX_FRAME_LEN);
        loop {
            let mut chunk = [0u8; hdlc::MAX_FRAME_LEN];
            let remaining = deadline.saturating_duration_since(Instant::now());
            let n = self.transport.recv(&mut chunk, remaining)?;
            if n == 0 {
                log::warn!("no response within {:?}", self.config.response_timeout);
                return Err(ClientError::Timeout);
            }
            rx.extend_from_slice(&chunk[..n]);
            log::debug!("RX {n} bytes from meter ({} buffered)", rx.len());

            match hdlc::find_frame(&rx) {
                FrameSearch::Found { start, len } => {
                    return HdlcFrame::parse(&rx[start..start + len])
                        .map_err(ClientError::Link);
                }
                // Frame still arriving; keep the bytes and receive more.
                FrameSearch::Incomplete => continue,
            }
        }
    }
}
