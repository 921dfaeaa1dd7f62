//! Transport abstraction for the serial link under the HDLC layer.

use core::fmt::Debug;
use std::time::Duration;

/// Byte-level half-duplex transport consumed by
/// [`MeterClient`](crate::client::MeterClient).
///
/// Implementations own the physical link details — direction-pin control
/// around each send, waiting for the full byte-time drain before releasing
/// the transmit direction — and keep them transparent to callers.
pub trait Transport {
    /// The error type returned by transport operations.
    type Error: Debug;

    /// Sends `data`, returning the number of bytes written.
    fn send(&mut self, data: &[u8]) -> Result<usize, Self::Error>;

    /// Receives into `buf`, blocking up to `timeout` (a zero timeout is a
    /// non-blocking poll), and returns however many bytes have arrived.
    /// `Ok(0)` signals that no data arrived within the deadline; a full
    /// frame is not guaranteed per call, so callers accumulate and re-scan.
    fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, Self::Error>;

    /// Discards any pending bytes in the receive buffer.
    fn flush_rx(&mut self);
}
