//! SysEx transport: framed writes and reassembled reads over a port.
//!
//! The OS MIDI stack gives us raw byte chunks with no alignment guarantees:
//! one inbound chunk may hold a fragment of a frame, a whole frame, or the
//! tail of one frame and the head of the next. [`receive_sysex`] accumulates
//! chunks until the end delimiter, bounded by a wall-clock timeout that only
//! fires on true silence. [`send_sysex`] writes in bounded slices so a
//! cancellation request takes effect mid-frame rather than after it.
//!
//! Each send or receive is tracked by a [`SysexTransfer`] control block whose
//! phase moves `Waiting -> Sending | Receiving -> Finished` and never leaves
//! `Finished`. The outcome recorded there distinguishes a device that went
//! silent from a caller that asked to stop.

use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::port::PortIo;
use crate::sysex::{SYSEX_END, SYSEX_START};
use crate::tracing::prelude::*;

/// Largest slice handed to the output port in one write.
pub const WRITE_SLICE: usize = 256;

/// Default silence deadline for one receive.
pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Receive deadline, overridable via `ELKFS_RECV_TIMEOUT_MS`.
pub fn recv_timeout() -> Duration {
    std::env::var("ELKFS_RECV_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_RECV_TIMEOUT)
}

/// Where a transfer stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    /// Created, not yet touched the wire.
    Waiting,
    /// Outbound bytes are being written.
    Sending,
    /// Inbound bytes are being accumulated.
    Receiving,
    /// Done, with the reason recorded.
    Finished(TransferOutcome),
}

/// Terminal state of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Ran to completion.
    Complete,
    /// The device stayed silent past the deadline.
    TimedOut,
    /// The caller's cancellation token fired.
    Cancelled,
}

/// Control block for one send or one receive.
///
/// The batch flag does not alter the state machine; the session layer reads
/// it to skip the inter-round-trip pacing delay when many round trips run
/// back to back.
pub struct SysexTransfer {
    token: CancellationToken,
    phase: TransferPhase,
    batch: bool,
}

impl SysexTransfer {
    /// Control block observing `token` for cooperative cancellation.
    pub fn new(token: CancellationToken, batch: bool) -> Self {
        Self {
            token,
            phase: TransferPhase::Waiting,
            batch,
        }
    }

    /// Control block that can only finish by completion or timeout.
    pub fn noncancellable() -> Self {
        Self::new(CancellationToken::new(), false)
    }

    /// Current phase.
    pub fn phase(&self) -> TransferPhase {
        self.phase
    }

    /// Whether pacing between round trips should be suppressed.
    pub fn is_batch(&self) -> bool {
        self.batch
    }

    /// Whether this transfer ended because the device went silent. Stays
    /// false for a cancellation, so callers can tell the two apart.
    pub fn timed_out(&self) -> bool {
        self.phase == TransferPhase::Finished(TransferOutcome::TimedOut)
    }

    // Total transition logic: Finished absorbs everything, all other states
    // move where directed.
    fn advance(&mut self, to: TransferPhase) {
        match self.phase {
            TransferPhase::Finished(_) => {}
            _ => self.phase = to,
        }
    }

    fn finish(&mut self, outcome: TransferOutcome) {
        self.advance(TransferPhase::Finished(outcome));
    }
}

/// Write one frame to the port in bounded slices.
///
/// The cancellation token is checked between slices; a cancelled send leaves
/// the frame partially written on the wire and returns [`Error::Cancelled`].
/// On success, returns the number of bytes written.
pub async fn send_sysex(io: &mut PortIo, xfer: &mut SysexTransfer, frame: &[u8]) -> Result<usize> {
    xfer.advance(TransferPhase::Sending);
    for slice in frame.chunks(WRITE_SLICE) {
        if xfer.token.is_cancelled() {
            xfer.finish(TransferOutcome::Cancelled);
            return Err(Error::Cancelled);
        }
        if let Err(e) = io.output.write(slice) {
            xfer.finish(TransferOutcome::Complete);
            return Err(e);
        }
    }
    xfer.finish(TransferOutcome::Complete);
    trace!(
        bytes = frame.len(),
        head = %hex::encode(&frame[..frame.len().min(12)]),
        "Sent SysEx frame"
    );
    Ok(frame.len())
}

/// Accumulate inbound chunks into one complete SysEx frame.
///
/// Chunks arriving outside a frame that do not begin with the start byte are
/// discarded (channel traffic, clock, replies meant for no one). The timeout
/// applies per read: any inbound chunk resets it, so a slow device streaming
/// a large frame does not trip it, only true silence does.
pub async fn receive_sysex(
    io: &mut PortIo,
    xfer: &mut SysexTransfer,
    timeout: Duration,
) -> Result<Vec<u8>> {
    xfer.advance(TransferPhase::Receiving);
    let mut frame: Vec<u8> = Vec::new();

    enum Step {
        Cancelled,
        TimedOut,
        InputGone,
        Chunk(Vec<u8>),
    }

    loop {
        let step = tokio::select! {
            _ = xfer.token.cancelled() => Step::Cancelled,
            recv = time::timeout(timeout, io.input.recv()) => match recv {
                Err(_) => Step::TimedOut,
                Ok(None) => Step::InputGone,
                Ok(Some(chunk)) => Step::Chunk(chunk),
            },
        };
        let chunk = match step {
            Step::Cancelled => {
                xfer.finish(TransferOutcome::Cancelled);
                return Err(Error::Cancelled);
            }
            Step::TimedOut => {
                xfer.finish(TransferOutcome::TimedOut);
                return Err(Error::Timeout);
            }
            Step::InputGone => {
                // Input callback went away: the port is gone.
                xfer.finish(TransferOutcome::Complete);
                return Err(Error::Closed);
            }
            Step::Chunk(chunk) => chunk,
        };

        let mut bytes = &chunk[..];
        if frame.is_empty() {
            match bytes.iter().position(|&b| b == SYSEX_START) {
                Some(start) => bytes = &bytes[start..],
                None => {
                    trace!(bytes = chunk.len(), "Ignoring non-SysEx chunk");
                    continue;
                }
            }
        }

        match bytes.iter().position(|&b| b == SYSEX_END) {
            Some(end) => {
                frame.extend_from_slice(&bytes[..=end]);
                if end + 1 < bytes.len() {
                    trace!(
                        bytes = bytes.len() - end - 1,
                        "Dropping trailing bytes after frame end"
                    );
                }
                xfer.finish(TransferOutcome::Complete);
                trace!(bytes = frame.len(), "Received SysEx frame");
                return Ok(frame);
            }
            None => frame.extend_from_slice(bytes),
        }
    }
}
