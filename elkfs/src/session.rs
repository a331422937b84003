//! Session layer: one device connection, one round trip at a time.
//!
//! A [`Connection`] owns the open port pair, the 16-bit sequence counter,
//! and the lock that serializes round trips. Every request embeds the
//! current sequence value and an opcode; the matching response must echo
//! both. The lock is held from the first outbound byte to the last inbound
//! one, so concurrent callers (say, a foreground listing and a background
//! transfer) interleave at round-trip granularity and never mid-message.
//!
//! Correlation defends against stale responses: if an earlier operation was
//! cancelled mid-round-trip, its reply may still be sitting unread in the
//! input stream when the next request goes out. A sequence value is spent
//! the moment a request is built (even a failed round trip advances the
//! counter), so a late reply can never be mistaken for a current one.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::port::PortIo;
use crate::proto::{self, ops, DeviceInfo, Response};
use crate::tracing::prelude::*;
use crate::transport::{self, SysexTransfer};

/// Breather between consecutive round trips, for devices that fall behind
/// when messages arrive back to back. Suppressed for batch round trips.
const PACING_DELAY: Duration = Duration::from_millis(10);

/// An open session with one device.
pub struct Connection {
    name: String,
    info: DeviceInfo,
    inner: Mutex<Inner>,
}

struct Inner {
    seq: u16,
    recv_timeout: Duration,
    io: Option<PortIo>,
}

impl Connection {
    /// Open the device identified by `hardware_id` (a discovery index or a
    /// port-name substring) and perform the identity round trip.
    pub async fn open(hardware_id: &str) -> Result<Self> {
        let (io, name) = PortIo::open_midi(hardware_id)?;
        Self::from_io(name, io).await
    }

    /// Build a session over an already-open io pair.
    ///
    /// This is the non-hardware entry point used by the loopback tests; it
    /// performs the same identity round trip as [`Connection::open`].
    pub async fn from_io(name: impl Into<String>, mut io: PortIo) -> Result<Self> {
        let recv_timeout = transport::recv_timeout();
        let info = inquire(&mut io, recv_timeout).await?;
        let name = name.into();
        info!(port = %name, identity = %info, "Connected");
        Ok(Self {
            name,
            info,
            inner: Mutex::new(Inner {
                seq: 0,
                recv_timeout,
                io: Some(io),
            }),
        })
    }

    /// Display name of the attached device's port.
    pub fn device_name(&self) -> &str {
        &self.name
    }

    /// Identity reported by the device at open time.
    pub fn device_info(&self) -> DeviceInfo {
        self.info
    }

    /// Release the port handles. Further operations, including a second
    /// close, fail with [`Error::Closed`].
    pub async fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match inner.io.take() {
            Some(_) => {
                info!(port = %self.name, "Closed");
                Ok(())
            }
            None => Err(Error::Closed),
        }
    }

    /// Whether the port handles are still held. Cleanup paths use this to
    /// avoid a double close.
    pub async fn is_open(&self) -> bool {
        self.inner.lock().await.io.is_some()
    }

    /// Adjust the per-receive silence deadline for this session.
    pub async fn set_recv_timeout(&self, timeout: Duration) {
        self.inner.lock().await.recv_timeout = timeout;
    }

    /// One request/response round trip, correlated by sequence and opcode.
    ///
    /// Holds the connection lock for the full exchange. `token` is observed
    /// at transport granularity; `batch` suppresses the pacing delay.
    pub(crate) async fn roundtrip(
        &self,
        opcode: u8,
        operands: &[u8],
        token: &CancellationToken,
        batch: bool,
    ) -> Result<Response> {
        let mut inner = self.inner.lock().await;
        let seq = inner.seq;
        inner.seq = seq.wrapping_add(1);
        let recv_timeout = inner.recv_timeout;
        let io = inner.io.as_mut().ok_or(Error::Closed)?;

        debug!(op = ops::name(opcode), seq, "Round trip");
        let frame = proto::request_frame(seq, opcode, operands);
        let mut tx = SysexTransfer::new(token.clone(), batch);
        transport::send_sysex(io, &mut tx, &frame).await?;

        let mut rx = SysexTransfer::new(token.clone(), batch);
        let reply = transport::receive_sysex(io, &mut rx, recv_timeout).await?;
        let resp = proto::parse_response(&reply)?;
        if resp.seq != seq {
            warn!(expected = seq, got = resp.seq, "Stale or foreign response");
            return Err(Error::SequenceMismatch {
                expected: seq,
                got: resp.seq,
            });
        }
        let expected = opcode | ops::RESPONSE;
        if resp.opcode != expected {
            return Err(Error::OpcodeMismatch {
                expected,
                got: resp.opcode,
            });
        }

        if !rx.is_batch() {
            time::sleep(PACING_DELAY).await;
        }
        Ok(resp)
    }

    #[cfg(test)]
    pub(crate) async fn set_seq(&self, seq: u16) {
        self.inner.lock().await.seq = seq;
    }
}

/// Send a device inquiry on `io` and decode the identity reply.
pub(crate) async fn inquire(io: &mut PortIo, timeout: Duration) -> Result<DeviceInfo> {
    let mut tx = SysexTransfer::noncancellable();
    transport::send_sysex(io, &mut tx, &proto::inquiry_frame()).await?;
    let mut rx = SysexTransfer::noncancellable();
    let frame = transport::receive_sysex(io, &mut rx, timeout).await?;
    proto::parse_inquiry_reply(&frame)
        .ok_or_else(|| Error::InvalidFrame("identity reply did not decode".into()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::port::SysexOutput;
    use crate::sysex::SYSEX_END;
    use tokio::sync::mpsc;

    /// Forwards written bytes to the scripted device task.
    struct WireOutput(mpsc::UnboundedSender<Vec<u8>>);

    impl SysexOutput for WireOutput {
        fn write(&mut self, bytes: &[u8]) -> Result<()> {
            self.0.send(bytes.to_vec()).map_err(|_| Error::Closed)
        }
    }

    pub(crate) const TEST_INFO: DeviceInfo = DeviceInfo {
        family: 0x000c,
        member: 0x0010,
        version: [1, 10, 0, 0],
    };

    /// Connection backed by a scripted device: `script` maps each fully
    /// reassembled non-inquiry frame to an optional reply frame.
    pub(crate) async fn scripted_connection(
        mut script: impl FnMut(Vec<u8>) -> Option<Vec<u8>> + Send + 'static,
    ) -> Connection {
        let (wire_tx, mut wire_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (input_tx, input_rx) = mpsc::unbounded_channel::<Vec<u8>>();

        tokio::spawn(async move {
            let mut acc: Vec<u8> = Vec::new();
            while let Some(chunk) = wire_rx.recv().await {
                acc.extend_from_slice(&chunk);
                while let Some(end) = acc.iter().position(|&b| b == SYSEX_END) {
                    let frame: Vec<u8> = acc.drain(..=end).collect();
                    let reply = if frame == proto::inquiry_frame() {
                        Some(proto::inquiry_reply_frame(&TEST_INFO))
                    } else {
                        script(frame)
                    };
                    if let Some(reply) = reply {
                        if input_tx.send(reply).is_err() {
                            return;
                        }
                    }
                }
            }
        });

        let io = PortIo::new(Box::new(WireOutput(wire_tx)), input_rx);
        Connection::from_io("scripted", io)
            .await
            .expect("identity round trip")
    }

    fn echo_ok(frame: Vec<u8>) -> Option<Vec<u8>> {
        let req = proto::parse_request(&frame).unwrap();
        Some(proto::response_frame(
            req.seq,
            req.opcode,
            proto::status::OK,
            &[],
        ))
    }

    #[tokio::test]
    async fn test_sequence_advances_every_round_trip() {
        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let recorder = seen.clone();
        let conn = scripted_connection(move |frame| {
            let req = proto::parse_request(&frame).unwrap();
            recorder.lock().unwrap().push(req.seq);
            Some(proto::response_frame(
                req.seq,
                req.opcode,
                proto::status::OK,
                &[],
            ))
        })
        .await;

        for _ in 0..4 {
            conn.roundtrip(ops::CREATE_DIR, b"/x\0", &CancellationToken::new(), false)
                .await
                .unwrap();
        }
        assert_eq!(*seen.lock().unwrap(), [0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_sequence_wraps_modulo_65536() {
        let conn = scripted_connection(echo_ok).await;
        conn.set_seq(0xffff).await;
        conn.roundtrip(ops::LIST_DIR, b"/\0", &CancellationToken::new(), false)
            .await
            .unwrap();
        // Wrapped back to zero, which echo_ok will confirm by echoing it.
        conn.roundtrip(ops::LIST_DIR, b"/\0", &CancellationToken::new(), false)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_stale_sequence_is_rejected_and_spent() {
        let conn = scripted_connection(|frame| {
            let req = proto::parse_request(&frame).unwrap();
            // Always answer with a stale sequence value.
            Some(proto::response_frame(
                req.seq.wrapping_sub(1),
                req.opcode,
                proto::status::OK,
                &[],
            ))
        })
        .await;

        let err = conn
            .roundtrip(ops::DELETE_FILE, b"/a\0", &CancellationToken::new(), false)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::SequenceMismatch {
                expected: 0,
                got: 0xffff
            }
        ));
        // The failed round trip still consumed sequence 0.
        let err = conn
            .roundtrip(ops::DELETE_FILE, b"/a\0", &CancellationToken::new(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SequenceMismatch { expected: 1, .. }));
    }

    #[tokio::test]
    async fn test_opcode_mismatch_is_rejected() {
        let conn = scripted_connection(|frame| {
            let req = proto::parse_request(&frame).unwrap();
            Some(proto::response_frame(
                req.seq,
                ops::RENAME,
                proto::status::OK,
                &[],
            ))
        })
        .await;

        let err = conn
            .roundtrip(ops::LIST_DIR, b"/\0", &CancellationToken::new(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::OpcodeMismatch { .. }));
    }

    #[tokio::test]
    async fn test_silent_device_times_out() {
        let conn = scripted_connection(|_| None).await;
        conn.set_recv_timeout(Duration::from_millis(20)).await;
        let err = conn
            .roundtrip(ops::LIST_DIR, b"/\0", &CancellationToken::new(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout));
    }

    #[tokio::test]
    async fn test_close_is_single_shot() {
        let conn = scripted_connection(echo_ok).await;
        assert!(conn.is_open().await);
        conn.close().await.unwrap();
        assert!(!conn.is_open().await);
        assert!(matches!(conn.close().await, Err(Error::Closed)));
        let err = conn
            .roundtrip(ops::LIST_DIR, b"/\0", &CancellationToken::new(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Closed));
    }
}
