//! Chunked file transfer between host and device.
//!
//! Both directions follow the same shape: an opening round trip that pins
//! down total size and checksum, a run of bounded block round trips, and a
//! closing round trip. Block round trips set the batch flag so the pacing
//! delay does not throttle bulk data.
//!
//! Cancellation is cooperative and checked before every block. The protocol
//! has no abort message, so a cancelled transfer simply stops talking and
//! skips the close round trip; the device reclaims its half-open transfer
//! state on its own timeout, and the next operation may find it busy for a
//! moment.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::sync::CancellationToken;

use crate::checksum::crc32;
use crate::error::{Error, Result};
use crate::proto::{self, ops};
use crate::session::Connection;
use crate::tracing::prelude::*;

/// Default clear-payload bytes carried per block round trip.
pub const DEFAULT_CHUNK_BYTES: usize = 4096;

/// Block size, overridable via `ELKFS_CHUNK_BYTES`.
pub fn chunk_bytes() -> usize {
    std::env::var("ELKFS_CHUNK_BYTES")
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|&n| n > 0)
        .unwrap_or(DEFAULT_CHUNK_BYTES)
}

impl Connection {
    /// Download the file at `path` into memory.
    ///
    /// `progress` is invoked with the completed fraction after every block.
    /// The assembled payload is verified against the checksum the device
    /// declared when opening the read; a mismatch is an error, never a
    /// silently shortened or corrupted buffer.
    pub async fn download(
        &self,
        path: &str,
        token: &CancellationToken,
        mut progress: impl FnMut(f64),
    ) -> Result<Vec<u8>> {
        let operands = proto::path_operand(path)?;
        let head = self
            .roundtrip(ops::READ_OPEN, &operands, token, false)
            .await?
            .into_data()?;
        if head.len() < 8 {
            return Err(Error::InvalidFrame(format!(
                "read-open response carries {} bytes, need 8",
                head.len()
            )));
        }
        let mut head = &head[..];
        let size = head.get_u32() as usize;
        let declared = head.get_u32();
        debug!(path, size, checksum = declared, "Download opened");

        let block = chunk_bytes();
        let mut payload = Vec::with_capacity(size);
        while payload.len() < size {
            if token.is_cancelled() {
                info!(path, received = payload.len(), "Download cancelled");
                return Err(Error::Cancelled);
            }
            let want = block.min(size - payload.len());
            let mut operands = BytesMut::with_capacity(8);
            operands.put_u32(payload.len() as u32);
            operands.put_u32(want as u32);
            let data = self
                .roundtrip(ops::READ_BLOCK, &operands, token, true)
                .await?
                .into_data()?;
            if data.is_empty() || data.len() > want {
                return Err(Error::InvalidFrame(format!(
                    "device returned {} block bytes, wanted at most {want}",
                    data.len()
                )));
            }
            payload.extend_from_slice(&data);
            progress(payload.len() as f64 / size as f64);
        }

        self.roundtrip(ops::READ_CLOSE, &[], token, false)
            .await?
            .into_data()?;

        let got = crc32(&payload);
        if got != declared {
            return Err(Error::ChecksumMismatch {
                expected: declared,
                got,
            });
        }
        debug!(path, bytes = payload.len(), "Download complete");
        Ok(payload)
    }

    /// Upload `data` to `dest_path` on the device.
    ///
    /// The opening round trip carries total size, checksum, and destination;
    /// the device may reject it up front (existing path, storage full).
    /// Returns the number of bytes transferred.
    pub async fn upload(
        &self,
        data: &[u8],
        dest_path: &str,
        token: &CancellationToken,
        mut progress: impl FnMut(f64),
    ) -> Result<usize> {
        let checksum = crc32(data);
        let mut operands = BytesMut::with_capacity(8 + dest_path.len() + 1);
        operands.put_u32(data.len() as u32);
        operands.put_u32(checksum);
        operands.put_slice(&proto::path_operand(dest_path)?);
        self.roundtrip(ops::WRITE_OPEN, &operands, token, false)
            .await?
            .into_data()?;
        debug!(
            path = dest_path,
            size = data.len(),
            checksum,
            "Upload opened"
        );

        let block = chunk_bytes();
        let mut sent = 0;
        while sent < data.len() {
            if token.is_cancelled() {
                info!(path = dest_path, sent, "Upload cancelled");
                return Err(Error::Cancelled);
            }
            let end = (sent + block).min(data.len());
            let mut operands = BytesMut::with_capacity(4 + end - sent);
            operands.put_u32(sent as u32);
            operands.put_slice(&data[sent..end]);
            self.roundtrip(ops::WRITE_BLOCK, &operands, token, true)
                .await?
                .into_data()?;
            sent = end;
            progress(sent as f64 / data.len() as f64);
        }

        self.roundtrip(ops::WRITE_CLOSE, &[], token, false)
            .await?
            .into_data()?;
        debug!(path = dest_path, bytes = sent, "Upload complete");
        Ok(sent)
    }
}
