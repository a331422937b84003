//! Request/response message layer of the vendor protocol.
//!
//! Clear payloads (before 7-bit armoring) have a fixed shape:
//!
//! ```text
//! request:  seq:u16be  opcode:u8  operands...
//! response: seq:u16be  opcode:u8  status:u8  data...
//! ```
//!
//! A response's opcode is the request's with [`ops::RESPONSE`] set, and its
//! sequence value echoes the request's; the session layer uses both for
//! correlation. Operand layouts are operation-specific: paths travel as
//! NUL-terminated strings, sizes and checksums as big-endian u32.
//!
//! This module also decodes the two fixed-layout structures the device
//! serializes: directory-listing records and the sample header at the front
//! of sample payloads. Both are decoded field by field with bounds checks;
//! nothing here performs I/O.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Error, Result};
use crate::sysex;

/// Operation codes.
pub mod ops {
    pub const LIST_DIR: u8 = 0x10;
    pub const CREATE_DIR: u8 = 0x11;
    pub const DELETE_DIR: u8 = 0x12;
    pub const DELETE_FILE: u8 = 0x20;
    pub const RENAME: u8 = 0x21;
    pub const READ_OPEN: u8 = 0x30;
    pub const READ_BLOCK: u8 = 0x31;
    pub const READ_CLOSE: u8 = 0x32;
    pub const WRITE_OPEN: u8 = 0x40;
    pub const WRITE_BLOCK: u8 = 0x41;
    pub const WRITE_CLOSE: u8 = 0x42;

    /// Set on the opcode of every response.
    pub const RESPONSE: u8 = 0x80;

    /// Name an opcode for diagnostics.
    pub fn name(opcode: u8) -> &'static str {
        match opcode & !RESPONSE {
            LIST_DIR => "list-dir",
            CREATE_DIR => "create-dir",
            DELETE_DIR => "delete-dir",
            DELETE_FILE => "delete-file",
            RENAME => "rename",
            READ_OPEN => "read-open",
            READ_BLOCK => "read-block",
            READ_CLOSE => "read-close",
            WRITE_OPEN => "write-open",
            WRITE_BLOCK => "write-block",
            WRITE_CLOSE => "write-close",
            _ => "unknown",
        }
    }
}

/// Status codes carried in responses.
pub mod status {
    pub const OK: u8 = 0x00;
    pub const NOT_FOUND: u8 = 0x01;
    pub const ALREADY_EXISTS: u8 = 0x02;
    pub const STORAGE_FULL: u8 = 0x03;
    pub const BUSY: u8 = 0x04;

    /// Human-readable rendering of a status code.
    pub fn describe(code: u8) -> String {
        match code {
            OK => "ok".into(),
            NOT_FOUND => "no such file or directory".into(),
            ALREADY_EXISTS => "already exists".into(),
            STORAGE_FULL => "storage full".into(),
            BUSY => "device busy".into(),
            other => format!("device error {other:#04x}"),
        }
    }
}

/// A decoded request, as seen by the device (or a dissector).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub seq: u16,
    pub opcode: u8,
    pub operands: Vec<u8>,
}

/// A decoded response, as seen by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub seq: u16,
    pub opcode: u8,
    pub status: u8,
    pub data: Vec<u8>,
}

impl Response {
    /// Surface the device's verdict: the data on success, the status code as
    /// [`Error::DeviceRejected`] otherwise.
    pub fn into_data(self) -> Result<Vec<u8>> {
        if self.status != status::OK {
            return Err(Error::DeviceRejected(self.status));
        }
        Ok(self.data)
    }
}

/// Build a complete request frame, armored and delimited.
pub fn request_frame(seq: u16, opcode: u8, operands: &[u8]) -> Vec<u8> {
    let mut clear = BytesMut::with_capacity(3 + operands.len());
    clear.put_u16(seq);
    clear.put_u8(opcode);
    clear.put_slice(operands);
    sysex::enframe(&clear)
}

/// Build a complete response frame. The device side of the protocol; used by
/// emulators and capture tooling.
pub fn response_frame(seq: u16, request_opcode: u8, status: u8, data: &[u8]) -> Vec<u8> {
    let mut clear = BytesMut::with_capacity(4 + data.len());
    clear.put_u16(seq);
    clear.put_u8(request_opcode | ops::RESPONSE);
    clear.put_u8(status);
    clear.put_slice(data);
    sysex::enframe(&clear)
}

/// Decode a request frame.
pub fn parse_request(frame: &[u8]) -> Result<Request> {
    let clear = sysex::deframe(frame)?;
    if clear.len() < 3 {
        return Err(Error::InvalidFrame(format!(
            "request payload too short: {} bytes",
            clear.len()
        )));
    }
    let mut buf = &clear[..];
    let seq = buf.get_u16();
    let opcode = buf.get_u8();
    Ok(Request {
        seq,
        opcode,
        operands: buf.to_vec(),
    })
}

/// Decode a response frame.
pub fn parse_response(frame: &[u8]) -> Result<Response> {
    let clear = sysex::deframe(frame)?;
    if clear.len() < 4 {
        return Err(Error::InvalidFrame(format!(
            "response payload too short: {} bytes",
            clear.len()
        )));
    }
    let mut buf = &clear[..];
    let seq = buf.get_u16();
    let opcode = buf.get_u8();
    let status = buf.get_u8();
    Ok(Response {
        seq,
        opcode,
        status,
        data: buf.to_vec(),
    })
}

/// Encode a path operand as a NUL-terminated string.
///
/// Interior NULs cannot be represented and are rejected.
pub fn path_operand(path: &str) -> Result<Vec<u8>> {
    if path.as_bytes().contains(&0) {
        return Err(Error::InvalidPath(path.into()));
    }
    let mut out = Vec::with_capacity(path.len() + 1);
    out.extend_from_slice(path.as_bytes());
    out.push(0);
    Ok(out)
}

/// Identity reported by a device inquiry reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Device family code.
    pub family: u16,
    /// Family member code.
    pub member: u16,
    /// Firmware revision, most significant part first.
    pub version: [u8; 4],
}

impl std::fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "family {:04x} member {:04x} fw {}.{}.{}.{}",
            self.family,
            self.member,
            self.version[0],
            self.version[1],
            self.version[2],
            self.version[3]
        )
    }
}

/// The universal device-inquiry message, broadcast to any listener.
pub fn inquiry_frame() -> Vec<u8> {
    vec![sysex::SYSEX_START, 0x7e, 0x7f, 0x06, 0x01, sysex::SYSEX_END]
}

/// Build the inquiry reply the device sends. Emulator/tooling side.
pub fn inquiry_reply_frame(info: &DeviceInfo) -> Vec<u8> {
    let mut frame = vec![sysex::SYSEX_START, 0x7e, 0x00, 0x06, 0x02];
    frame.extend_from_slice(&sysex::MANUFACTURER_ID);
    frame.extend_from_slice(&info.family.to_le_bytes());
    frame.extend_from_slice(&info.member.to_le_bytes());
    frame.extend_from_slice(&info.version);
    frame.push(sysex::SYSEX_END);
    frame
}

/// Decode a device-inquiry reply.
///
/// Returns `None` for any frame that is not an inquiry reply carrying our
/// manufacturer id; during discovery that simply means "not one of ours".
pub fn parse_inquiry_reply(frame: &[u8]) -> Option<DeviceInfo> {
    // F0 7E ch 06 02 <mfr:3> <family:u16le> <member:u16le> <version:4> F7
    if frame.len() < 17 {
        return None;
    }
    if frame[0] != sysex::SYSEX_START
        || frame[1] != 0x7e
        || frame[3] != 0x06
        || frame[4] != 0x02
    {
        return None;
    }
    if frame[5..8] != sysex::MANUFACTURER_ID {
        return None;
    }
    Some(DeviceInfo {
        family: u16::from_le_bytes([frame[8], frame[9]]),
        member: u16::from_le_bytes([frame[10], frame[11]]),
        version: [frame[12], frame[13], frame[14], frame[15]],
    })
}

/// Fixed header at the front of a sample payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleHeader {
    /// Sample frames in the payload.
    pub frames: u32,
    /// Sample rate in Hz.
    pub rate: u32,
    /// Channel count.
    pub channels: u16,
    /// Bits per sample.
    pub bits: u16,
}

/// Magic opening a sample payload.
pub const SAMPLE_MAGIC: [u8; 4] = *b"ELKS";

/// Length of the sample header in bytes.
pub const SAMPLE_HEADER_LEN: usize = 16;

/// Decode the sample header from the front of a payload.
///
/// Pure decoding of fixed-offset fields; every read is bounds-checked by the
/// initial length test.
pub fn decode_sample_header(payload: &[u8]) -> Result<SampleHeader> {
    if payload.len() < SAMPLE_HEADER_LEN {
        return Err(Error::InvalidFrame(format!(
            "sample header needs {SAMPLE_HEADER_LEN} bytes, have {}",
            payload.len()
        )));
    }
    if payload[0..4] != SAMPLE_MAGIC {
        return Err(Error::InvalidFrame("bad sample header magic".into()));
    }
    let mut buf = &payload[4..SAMPLE_HEADER_LEN];
    Ok(SampleHeader {
        frames: buf.get_u32(),
        rate: buf.get_u32(),
        channels: buf.get_u16(),
        bits: buf.get_u16(),
    })
}
