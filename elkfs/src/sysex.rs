//! SysEx framing for the vendor protocol.
//!
//! Every protocol message travels as one System Exclusive message: the
//! reserved start byte, the vendor header, a 7-bit armored payload, and the
//! end byte. MIDI data bytes must keep bit 7 clear, so the clear payload is
//! expanded before transmission: each group of up to seven bytes is prefixed
//! by one byte carrying the group's high bits.

use crate::error::{Error, Result};

/// SysEx start delimiter.
pub const SYSEX_START: u8 = 0xf0;
/// SysEx end delimiter.
pub const SYSEX_END: u8 = 0xf7;

/// Elektron's MIDI manufacturer identifier.
pub const MANUFACTURER_ID: [u8; 3] = [0x00, 0x20, 0x3c];

/// Full message header: start byte, manufacturer id, product and protocol
/// revision bytes. Everything between this and the end byte is armored
/// payload.
pub const MSG_HEADER: [u8; 6] = [SYSEX_START, 0x00, 0x20, 0x3c, 0x10, 0x00];

/// Armor `clear` for transmission as MIDI data bytes.
///
/// Groups of up to 7 clear bytes become 1 + n wire bytes: the prefix holds
/// bit 7 of each byte in the group (bit i for group byte i), followed by the
/// low 7 bits of each byte.
pub fn encode_7bit(clear: &[u8]) -> Vec<u8> {
    let mut wire = Vec::with_capacity(clear.len() + clear.len() / 7 + 1);
    for group in clear.chunks(7) {
        let mut msbs = 0u8;
        for (i, b) in group.iter().enumerate() {
            msbs |= (b >> 7) << i;
        }
        wire.push(msbs);
        wire.extend(group.iter().map(|b| b & 0x7f));
    }
    wire
}

/// Recover the clear payload from armored wire bytes.
///
/// Fails if any wire byte has bit 7 set or if a group prefix arrives with no
/// data bytes behind it.
pub fn decode_7bit(wire: &[u8]) -> Result<Vec<u8>> {
    if wire.iter().any(|b| b & 0x80 != 0) {
        return Err(Error::InvalidFrame("armored payload byte above 0x7f".into()));
    }
    if wire.len() % 8 == 1 {
        return Err(Error::InvalidFrame("armored group with no data bytes".into()));
    }
    let mut clear = Vec::with_capacity(wire.len() - wire.len() / 8);
    for group in wire.chunks(8) {
        let msbs = group[0];
        for (i, b) in group[1..].iter().enumerate() {
            clear.push(b | ((msbs >> i) & 1) << 7);
        }
    }
    Ok(clear)
}

/// Wrap a clear payload into a complete vendor SysEx frame.
pub fn enframe(clear: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(MSG_HEADER.len() + clear.len() + clear.len() / 7 + 2);
    frame.extend_from_slice(&MSG_HEADER);
    frame.extend_from_slice(&encode_7bit(clear));
    frame.push(SYSEX_END);
    frame
}

/// Unwrap a complete vendor SysEx frame back to its clear payload.
pub fn deframe(frame: &[u8]) -> Result<Vec<u8>> {
    if frame.len() < MSG_HEADER.len() + 1 {
        return Err(Error::InvalidFrame(format!(
            "frame too short: {} bytes",
            frame.len()
        )));
    }
    if frame[..MSG_HEADER.len()] != MSG_HEADER {
        return Err(Error::InvalidFrame("not a vendor message".into()));
    }
    if *frame.last().unwrap() != SYSEX_END {
        return Err(Error::InvalidFrame("missing end delimiter".into()));
    }
    decode_7bit(&frame[MSG_HEADER.len()..frame.len() - 1])
}
