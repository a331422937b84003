//! Frame dissection engine.
//!
//! Decodes one captured SysEx frame at a time using the main library's
//! protocol types, so the dissector can never drift from what the host
//! actually speaks.

use std::fmt;

use colored::Colorize;

use elkfs::proto::{self, ops, status, DeviceInfo};
use elkfs::sysex;

/// Who sent the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    HostToDevice,
    DeviceToHost,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::HostToDevice => write!(f, "{}", "host>dev".blue()),
            Direction::DeviceToHost => write!(f, "{}", "dev>host".green()),
        }
    }
}

/// Decoded frame content.
#[derive(Debug)]
pub enum FrameContent {
    Request(proto::Request),
    Response(proto::Response),
    Inquiry,
    InquiryReply(DeviceInfo),
    Invalid(String),
}

/// One dissected capture line.
#[derive(Debug)]
pub struct DissectedFrame {
    pub direction: Direction,
    pub raw_len: usize,
    pub content: FrameContent,
}

/// Dissect one complete SysEx frame.
pub fn dissect_frame(direction: Direction, data: &[u8]) -> DissectedFrame {
    let content = if data == proto::inquiry_frame() {
        FrameContent::Inquiry
    } else if let Some(info) = proto::parse_inquiry_reply(data) {
        FrameContent::InquiryReply(info)
    } else {
        match direction {
            Direction::HostToDevice => match proto::parse_request(data) {
                Ok(req) => FrameContent::Request(req),
                Err(e) => FrameContent::Invalid(e.to_string()),
            },
            Direction::DeviceToHost => match proto::parse_response(data) {
                Ok(resp) => FrameContent::Response(resp),
                Err(e) => FrameContent::Invalid(e.to_string()),
            },
        }
    };
    DissectedFrame {
        direction,
        raw_len: data.len(),
        content,
    }
}

impl fmt::Display for DissectedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:4}B ", self.direction, self.raw_len)?;
        match &self.content {
            FrameContent::Inquiry => write!(f, "device-inquiry"),
            FrameContent::InquiryReply(info) => write!(f, "inquiry-reply {info}"),
            FrameContent::Request(req) => write!(
                f,
                "req  seq={:5} {} ({} operand bytes)",
                req.seq,
                ops::name(req.opcode),
                req.operands.len()
            ),
            FrameContent::Response(resp) => write!(
                f,
                "resp seq={:5} {} {} ({} data bytes)",
                resp.seq,
                ops::name(resp.opcode),
                if resp.status == status::OK {
                    status::describe(resp.status).green()
                } else {
                    status::describe(resp.status).red()
                },
                resp.data.len()
            ),
            FrameContent::Invalid(reason) => {
                write!(f, "{} {reason}", "invalid".red())
            }
        }
    }
}

/// Parse one capture line: a direction marker (`>` host to device, `<`
/// device to host) followed by hex bytes.
pub fn parse_line(line: &str) -> Option<(Direction, Vec<u8>)> {
    let line = line.trim();
    let (direction, rest) = if let Some(rest) = line.strip_prefix('>') {
        (Direction::HostToDevice, rest)
    } else if let Some(rest) = line.strip_prefix('<') {
        (Direction::DeviceToHost, rest)
    } else {
        return None;
    };
    let mut bytes = Vec::new();
    for tok in rest.split_whitespace() {
        bytes.push(u8::from_str_radix(tok, 16).ok()?);
    }
    if bytes.first() != Some(&sysex::SYSEX_START) {
        return None;
    }
    Some((direction, bytes))
}
