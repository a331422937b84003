//! Common error types for elkfs.
//!
//! This module provides a centralized Error enum using thiserror,
//! with conversions from the MIDI backend and I/O errors used
//! throughout the crate.

use thiserror::Error;

/// Main error type for elkfs operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors from tokio or std
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// MIDI backend failed to initialize
    #[error("MIDI init error: {0}")]
    MidiInit(#[from] midir::InitError),

    /// MIDI port could not be queried
    #[error("MIDI port error: {0}")]
    MidiPort(#[from] midir::PortInfoError),

    /// MIDI port could not be connected
    #[error("MIDI connect error: {0}")]
    MidiConnect(String),

    /// Outbound MIDI write failed
    #[error("MIDI send error: {0}")]
    MidiSend(#[from] midir::SendError),

    /// No MIDI port matches the requested hardware id
    #[error("no such device: {0}")]
    NoDevice(String),

    /// The connection has been closed; no further round trips are possible
    #[error("connection closed")]
    Closed,

    /// The device stayed silent past the receive deadline
    #[error("device did not respond in time")]
    Timeout,

    /// The operation was cancelled by the caller
    #[error("operation cancelled")]
    Cancelled,

    /// A SysEx frame did not decode as a protocol message
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// The response echoed a sequence value other than the request's
    #[error("response out of step: expected seq {expected:#06x}, got {got:#06x}")]
    SequenceMismatch { expected: u16, got: u16 },

    /// The response echoed an opcode other than the request's
    #[error("response opcode mismatch: expected {expected:#04x}, got {got:#04x}")]
    OpcodeMismatch { expected: u8, got: u8 },

    /// The device answered the request with a non-success status
    #[error("device rejected request (status {0:#04x})")]
    DeviceRejected(u8),

    /// An assembled transfer did not match its declared checksum
    #[error("checksum mismatch: expected {expected:#010x}, got {got:#010x}")]
    ChecksumMismatch { expected: u32, got: u32 },

    /// A directory listing record could not be decoded
    #[error("malformed directory record at offset {0}")]
    MalformedRecord(usize),

    /// A path operand cannot be carried in the protocol
    #[error("invalid path: {0}")]
    InvalidPath(String),
}

/// Convenience type alias for Results using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
