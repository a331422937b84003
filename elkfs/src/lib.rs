//! Remote file management for Elektron samplers over MIDI System Exclusive.
//!
//! The device exposes its internal storage through a vendor request/response
//! protocol carried in SysEx messages. This crate layers, bottom to top:
//!
//! - [`port`]: MIDI port discovery and the raw byte-stream handles
//! - [`transport`]: SysEx framing with timeout and cooperative cancellation
//! - [`session`]: sequence-correlated round trips over one shared connection
//! - [`fs`]: directory listing, create/rename/delete
//! - [`transfer`]: chunked, checksummed, cancellable upload and download
//!
//! A [`Connection`] is the entry point: open one against a discovered device,
//! then issue filesystem and transfer operations through it. Exactly one
//! round trip is in flight per connection at a time; concurrent callers
//! queue on the connection's internal lock.

pub mod checksum;
pub mod error;
pub mod fs;
pub mod port;
pub mod proto;
pub mod session;
pub mod sysex;
pub mod tracing;
pub mod transfer;
pub mod transport;

pub use error::{Error, Result};
pub use fs::{Dentry, DirIterator, EntryKind};
pub use port::{discover_devices, DeviceDescriptor, PortIo, SysexOutput};
pub use proto::{decode_sample_header, DeviceInfo, SampleHeader};
pub use session::Connection;
