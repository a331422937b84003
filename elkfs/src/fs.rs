//! Filesystem operations on the device's internal storage.
//!
//! Every operation here is a single round trip through the session layer.
//! Directory listings come back as one response holding all records; the
//! device does not page. [`DirIterator`] walks that buffer lazily, one
//! record per step, and never reads past its logical end.

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::proto::{self, ops};
use crate::session::Connection;
use crate::tracing::prelude::*;

/// Entry type as reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
}

impl EntryKind {
    /// The single-character rendering used in listings.
    pub fn as_char(self) -> char {
        match self {
            EntryKind::Directory => 'D',
            EntryKind::File => 'F',
        }
    }
}

/// One decoded directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dentry {
    pub kind: EntryKind,
    /// Size in bytes; zero for directories.
    pub size: u32,
    /// Device-computed CRC-32 of the entry's content.
    pub checksum: u32,
    pub name: String,
}

// Record layout: type:u8, size:u32be, cksum:u32be, name NUL.
const DENTRY_FIXED_LEN: usize = 9;

/// Forward-only cursor over one listing response.
///
/// Single pass: consuming an entry advances the cursor, and there is no way
/// back short of issuing the listing again. A malformed record yields one
/// `Err`, after which the iterator fuses; resynchronizing inside a corrupt
/// buffer would only invent entries.
pub struct DirIterator {
    msg: Vec<u8>,
    pos: usize,
    failed: bool,
}

impl DirIterator {
    pub(crate) fn new(msg: Vec<u8>) -> Self {
        Self {
            msg,
            pos: 0,
            failed: false,
        }
    }

    fn decode_next(&mut self) -> Result<Dentry> {
        let rec = &self.msg[self.pos..];
        if rec.len() < DENTRY_FIXED_LEN + 1 {
            return Err(Error::MalformedRecord(self.pos));
        }
        let kind = match rec[0] {
            b'D' => EntryKind::Directory,
            b'F' => EntryKind::File,
            _ => return Err(Error::MalformedRecord(self.pos)),
        };
        let size = u32::from_be_bytes([rec[1], rec[2], rec[3], rec[4]]);
        let checksum = u32::from_be_bytes([rec[5], rec[6], rec[7], rec[8]]);
        let name_end = rec[DENTRY_FIXED_LEN..]
            .iter()
            .position(|&b| b == 0)
            .ok_or(Error::MalformedRecord(self.pos))?;
        let name = std::str::from_utf8(&rec[DENTRY_FIXED_LEN..DENTRY_FIXED_LEN + name_end])
            .map_err(|_| Error::MalformedRecord(self.pos))?
            .to_string();

        self.pos += DENTRY_FIXED_LEN + name_end + 1;
        Ok(Dentry {
            kind,
            size,
            checksum,
            name,
        })
    }
}

impl Iterator for DirIterator {
    type Item = Result<Dentry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.msg.len() {
            return None;
        }
        match self.decode_next() {
            Ok(dentry) => Some(Ok(dentry)),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

impl Connection {
    /// List the directory at `path`.
    ///
    /// The whole listing arrives in one response; the returned iterator
    /// decodes it entry by entry.
    pub async fn read_dir(&self, path: &str) -> Result<DirIterator> {
        let operands = proto::path_operand(path)?;
        let data = self
            .roundtrip(ops::LIST_DIR, &operands, &CancellationToken::new(), false)
            .await?
            .into_data()?;
        Ok(DirIterator::new(data))
    }

    /// Create the directory at `path`.
    pub async fn create_dir(&self, path: &str) -> Result<()> {
        self.simple_op(ops::CREATE_DIR, proto::path_operand(path)?)
            .await
    }

    /// Delete the file at `path`.
    pub async fn delete_file(&self, path: &str) -> Result<()> {
        self.simple_op(ops::DELETE_FILE, proto::path_operand(path)?)
            .await
    }

    /// Delete the directory at `path`.
    pub async fn delete_dir(&self, path: &str) -> Result<()> {
        self.simple_op(ops::DELETE_DIR, proto::path_operand(path)?)
            .await
    }

    /// Rename (or move) `old` to `new`.
    pub async fn rename(&self, old: &str, new: &str) -> Result<()> {
        let mut operands = proto::path_operand(old)?;
        operands.extend(proto::path_operand(new)?);
        self.simple_op(ops::RENAME, operands).await
    }

    async fn simple_op(&self, opcode: u8, operands: Vec<u8>) -> Result<()> {
        let data = self
            .roundtrip(opcode, &operands, &CancellationToken::new(), false)
            .await?
            .into_data()?;
        if !data.is_empty() {
            trace!(
                op = ops::name(opcode),
                bytes = data.len(),
                "Ignoring data in status-only response"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::status;
    use crate::session::tests::scripted_connection;

    pub(crate) fn encode_dentry(kind: u8, size: u32, checksum: u32, name: &str) -> Vec<u8> {
        let mut rec = vec![kind];
        rec.extend_from_slice(&size.to_be_bytes());
        rec.extend_from_slice(&checksum.to_be_bytes());
        rec.extend_from_slice(name.as_bytes());
        rec.push(0);
        rec
    }

    #[test]
    fn test_listing_yields_entries_in_order() {
        let mut msg = encode_dentry(b'F', 1024, 0xdeadbeef, "kick.wav");
        msg.extend(encode_dentry(b'D', 0, 0x00000000, "kits"));

        let mut iter = DirIterator::new(msg);
        assert_eq!(
            iter.next().unwrap().unwrap(),
            Dentry {
                kind: EntryKind::File,
                size: 1024,
                checksum: 0xdeadbeef,
                name: "kick.wav".into()
            }
        );
        assert_eq!(
            iter.next().unwrap().unwrap(),
            Dentry {
                kind: EntryKind::Directory,
                size: 0,
                checksum: 0,
                name: "kits".into()
            }
        );
        assert!(iter.next().is_none());
        // End-of-listing is stable.
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_empty_listing_ends_immediately() {
        let mut iter = DirIterator::new(Vec::new());
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_truncated_record_is_malformed_and_fuses() {
        let mut msg = encode_dentry(b'F', 10, 1, "a.wav");
        let full = encode_dentry(b'F', 10, 1, "b.wav");
        msg.extend(&full[..full.len() - 3]); // second record loses its NUL

        let mut iter = DirIterator::new(msg);
        assert!(iter.next().unwrap().is_ok());
        let err = iter.next().unwrap().unwrap_err();
        assert!(matches!(err, Error::MalformedRecord(offset) if offset > 0));
        // No resynchronization attempts after a parse error.
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_unknown_type_byte_is_malformed() {
        let msg = encode_dentry(b'X', 0, 0, "weird");
        let mut iter = DirIterator::new(msg);
        assert!(matches!(
            iter.next().unwrap().unwrap_err(),
            Error::MalformedRecord(0)
        ));
    }

    #[test]
    fn test_entry_name_must_be_utf8() {
        let msg = encode_dentry(b'F', 0, 0, "ok");
        let mut bad = msg.clone();
        bad[DENTRY_FIXED_LEN] = 0xff;
        let mut iter = DirIterator::new(bad);
        assert!(iter.next().unwrap().is_err());
    }

    #[tokio::test]
    async fn test_read_dir_round_trip() {
        let conn = scripted_connection(|frame| {
            let req = proto::parse_request(&frame).unwrap();
            assert_eq!(req.opcode, ops::LIST_DIR);
            assert_eq!(req.operands, b"/samples\0");
            let mut data = encode_dentry(b'F', 1024, 0xdeadbeef, "kick.wav");
            data.extend(encode_dentry(b'D', 0, 0, "kits"));
            Some(proto::response_frame(req.seq, req.opcode, status::OK, &data))
        })
        .await;

        let entries: Vec<Dentry> = conn
            .read_dir("/samples")
            .await
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "kick.wav");
        assert_eq!(entries[1].kind, EntryKind::Directory);
    }

    #[tokio::test]
    async fn test_missing_path_is_device_rejected() {
        let conn = scripted_connection(|frame| {
            let req = proto::parse_request(&frame).unwrap();
            Some(proto::response_frame(
                req.seq,
                req.opcode,
                status::NOT_FOUND,
                &[],
            ))
        })
        .await;

        let err = conn.delete_file("/nope.wav").await.unwrap_err();
        assert!(matches!(err, Error::DeviceRejected(status::NOT_FOUND)));
    }

    #[tokio::test]
    async fn test_rename_sends_both_paths() {
        let conn = scripted_connection(|frame| {
            let req = proto::parse_request(&frame).unwrap();
            assert_eq!(req.opcode, ops::RENAME);
            assert_eq!(req.operands, b"/a.wav\0/b.wav\0");
            Some(proto::response_frame(req.seq, req.opcode, status::OK, &[]))
        })
        .await;

        conn.rename("/a.wav", "/b.wav").await.unwrap();
    }
}
