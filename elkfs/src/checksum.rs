//! Checksum shared by directory entries and file transfers.
//!
//! The device reports a CRC-32 for every file it lists and declares one for
//! every transfer it opens. The host recomputes it over assembled payloads
//! and refuses to accept a mismatch.

use crc_all::Crc;

/// Standard CRC-32 over `bytes`, as used on the wire.
pub fn crc32(bytes: &[u8]) -> u32 {
    const POLYNOMIAL: u32 = 0x04c11db7;
    const WIDTH: usize = 32;
    const INITIAL: u32 = 0xffff_ffff;
    const XOR: u32 = 0xffff_ffff;
    const REFLECT: bool = true;
    let mut crc32 = Crc::<u32>::new(POLYNOMIAL, WIDTH, INITIAL, XOR, REFLECT);

    crc32.update(bytes);
    crc32.finish()
}
