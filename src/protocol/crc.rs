//! # CRC Checksums
//!
//! CRC-32/ISO-HDLC (IEEE 802.3) for DSU packets, plus the CRC-16/ARC used to
//! fold a device name into its joystick GUID.
//!
//! **Polynomial**: 0xEDB88320 (reflected 0x04C11DB7)
//! **Initial Value**: 0xFFFFFFFF
//! **Final XOR**: 0xFFFFFFFF

use crc::{Crc, CRC_16_ARC, CRC_32_ISO_HDLC};

/// CRC-32 calculator with lookup table
static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// CRC-16/ARC calculator with lookup table
static CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_ARC);

/// Incremental CRC32 state
///
/// Lets callers checksum a frame in pieces, e.g. substituting zeros for the
/// embedded CRC field without copying the datagram.
#[derive(Clone)]
pub struct Crc32 {
    digest: crc::Digest<'static, u32>,
}

impl Crc32 {
    pub fn new() -> Self {
        Self { digest: CRC32.digest() }
    }

    /// Feed `data` into the checksum
    pub fn update(&mut self, data: &[u8]) -> &mut Self {
        self.digest.update(data);
        self
    }

    /// Final checksum value
    pub fn finalize(&self) -> u32 {
        self.digest.clone().finalize()
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

/// Calculate the CRC32 of `data`
///
/// # Arguments
///
/// * `data` - Byte slice to calculate CRC for (full frame with CRC field zeroed)
///
/// # Examples
///
/// ```
/// use dsu_client::protocol::crc::crc32;
///
/// assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
/// ```
#[inline]
pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

/// CRC-16/ARC over `data`
#[inline]
pub fn crc16(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc32_empty() {
        assert_eq!(crc32(&[]), 0x0000_0000);
    }

    #[test]
    fn test_crc32_check_value() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn test_crc32_incremental_matches_one_shot() {
        let data = b"The quick brown fox jumps over the lazy dog";
        let mut crc = Crc32::new();
        crc.update(&data[..10]).update(&data[10..]);
        assert_eq!(crc.finalize(), crc32(data));
        assert_eq!(crc.finalize(), 0x414F_A339);
    }

    #[test]
    fn test_crc32_finalize_does_not_consume() {
        let mut crc = Crc32::new();
        crc.update(b"DSUS");
        let first = crc.finalize();
        assert_eq!(crc.finalize(), first);

        crc.update(&[0xE9, 0x03]);
        assert_eq!(crc.finalize(), crc32(b"DSUS\xe9\x03"));
    }

    #[test]
    fn test_crc32_changes_with_data() {
        assert_ne!(crc32(&[0x10, 0x00, 0x01]), crc32(&[0x10, 0x00, 0x02]));
    }

    #[test]
    fn test_crc16_check_value() {
        assert_eq!(crc16(b"123456789"), 0xBB3D);
        assert_eq!(crc16(&[]), 0);
    }
}
