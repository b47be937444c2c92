//! Running CRC-32 (IEEE 802.3, reflected) used to verify streamed files.
//!
//! Values match zlib's `crc32()`, so a checksum folded chunk by chunk equals
//! the one computed over the whole file in one go.

use std::fmt;

use crc::{Crc, Digest, CRC_32_ISO_HDLC};

static CRC_HASHER: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Incremental CRC-32 accumulator.
#[derive(Clone)]
pub struct Crc32 {
    digest: Digest<'static, u32>,
}

impl Crc32 {
    /// Start a new checksum.
    pub fn new() -> Self {
        Self {
            digest: CRC_HASHER.digest(),
        }
    }

    /// Fold a chunk into the running checksum.
    pub fn update(&mut self, data: &[u8]) {
        self.digest.update(data);
    }

    /// Checksum of everything folded so far.
    pub fn value(&self) -> u32 {
        self.digest.clone().finalize()
    }
}

impl Default for Crc32 {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Crc32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Crc32")
            .field("value", &format_args!("{:08x}", self.value()))
            .finish()
    }
}

/// Checksum a complete buffer.
pub fn crc32(data: &[u8]) -> u32 {
    CRC_HASHER.checksum(data)
}
