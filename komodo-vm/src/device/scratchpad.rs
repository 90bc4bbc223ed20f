//! The 128-byte scratch-pad header at the front of every volume image.

use std::io::{self, Read, Seek, SeekFrom, Write};

use super::MountError;

/// Byte length of the header.
pub const SCRATCH_PAD_LEN: usize = 128;

/// 8-byte volume identifier, "KOMODO" space padded.
pub const VOLUME_IDENTIFIER: [u8; 8] = *b"KOMODO  ";

/// Major version this implementation reads and writes.
pub const MAJOR_VERSION: u32 = 1;

/// Minor version this implementation writes.
pub const MINOR_VERSION: u32 = 2;

/// Parsed scratch-pad header.
///
/// All multi-byte fields are big-endian. A minor-version mismatch is a
/// warning only; a major-version or identifier mismatch refuses the mount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScratchPadHeader {
    pub major_version: u32,
    pub minor_version: u32,
    /// Words recoverable from one block.
    pub prep_factor: u32,
    /// Bytes per block.
    pub block_size: u32,
    /// Blocks on the medium.
    pub block_count: u32,
}

impl ScratchPadHeader {
    pub const fn new(prep_factor: u32, block_size: u32, block_count: u32) -> Self {
        ScratchPadHeader {
            major_version: MAJOR_VERSION,
            minor_version: MINOR_VERSION,
            prep_factor,
            block_size,
            block_count,
        }
    }

    /// Serialize into the 128-byte on-media form.
    pub fn to_bytes(&self) -> [u8; SCRATCH_PAD_LEN] {
        let mut bytes = [0_u8; SCRATCH_PAD_LEN];
        bytes[0..8].copy_from_slice(&VOLUME_IDENTIFIER);
        bytes[8..12].copy_from_slice(&self.major_version.to_be_bytes());
        bytes[12..16].copy_from_slice(&self.minor_version.to_be_bytes());
        bytes[16..20].copy_from_slice(&self.prep_factor.to_be_bytes());
        bytes[20..24].copy_from_slice(&self.block_size.to_be_bytes());
        bytes[24..28].copy_from_slice(&self.block_count.to_be_bytes());
        bytes
    }

    /// Parse and validate an on-media header.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MountError> {
        if bytes.len() < SCRATCH_PAD_LEN {
            return Err(MountError::BadGeometry);
        }
        if bytes[0..8] != VOLUME_IDENTIFIER {
            return Err(MountError::BadIdentifier);
        }
        let word = |at: usize| u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);

        let major_version = word(8);
        if major_version != MAJOR_VERSION {
            return Err(MountError::VersionMismatch {
                expected: MAJOR_VERSION,
                found: major_version,
            });
        }

        Ok(ScratchPadHeader {
            major_version,
            minor_version: word(12),
            prep_factor: word(16),
            block_size: word(20),
            block_count: word(24),
        })
    }

    /// Read the header from the front of an image file.
    pub fn read_from<R: Read + Seek>(source: &mut R) -> Result<Self, MountError> {
        source.seek(SeekFrom::Start(0)).map_err(MountError::Io)?;
        let mut bytes = [0_u8; SCRATCH_PAD_LEN];
        source.read_exact(&mut bytes).map_err(MountError::Io)?;
        Self::from_bytes(&bytes)
    }

    /// Write the header to the front of an image file.
    pub fn write_to<W: Write + Seek>(&self, sink: &mut W) -> io::Result<()> {
        sink.seek(SeekFrom::Start(0))?;
        sink.write_all(&self.to_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let header = ScratchPadHeader::new(28, 128, 1000);
        let parsed = ScratchPadHeader::from_bytes(&header.to_bytes()).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn bad_identifier_is_rejected() {
        let mut bytes = ScratchPadHeader::new(28, 128, 1000).to_bytes();
        bytes[0] = b'X';
        assert!(matches!(
            ScratchPadHeader::from_bytes(&bytes),
            Err(MountError::BadIdentifier)
        ));
    }

    #[test]
    fn major_version_mismatch_is_rejected() {
        let mut header = ScratchPadHeader::new(28, 128, 1000);
        header.major_version = MAJOR_VERSION + 1;
        assert!(matches!(
            ScratchPadHeader::from_bytes(&header.to_bytes()),
            Err(MountError::VersionMismatch { .. })
        ));
    }

    #[test]
    fn minor_version_mismatch_is_tolerated() {
        let mut header = ScratchPadHeader::new(28, 128, 1000);
        header.minor_version = MINOR_VERSION + 7;
        let parsed = ScratchPadHeader::from_bytes(&header.to_bytes()).unwrap();
        assert_eq!(parsed.minor_version, MINOR_VERSION + 7);
    }
}
