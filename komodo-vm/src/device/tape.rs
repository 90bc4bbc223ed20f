//! File-backed tape device.
//!
//! The image is the 128-byte scratch pad followed by a log of
//! variable-length records, each framed by a leading and trailing 32-bit
//! big-endian length. The block id of a packet is the logical record
//! position from the load point.

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use komodo_types::bytes::pack_words;
use tracing::{debug, warn};

use super::scratchpad::{ScratchPadHeader, MINOR_VERSION, SCRATCH_PAD_LEN};
use super::{compose_info_block, BlockGeometry, Device, DeviceKind, IoFunction, IoPacket, IoStatus, MountError};

#[derive(Debug)]
pub struct FileSystemTapeDevice {
    ready: bool,
    write_protected: bool,
    unit_attention: bool,
    path: Option<PathBuf>,
    /// Records resident while mounted; flushed on unmount/unload.
    records: Option<Vec<Vec<u8>>>,
}

impl FileSystemTapeDevice {
    pub fn new() -> Self {
        FileSystemTapeDevice {
            ready: false,
            write_protected: false,
            unit_attention: false,
            path: None,
            records: None,
        }
    }

    /// Format a fresh, empty tape image at `path`.
    pub fn prep(path: &Path) -> Result<(), MountError> {
        let header = ScratchPadHeader::new(0, 0, 0);
        std::fs::write(path, header.to_bytes()).map_err(MountError::Io)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), MountError> {
        let (Some(path), Some(records)) = (&self.path, &self.records) else {
            return Ok(());
        };
        let header = ScratchPadHeader::new(0, 0, records.len() as u32);
        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(MountError::Io)?;
        file.write_all(&header.to_bytes()).map_err(MountError::Io)?;
        for record in records {
            let frame = (record.len() as u32).to_be_bytes();
            file.write_all(&frame).map_err(MountError::Io)?;
            file.write_all(record).map_err(MountError::Io)?;
            file.write_all(&frame).map_err(MountError::Io)?;
        }
        Ok(())
    }

    fn load(path: &Path) -> Result<Vec<Vec<u8>>, MountError> {
        let mut file = OpenOptions::new().read(true).open(path)?;
        ScratchPadHeader::read_from(&mut file)?;
        file.seek(SeekFrom::Start(SCRATCH_PAD_LEN as u64)).map_err(MountError::Io)?;

        let mut records = Vec::new();
        loop {
            let mut frame = [0_u8; 4];
            match file.read_exact(&mut frame) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(MountError::Io(e)),
            }
            let len = u32::from_be_bytes(frame) as usize;
            let mut record = vec![0; len];
            file.read_exact(&mut record).map_err(MountError::Io)?;
            let mut trailer = [0_u8; 4];
            file.read_exact(&mut trailer).map_err(MountError::Io)?;
            if trailer != frame {
                return Err(MountError::BadGeometry);
            }
            records.push(record);
        }
        Ok(records)
    }
}

impl Default for FileSystemTapeDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for FileSystemTapeDevice {
    fn kind(&self) -> DeviceKind {
        DeviceKind::FileSystemTape
    }

    fn is_mounted(&self) -> bool {
        self.records.is_some()
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn is_write_protected(&self) -> bool {
        self.write_protected
    }

    fn set_ready(&mut self, ready: bool) -> Result<(), MountError> {
        if ready && !self.is_mounted() {
            return Err(MountError::NotMounted);
        }
        self.ready = ready;
        Ok(())
    }

    fn set_write_protected(&mut self, protected: bool) {
        self.write_protected = protected;
    }

    fn mount(&mut self, path: &Path) -> Result<(), MountError> {
        if self.is_mounted() {
            return Err(MountError::AlreadyMounted);
        }
        let mut file = OpenOptions::new().read(true).open(path)?;
        let header = ScratchPadHeader::read_from(&mut file)?;
        if header.minor_version != MINOR_VERSION {
            warn!(
                path = %path.display(),
                found = header.minor_version,
                expected = MINOR_VERSION,
                "volume minor version differs",
            );
        }
        drop(file);

        self.records = Some(Self::load(path)?);
        self.path = Some(path.to_path_buf());
        self.unit_attention = true;
        debug!(path = %path.display(), "tape volume mounted");
        Ok(())
    }

    fn unmount(&mut self) -> Result<(), MountError> {
        if !self.is_mounted() {
            return Err(MountError::NotMounted);
        }
        if self.ready {
            return Err(MountError::DeviceReady);
        }
        self.flush()?;
        self.records = None;
        self.path = None;
        self.unit_attention = false;
        Ok(())
    }

    fn geometry(&self) -> Option<BlockGeometry> {
        self.records.as_ref().map(|records| BlockGeometry {
            block_size: 0,
            block_count: records.len() as u64,
            prep_factor: 0,
        })
    }

    fn handle_io(&mut self, packet: &mut IoPacket) {
        packet.status = match packet.function {
            IoFunction::None => IoStatus::Successful,
            IoFunction::GetInfo => {
                let info = compose_info_block(self, self.unit_attention);
                packet.buffer = pack_words(&info);
                self.unit_attention = false;
                IoStatus::Successful
            }
            IoFunction::Read => {
                if !self.ready {
                    IoStatus::NotReady
                } else if self.unit_attention {
                    IoStatus::UnitAttention
                } else {
                    let records = self.records.as_ref().expect("ready implies mounted");
                    match records.get(packet.block_id as usize) {
                        Some(record) => {
                            packet.buffer = record.clone();
                            packet.byte_count = record.len() as u64;
                            IoStatus::Successful
                        }
                        None => IoStatus::EndOfTape,
                    }
                }
            }
            IoFunction::Write => {
                if !self.ready {
                    IoStatus::NotReady
                } else if self.unit_attention {
                    IoStatus::UnitAttention
                } else if self.write_protected {
                    IoStatus::WriteProtected
                } else {
                    let position = packet.block_id as usize;
                    let records = self.records.as_mut().expect("ready implies mounted");
                    if position > records.len() {
                        IoStatus::InvalidBlockId
                    } else {
                        // writing repositions the tail of the log
                        records.truncate(position);
                        records.push(packet.buffer.clone());
                        IoStatus::Successful
                    }
                }
            }
            IoFunction::Reset => {
                if self.ready {
                    self.unit_attention = false;
                    IoStatus::Successful
                } else {
                    IoStatus::NotReady
                }
            }
            IoFunction::Unload => {
                self.ready = false;
                match self.unmount() {
                    Ok(()) => IoStatus::Successful,
                    Err(MountError::NotMounted) => IoStatus::NotReady,
                    Err(_) => IoStatus::MediaError,
                }
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_survive_unload_and_remount() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.tape");
        FileSystemTapeDevice::prep(&path).unwrap();

        let mut tape = FileSystemTapeDevice::new();
        tape.mount(&path).unwrap();
        tape.set_ready(true).unwrap();
        tape.unit_attention = false;

        for (id, record) in [b"first".to_vec(), b"second record".to_vec()].iter().enumerate() {
            let mut packet = IoPacket::write(id as u64, record.clone());
            tape.handle_io(&mut packet);
            assert_eq!(packet.status, IoStatus::Successful);
        }

        let mut unload = IoPacket::of_function(IoFunction::Unload);
        tape.handle_io(&mut unload);
        assert_eq!(unload.status, IoStatus::Successful);
        assert!(!tape.is_mounted());

        tape.mount(&path).unwrap();
        tape.set_ready(true).unwrap();
        tape.unit_attention = false;

        let mut read = IoPacket::read(1, 0);
        tape.handle_io(&mut read);
        assert_eq!(read.status, IoStatus::Successful);
        assert_eq!(read.buffer, b"second record");

        let mut past = IoPacket::read(2, 0);
        tape.handle_io(&mut past);
        assert_eq!(past.status, IoStatus::EndOfTape);
    }

    #[test]
    fn write_truncates_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.tape");
        FileSystemTapeDevice::prep(&path).unwrap();

        let mut tape = FileSystemTapeDevice::new();
        tape.mount(&path).unwrap();
        tape.set_ready(true).unwrap();
        tape.unit_attention = false;

        for id in 0..3_u64 {
            let mut packet = IoPacket::write(id, vec![id as u8; 4]);
            tape.handle_io(&mut packet);
            assert_eq!(packet.status, IoStatus::Successful);
        }

        // rewrite record 1; record 2 is gone
        let mut packet = IoPacket::write(1, b"new".to_vec());
        tape.handle_io(&mut packet);
        assert_eq!(packet.status, IoStatus::Successful);

        let mut read = IoPacket::read(2, 0);
        tape.handle_io(&mut read);
        assert_eq!(read.status, IoStatus::EndOfTape);
    }
}
