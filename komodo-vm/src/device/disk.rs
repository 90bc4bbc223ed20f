//! Disk devices, file backed and scratch.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use komodo_types::bytes::{pack_words, word_count_for};
use tracing::{debug, warn};

use super::scratchpad::{ScratchPadHeader, MINOR_VERSION, SCRATCH_PAD_LEN};
use super::{compose_info_block, BlockGeometry, Device, DeviceKind, IoFunction, IoPacket, IoStatus, MountError};

/// The block sizes a disk volume may be prepped with, in bytes.
pub const DISK_BLOCK_SIZES: [u64; 7] = [128, 256, 512, 1024, 2048, 4096, 8192];

/// State common to both disk flavors.
#[derive(Debug, Default)]
struct DiskState {
    geometry: Option<BlockGeometry>,
    ready: bool,
    write_protected: bool,
    /// Set at mount, cleared by GetInfo; read/write refuse while set.
    unit_attention: bool,
}

impl DiskState {
    /// Gate a read or write; `Successful` means the transfer may proceed.
    fn validate_transfer(&self, packet: &IoPacket, writing: bool) -> IoStatus {
        if !self.ready {
            return IoStatus::NotReady;
        }
        if self.unit_attention {
            return IoStatus::UnitAttention;
        }
        if writing && self.write_protected {
            return IoStatus::WriteProtected;
        }
        let Some(geometry) = self.geometry else {
            return IoStatus::NotReady;
        };
        if packet.block_id >= geometry.block_count {
            return IoStatus::InvalidBlockId;
        }
        if packet.byte_count == 0 || packet.byte_count % geometry.block_size != 0 {
            return IoStatus::InvalidBlockSize;
        }
        if packet.block_id + packet.byte_count / geometry.block_size > geometry.block_count {
            return IoStatus::InvalidBlockCount;
        }
        IoStatus::Successful
    }
}

/// A disk whose medium is a host file: the 128-byte scratch pad followed by
/// `block_count * block_size` data bytes.
#[derive(Debug)]
pub struct FileSystemDiskDevice {
    state: DiskState,
    file: Option<File>,
    path: Option<PathBuf>,
}

impl FileSystemDiskDevice {
    pub fn new() -> Self {
        FileSystemDiskDevice {
            state: DiskState::default(),
            file: None,
            path: None,
        }
    }

    /// Format a fresh volume image at `path`.
    pub fn prep(path: &Path, block_size: u64, block_count: u64) -> Result<(), MountError> {
        if !DISK_BLOCK_SIZES.contains(&block_size) {
            return Err(MountError::BadGeometry);
        }
        let prep_factor = word_count_for(block_size as usize) as u32;
        let header = ScratchPadHeader::new(prep_factor, block_size as u32, block_count as u32);

        let mut file = File::create(path).map_err(MountError::Io)?;
        file.write_all(&header.to_bytes()).map_err(MountError::Io)?;
        file.set_len(SCRATCH_PAD_LEN as u64 + block_size * block_count)
            .map_err(MountError::Io)?;
        Ok(())
    }

    fn data_offset(&self, packet: &IoPacket) -> u64 {
        let block_size = self.state.geometry.map_or(0, |g| g.block_size);
        SCRATCH_PAD_LEN as u64 + packet.block_id * block_size
    }
}

impl Default for FileSystemDiskDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for FileSystemDiskDevice {
    fn kind(&self) -> DeviceKind {
        DeviceKind::FileSystemDisk
    }

    fn is_mounted(&self) -> bool {
        self.file.is_some()
    }

    fn is_ready(&self) -> bool {
        self.state.ready
    }

    fn is_write_protected(&self) -> bool {
        self.state.write_protected
    }

    fn set_ready(&mut self, ready: bool) -> Result<(), MountError> {
        if ready && !self.is_mounted() {
            return Err(MountError::NotMounted);
        }
        self.state.ready = ready;
        Ok(())
    }

    fn set_write_protected(&mut self, protected: bool) {
        self.state.write_protected = protected;
    }

    fn mount(&mut self, path: &Path) -> Result<(), MountError> {
        if self.is_mounted() {
            return Err(MountError::AlreadyMounted);
        }
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let header = ScratchPadHeader::read_from(&mut file)?;
        if !DISK_BLOCK_SIZES.contains(&u64::from(header.block_size)) {
            return Err(MountError::BadGeometry);
        }
        if header.minor_version != MINOR_VERSION {
            warn!(
                path = %path.display(),
                found = header.minor_version,
                expected = MINOR_VERSION,
                "volume minor version differs",
            );
        }

        self.state.geometry = Some(BlockGeometry {
            block_size: u64::from(header.block_size),
            block_count: u64::from(header.block_count),
            prep_factor: u64::from(header.prep_factor),
        });
        self.state.unit_attention = true;
        self.file = Some(file);
        self.path = Some(path.to_path_buf());
        debug!(path = %path.display(), "disk volume mounted");
        Ok(())
    }

    fn unmount(&mut self) -> Result<(), MountError> {
        if !self.is_mounted() {
            return Err(MountError::NotMounted);
        }
        if self.state.ready {
            return Err(MountError::DeviceReady);
        }
        self.file = None;
        self.path = None;
        self.state.geometry = None;
        self.state.unit_attention = false;
        Ok(())
    }

    fn geometry(&self) -> Option<BlockGeometry> {
        self.state.geometry
    }

    fn handle_io(&mut self, packet: &mut IoPacket) {
        packet.status = match packet.function {
            IoFunction::None => IoStatus::Successful,
            IoFunction::GetInfo => {
                let info = compose_info_block(self, self.state.unit_attention);
                packet.buffer = pack_words(&info);
                self.state.unit_attention = false;
                IoStatus::Successful
            }
            IoFunction::Read => {
                let gate = self.state.validate_transfer(packet, false);
                if !gate.is_successful() {
                    gate
                } else {
                    let offset = self.data_offset(packet);
                    let file = self.file.as_mut().expect("mounted implies file");
                    packet.buffer = vec![0; packet.byte_count as usize];
                    match file
                        .seek(SeekFrom::Start(offset))
                        .and_then(|_| file.read_exact(&mut packet.buffer))
                    {
                        Ok(()) => IoStatus::Successful,
                        Err(_) => IoStatus::MediaError,
                    }
                }
            }
            IoFunction::Write => {
                let gate = self.state.validate_transfer(packet, true);
                if !gate.is_successful() {
                    gate
                } else {
                    let offset = self.data_offset(packet);
                    let file = self.file.as_mut().expect("mounted implies file");
                    match file
                        .seek(SeekFrom::Start(offset))
                        .and_then(|_| file.write_all(&packet.buffer))
                        .and_then(|_| file.flush())
                    {
                        Ok(()) => IoStatus::Successful,
                        Err(_) => IoStatus::MediaError,
                    }
                }
            }
            IoFunction::Reset => {
                if self.state.ready {
                    self.state.unit_attention = false;
                    IoStatus::Successful
                } else {
                    IoStatus::NotReady
                }
            }
            IoFunction::Unload => IoStatus::InvalidFunction,
        };
    }
}

/// A heap-backed disk, permanently "mounted" from construction.
///
/// Used as a RAM disk and throughout the test suites.
#[derive(Debug)]
pub struct ScratchDiskDevice {
    state: DiskState,
    data: Vec<u8>,
}

impl ScratchDiskDevice {
    pub fn new(block_size: u64, block_count: u64) -> Result<Self, MountError> {
        if !DISK_BLOCK_SIZES.contains(&block_size) {
            return Err(MountError::BadGeometry);
        }
        Ok(ScratchDiskDevice {
            state: DiskState {
                geometry: Some(BlockGeometry {
                    block_size,
                    block_count,
                    prep_factor: word_count_for(block_size as usize) as u64,
                }),
                ..Default::default()
            },
            data: vec![0; (block_size * block_count) as usize],
        })
    }
}

impl Device for ScratchDiskDevice {
    fn kind(&self) -> DeviceKind {
        DeviceKind::ScratchDisk
    }

    fn is_mounted(&self) -> bool {
        true
    }

    fn is_ready(&self) -> bool {
        self.state.ready
    }

    fn is_write_protected(&self) -> bool {
        self.state.write_protected
    }

    fn set_ready(&mut self, ready: bool) -> Result<(), MountError> {
        self.state.ready = ready;
        Ok(())
    }

    fn set_write_protected(&mut self, protected: bool) {
        self.state.write_protected = protected;
    }

    fn mount(&mut self, _path: &Path) -> Result<(), MountError> {
        Err(MountError::NotSupported)
    }

    fn unmount(&mut self) -> Result<(), MountError> {
        Err(MountError::NotSupported)
    }

    fn geometry(&self) -> Option<BlockGeometry> {
        self.state.geometry
    }

    fn handle_io(&mut self, packet: &mut IoPacket) {
        packet.status = match packet.function {
            IoFunction::None => IoStatus::Successful,
            IoFunction::GetInfo => {
                let info = compose_info_block(self, self.state.unit_attention);
                packet.buffer = pack_words(&info);
                self.state.unit_attention = false;
                IoStatus::Successful
            }
            IoFunction::Read => {
                let gate = self.state.validate_transfer(packet, false);
                if !gate.is_successful() {
                    gate
                } else {
                    let block_size = self.state.geometry.expect("geometry fixed").block_size;
                    let start = (packet.block_id * block_size) as usize;
                    let end = start + packet.byte_count as usize;
                    packet.buffer = self.data[start..end].to_vec();
                    IoStatus::Successful
                }
            }
            IoFunction::Write => {
                let gate = self.state.validate_transfer(packet, true);
                if !gate.is_successful() {
                    gate
                } else {
                    let block_size = self.state.geometry.expect("geometry fixed").block_size;
                    let start = (packet.block_id * block_size) as usize;
                    self.data[start..start + packet.buffer.len()].copy_from_slice(&packet.buffer);
                    IoStatus::Successful
                }
            }
            IoFunction::Reset => {
                if self.state.ready {
                    self.state.unit_attention = false;
                    IoStatus::Successful
                } else {
                    IoStatus::NotReady
                }
            }
            IoFunction::Unload => IoStatus::InvalidFunction,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_scratch() -> ScratchDiskDevice {
        let mut device = ScratchDiskDevice::new(128, 16).unwrap();
        device.set_ready(true).unwrap();
        // consume the initial attention state
        device.state.unit_attention = false;
        device
    }

    #[test]
    fn write_then_read_round_trips() {
        let mut device = ready_scratch();
        let data: Vec<u8> = (0..128).map(|b| b as u8).collect();

        let mut write = IoPacket::write(3, data.clone());
        device.handle_io(&mut write);
        assert_eq!(write.status, IoStatus::Successful);

        let mut read = IoPacket::read(3, 128);
        device.handle_io(&mut read);
        assert_eq!(read.status, IoStatus::Successful);
        assert_eq!(read.buffer, data);
    }

    #[test]
    fn transfer_gates() {
        let mut device = ScratchDiskDevice::new(128, 16).unwrap();

        let mut packet = IoPacket::read(0, 128);
        device.handle_io(&mut packet);
        assert_eq!(packet.status, IoStatus::NotReady);

        device.set_ready(true).unwrap();
        device.state.unit_attention = true;
        let mut packet = IoPacket::read(0, 128);
        device.handle_io(&mut packet);
        assert_eq!(packet.status, IoStatus::UnitAttention);

        // GetInfo clears the attention condition
        let mut info = IoPacket::of_function(IoFunction::GetInfo);
        device.handle_io(&mut info);
        assert_eq!(info.status, IoStatus::Successful);

        let mut packet = IoPacket::read(20, 128);
        device.handle_io(&mut packet);
        assert_eq!(packet.status, IoStatus::InvalidBlockId);

        let mut packet = IoPacket::read(0, 100);
        device.handle_io(&mut packet);
        assert_eq!(packet.status, IoStatus::InvalidBlockSize);

        let mut packet = IoPacket::read(15, 256);
        device.handle_io(&mut packet);
        assert_eq!(packet.status, IoStatus::InvalidBlockCount);

        device.set_write_protected(true);
        let mut packet = IoPacket::write(0, vec![0; 128]);
        device.handle_io(&mut packet);
        assert_eq!(packet.status, IoStatus::WriteProtected);
    }

    #[test]
    fn invalid_block_size_rejected_at_construction() {
        assert!(ScratchDiskDevice::new(100, 16).is_err());
    }
}
