//! Block-oriented peripherals.
//!
//! A device is a state machine over `{not-mounted, not-ready, ready}` with
//! a FIFO operation queue; callers serialize on the device's monitor. Data
//! crosses the device boundary as bytes; the channel modules repack to and
//! from 36-bit words.

use std::fmt;
use std::io;
use std::path::Path;

use komodo_types::Word36;
use thiserror::Error;

mod disk;
mod scratchpad;
mod tape;

pub use disk::{FileSystemDiskDevice, ScratchDiskDevice, DISK_BLOCK_SIZES};
pub use scratchpad::ScratchPadHeader;
pub use tape::FileSystemTapeDevice;

/// Concrete device flavors the inventory can create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter, strum::Display)]
pub enum DeviceKind {
    FileSystemDisk,
    ScratchDisk,
    FileSystemTape,
}

impl DeviceKind {
    /// Code stored in the first info word.
    pub const fn code(self) -> u64 {
        match self {
            Self::FileSystemDisk => 0o1,
            Self::ScratchDisk => 0o2,
            Self::FileSystemTape => 0o10,
        }
    }

    pub const fn is_disk(self) -> bool {
        matches!(self, Self::FileSystemDisk | Self::ScratchDisk)
    }
}

/// IO functions a channel module can dispatch to a device.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum IoFunction {
    /// Health ping; always succeeds.
    #[default]
    None,
    GetInfo,
    Read,
    Write,
    Reset,
    Unload,
}

/// Completion status of a device operation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum IoStatus {
    #[default]
    InProgress,
    Successful,
    NotReady,
    UnitAttention,
    WriteProtected,
    InvalidBlockId,
    InvalidBlockSize,
    InvalidBlockCount,
    InvalidFunction,
    EndOfTape,
    MediaError,
    InternalError,
}

impl IoStatus {
    pub const fn is_successful(self) -> bool {
        matches!(self, Self::Successful)
    }
}

/// One device operation in flight.
#[derive(Debug, Default, Clone)]
pub struct IoPacket {
    pub function: IoFunction,
    /// Disk block or tape record to address.
    pub block_id: u64,
    /// Transfer length in bytes; must describe whole blocks on disks.
    pub byte_count: u64,
    /// Write source or read destination.
    pub buffer: Vec<u8>,
    pub status: IoStatus,
}

impl IoPacket {
    pub fn read(block_id: u64, byte_count: u64) -> Self {
        IoPacket {
            function: IoFunction::Read,
            block_id,
            byte_count,
            ..Default::default()
        }
    }

    pub fn write(block_id: u64, buffer: Vec<u8>) -> Self {
        IoPacket {
            function: IoFunction::Write,
            block_id,
            byte_count: buffer.len() as u64,
            buffer,
            ..Default::default()
        }
    }

    pub fn of_function(function: IoFunction) -> Self {
        IoPacket {
            function,
            ..Default::default()
        }
    }
}

/// Geometry of a mounted block medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockGeometry {
    /// Bytes per block.
    pub block_size: u64,
    /// Blocks on the medium.
    pub block_count: u64,
    /// 36-bit words recoverable from one block.
    pub prep_factor: u64,
}

/// Failures of the mount/unmount surface.
///
/// These are synchronous caller errors, unlike [`IoStatus`] which rides on
/// the packet.
#[derive(Debug, Error)]
pub enum MountError {
    #[error("a medium is already mounted")]
    AlreadyMounted,
    #[error("no medium is mounted")]
    NotMounted,
    #[error("device is ready; set not-ready before unmounting")]
    DeviceReady,
    #[error("not mountable on this device")]
    NotSupported,
    #[error("volume identifier is not recognized")]
    BadIdentifier,
    #[error("volume major version {found} is not supported (expected {expected})")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("volume geometry is invalid")]
    BadGeometry,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// The operations every peripheral supports.
///
/// `handle_io` is the single dispatch point the channel modules drive;
/// mount and readiness changes come from the inventory or an operator
/// surface.
pub trait Device: fmt::Debug + Send {
    fn kind(&self) -> DeviceKind;

    fn is_mounted(&self) -> bool;

    fn is_ready(&self) -> bool;

    fn is_write_protected(&self) -> bool;

    /// Ready requires a mounted medium; not-ready is always permitted.
    fn set_ready(&mut self, ready: bool) -> Result<(), MountError>;

    fn set_write_protected(&mut self, protected: bool);

    /// Attach a medium image. Raises unit attention on success.
    fn mount(&mut self, path: &Path) -> Result<(), MountError>;

    /// Detach the medium; requires not-ready.
    fn unmount(&mut self) -> Result<(), MountError>;

    fn geometry(&self) -> Option<BlockGeometry>;

    /// Execute one IO function against the packet, FIFO per device.
    fn handle_io(&mut self, packet: &mut IoPacket);
}

/// Length of the info block produced by GetInfo, in words.
pub const INFO_BLOCK_WORDS: usize = 28;

/// Compose the 28-word GetInfo block.
///
/// Word 0 carries the kind code in S1 and the state flags in S6
/// (ready, mounted, write-protected, unit-attention from bit 0 up);
/// words 1..=3 carry block size, block count and prep factor.
pub(crate) fn compose_info_block(device: &dyn Device, unit_attention: bool) -> Vec<Word36> {
    let mut flags = 0_u64;
    if device.is_ready() {
        flags |= 0o1;
    }
    if device.is_mounted() {
        flags |= 0o2;
    }
    if device.is_write_protected() {
        flags |= 0o4;
    }
    if unit_attention {
        flags |= 0o10;
    }

    let mut words = vec![Word36::ZERO; INFO_BLOCK_WORDS];
    words[0] = Word36::ZERO.set_s1(device.kind().code()).set_s6(flags);
    if let Some(geometry) = device.geometry() {
        words[1] = Word36::new(geometry.block_size);
        words[2] = Word36::new(geometry.block_count);
        words[3] = Word36::new(geometry.prep_factor);
    }
    words
}
