//! Error taxonomy of the emulation core.
//!
//! Inventory and storage failures are synchronous and leave no partial
//! state. Faults inside the instruction processor never surface to callers
//! as errors: recoverable ones become queued machine interrupts, the rest
//! halt the processor with a stop reason.

use thiserror::Error;

use crate::interrupt::{InterruptClass, MachineInterrupt};

/// Outcome of a single instruction-processor execution step that could not
/// complete normally.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// A recoverable architectural fault; queued and serviced at the next
    /// interrupt boundary.
    #[error("machine interrupt class {:?}", .0.class())]
    Interrupt(MachineInterrupt),
    /// An unrecoverable condition; the processor stops.
    #[error(transparent)]
    Fault(#[from] ProcessorFault),
}

impl ExecutionError {
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Interrupt(_))
    }
}

impl From<MachineInterrupt> for ExecutionError {
    fn from(interrupt: MachineInterrupt) -> Self {
        Self::Interrupt(interrupt)
    }
}

impl From<InterruptClass> for ExecutionError {
    fn from(class: InterruptClass) -> Self {
        Self::Interrupt(MachineInterrupt::of_class(class))
    }
}

/// Conditions that stop an instruction processor outright.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProcessorFault {
    /// A fault was raised while entering an interrupt handler.
    #[error("fault during interrupt entry for class {class:?}")]
    InterruptEntry { class: InterruptClass },
    /// A hardware-fatal interrupt class (0..=7) was raised.
    #[error("hardware check, class {class:?}")]
    HardwareCheck { class: InterruptClass },
    /// The interrupt control stack is exhausted.
    #[error("interrupt control stack overflow")]
    IcsOverflow,
    /// Storage named by an absolute address is not part of the partition.
    #[error("absolute address references unknown storage (upi {upi})")]
    UnknownStorage { upi: i16 },
}

/// Main storage processor failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MspError {
    #[error("segment {0} is not allocated")]
    InvalidSegment(u32),
    #[error("segment {0} is still referenced and cannot be deleted")]
    SegmentInUse(u32),
    #[error("offset {offset:o} exceeds segment {segment} length {length:o}")]
    BoundsViolation { segment: u32, offset: u64, length: u64 },
    #[error("no sub-region of {requested} words is available")]
    OutOfSpace { requested: u64 },
    #[error("no sub-region is assigned at position {0:o}")]
    UnknownRegion(u64),
    #[error("no main storage processor answers to upi {0}")]
    UnknownProcessor(i16),
}

/// Inventory mutation failures. All are reported synchronously with no
/// state change.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InventoryError {
    #[error("node name {0} is already in use")]
    NodeNameConflict(String),
    #[error("UPI {0} is already assigned")]
    UpiConflict(u16),
    #[error("UPI {0} is outside every processor class range")]
    InvalidUpi(u16),
    #[error("the {0} class is fully populated")]
    MaxNodes(&'static str),
    #[error("no node named {0}")]
    NodeNotFound(String),
    #[error("{ancestor} cannot connect to {descendant}")]
    CannotConnect { ancestor: String, descendant: String },
    #[error("channel module index {0} is out of range or taken")]
    ChannelModuleIndexConflict(usize),
    #[error("device index {0} is out of range or taken")]
    DeviceIndexConflict(usize),
    #[error("nodes are not connected")]
    NotConnected,
    #[error("block size {0} is not a legal disk geometry")]
    InvalidDeviceGeometry(u64),
    #[error("mount refused: {0}")]
    Mount(String),
    #[error(transparent)]
    Storage(#[from] MspError),
}
