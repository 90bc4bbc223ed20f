//! Hardware emulation core of the Komodo 2200 emulator.
//!
//! The crate models the cooperating processor units of a 2200-family
//! partition: the instruction processor executing the 36-bit ones-complement
//! instruction set, main storage processors owning segmented word storage,
//! input/output processors driving channel-program I/O against block
//! devices, the system processor, and the inter-processor (UPI) signalling
//! fabric. The [`inventory::InventoryManager`] creates, connects and tears
//! down all of them under the partition's identity and topology rules.

pub mod channel;
pub mod consts;
pub mod device;
pub mod error;
pub mod interrupt;
pub mod inventory;
pub mod iop;
pub mod ip;
pub mod loader;
pub mod msp;
pub mod slice;
pub mod sp;
pub mod upi;

pub mod prelude {
    pub use komodo_types::{AbsoluteAddress, AccessInfo, AccessPermissions, DoubleWord36, Upi, Word36};

    pub use crate::channel::{AccessControlWord, AcwModifier, ChannelProgram, ChannelStatus};
    pub use crate::device::{DeviceKind, IoFunction, IoStatus};
    pub use crate::error::{ExecutionError, InventoryError, MspError};
    pub use crate::interrupt::{InterruptClass, MachineInterrupt};
    pub use crate::inventory::{HardwareConfiguration, InventoryManager};
    pub use crate::ip::{InstructionProcessor, StopReason};
    pub use crate::loader::BankDeclaration;
    pub use crate::msp::MainStorageProcessor;
    pub use crate::slice::ArraySlice;
}
