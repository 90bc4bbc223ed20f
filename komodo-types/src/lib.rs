//! Atomic types of the Komodo 2200 emulator.
//!
//! Every architecturally visible value in the emulated machine is a 36-bit
//! ones-complement quantity carried in the lower bits of a 64-bit cell.
//! This crate owns that representation and the handful of small copy types
//! built on it; it has no knowledge of processors, storage or I/O.

mod address;
pub mod bytes;
mod double;
mod fieldata;
mod word;

pub use address::{AbsoluteAddress, AccessInfo, AccessPermissions, HIDDEN_MSP_UPI};
pub use double::DoubleWord36;
pub use fieldata::{ascii_to_fieldata, fieldata_to_ascii};
pub use word::{Addition, SignedMagnitude, Word36};

/// Unique processor index within the fabric, 0..=14.
pub type Upi = u16;

/// Number of value bits in a machine word.
pub const WORD_BITS: u32 = 36;

/// All 36 value bits set.
pub const WORD_MASK: u64 = 0o777777_777777;

/// The sign bit of a machine word.
pub const SIGN_BIT: u64 = 0o400000_000000;
