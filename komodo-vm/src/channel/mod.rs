//! Channel programs and channel modules.
//!
//! A channel program names an IOP, a channel module, a device and an IO
//! function, and describes its storage with a list of access control words.
//! The channel module's worker translates the program into one contiguous
//! device transfer: gathering the ACW regions out of main storage for a
//! write, scattering device data back for a read.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use komodo_types::{AbsoluteAddress, Upi, Word36};

use crate::device::{IoFunction, IoStatus};

mod module;

pub use module::{ChannelKind, ChannelModule};

/// How successive words of an ACW-described region are addressed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum AcwModifier {
    /// Ascending addresses.
    #[default]
    Increment,
    /// Descending addresses.
    Decrement,
    /// Advance through the transfer without touching storage; pads a
    /// gather, discards on a scatter.
    SkipData,
    /// Every word uses the same address, as for a register drain.
    NoChange,
}

/// One scatter/gather region of a channel program.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AccessControlWord {
    pub address: AbsoluteAddress,
    pub count: u64,
    pub modifier: AcwModifier,
}

impl AccessControlWord {
    pub const fn new(address: AbsoluteAddress, count: u64, modifier: AcwModifier) -> Self {
        AccessControlWord {
            address,
            count,
            modifier,
        }
    }

    pub const fn increment(address: AbsoluteAddress, count: u64) -> Self {
        Self::new(address, count, AcwModifier::Increment)
    }
}

/// Resolution of a channel program.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    #[default]
    InProgress,
    Successful,
    /// The named channel-module index is not configured on the IOP.
    UnconfiguredChannelModule,
    /// The named device index is not configured on the channel module.
    UnconfiguredDevice,
    /// The device refused or failed the operation.
    DeviceError(IoStatus),
    /// The ACW list cannot carry the transfer.
    InsufficientBuffers,
    /// An ACW names storage that cannot be addressed.
    InvalidAccessControlWord,
    /// The channel module shut down before the transfer ran.
    Terminated,
}

impl ChannelStatus {
    pub const fn is_final(self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

/// The unit of work handed to `start_io`.
#[derive(Debug, Default, Clone)]
pub struct ChannelProgram {
    pub iop_upi: Upi,
    pub cm_index: usize,
    pub device_index: usize,
    pub function: IoFunction,
    pub block_id: u64,
    pub acws: Vec<AccessControlWord>,
    pub status: ChannelStatus,
    pub words_transferred: u64,
}

impl ChannelProgram {
    /// Total words the ACW list describes, padding regions included.
    pub fn word_count(&self) -> u64 {
        self.acws.iter().map(|acw| acw.count).sum()
    }
}

/// Shared completion handle for one submitted channel program.
///
/// The source processor holds it to poll or wait; the channel module
/// resolves it exactly once.
#[derive(Debug)]
pub struct Tracker {
    source: Upi,
    program: Mutex<ChannelProgram>,
    complete: Condvar,
}

impl Tracker {
    pub fn new(source: Upi, program: ChannelProgram) -> Self {
        Tracker {
            source,
            program: Mutex::new(program),
            complete: Condvar::new(),
        }
    }

    pub const fn source(&self) -> Upi {
        self.source
    }

    pub fn status(&self) -> ChannelStatus {
        self.program.lock().expect("tracker poisoned").status
    }

    /// Snapshot of the program as last written by the channel module.
    pub fn program(&self) -> ChannelProgram {
        self.program.lock().expect("tracker poisoned").clone()
    }

    /// Run `f` over the live program under the tracker lock.
    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut ChannelProgram) -> R) -> R {
        let mut program = self.program.lock().expect("tracker poisoned");
        f(&mut program)
    }

    /// Resolve the program and wake every waiter.
    pub(crate) fn finish(&self, status: ChannelStatus) {
        let mut program = self.program.lock().expect("tracker poisoned");
        program.status = status;
        self.complete.notify_all();
    }

    /// Block until the program leaves `InProgress`.
    pub fn wait(&self, timeout: Duration) -> ChannelStatus {
        let mut program = self.program.lock().expect("tracker poisoned");
        while !program.status.is_final() {
            let (next, timed_out) = self
                .complete
                .wait_timeout(program, timeout)
                .expect("tracker poisoned");
            program = next;
            if timed_out.timed_out() {
                break;
            }
        }
        program.status
    }
}

/// Queue of finished trackers a channel module hands back to its IOP.
#[derive(Debug, Default)]
pub struct CompletionQueue {
    queue: Mutex<VecDeque<std::sync::Arc<Tracker>>>,
    cond: Condvar,
}

impl CompletionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, tracker: std::sync::Arc<Tracker>) {
        self.queue.lock().expect("completion queue poisoned").push_back(tracker);
        self.cond.notify_all();
    }

    pub fn drain(&self) -> Vec<std::sync::Arc<Tracker>> {
        let mut queue = self.queue.lock().expect("completion queue poisoned");
        queue.drain(..).collect()
    }

    pub fn wait(&self, timeout: Duration) -> bool {
        let queue = self.queue.lock().expect("completion queue poisoned");
        if !queue.is_empty() {
            return true;
        }
        let (queue, _timed_out) = self.cond.wait_timeout(queue, timeout).expect("completion queue poisoned");
        !queue.is_empty()
    }

    pub fn notify(&self) {
        self.cond.notify_all();
    }
}

/// Iterate the storage addresses an ACW touches, in transfer order.
///
/// `SkipData` and `NoChange` yield the same address repeatedly; callers
/// distinguish padding from pinned transfers by the modifier.
pub(crate) fn acw_addresses(acw: &AccessControlWord) -> impl Iterator<Item = AbsoluteAddress> + '_ {
    (0..acw.count).map(move |ix| match acw.modifier {
        AcwModifier::Increment => acw.address.displaced(ix),
        AcwModifier::Decrement => AbsoluteAddress {
            upi: acw.address.upi,
            segment: acw.address.segment,
            offset: acw.address.offset.wrapping_sub(ix),
        },
        AcwModifier::SkipData | AcwModifier::NoChange => acw.address,
    })
}

/// The zero word used for gather padding.
pub(crate) const PAD_WORD: Word36 = Word36::ZERO;
