//! Inter-processor (UPI) signalling fabric.
//!
//! Each processor owns an endpoint holding two pending sets keyed by
//! source UPI: interrupts and acknowledgements. A send enqueues the sender
//! into the destination's set and wakes its worker; membership saturates,
//! so signals cannot be dropped. The data conduit is the mail-slot table in
//! the hidden MSP; the signal is only the wakeup.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::time::Duration;

use komodo_types::{AbsoluteAddress, Upi, Word36};
use tracing::trace;

use crate::consts::{MAIL_SLOT_RECORD_SIZE, MAIL_SLOT_SIZE};
use crate::error::MspError;
use crate::slice::ArraySlice;

/// One processor's view of the fabric.
#[derive(Debug)]
pub struct UpiEndpoint {
    upi: Upi,
    pending: Mutex<PendingSets>,
    cond: Condvar,
}

#[derive(Debug, Default)]
struct PendingSets {
    interrupts: BTreeSet<Upi>,
    acknowledgements: BTreeSet<Upi>,
}

impl UpiEndpoint {
    fn new(upi: Upi) -> Self {
        UpiEndpoint {
            upi,
            pending: Mutex::new(PendingSets::default()),
            cond: Condvar::new(),
        }
    }

    pub const fn upi(&self) -> Upi {
        self.upi
    }

    fn post_interrupt(&self, source: Upi) {
        let mut pending = self.pending.lock().expect("pending sets poisoned");
        pending.interrupts.insert(source);
        self.cond.notify_all();
    }

    fn post_acknowledgement(&self, source: Upi) {
        let mut pending = self.pending.lock().expect("pending sets poisoned");
        pending.acknowledgements.insert(source);
        self.cond.notify_all();
    }

    /// Drain the pending interrupt set.
    pub fn take_interrupts(&self) -> BTreeSet<Upi> {
        let mut pending = self.pending.lock().expect("pending sets poisoned");
        std::mem::take(&mut pending.interrupts)
    }

    /// Drain the pending acknowledgement set.
    pub fn take_acknowledgements(&self) -> BTreeSet<Upi> {
        let mut pending = self.pending.lock().expect("pending sets poisoned");
        std::mem::take(&mut pending.acknowledgements)
    }

    pub fn has_pending(&self) -> bool {
        let pending = self.pending.lock().expect("pending sets poisoned");
        !pending.interrupts.is_empty() || !pending.acknowledgements.is_empty()
    }

    /// Block until something is pending or the timeout lapses.
    pub fn wait(&self, timeout: Duration) -> bool {
        let pending = self.pending.lock().expect("pending sets poisoned");
        if !pending.interrupts.is_empty() || !pending.acknowledgements.is_empty() {
            return true;
        }
        let (pending, _timed_out) = self
            .cond
            .wait_timeout(pending, timeout)
            .expect("pending sets poisoned");
        !pending.interrupts.is_empty() || !pending.acknowledgements.is_empty()
    }

    /// Wake the owning worker without posting anything.
    pub fn notify(&self) {
        self.cond.notify_all();
    }
}

/// The partition-wide registry of endpoints.
#[derive(Debug, Default)]
pub struct UpiFabric {
    endpoints: RwLock<HashMap<Upi, Arc<UpiEndpoint>>>,
}

impl UpiFabric {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register the endpoint for `upi`.
    pub fn register(&self, upi: Upi) -> Arc<UpiEndpoint> {
        let endpoint = Arc::new(UpiEndpoint::new(upi));
        self.endpoints
            .write()
            .expect("endpoint registry poisoned")
            .insert(upi, Arc::clone(&endpoint));
        endpoint
    }

    pub fn deregister(&self, upi: Upi) {
        self.endpoints.write().expect("endpoint registry poisoned").remove(&upi);
    }

    /// Signal `dest`; true when the destination exists.
    pub fn send(&self, source: Upi, dest: Upi) -> bool {
        trace!(source, dest, "upi send");
        let endpoints = self.endpoints.read().expect("endpoint registry poisoned");
        match endpoints.get(&dest) {
            Some(endpoint) => {
                endpoint.post_interrupt(source);
                true
            }
            None => false,
        }
    }

    /// Acknowledge a prior signal from `dest`.
    pub fn ack(&self, source: Upi, dest: Upi) -> bool {
        trace!(source, dest, "upi ack");
        let endpoints = self.endpoints.read().expect("endpoint registry poisoned");
        match endpoints.get(&dest) {
            Some(endpoint) => {
                endpoint.post_acknowledgement(source);
                true
            }
            None => false,
        }
    }

    pub fn registered(&self) -> Vec<Upi> {
        let mut upis: Vec<Upi> = self
            .endpoints
            .read()
            .expect("endpoint registry poisoned")
            .keys()
            .copied()
            .collect();
        upis.sort_unstable();
        upis
    }
}

/// The mail-slot table resident in segment 0 of the hidden MSP.
///
/// Word 0 carries the record count in H2. Each record is three words: a
/// routing word (source in S1, destination in S2) followed by the two-word
/// absolute address of that pair's operation buffer. Slots exist for every
/// ordered pair of distinct processors.
#[derive(Debug, Clone)]
pub struct MailSlotTable {
    slice: ArraySlice,
}

impl MailSlotTable {
    /// Words needed for `processors` participants.
    pub const fn required_words(processors: u64) -> u64 {
        1 + processors * (processors - 1) * MAIL_SLOT_RECORD_SIZE
    }

    /// Lay out the table for the given processors.
    pub fn install(slice: ArraySlice, upis: &[Upi]) -> Result<Self, MspError> {
        let mut offset = 1;
        let mut records = 0_u64;
        for source in upis {
            for dest in upis {
                if source == dest {
                    continue;
                }
                let routing = Word36::ZERO.set_s1(u64::from(*source)).set_s2(u64::from(*dest));
                slice.set(offset, routing)?;
                slice.set(offset + 1, Word36::ZERO)?;
                slice.set(offset + 2, Word36::ZERO)?;
                offset += MAIL_SLOT_RECORD_SIZE;
                records += 1;
            }
        }
        slice.set(0, Word36::ZERO.set_h2(records))?;
        Ok(MailSlotTable { slice })
    }

    /// Open a table previously installed in `slice`.
    pub const fn open(slice: ArraySlice) -> Self {
        MailSlotTable { slice }
    }

    pub fn record_count(&self) -> Result<u64, MspError> {
        Ok(self.slice.get(0)?.h2())
    }

    /// Offset of the slot words for the ordered pair, if present.
    fn slot_offset(&self, source: Upi, dest: Upi) -> Result<Option<u64>, MspError> {
        let count = self.record_count()?;
        for record in 0..count {
            let offset = 1 + record * MAIL_SLOT_RECORD_SIZE;
            let routing = self.slice.get(offset)?;
            if routing.s1() == u64::from(source) && routing.s2() == u64::from(dest) {
                return Ok(Some(offset + 1));
            }
        }
        Ok(None)
    }

    /// Publish the operation buffer address for a pair.
    pub fn set_buffer_address(&self, source: Upi, dest: Upi, address: AbsoluteAddress) -> Result<bool, MspError> {
        match self.slot_offset(source, dest)? {
            Some(offset) => {
                let words = address.to_words();
                for ix in 0..MAIL_SLOT_SIZE {
                    self.slice.set(offset + ix, words[ix as usize])?;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Read back the operation buffer address for a pair.
    pub fn buffer_address(&self, source: Upi, dest: Upi) -> Result<Option<AbsoluteAddress>, MspError> {
        match self.slot_offset(source, dest)? {
            Some(offset) => {
                let words = [self.slice.get(offset)?, self.slice.get(offset + 1)?];
                Ok(Some(AbsoluteAddress::from_words(words)))
            }
            None => Ok(None),
        }
    }
}
