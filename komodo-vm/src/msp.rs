//! Main storage processor: segmented 36-bit word storage.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, RwLock};

use komodo_types::{AbsoluteAddress, Word36};
use tracing::debug;

use crate::error::MspError;
use crate::slice::{ArraySlice, SegmentStore};

mod regions;

pub use regions::{RegionTracker, SubRegion};

/// Owns a heap of independently sized segments of 36-bit words.
///
/// Segment 0 is the working segment; it exists from initialization and the
/// [`RegionTracker`] hands out non-overlapping sub-regions of it for
/// loadable banks. Segment indices are assigned monotonically and never
/// reused within a lifecycle.
#[derive(Debug)]
pub struct MainStorageProcessor {
    upi: i16,
    segments: Mutex<SegmentTable>,
    regions: Mutex<RegionTracker>,
}

#[derive(Debug)]
struct SegmentTable {
    segments: BTreeMap<u32, SegmentStore>,
    next_index: u32,
}

impl MainStorageProcessor {
    /// Build an MSP whose working segment holds `working_size` words.
    pub fn new(upi: i16, working_size: u64) -> Self {
        let mut segments = BTreeMap::new();
        segments.insert(0, new_store(working_size));
        MainStorageProcessor {
            upi,
            segments: Mutex::new(SegmentTable {
                segments,
                next_index: 1,
            }),
            regions: Mutex::new(RegionTracker::new(working_size)),
        }
    }

    pub const fn upi(&self) -> i16 {
        self.upi
    }

    /// Allocate a zero-filled segment of `size` words.
    pub fn create_segment(&self, size: u64) -> u32 {
        let mut table = self.segments.lock().expect("segment table poisoned");
        let index = table.next_index;
        table.next_index += 1;
        table.segments.insert(index, new_store(size));
        debug!(upi = self.upi, segment = index, size, "segment created");
        index
    }

    /// Release a segment.
    ///
    /// Fails with [`MspError::SegmentInUse`] while any [`ArraySlice`] still
    /// views it, and refuses to delete the working segment.
    pub fn delete_segment(&self, index: u32) -> Result<(), MspError> {
        if index == 0 {
            return Err(MspError::SegmentInUse(0));
        }
        let mut table = self.segments.lock().expect("segment table poisoned");
        let store = table.segments.get(&index).ok_or(MspError::InvalidSegment(index))?;
        if Arc::strong_count(store) > 1 {
            return Err(MspError::SegmentInUse(index));
        }
        table.segments.remove(&index);
        debug!(upi = self.upi, segment = index, "segment deleted");
        Ok(())
    }

    /// Grow or shrink a segment in place.
    ///
    /// The prefix is preserved; growth is zero-filled. Existing views stay
    /// valid and observe the new length through their bounds checks.
    pub fn resize_segment(&self, index: u32, new_size: u64) -> Result<(), MspError> {
        let table = self.segments.lock().expect("segment table poisoned");
        let store = table.segments.get(&index).ok_or(MspError::InvalidSegment(index))?;
        store
            .write()
            .expect("segment lock poisoned")
            .resize(new_size as usize, 0);
        Ok(())
    }

    /// A view covering the whole segment.
    pub fn get_storage(&self, index: u32) -> Result<ArraySlice, MspError> {
        let table = self.segments.lock().expect("segment table poisoned");
        let store = table.segments.get(&index).ok_or(MspError::InvalidSegment(index))?;
        let len = store.read().expect("segment lock poisoned").len() as u64;
        Ok(ArraySlice::new(index, Arc::clone(store), 0, len))
    }

    /// Current length of a segment in words.
    pub fn segment_size(&self, index: u32) -> Result<u64, MspError> {
        let table = self.segments.lock().expect("segment table poisoned");
        let store = table.segments.get(&index).ok_or(MspError::InvalidSegment(index))?;
        let len = store.read().expect("segment lock poisoned").len() as u64;
        Ok(len)
    }

    /// Segment indices currently allocated.
    pub fn segment_indices(&self) -> Vec<u32> {
        let table = self.segments.lock().expect("segment table poisoned");
        table.segments.keys().copied().collect()
    }

    /// Reserve a sub-region of the working segment.
    pub fn assign_region(&self, len: u64) -> Result<SubRegion, MspError> {
        self.regions.lock().expect("region tracker poisoned").assign(len)
    }

    /// Release a sub-region previously assigned at `position`.
    pub fn release_region(&self, position: u64) -> Result<(), MspError> {
        self.regions.lock().expect("region tracker poisoned").release(position)
    }

    /// The assigned sub-regions, ordered by position.
    pub fn assigned_regions(&self) -> Vec<SubRegion> {
        self.regions.lock().expect("region tracker poisoned").assigned()
    }

    /// A view of an assigned sub-region of the working segment.
    pub fn region_storage(&self, region: &SubRegion) -> Result<ArraySlice, MspError> {
        self.get_storage(0)?.subset(region.position(), region.extent())
    }
}

fn new_store(size: u64) -> SegmentStore {
    Arc::new(RwLock::new(vec![0; size as usize]))
}

/// Resolves absolute addresses across every MSP of the partition.
///
/// Channel modules and instruction processors hold one of these; the
/// inventory attaches and detaches MSPs (including the hidden one at UPI
/// −1) as the configuration changes.
#[derive(Debug, Default)]
pub struct AddressSpace {
    msps: RwLock<BTreeMap<i16, Arc<MainStorageProcessor>>>,
}

impl AddressSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, msp: Arc<MainStorageProcessor>) {
        self.msps.write().expect("address space poisoned").insert(msp.upi(), msp);
    }

    pub fn detach(&self, upi: i16) {
        self.msps.write().expect("address space poisoned").remove(&upi);
    }

    pub fn processor(&self, upi: i16) -> Result<Arc<MainStorageProcessor>, MspError> {
        self.msps
            .read()
            .expect("address space poisoned")
            .get(&upi)
            .cloned()
            .ok_or(MspError::UnknownProcessor(upi))
    }

    /// The whole-segment view containing `address`.
    pub fn segment_storage(&self, address: &AbsoluteAddress) -> Result<ArraySlice, MspError> {
        self.processor(address.upi)?.get_storage(address.segment)
    }

    /// Read one word at an absolute address.
    pub fn read(&self, address: &AbsoluteAddress) -> Result<Word36, MspError> {
        self.segment_storage(address)?.get(address.offset)
    }

    /// Write one word at an absolute address.
    pub fn write(
        &self,
        address: &AbsoluteAddress,
        value: Word36,
    ) -> Result<(), MspError> {
        self.segment_storage(address)?.set(address.offset, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use komodo_types::Word36;

    #[test]
    fn segment_indices_are_monotonic() {
        let msp = MainStorageProcessor::new(1, 64);
        let a = msp.create_segment(16);
        let b = msp.create_segment(16);
        assert!(b > a);
        msp.delete_segment(a).unwrap();
        let c = msp.create_segment(16);
        assert!(c > b, "deleted indices are not reused");
    }

    #[test]
    fn working_segment_exists_and_is_protected() {
        let msp = MainStorageProcessor::new(1, 64);
        assert_eq!(msp.segment_size(0).unwrap(), 64);
        assert!(matches!(msp.delete_segment(0), Err(MspError::SegmentInUse(0))));
    }

    #[test]
    fn delete_fails_while_viewed() {
        let msp = MainStorageProcessor::new(1, 64);
        let seg = msp.create_segment(32);
        let view = msp.get_storage(seg).unwrap();
        assert!(matches!(msp.delete_segment(seg), Err(MspError::SegmentInUse(_))));
        drop(view);
        msp.delete_segment(seg).unwrap();
        assert!(matches!(msp.get_storage(seg), Err(MspError::InvalidSegment(_))));
    }

    #[test]
    fn resize_preserves_prefix_and_zero_fills() {
        let msp = MainStorageProcessor::new(1, 64);
        let seg = msp.create_segment(4);
        let view = msp.get_storage(seg).unwrap();
        view.set(3, Word36::new(0o777)).unwrap();

        msp.resize_segment(seg, 8).unwrap();
        let grown = msp.get_storage(seg).unwrap();
        assert_eq!(grown.get(3).unwrap(), Word36::new(0o777));
        assert_eq!(grown.get(7).unwrap(), Word36::ZERO);

        msp.resize_segment(seg, 2).unwrap();
        assert!(grown.get(3).is_err());
    }
}
