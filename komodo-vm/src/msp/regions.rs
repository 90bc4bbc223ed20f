use crate::error::MspError;

/// A contiguous range of the working segment handed out by the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubRegion {
    position: u64,
    extent: u64,
}

impl SubRegion {
    pub const fn position(&self) -> u64 {
        self.position
    }

    pub const fn extent(&self) -> u64 {
        self.extent
    }

    /// One past the last word of the region.
    pub const fn end(&self) -> u64 {
        self.position + self.extent
    }
}

/// First-fit allocator over the working segment.
///
/// Assigned regions never overlap; released space coalesces with free
/// neighbors.
#[derive(Debug)]
pub struct RegionTracker {
    capacity: u64,
    /// Assigned regions ordered by position.
    assigned: Vec<SubRegion>,
}

impl RegionTracker {
    pub const fn new(capacity: u64) -> Self {
        RegionTracker {
            capacity,
            assigned: Vec::new(),
        }
    }

    pub const fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Reserve the first gap large enough for `len` words.
    pub fn assign(&mut self, len: u64) -> Result<SubRegion, MspError> {
        if len == 0 || len > self.capacity {
            return Err(MspError::OutOfSpace { requested: len });
        }

        let mut cursor = 0;
        for (ix, region) in self.assigned.iter().enumerate() {
            if region.position - cursor >= len {
                let sub = SubRegion {
                    position: cursor,
                    extent: len,
                };
                self.assigned.insert(ix, sub);
                return Ok(sub);
            }
            cursor = region.end();
        }

        if self.capacity - cursor >= len {
            let sub = SubRegion {
                position: cursor,
                extent: len,
            };
            self.assigned.push(sub);
            return Ok(sub);
        }

        Err(MspError::OutOfSpace { requested: len })
    }

    /// Return the region starting at `position` to the free pool.
    pub fn release(&mut self, position: u64) -> Result<(), MspError> {
        match self.assigned.iter().position(|r| r.position == position) {
            Some(ix) => {
                self.assigned.remove(ix);
                Ok(())
            }
            None => Err(MspError::UnknownRegion(position)),
        }
    }

    pub fn assigned(&self) -> Vec<SubRegion> {
        self.assigned.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignments_are_disjoint() {
        let mut tracker = RegionTracker::new(100);
        let regions: Vec<SubRegion> = (0..5).map(|_| tracker.assign(15).unwrap()).collect();
        for (ix, a) in regions.iter().enumerate() {
            assert!(a.end() <= 100);
            for b in &regions[ix + 1..] {
                assert!(a.end() <= b.position() || b.end() <= a.position());
            }
        }
    }

    #[test]
    fn released_space_is_reused_first_fit() {
        let mut tracker = RegionTracker::new(64);
        let first = tracker.assign(16).unwrap();
        let _second = tracker.assign(16).unwrap();
        tracker.release(first.position()).unwrap();

        let third = tracker.assign(8).unwrap();
        assert_eq!(third.position(), first.position());
    }

    #[test]
    fn exhaustion_is_out_of_space() {
        let mut tracker = RegionTracker::new(32);
        tracker.assign(20).unwrap();
        assert!(matches!(tracker.assign(20), Err(MspError::OutOfSpace { .. })));
        // fragmented: 12 free at the tail still fits 12
        tracker.assign(12).unwrap();
        assert!(matches!(tracker.assign(1), Err(MspError::OutOfSpace { .. })));
    }

    #[test]
    fn release_of_unknown_position_fails() {
        let mut tracker = RegionTracker::new(32);
        assert!(matches!(tracker.release(5), Err(MspError::UnknownRegion(5))));
    }

    #[quickcheck_macros::quickcheck]
    fn interleaved_assign_release_stays_disjoint(requests: Vec<(u8, bool)>) -> bool {
        let mut tracker = RegionTracker::new(4096);
        let mut live: Vec<SubRegion> = Vec::new();
        for (len, release_first) in requests {
            if release_first && !live.is_empty() {
                let region = live.swap_remove(0);
                tracker.release(region.position()).unwrap();
            }
            if let Ok(region) = tracker.assign(u64::from(len)) {
                live.push(region);
            }
        }
        live.iter().enumerate().all(|(ix, a)| {
            a.end() <= tracker.capacity()
                && live[ix + 1..]
                    .iter()
                    .all(|b| a.end() <= b.position() || b.end() <= a.position())
        })
    }
}
