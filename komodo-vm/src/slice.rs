//! Bounds-checked word windows over shared storage.

use std::sync::{Arc, RwLock};

use komodo_types::Word36;

use crate::error::MspError;

pub(crate) type SegmentStore = Arc<RwLock<Vec<u64>>>;

/// A window onto a storage segment.
///
/// Every word access in the machine traverses one of these: base registers,
/// channel-module transfers and the loader all carve slices from MSP
/// segments. The underlying segment is shared; a slice adds an offset and a
/// length and checks both on every access.
#[derive(Debug, Clone)]
pub struct ArraySlice {
    segment: u32,
    words: SegmentStore,
    offset: u64,
    len: u64,
}

impl ArraySlice {
    pub(crate) fn new(segment: u32, words: SegmentStore, offset: u64, len: u64) -> Self {
        ArraySlice {
            segment,
            words,
            offset,
            len,
        }
    }

    /// The segment index this slice windows.
    pub const fn segment(&self) -> u32 {
        self.segment
    }

    /// First segment offset covered by the slice.
    pub const fn offset(&self) -> u64 {
        self.offset
    }

    /// Length in words.
    pub const fn len(&self) -> u64 {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn index(&self, offset: u64) -> Result<usize, MspError> {
        if offset >= self.len {
            return Err(MspError::BoundsViolation {
                segment: self.segment,
                offset,
                length: self.len,
            });
        }
        Ok((self.offset + offset) as usize)
    }

    /// Read the word at `offset` within the slice.
    pub fn get(&self, offset: u64) -> Result<Word36, MspError> {
        let ix = self.index(offset)?;
        let words = self.words.read().expect("segment lock poisoned");
        words
            .get(ix)
            .map(|w| Word36::new(*w))
            .ok_or(MspError::BoundsViolation {
                segment: self.segment,
                offset,
                length: words.len() as u64,
            })
    }

    /// Write the word at `offset` within the slice.
    pub fn set(&self, offset: u64, value: Word36) -> Result<(), MspError> {
        let ix = self.index(offset)?;
        let mut words = self.words.write().expect("segment lock poisoned");
        let length = words.len() as u64;
        match words.get_mut(ix) {
            Some(cell) => {
                *cell = value.bits();
                Ok(())
            }
            None => Err(MspError::BoundsViolation {
                segment: self.segment,
                offset,
                length,
            }),
        }
    }

    /// A narrower window within this slice.
    pub fn subset(&self, offset: u64, len: u64) -> Result<ArraySlice, MspError> {
        if offset + len > self.len {
            return Err(MspError::BoundsViolation {
                segment: self.segment,
                offset: offset + len,
                length: self.len,
            });
        }
        Ok(ArraySlice {
            segment: self.segment,
            words: Arc::clone(&self.words),
            offset: self.offset + offset,
            len,
        })
    }

    /// Copy `source` into the slice starting at `offset`.
    pub fn load(&self, offset: u64, source: &[Word36]) -> Result<(), MspError> {
        if offset + source.len() as u64 > self.len {
            return Err(MspError::BoundsViolation {
                segment: self.segment,
                offset: offset + source.len() as u64,
                length: self.len,
            });
        }
        let mut words = self.words.write().expect("segment lock poisoned");
        let base = (self.offset + offset) as usize;
        for (ix, word) in source.iter().enumerate() {
            words[base + ix] = word.bits();
        }
        Ok(())
    }

    /// Copy `count` words starting at `offset` out of the slice.
    pub fn unload(&self, offset: u64, count: u64) -> Result<Vec<Word36>, MspError> {
        if offset + count > self.len {
            return Err(MspError::BoundsViolation {
                segment: self.segment,
                offset: offset + count,
                length: self.len,
            });
        }
        let words = self.words.read().expect("segment lock poisoned");
        let base = (self.offset + offset) as usize;
        Ok(words[base..base + count as usize].iter().map(|w| Word36::new(*w)).collect())
    }

    /// True when both slices window the same words of the same segment
    /// store.
    pub fn same_window(&self, other: &ArraySlice) -> bool {
        Arc::ptr_eq(&self.words, &other.words) && self.offset == other.offset && self.len == other.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(len: usize) -> SegmentStore {
        Arc::new(RwLock::new(vec![0; len]))
    }

    #[test]
    fn get_set_within_bounds() {
        let slice = ArraySlice::new(0, store(16), 4, 8);
        slice.set(0, Word36::new(0o42)).unwrap();
        assert_eq!(slice.get(0).unwrap(), Word36::new(0o42));

        // offset 0 of the slice is offset 4 of the segment
        let whole = ArraySlice::new(0, Arc::clone(&slice.words), 0, 16);
        assert_eq!(whole.get(4).unwrap(), Word36::new(0o42));
    }

    #[test]
    fn out_of_bounds_is_reported() {
        let slice = ArraySlice::new(0, store(16), 4, 8);
        assert!(matches!(slice.get(8), Err(MspError::BoundsViolation { .. })));
        assert!(matches!(slice.set(9, Word36::ZERO), Err(MspError::BoundsViolation { .. })));
    }

    #[test]
    fn subset_narrows() {
        let slice = ArraySlice::new(0, store(16), 0, 16);
        let sub = slice.subset(10, 6).unwrap();
        sub.set(0, Word36::new(1)).unwrap();
        assert_eq!(slice.get(10).unwrap(), Word36::new(1));
        assert!(slice.subset(10, 7).is_err());
    }

    #[test]
    fn bulk_load_unload() {
        let slice = ArraySlice::new(0, store(8), 0, 8);
        let data: Vec<Word36> = (0..5).map(Word36::new).collect();
        slice.load(2, &data).unwrap();
        assert_eq!(slice.unload(2, 5).unwrap(), data);
    }
}
