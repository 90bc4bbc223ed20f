//! Shift instruction family.
//!
//! Shift counts come from the resolved operand address U itself, modulo
//! 72; no storage access occurs except for the normalize loads.

use komodo_types::{DoubleWord36, Word36};

use crate::error::ExecutionError;

use super::IpCore;

impl IpCore {
    fn shift_count(&mut self) -> Result<u32, ExecutionError> {
        Ok((self.operand_value_u()? % 72) as u32)
    }

    /// SSC/SSL/SSA.
    pub(crate) fn shift_single(&mut self, op: fn(&Word36, u32) -> Word36) -> Result<(), ExecutionError> {
        let count = self.shift_count()?;
        let index = self.a_index();
        let shifted = op(&self.grs.get(index), count);
        self.grs.set(index, shifted);
        Ok(())
    }

    /// DSC/DSL/DSA on A(a),A(a+1).
    pub(crate) fn shift_double(&mut self, op: fn(&DoubleWord36, u32) -> DoubleWord36) -> Result<(), ExecutionError> {
        let count = self.shift_count()?;
        let index = self.a_index();
        let pair = DoubleWord36::new(self.grs.get(index), self.grs.get(index + 1));
        let shifted = op(&pair, count);
        self.grs.set(index, shifted.high());
        self.grs.set(index + 1, shifted.low());
        Ok(())
    }

    /// LSC: normalize U into A(a), shift count into A(a+1).
    ///
    /// The word is rotated left until its top two bits differ; a word with
    /// no such position (either zero) normalizes with count 35.
    pub(crate) fn load_shift_count(&mut self) -> Result<(), ExecutionError> {
        let word = self.read_operand_word(true)?;
        let (normalized, count) = normalize_single(word);
        let index = self.a_index();
        self.grs.set(index, normalized);
        self.grs.set(index + 1, Word36::new(u64::from(count)));
        Ok(())
    }

    /// DLSC: the double-word analogue; count 71 for either zero.
    pub(crate) fn double_load_shift_count(&mut self) -> Result<(), ExecutionError> {
        let pair = self.read_operand_pair()?;
        let (normalized, count) = normalize_double(pair);
        let index = self.a_index();
        self.grs.set(index, normalized.high());
        self.grs.set(index + 1, normalized.low());
        self.grs.set(index + 2, Word36::new(u64::from(count)));
        Ok(())
    }
}

fn normalize_single(word: Word36) -> (Word36, u32) {
    if word.is_zero() {
        return (word, 35);
    }
    let mut value = word;
    let mut count = 0;
    while (value.bits() >> 35) & 1 == (value.bits() >> 34) & 1 {
        value = value.left_shift_circular(1);
        count += 1;
    }
    (value, count)
}

fn normalize_double(pair: DoubleWord36) -> (DoubleWord36, u32) {
    if pair.is_zero() {
        return (pair, 71);
    }
    let mut value = pair;
    let mut count = 0;
    while (value.to_u128() >> 71) & 1 == (value.to_u128() >> 70) & 1 {
        value = value.left_shift_circular(1);
        count += 1;
    }
    (value, count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_stops_when_top_bits_differ() {
        let (value, count) = normalize_single(Word36::new(0o000000_000001));
        assert_eq!(count, 34);
        assert_eq!(value.bits() >> 34, 0b01);

        let (_, count) = normalize_single(Word36::new(0o200000_000000));
        assert_eq!(count, 0);
    }

    #[test]
    fn normalize_degenerate_values() {
        assert_eq!(normalize_single(Word36::ZERO).1, 35);
        assert_eq!(normalize_single(Word36::NEG_ZERO).1, 35);
        assert_eq!(normalize_double(DoubleWord36::ZERO).1, 71);
        assert_eq!(normalize_double(DoubleWord36::new(Word36::NEG_ZERO, Word36::NEG_ZERO)).1, 71);
    }

    #[test]
    fn double_normalize_counts_across_words() {
        let pair = DoubleWord36::new(Word36::ZERO, Word36::new(1));
        let (value, count) = normalize_double(pair);
        assert_eq!(count, 70);
        assert_eq!((value.to_u128() >> 70) & 0b11, 0b01);
    }
}
