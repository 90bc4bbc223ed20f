//! Word/byte packing.
//!
//! Peripheral interfaces move 8-bit bytes; storage moves 36-bit words. Two
//! words pack exactly into nine bytes, most significant bits first, and
//! that pairing is the transfer granule everywhere bytes meet words.

use crate::word::Word36;

/// Bytes occupied by a word pair.
pub const BYTES_PER_PAIR: usize = 9;

/// Words per packing granule.
pub const WORDS_PER_PAIR: usize = 2;

/// Bytes needed to carry `words` 36-bit words, rounded up to whole pairs.
pub const fn byte_count_for(words: usize) -> usize {
    words.div_ceil(WORDS_PER_PAIR) * BYTES_PER_PAIR
}

/// Words recoverable from `bytes`, in whole pairs.
pub const fn word_count_for(bytes: usize) -> usize {
    bytes / BYTES_PER_PAIR * WORDS_PER_PAIR
}

/// Pack words into bytes, nine bytes per word pair.
///
/// An odd trailing word packs as a pair with a zero partner.
pub fn pack_words(words: &[Word36]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(byte_count_for(words.len()));
    for pair in words.chunks(WORDS_PER_PAIR) {
        let high = pair[0].bits() as u128;
        let low = pair.get(1).map_or(0, |w| w.bits()) as u128;
        let combined = (high << 36) | low;
        for ix in 0..BYTES_PER_PAIR {
            bytes.push((combined >> (64 - ix * 8)) as u8);
        }
    }
    bytes
}

/// Unpack up to `count` words from bytes packed by [`pack_words`].
///
/// Trailing bytes short of a full pair are ignored.
pub fn unpack_words(bytes: &[u8], count: usize) -> Vec<Word36> {
    let mut words = Vec::with_capacity(count);
    for chunk in bytes.chunks_exact(BYTES_PER_PAIR) {
        if words.len() >= count {
            break;
        }
        let mut combined = 0_u128;
        for byte in chunk {
            combined = (combined << 8) | u128::from(*byte);
        }
        words.push(Word36::new((combined >> 36) as u64));
        if words.len() < count {
            words.push(Word36::new(combined as u64));
        }
    }
    words
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_packs_into_nine_bytes() {
        let words = vec![Word36::new(0o777777_777777), Word36::new(0o123456_701234)];
        let bytes = pack_words(&words);
        assert_eq!(bytes.len(), 9);
        assert_eq!(unpack_words(&bytes, 2), words);
    }

    #[test]
    fn odd_word_count_round_trips() {
        let words: Vec<Word36> = (1..=5).map(|v| Word36::new(v * 0o111)).collect();
        let bytes = pack_words(&words);
        assert_eq!(bytes.len(), byte_count_for(5));
        assert_eq!(unpack_words(&bytes, 5), words);
    }

    #[test]
    fn counts_agree() {
        assert_eq!(byte_count_for(28), 126);
        assert_eq!(word_count_for(126), 28);
        assert_eq!(word_count_for(128), 28);
    }
}
