use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

const WORD_BITS: usize = 64;

/// Growable set of small non-negative integers, used for instrumenter ids.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BitSet {
    words: Vec<u64>,
}

impl BitSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(bits: usize) -> Self {
        Self {
            words: Vec::with_capacity(bits.div_ceil(WORD_BITS)),
        }
    }

    pub fn insert(&mut self, bit: usize) {
        let word = bit / WORD_BITS;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1 << (bit % WORD_BITS);
    }

    pub fn remove(&mut self, bit: usize) {
        if let Some(word) = self.words.get_mut(bit / WORD_BITS) {
            *word &= !(1 << (bit % WORD_BITS));
            self.trim();
        }
    }

    pub fn contains(&self, bit: usize) -> bool {
        self.words
            .get(bit / WORD_BITS)
            .is_some_and(|word| word & (1 << (bit % WORD_BITS)) != 0)
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|word| *word == 0)
    }

    pub fn len(&self) -> usize {
        self.words.iter().map(|word| word.count_ones() as usize).sum()
    }

    pub fn union_with(&mut self, other: &BitSet) {
        if other.words.len() > self.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        for (word, other) in self.words.iter_mut().zip(&other.words) {
            *word |= other;
        }
    }

    /// Set bits in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(index, word)| {
            let mut remaining = *word;
            std::iter::from_fn(move || {
                if remaining == 0 {
                    return None;
                }
                let bit = remaining.trailing_zeros() as usize;
                remaining &= remaining - 1;
                Some(index * WORD_BITS + bit)
            })
        })
    }

    fn trim(&mut self) {
        while self.words.last() == Some(&0) {
            self.words.pop();
        }
    }

    // Trailing zero words may come from the wire.
    fn significant_words(&self) -> &[u64] {
        let len = self
            .words
            .iter()
            .rposition(|word| *word != 0)
            .map_or(0, |last| last + 1);
        &self.words[..len]
    }
}

impl PartialEq for BitSet {
    fn eq(&self, other: &Self) -> bool {
        self.significant_words() == other.significant_words()
    }
}

impl Eq for BitSet {}

impl Hash for BitSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.significant_words().hash(state);
    }
}

impl FromIterator<usize> for BitSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut set = BitSet::new();
        for bit in iter {
            set.insert(bit);
        }
        set
    }
}

impl fmt::Debug for BitSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_bits_across_words() {
        let mut set: BitSet = [1, 3, 64, 130].into_iter().collect();
        assert!(set.contains(64));
        assert!(!set.contains(2));
        assert_eq!(set.len(), 4);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![1, 3, 64, 130]);

        set.remove(130);
        set.remove(64);
        assert_eq!(set, [1, 3].into_iter().collect());
        assert_eq!(format!("{set:?}"), "{1, 3}");
    }

    #[test]
    fn union_and_json_form() {
        let mut left: BitSet = [0].into_iter().collect();
        left.union_with(&[65].into_iter().collect());
        assert_eq!(left.iter().collect::<Vec<_>>(), vec![0, 65]);

        let json = serde_json::to_string(&left).expect("serialize");
        assert_eq!(json, "[1,2]");
        let back: BitSet = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, left);

        let padded: BitSet = serde_json::from_str("[1,2,0]").expect("deserialize");
        assert_eq!(padded, left);
    }
}
