//! Growable bit sets.

use crate::NodeId;

const WORD_BITS: usize = 64;

/// Growable dense bit set over `usize` indices.
///
/// Used for decoder worklists (lowest pending order id first) and for
/// visited/active marks during graph walks.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BitSet {
    words: Vec<u64>,
}

impl BitSet {
    pub fn new() -> Self {
        BitSet::default()
    }

    /// Empty set with room for indices below `bits` without reallocating.
    pub fn with_capacity(bits: usize) -> Self {
        BitSet {
            words: Vec::with_capacity(bits.div_ceil(WORD_BITS)),
        }
    }

    /// Insert `index`. Returns `true` if it wasn't present.
    pub fn insert(&mut self, index: usize) -> bool {
        let (word, bit) = (index / WORD_BITS, index % WORD_BITS);
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        let mask = 1u64 << bit;
        let was_set = self.words[word] & mask != 0;
        self.words[word] |= mask;
        !was_set
    }

    /// Remove `index`. Returns `true` if it was present.
    pub fn remove(&mut self, index: usize) -> bool {
        let (word, bit) = (index / WORD_BITS, index % WORD_BITS);
        let Some(w) = self.words.get_mut(word) else {
            return false;
        };
        let mask = 1u64 << bit;
        let was_set = *w & mask != 0;
        *w &= !mask;
        was_set
    }

    #[inline]
    pub fn contains(&self, index: usize) -> bool {
        let (word, bit) = (index / WORD_BITS, index % WORD_BITS);
        self.words
            .get(word)
            .is_some_and(|w| w & (1u64 << bit) != 0)
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    /// Lowest set index.
    pub fn first(&self) -> Option<usize> {
        self.words
            .iter()
            .enumerate()
            .find(|(_, w)| **w != 0)
            .map(|(i, &w)| i * WORD_BITS + w.trailing_zeros() as usize)
    }

    /// Remove and return the lowest set index.
    pub fn pop_first(&mut self) -> Option<usize> {
        let index = self.first()?;
        self.remove(index);
        Some(index)
    }

    /// Set indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &w)| {
            let mut word = w;
            std::iter::from_fn(move || {
                if word == 0 {
                    return None;
                }
                let bit = word.trailing_zeros() as usize;
                word &= word - 1;
                Some(i * WORD_BITS + bit)
            })
        })
    }

    pub fn clear(&mut self) {
        self.words.clear();
    }
}

/// A [`BitSet`] keyed by node handles.
#[derive(Clone, Debug, Default)]
pub struct NodeBitMap {
    bits: BitSet,
}

impl NodeBitMap {
    pub fn new() -> Self {
        NodeBitMap::default()
    }

    /// Mark `node`. Returns `true` if it wasn't marked yet.
    #[inline]
    pub fn mark(&mut self, node: NodeId) -> bool {
        self.bits.insert(node.index())
    }

    #[inline]
    pub fn clear(&mut self, node: NodeId) {
        self.bits.remove(node.index());
    }

    #[inline]
    pub fn is_marked(&self, node: NodeId) -> bool {
        self.bits.contains(node.index())
    }
}
