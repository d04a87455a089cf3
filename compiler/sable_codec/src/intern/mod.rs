//! Frequency-ordered interning tables.
//!
//! An [`InternTable`] is filled during the prepare phase of encoding:
//! every [`add`](InternTable::add) counts one occurrence. Closing the table
//! with [`encode_all`](InternTable::encode_all) assigns dense indices
//! starting at 1, most frequent first (ties by first insertion), so the
//! common values get the shortest varints. Index 0 stands for "absent".
//!
//! After closing, `add` is only a presence check.

use std::hash::Hash;

use rustc_hash::FxHashMap;

#[derive(Clone, Copy, Debug)]
struct Entry {
    first_seen: u32,
    frequency: u32,
    index: u32,
}

/// Two-phase interning table.
#[derive(Clone, Debug)]
pub struct InternTable<T> {
    entries: FxHashMap<T, Entry>,
    /// Values in index order (`encoded[i]` has index `i + 1`), set on close.
    encoded: Option<Vec<T>>,
}

impl<T> Default for InternTable<T> {
    fn default() -> Self {
        InternTable {
            entries: FxHashMap::default(),
            encoded: None,
        }
    }
}

impl<T: Hash + Eq + Clone> InternTable<T> {
    pub fn new() -> Self {
        InternTable::default()
    }

    /// Count one occurrence of `value`.
    ///
    /// Once closed, returns whether `value` was interned instead.
    pub fn add(&mut self, value: &T) -> bool {
        if self.encoded.is_some() {
            return self.entries.contains_key(value);
        }
        let next = u32::try_from(self.entries.len()).unwrap_or(u32::MAX);
        self.entries
            .entry(value.clone())
            .or_insert(Entry {
                first_seen: next,
                frequency: 0,
                index: 0,
            })
            .frequency += 1;
        true
    }

    pub fn is_closed(&self) -> bool {
        self.encoded.is_some()
    }

    /// Number of distinct values added.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Close the table and assign indices. Returns the values in index
    /// order. Closing twice keeps the first assignment.
    pub fn encode_all(&mut self) -> &[T] {
        if self.encoded.is_none() {
            let mut order: Vec<(T, Entry)> = self
                .entries
                .iter()
                .map(|(value, entry)| (value.clone(), *entry))
                .collect();
            order.sort_by(|(_, a), (_, b)| {
                b.frequency
                    .cmp(&a.frequency)
                    .then(a.first_seen.cmp(&b.first_seen))
            });
            for (position, (value, _)) in order.iter().enumerate() {
                if let Some(entry) = self.entries.get_mut(value) {
                    entry.index = u32::try_from(position + 1).unwrap_or(u32::MAX);
                }
            }
            self.encoded = Some(order.into_iter().map(|(value, _)| value).collect());
        }
        self.encoded.as_deref().unwrap_or_default()
    }

    /// Index of `value`, once closed. `None` if open or never added.
    pub fn index_of(&self, value: &T) -> Option<u32> {
        self.encoded.as_ref()?;
        self.entries.get(value).map(|entry| entry.index)
    }

    /// Values in index order, once closed.
    pub fn values(&self) -> Option<&[T]> {
        self.encoded.as_deref()
    }
}
