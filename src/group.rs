//! Label group: a boolean subset of a label space's indices
//!
//! Tags an arbitrary subset of the mapped positions (e.g. a named
//! sub-domain of nodes or elements) as a bit-word vector keyed by index.
//! A group is meaningful only relative to the space it was built from,
//! which it does not own or reference; traversal is a filter over
//! ordinary space iteration, not an independently maintained order.

use crate::error::LabelResult;
use crate::id::Index;
use crate::iterator::LabelIteratorId;
use crate::space::LabelSpace;

const WORD_BITS: usize = u64::BITS as usize;

/// Boolean membership vector over a label space's indices.
#[derive(Debug, Clone, Default)]
pub struct LabelGroup {
    words: Vec<u64>,
    /// Live membership count
    count: usize,
    /// One past the highest index ever set; bounds iteration
    index_limit: usize,
}

impl LabelGroup {
    /// Create a new empty group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of member indices
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// One past the highest index ever set since creation or the last
    /// [`clear`](Self::clear); every member index is below this.
    pub fn index_limit(&self) -> usize {
        self.index_limit
    }

    /// Set or clear membership of one index. Returns whether membership
    /// actually changed. Growing the backing storage can fail with
    /// `Memory`, in which case membership is unchanged for this call.
    pub fn set_index(&mut self, index: Index, in_group: bool) -> LabelResult<bool> {
        let word = index / WORD_BITS;
        let mask = 1u64 << (index % WORD_BITS);
        if in_group {
            if word >= self.words.len() {
                self.words.try_reserve(word + 1 - self.words.len())?;
                self.words.resize(word + 1, 0);
            }
            if self.words[word] & mask != 0 {
                return Ok(false);
            }
            self.words[word] |= mask;
            self.count += 1;
            if index >= self.index_limit {
                self.index_limit = index + 1;
            }
            Ok(true)
        } else {
            if word >= self.words.len() || self.words[word] & mask == 0 {
                return Ok(false);
            }
            self.words[word] &= !mask;
            self.count -= 1;
            Ok(true)
        }
    }

    /// O(1) membership test.
    pub fn has_index(&self, index: Index) -> bool {
        let word = index / WORD_BITS;
        let mask = 1u64 << (index % WORD_BITS);
        self.words.get(word).is_some_and(|w| w & mask != 0)
    }

    /// Remove every member, keeping the backing storage.
    pub fn clear(&mut self) {
        self.words.iter_mut().for_each(|w| *w = 0);
        self.count = 0;
        self.index_limit = 0;
    }

    /// Advance a freshly created iterator of `space` to the first index
    /// that is a member of this group; None if the group and space share
    /// no live index.
    pub fn first_index(&self, space: &mut LabelSpace, it: &LabelIteratorId) -> Option<Index> {
        self.increment(space, it)
    }

    /// Advance the iterator until it lands on a member of the group or
    /// is exhausted. The handle is validated by the space that issued
    /// it; a foreign or stale handle answers None.
    pub fn increment(&self, space: &mut LabelSpace, it: &LabelIteratorId) -> Option<Index> {
        while let Some(index) = space.iterator_next(it) {
            if self.has_index(index) {
                return Some(index);
            }
        }
        None
    }
}
