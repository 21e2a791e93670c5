//! Label space: identifier ↔ dense-index mapping for one domain dimension
//!
//! A label space assigns every distinct external identifier (node
//! number, element number, field-component number) a dense zero-based
//! index that addresses the backing data arrays. Two regimes:
//!
//! - **Contiguous**: live identifiers form a gapless increasing run and
//!   `index == identifier − first_identifier`, so no auxiliary storage
//!   exists at all.
//! - **Sparse**: the first operation that would break the run (an
//!   out-of-sequence create, or any removal) migrates the space — one
//!   way, never back — to an ordered entry tree plus a dense
//!   index→identifier array. From then on indices are handed out
//!   monotonically and tombstoned on removal, never reused, so groups
//!   and derived maps addressing by index stay valid.

use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::container::{Identified, IndexedContainer, TreeCursor};
use crate::error::{LabelError, LabelResult};
use crate::id::{get_index, some_index, Identifier, Index, INVALID_IDENTIFIER};
use crate::iterator::{IterMode, IteratorSlot, LabelIterator, LabelIteratorId};

/// One sparse label: the identifier→index record stored in the entry tree.
pub(crate) struct LabelEntry {
    pub(crate) identifier: Identifier,
    pub(crate) index: Index,
}

impl Identified for LabelEntry {
    fn identifier(&self) -> Identifier {
        self.identifier
    }
}

/// Sparse-mode storage, materialized on the first contiguity break
struct SparseLabels {
    /// Identifier-ordered entry tree: identifier → index
    entries: IndexedContainer<LabelEntry>,
    /// Dense reverse map: index → identifier, tombstoned with
    /// [`INVALID_IDENTIFIER`] on removal
    identifiers: Vec<Identifier>,
}

/// A closed identifier interval, as reported by
/// [`LabelSpace::get_identifier_ranges`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentifierRange {
    pub first: Identifier,
    pub last: Identifier,
}

/// Source of per-space identity tokens; see [`LabelSpace::token`].
static NEXT_SPACE_TOKEN: AtomicU64 = AtomicU64::new(1);

/// The identifier↔index mapping for one dimension of a domain.
pub struct LabelSpace {
    /// Identity token stamped into every handle this space issues, so
    /// a handle from another space cannot address this space's slots
    token: u64,
    contiguous: bool,
    /// Smallest live identifier; INVALID_IDENTIFIER when empty
    first_identifier: Identifier,
    /// Largest live identifier; INVALID_IDENTIFIER when empty
    last_identifier: Identifier,
    /// Lazily advanced probe hint for automatic identifier assignment
    first_free_identifier: Identifier,
    /// Live label count
    labels_count: usize,
    /// Current index upper bound; exceeds `labels_count` once sparse
    /// removals have tombstoned indices
    index_size: usize,
    /// None while contiguous; Some forever after the downgrade
    sparse: Option<SparseLabels>,
    /// Pooled iterator table addressed by LabelIteratorId handles
    iterators: Vec<IteratorSlot>,
}

impl Default for LabelSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl LabelSpace {
    /// Create a new empty label space.
    pub fn new() -> Self {
        Self {
            token: NEXT_SPACE_TOKEN.fetch_add(1, Ordering::Relaxed),
            contiguous: true,
            first_identifier: INVALID_IDENTIFIER,
            last_identifier: INVALID_IDENTIFIER,
            first_free_identifier: 1,
            labels_count: 0,
            index_size: 0,
            sparse: None,
            iterators: Vec::new(),
        }
    }

    /// Number of live labels
    pub fn len(&self) -> usize {
        self.labels_count
    }

    pub fn is_empty(&self) -> bool {
        self.labels_count == 0
    }

    /// Current index upper bound: every valid index is below this. May
    /// exceed [`len`](Self::len) after sparse removals.
    pub fn index_size(&self) -> usize {
        self.index_size
    }

    /// Whether the space is still in the contiguous fast path
    pub fn is_contiguous(&self) -> bool {
        self.contiguous
    }

    /// Smallest live identifier
    pub fn first_identifier(&self) -> Option<Identifier> {
        (self.labels_count > 0).then_some(self.first_identifier)
    }

    /// Largest live identifier
    pub fn last_identifier(&self) -> Option<Identifier> {
        (self.labels_count > 0).then_some(self.last_identifier)
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// Index of the label with the given identifier, if live.
    pub fn find_label_by_identifier(&self, id: Identifier) -> Option<Index> {
        if id < 0 {
            return None;
        }
        match &self.sparse {
            None => {
                if self.labels_count == 0 || id < self.first_identifier || id > self.last_identifier
                {
                    return None;
                }
                Some((id - self.first_identifier) as Index)
            }
            Some(sparse) => sparse.entries.find_by_identifier(id).map(|e| e.index),
        }
    }

    /// Identifier of the label at the given index, if live.
    pub fn get_identifier(&self, index: Index) -> Option<Identifier> {
        if index >= self.index_size {
            return None;
        }
        match &self.sparse {
            None => Some(self.first_identifier + index as Identifier),
            Some(sparse) => {
                let id = sparse.identifiers[index];
                (id != INVALID_IDENTIFIER).then_some(id)
            }
        }
    }

    /// Lowest valid index, in ascending identifier order.
    pub fn first_index(&self) -> Option<Index> {
        match &self.sparse {
            None => (self.labels_count > 0).then_some(0),
            Some(sparse) => sparse.entries.iter().next().map(|e| e.index),
        }
    }

    // ------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------

    /// Create a label with the lowest currently-unused identifier,
    /// lazily advancing the free-identifier hint past any gaps found.
    pub fn create_label(&mut self) -> LabelResult<Index> {
        let mut id = self.first_free_identifier;
        while self.find_label_by_identifier(id).is_some() {
            id += 1;
        }
        let index = self.create_label_private(id)?;
        self.first_free_identifier = id + 1;
        Ok(index)
    }

    /// Create a label with the given identifier.
    pub fn create_label_with_identifier(&mut self, id: Identifier) -> LabelResult<Index> {
        if id < 0 {
            return Err(LabelError::Argument);
        }
        if self.find_label_by_identifier(id).is_some() {
            return Err(LabelError::AlreadyExists);
        }
        self.create_label_private(id)
    }

    /// Find the label with the given identifier, creating it on a miss.
    /// Returns the index and whether the label was newly created.
    pub fn find_or_create_label(&mut self, id: Identifier) -> LabelResult<(Index, bool)> {
        if id < 0 {
            return Err(LabelError::Argument);
        }
        if let Some(index) = self.find_label_by_identifier(id) {
            return Ok((index, false));
        }
        Ok((self.create_label_private(id)?, true))
    }

    /// Add labels for identifiers `min, min + stride, ..` up to `max`.
    ///
    /// When the space is empty, contiguous, and `stride == 1` this is an
    /// O(1) bound update; otherwise it degrades to per-identifier
    /// find-or-create. Returns the count of labels created.
    pub fn add_labels_range(
        &mut self,
        min: Identifier,
        max: Identifier,
        stride: Identifier,
    ) -> LabelResult<usize> {
        if max < min || stride < 1 || min < 0 {
            return Err(LabelError::Argument);
        }
        if self.labels_count == 0 && self.contiguous && stride == 1 {
            let count = (max - min + 1) as usize;
            self.first_identifier = min;
            self.last_identifier = max;
            self.labels_count = count;
            self.index_size = count;
            self.invalidate_iterators();
            return Ok(count);
        }
        let mut created = 0;
        for id in (min..=max).step_by(stride as usize) {
            let (_, new) = self.find_or_create_label(id)?;
            if new {
                created += 1;
            }
        }
        Ok(created)
    }

    fn create_label_private(&mut self, id: Identifier) -> LabelResult<Index> {
        debug_assert!(id >= 0);
        if self.contiguous {
            if self.labels_count == 0 {
                self.first_identifier = id;
                self.last_identifier = id;
                self.labels_count = 1;
                self.index_size = 1;
                self.invalidate_iterators();
                return Ok(0);
            }
            if id == self.last_identifier + 1 {
                self.last_identifier = id;
                self.labels_count += 1;
                self.index_size += 1;
                self.invalidate_iterators();
                return Ok(self.index_size - 1);
            }
            // Out-of-sequence identifier breaks the run.
            self.set_not_contiguous()?;
        }

        let index = self.index_size;
        let sparse = self.sparse.as_mut().expect("sparse storage after downgrade");
        sparse.identifiers.try_reserve(1)?;
        sparse.entries.insert(Rc::new(LabelEntry {
            identifier: id,
            index,
        }))?;
        sparse.identifiers.push(id);
        self.index_size += 1;
        self.labels_count += 1;
        if self.labels_count == 1 || id < self.first_identifier {
            self.first_identifier = id;
        }
        if self.labels_count == 1 || id > self.last_identifier {
            self.last_identifier = id;
        }
        self.invalidate_iterators();
        Ok(index)
    }

    /// One-way contiguous→sparse migration: materialize the entry tree
    /// and the dense identifier array by back-filling the implicit
    /// sequence. On memory failure the space is left exactly as it was,
    /// still contiguous.
    fn set_not_contiguous(&mut self) -> LabelResult<()> {
        debug_assert!(self.contiguous);
        let mut identifiers = Vec::new();
        identifiers.try_reserve_exact(self.index_size)?;
        let mut entries = IndexedContainer::new();
        for index in 0..self.index_size {
            let id = self.first_identifier + index as Identifier;
            entries.insert(Rc::new(LabelEntry {
                identifier: id,
                index,
            }))?;
            identifiers.push(id);
        }
        self.sparse = Some(SparseLabels {
            entries,
            identifiers,
        });
        self.contiguous = false;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Removal
    // ------------------------------------------------------------------

    /// Remove the label at the given index, tombstoning the index.
    pub fn remove_label(&mut self, index: Index) -> LabelResult<()> {
        let id = self.get_identifier(index).ok_or(LabelError::NotFound)?;
        self.remove_label_private(id, index)
    }

    /// Remove the label with the given identifier.
    pub fn remove_label_by_identifier(&mut self, id: Identifier) -> LabelResult<()> {
        let index = self
            .find_label_by_identifier(id)
            .ok_or(LabelError::NotFound)?;
        self.remove_label_private(id, index)
    }

    fn remove_label_private(&mut self, id: Identifier, index: Index) -> LabelResult<()> {
        if self.contiguous {
            // Any removal leaves contiguous mode, even a tail trim:
            // shrinking index_size would hand a used index back out.
            self.set_not_contiguous()?;
        }
        let sparse = self.sparse.as_mut().expect("sparse storage after downgrade");
        let removed = sparse.entries.remove_by_identifier(id);
        debug_assert!(removed.is_ok());
        sparse.identifiers[index] = INVALID_IDENTIFIER;
        self.labels_count -= 1;
        self.first_identifier = sparse.entries.min_identifier().unwrap_or(INVALID_IDENTIFIER);
        self.last_identifier = sparse.entries.max_identifier().unwrap_or(INVALID_IDENTIFIER);
        if id < self.first_free_identifier {
            self.first_free_identifier = id;
        }
        self.invalidate_iterators();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reporting
    // ------------------------------------------------------------------

    /// Ordered closed identifier intervals covering every live label,
    /// coalescing adjacent identifiers.
    pub fn get_identifier_ranges(&self) -> Vec<IdentifierRange> {
        let mut ranges: Vec<IdentifierRange> = Vec::new();
        match &self.sparse {
            None => {
                if self.labels_count > 0 {
                    ranges.push(IdentifierRange {
                        first: self.first_identifier,
                        last: self.last_identifier,
                    });
                }
            }
            Some(sparse) => {
                for entry in sparse.entries.iter() {
                    match ranges.last_mut() {
                        Some(range) if range.last + 1 == entry.identifier => {
                            range.last = entry.identifier;
                        }
                        _ => ranges.push(IdentifierRange {
                            first: entry.identifier,
                            last: entry.identifier,
                        }),
                    }
                }
            }
        }
        ranges
    }

    // ------------------------------------------------------------------
    // Iterators
    // ------------------------------------------------------------------

    /// Create an iterator positioned before the first index, reusing a
    /// pooled slot if one is available.
    pub fn create_label_iterator(&mut self) -> LabelResult<LabelIteratorId> {
        let state = IteratorSlot::Live(self.fresh_iterator());
        for (slot, pooled) in self.iterators.iter_mut().enumerate() {
            if matches!(pooled, IteratorSlot::Free) {
                *pooled = state;
                return Ok(LabelIteratorId {
                    slot,
                    space: self.token,
                });
            }
        }
        self.iterators.try_reserve(1)?;
        self.iterators.push(state);
        Ok(LabelIteratorId {
            slot: self.iterators.len() - 1,
            space: self.token,
        })
    }

    /// Return an iterator's slot to the pool. A handle issued by a
    /// different space leaves this space untouched.
    pub fn destroy_label_iterator(&mut self, it: LabelIteratorId) {
        if it.space != self.token {
            return;
        }
        if let Some(slot) = self.iterators.get_mut(it.slot) {
            *slot = IteratorSlot::Free;
        }
    }

    /// Advance an iterator to the next valid index, in ascending
    /// identifier order. None at exhaustion, after invalidation, or for
    /// a stale or foreign handle.
    pub fn iterator_next(&mut self, it: &LabelIteratorId) -> Option<Index> {
        if it.space != self.token {
            return None;
        }
        let state = match self.iterators.get_mut(it.slot) {
            Some(IteratorSlot::Live(state)) => state,
            _ => return None,
        };
        match &mut state.mode {
            IterMode::Contiguous => {
                let next = match get_index(state.current) {
                    Some(index) => index + 1,
                    None => 0,
                };
                if next < self.index_size {
                    state.current = some_index(next);
                    Some(next)
                } else {
                    state.invalidate();
                    None
                }
            }
            IterMode::Sparse(cursor) => {
                let Some(sparse) = self.sparse.as_ref() else {
                    state.invalidate();
                    return None;
                };
                match sparse.entries.cursor_next_entry(cursor) {
                    Some(entry) => {
                        let index = entry.index;
                        state.current = some_index(index);
                        Some(index)
                    }
                    None => {
                        state.invalidate();
                        None
                    }
                }
            }
            IterMode::Invalid => None,
        }
    }

    /// Index currently under the iterator.
    pub fn iterator_index(&self, it: &LabelIteratorId) -> Option<Index> {
        if it.space != self.token {
            return None;
        }
        match self.iterators.get(it.slot) {
            Some(IteratorSlot::Live(state)) => get_index(state.current),
            _ => None,
        }
    }

    /// Identifier of the label currently under the iterator.
    pub fn iterator_identifier(&self, it: &LabelIteratorId) -> Option<Identifier> {
        self.get_identifier(self.iterator_index(it)?)
    }

    fn fresh_iterator(&self) -> LabelIterator {
        LabelIterator {
            mode: if self.contiguous {
                IterMode::Contiguous
            } else {
                IterMode::Sparse(TreeCursor::new())
            },
            current: None,
        }
    }

    /// Tag every live iterator at-end. Runs before any structural
    /// mutation returns; slots stay registered so held handles keep
    /// answering None.
    fn invalidate_iterators(&mut self) {
        for slot in &mut self.iterators {
            if let IteratorSlot::Live(state) = slot {
                state.invalidate();
            }
        }
    }
}
