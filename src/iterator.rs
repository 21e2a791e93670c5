//! Pooled iterator state for label spaces
//!
//! Iterators are created only by a [`LabelSpace`](crate::space::LabelSpace)
//! and addressed through opaque [`LabelIteratorId`] handles into the
//! space's slot table. Destroying an iterator returns its slot to the
//! pool; invalidation tags the state in place, so a handle held across a
//! structural mutation keeps answering "at end" instead of touching
//! stale tree nodes.

use crate::container::TreeCursor;
use crate::id::OptIndex;

/// Handle to a pooled iterator of one label space.
///
/// Carries the identity token of the space that issued it; every
/// operation checks the token, so a handle presented to a different
/// space answers "at end" instead of touching an unrelated slot. Not
/// clonable: the space reclaims the slot when the handle is passed back
/// to `destroy_label_iterator`.
#[derive(Debug)]
pub struct LabelIteratorId {
    pub(crate) slot: usize,
    /// Identity token of the issuing space
    pub(crate) space: u64,
}

/// One slot in a space's iterator table
pub(crate) enum IteratorSlot {
    /// Pooled; reused by the next `create_label_iterator`
    Free,
    Live(LabelIterator),
}

/// Cursor state of one live iterator
pub(crate) struct LabelIterator {
    pub(crate) mode: IterMode,
    /// Index currently under the cursor; None before the first advance
    /// and after exhaustion or invalidation
    pub(crate) current: OptIndex,
}

pub(crate) enum IterMode {
    /// Arithmetic stepping over `0..index_size`; every index is live
    /// while the space is contiguous
    Contiguous,
    /// Ordered traversal of the sparse entry tree
    Sparse(TreeCursor),
    /// Invalidated (structural mutation, or exhausted); at-end forever
    Invalid,
}

impl LabelIterator {
    pub(crate) fn invalidate(&mut self) {
        self.mode = IterMode::Invalid;
        self.current = None;
    }
}
