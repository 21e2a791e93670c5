//! ID types for the label store, following a two-level ID design
//!
//! Two kinds of integer name every label:
//! - Identifiers for external identity (node numbers, element numbers,
//!   field-component numbers; user-meaningful, stable across sessions)
//! - Indices for internal computation (dense, zero-based offsets into
//!   the backing data arrays)

pub use nonminmax::NonMaxUsize;

/// External identifier: user-meaningful integer key, unique among the
/// live labels of one space. Negative values are reserved; see
/// [`INVALID_IDENTIFIER`].
pub type Identifier = i32;

/// Reserved sentinel meaning "no identifier". Stored in the dense
/// identifier array to tombstone removed indices.
pub const INVALID_IDENTIFIER: Identifier = -1;

/// Dense index: zero-based position addressing a backing array.
/// Stable for the lifetime of its label; in sparse mode, never reused
/// while the owning space exists.
pub type Index = usize;

/// An Index that can be stored in Option without doubling size.
/// Uses NonMaxUsize so that Option<NonMaxUsize> is the same size as usize,
/// with usize::MAX serving as the niche for None.
pub type OptIndex = Option<NonMaxUsize>;

/// Convert an Index to OptIndex.
/// Returns None if index == usize::MAX (which would be an astronomically large space).
#[inline]
pub fn some_index(index: Index) -> OptIndex {
    NonMaxUsize::new(index)
}

/// Extract an Index from OptIndex.
#[inline]
pub fn get_index(opt: OptIndex) -> Option<Index> {
    opt.map(|n| n.get())
}
