//! labelstore: identifier indexing for a finite-element data store
//!
//! Maps stable, externally meaningful integer identifiers (node numbers,
//! element numbers, field-component indices) onto dense zero-based
//! positions addressing the backing data arrays, under arbitrary
//! insertion and removal order. A contiguous fast path computes the
//! mapping arithmetically; a one-way sparse fallback keeps it in an
//! ordered tree with tombstoned, never-reused indices. Groups tag
//! arbitrary subsets of the mapped positions, and pooled iterators stay
//! safe to hold while the mapping mutates underneath them.

pub mod container;
pub mod error;
pub mod group;
pub mod id;
pub mod iterator;
pub mod space;

pub use container::{ContainerIterator, Identified, IdentifierChange, IndexedContainer};
pub use error::{LabelError, LabelResult};
pub use group::LabelGroup;
pub use id::{get_index, some_index, Identifier, Index, OptIndex, INVALID_IDENTIFIER};
pub use iterator::LabelIteratorId;
pub use space::{IdentifierRange, LabelSpace};
