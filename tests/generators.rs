//! Proptest generators for label store tests
//!
//! Provides `Strategy` builders for identifier sets and operation
//! sequences used by the property tests.

use proptest::collection::{btree_set, vec};
use proptest::prelude::*;

// ============================================================================
// Identifier Generation
// ============================================================================

/// Generate a single non-negative identifier
pub fn arb_identifier() -> impl Strategy<Value = i32> {
    0..400i32
}

/// Generate distinct identifiers in ascending order
pub fn arb_identifier_set(max_len: usize) -> impl Strategy<Value = Vec<i32>> {
    btree_set(arb_identifier(), 1..max_len).prop_map(|set| set.into_iter().collect())
}

/// Generate distinct identifiers in arbitrary insertion order
pub fn arb_shuffled_identifiers(max_len: usize) -> impl Strategy<Value = Vec<i32>> {
    arb_identifier_set(max_len).prop_shuffle()
}

/// Distinct identifiers plus a keep/erase flag for each
pub fn arb_identifiers_with_mask(max_len: usize) -> impl Strategy<Value = Vec<(i32, bool)>> {
    arb_shuffled_identifiers(max_len).prop_flat_map(|ids| {
        let len = ids.len();
        vec(any::<bool>(), len..=len)
            .prop_map(move |mask| ids.iter().copied().zip(mask).collect())
    })
}

// ============================================================================
// Operation Sequences
// ============================================================================

/// One mutation applied to a label space under test
#[derive(Debug, Clone)]
pub enum SpaceOp {
    /// create_label_with_identifier
    Create(i32),
    /// create_label (automatic identifier pick)
    CreateAuto,
    /// remove_label_by_identifier
    RemoveIdentifier(i32),
    /// remove_label (by index)
    RemoveIndex(usize),
}

/// Generate a mixed create/remove sequence. Identifier and index ranges
/// overlap deliberately so removals hit both live and dead targets.
pub fn arb_space_ops(max_len: usize) -> impl Strategy<Value = Vec<SpaceOp>> {
    vec(
        prop_oneof![
            3 => (0..60i32).prop_map(SpaceOp::Create),
            2 => Just(SpaceOp::CreateAuto),
            2 => (0..60i32).prop_map(SpaceOp::RemoveIdentifier),
            1 => (0..80usize).prop_map(SpaceOp::RemoveIndex),
        ],
        0..max_len,
    )
}
