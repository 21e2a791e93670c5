//! Unit tests for the indexed container

use std::cell::Cell;
use std::rc::Rc;

use labelstore::{Identified, IdentifierChange, IndexedContainer, LabelError};

/// Container client object with a mutable identifier
struct Obj {
    id: Cell<i32>,
}

impl Identified for Obj {
    fn identifier(&self) -> i32 {
        self.id.get()
    }
}

fn obj(id: i32) -> Rc<Obj> {
    Rc::new(Obj { id: Cell::new(id) })
}

/// Branching factor 2: leaves hold 4 objects, so small tests split
type Tree = IndexedContainer<Obj, 2>;

fn collect_ids(tree: &Tree) -> Vec<i32> {
    tree.iter().map(|o| o.identifier()).collect()
}

#[test]
fn test_insert_ordered_iteration() {
    let mut tree = Tree::new();
    for id in [5, 3, 8, 1] {
        tree.insert(obj(id)).unwrap();
    }
    assert_eq!(tree.len(), 4);
    assert_eq!(collect_ids(&tree), vec![1, 3, 5, 8]);
    tree.validate();
}

#[test]
fn test_insert_duplicate_identifier_fails() {
    let mut tree = Tree::new();
    tree.insert(obj(7)).unwrap();
    assert_eq!(tree.insert(obj(7)), Err(LabelError::AlreadyExists));
    assert_eq!(tree.len(), 1);
    tree.validate();
}

#[test]
fn test_ascending_bulk_insert() {
    let mut tree = Tree::new();
    for id in 1..=100 {
        tree.insert(obj(id)).unwrap();
        tree.validate();
    }
    assert_eq!(tree.len(), 100);
    assert_eq!(tree.min_identifier(), Some(1));
    assert_eq!(tree.max_identifier(), Some(100));
    assert_eq!(collect_ids(&tree), (1..=100).collect::<Vec<_>>());
}

#[test]
fn test_descending_bulk_insert() {
    let mut tree = Tree::new();
    for id in (1..=50).rev() {
        tree.insert(obj(id)).unwrap();
        tree.validate();
    }
    assert_eq!(collect_ids(&tree), (1..=50).collect::<Vec<_>>());
}

#[test]
fn test_find_and_contains() {
    let mut tree = Tree::new();
    let held = obj(42);
    tree.insert(Rc::clone(&held)).unwrap();
    tree.insert(obj(17)).unwrap();

    assert!(tree.contains(&held));
    let found = tree.find_by_identifier(42).unwrap();
    assert!(Rc::ptr_eq(found, &held));
    assert!(tree.find_by_identifier(99).is_none());

    // A distinct object with the same identifier is not "contained".
    let impostor = obj(42);
    assert!(!tree.contains(&impostor));
    assert!(matches!(tree.remove(&impostor), Err(LabelError::NotFound)));
}

#[test]
fn test_remove_subset() {
    let mut tree = Tree::new();
    for id in 1..=20 {
        tree.insert(obj(id)).unwrap();
    }
    for id in (2..=20).step_by(2) {
        let removed = tree.remove_by_identifier(id).unwrap();
        assert_eq!(removed.identifier(), id);
        tree.validate();
    }
    assert_eq!(tree.len(), 10);
    assert_eq!(collect_ids(&tree), (1..=20).step_by(2).collect::<Vec<_>>());
    assert!(matches!(
        tree.remove_by_identifier(4),
        Err(LabelError::NotFound)
    ));
}

#[test]
fn test_remove_until_empty() {
    let mut tree = Tree::new();
    for id in 1..=30 {
        tree.insert(obj(id)).unwrap();
    }
    // Alternate ends to exercise both detach directions.
    for k in 0..15 {
        tree.remove_by_identifier(30 - k).unwrap();
        tree.validate();
        tree.remove_by_identifier(1 + k).unwrap();
        tree.validate();
    }
    assert!(tree.is_empty());
    assert!(tree.min_identifier().is_none());

    // The emptied tree is reusable.
    tree.insert(obj(5)).unwrap();
    assert_eq!(collect_ids(&tree), vec![5]);
}

#[test]
fn test_block_removal_collapses_subtrees() {
    // Removing contiguous blocks empties whole leaves, detaching them
    // and collapsing single-child stems. The resulting tree has
    // subtrees of differing depth and must still validate and iterate
    // correctly.
    let mut tree = Tree::new();
    for id in 1..=25 {
        tree.insert(obj(id)).unwrap();
    }
    for id in [21, 22, 23, 24, 17, 18, 19, 20] {
        tree.remove_by_identifier(id).unwrap();
        tree.validate();
    }
    assert_eq!(tree.len(), 17);
    let mut expected: Vec<i32> = (1..=16).collect();
    expected.push(25);
    assert_eq!(collect_ids(&tree), expected);
    assert_eq!(tree.max_identifier(), Some(25));
    assert!(tree.find_by_identifier(20).is_none());

    // The thinned tree keeps absorbing inserts.
    for id in 17..=20 {
        tree.insert(obj(id)).unwrap();
        tree.validate();
    }
    assert_eq!(tree.len(), 21);
}

#[test]
fn test_remove_releases_reference() {
    let mut tree = Tree::new();
    let held = obj(9);
    tree.insert(Rc::clone(&held)).unwrap();
    assert_eq!(Rc::strong_count(&held), 2);
    tree.remove(&held).unwrap();
    assert_eq!(Rc::strong_count(&held), 1);
}

#[test]
fn test_remove_if() {
    let mut tree = Tree::new();
    for id in 1..=30 {
        tree.insert(obj(id)).unwrap();
    }
    let removed = tree.remove_if(|o| o.identifier() % 3 == 0);
    assert_eq!(removed, 10);
    assert_eq!(tree.len(), 20);
    assert!(tree.find_by_identifier(27).is_none());
    assert!(tree.find_by_identifier(28).is_some());
    tree.validate();

    // No matches: nothing removed.
    assert_eq!(tree.remove_if(|o| o.identifier() > 100), 0);
    // Everything: tree empties.
    assert_eq!(tree.remove_if(|_| true), 20);
    assert!(tree.is_empty());
    tree.validate();
}

#[test]
fn test_clear() {
    let mut tree = Tree::new();
    let held = obj(1);
    tree.insert(Rc::clone(&held)).unwrap();
    tree.insert(obj(2)).unwrap();
    tree.clear();
    assert!(tree.is_empty());
    assert_eq!(Rc::strong_count(&held), 1);
    tree.insert(obj(3)).unwrap();
    assert_eq!(collect_ids(&tree), vec![3]);
}

#[test]
fn test_duplicate_shares_objects() {
    let mut tree = Tree::new();
    for id in 1..=25 {
        tree.insert(obj(id)).unwrap();
    }
    let copy = tree.duplicate().unwrap();
    copy.validate();
    assert_eq!(collect_ids(&copy), collect_ids(&tree));

    // Same objects, not clones of them.
    let original = tree.find_by_identifier(12).unwrap();
    let duplicated = copy.find_by_identifier(12).unwrap();
    assert!(Rc::ptr_eq(original, duplicated));

    // Structurally independent afterward.
    let mut copy = copy;
    copy.remove_by_identifier(12).unwrap();
    assert!(tree.find_by_identifier(12).is_some());
    assert!(copy.find_by_identifier(12).is_none());
}

#[test]
fn test_first_matching_and_for_each() {
    let mut tree = Tree::new();
    for id in [4, 8, 15, 16, 23, 42] {
        tree.insert(obj(id)).unwrap();
    }
    let first_big = tree.first_matching(|o| o.identifier() > 10).unwrap();
    assert_eq!(first_big.identifier(), 15);
    assert!(tree.first_matching(|o| o.identifier() > 50).is_none());

    let mut sum = 0;
    tree.for_each(|o| sum += o.identifier());
    assert_eq!(sum, 4 + 8 + 15 + 16 + 23 + 42);
}

#[test]
fn test_registered_iterator_traversal() {
    let mut tree = Tree::new();
    for id in 1..=10 {
        tree.insert(obj(id)).unwrap();
    }
    let it = tree.create_iterator().unwrap();
    let mut seen = Vec::new();
    while let Some(o) = tree.iterator_next(&it) {
        seen.push(o.identifier());
    }
    assert_eq!(seen, (1..=10).collect::<Vec<_>>());
    // Exhausted: stays at end.
    assert!(tree.iterator_next(&it).is_none());
    tree.destroy_iterator(it);
}

#[test]
fn test_mutation_invalidates_registered_iterator() {
    let mut tree = Tree::new();
    for id in 1..=10 {
        tree.insert(obj(id)).unwrap();
    }
    let it = tree.create_iterator().unwrap();
    assert_eq!(tree.iterator_next(&it).unwrap().identifier(), 1);

    tree.insert(obj(99)).unwrap();
    assert!(tree.iterator_next(&it).is_none());
    tree.destroy_iterator(it);

    // Erase invalidates too.
    let it = tree.create_iterator().unwrap();
    assert!(tree.iterator_next(&it).is_some());
    tree.remove_by_identifier(5).unwrap();
    assert!(tree.iterator_next(&it).is_none());
    tree.destroy_iterator(it);
}

#[test]
fn test_independent_iterators() {
    let mut tree = Tree::new();
    for id in 1..=6 {
        tree.insert(obj(id)).unwrap();
    }
    let a = tree.create_iterator().unwrap();
    let b = tree.create_iterator().unwrap();
    assert_eq!(tree.iterator_next(&a).unwrap().identifier(), 1);
    assert_eq!(tree.iterator_next(&a).unwrap().identifier(), 2);
    assert_eq!(tree.iterator_next(&b).unwrap().identifier(), 1);
    assert_eq!(tree.iterator_next(&a).unwrap().identifier(), 3);
    tree.destroy_iterator(a);
    // b keeps its own position after a's slot is pooled.
    assert_eq!(tree.iterator_next(&b).unwrap().identifier(), 2);
    tree.destroy_iterator(b);
}

#[test]
fn test_identifier_change_across_related_containers() {
    let mut family: Vec<Tree> = vec![Tree::new(), Tree::new(), Tree::new()];
    let target = obj(10);
    // Target lives in containers 0 and 2; bystanders everywhere.
    for (i, tree) in family.iter_mut().enumerate() {
        tree.insert(obj(1)).unwrap();
        tree.insert(obj(20)).unwrap();
        if i != 1 {
            tree.insert(Rc::clone(&target)).unwrap();
        }
    }

    let change = IdentifierChange::begin(&mut family, &target);
    target.id.set(15);
    change.finish().unwrap();

    for (i, tree) in family.iter().enumerate() {
        assert!(tree.find_by_identifier(10).is_none());
        let expected = i != 1;
        assert_eq!(tree.find_by_identifier(15).is_some(), expected);
        tree.validate();
    }
}

#[test]
fn test_identifier_change_drop_reinserts() {
    let mut family: Vec<Tree> = vec![Tree::new()];
    let target = obj(3);
    family[0].insert(Rc::clone(&target)).unwrap();
    family[0].insert(obj(7)).unwrap();

    {
        let _change = IdentifierChange::begin(&mut family, &target);
        target.id.set(5);
        // Guard dropped without finish: early-return path.
    }
    assert!(family[0].find_by_identifier(3).is_none());
    assert!(family[0].find_by_identifier(5).is_some());
    assert_eq!(family[0].len(), 2);
    family[0].validate();
}
