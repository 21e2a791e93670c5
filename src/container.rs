//! Ordered indexed container: an arena-backed N-way balanced tree
//!
//! Stores shared-ownership objects sorted by the identifier each object
//! reports through [`Identified`]. The tree is the sparse fallback under
//! [`LabelSpace`](crate::space::LabelSpace) and a general-purpose ordered
//! collection for identifier-keyed manager layers.
//!
//! # Key design points
//!
//! - **Arena nodes**: nodes are a tagged `Stem`/`Leaf` enum held in a
//!   flat arena and referenced by `NodeId` index, with a free list for
//!   recycling. No parent or peer pointers anywhere.
//! - **End-biased splits**: inserting at the highest identifier leaves
//!   the old node full and starts a fresh one, so the common ascending
//!   insertion pattern packs nodes to ~100% instead of 50%.
//! - **Fallible growth**: every node the mutation might need is
//!   allocated up front through `try_reserve`; if that fails the
//!   operation reports [`LabelError::Memory`] with the tree untouched.
//! - **Synchronous invalidation**: registered cursors are swept to the
//!   at-end state before any structural mutation returns.

use std::rc::Rc;

use crate::error::{LabelError, LabelResult};
use crate::id::Identifier;

/// Implemented by objects stored in an [`IndexedContainer`].
///
/// The reported identifier must stay fixed while the object is resident
/// in any container, except inside an [`IdentifierChange`] critical
/// section, which detaches the object from its containers first.
pub trait Identified {
    /// The identifier this object sorts by
    fn identifier(&self) -> Identifier;
}

/// Index of a node in the arena
type NodeId = usize;

/// A tree node. Stem keys record the maximum identifier of the subtree
/// rooted at the same-position child, so `keys.len() + 1 == children.len()`.
enum Node<T> {
    Stem {
        keys: Vec<Identifier>,
        children: Vec<NodeId>,
    },
    Leaf {
        objects: Vec<Rc<T>>,
    },
}

impl<T> Node<T> {
    fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }
}

// ============================================================================
// ARENA
// ============================================================================

/// Allocated and free nodes. The free list's capacity is kept large
/// enough to absorb every live node id, so releasing a node never
/// allocates.
struct Arena<T> {
    nodes: Vec<Option<Node<T>>>,
    free: Vec<NodeId>,
}

impl<T> Arena<T> {
    fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Get the node associated to the given `id`.
    ///
    /// Panics if `id` is free or out of bounds.
    fn node(&self, id: NodeId) -> &Node<T> {
        self.nodes[id].as_ref().expect("node is allocated")
    }

    /// Get the node associated to the given `id` mutably.
    fn node_mut(&mut self, id: NodeId) -> &mut Node<T> {
        self.nodes[id].as_mut().expect("node is allocated")
    }

    /// Allocate a slot for the given node, reusing the free list first.
    fn try_alloc(&mut self, node: Node<T>) -> LabelResult<NodeId> {
        if let Some(id) = self.free.pop() {
            debug_assert!(self.nodes[id].is_none());
            self.nodes[id] = Some(node);
            return Ok(id);
        }
        self.nodes.try_reserve(1)?;
        // Keep the free list able to hold every node id without growing.
        let need = self.nodes.len() + 1;
        if self.free.capacity() < need {
            self.free.try_reserve(need - self.free.len())?;
        }
        self.nodes.push(Some(node));
        Ok(self.nodes.len() - 1)
    }

    /// Release the given node id and return the node it used to identify.
    fn release(&mut self, id: NodeId) -> Node<T> {
        let node = self.nodes[id].take().expect("node is allocated");
        self.free.push(id);
        node
    }

    /// Temporarily move a node out of its slot; pair with `put`.
    fn take(&mut self, id: NodeId) -> Node<T> {
        self.nodes[id].take().expect("node is allocated")
    }

    fn put(&mut self, id: NodeId, node: Node<T>) {
        debug_assert!(self.nodes[id].is_none());
        self.nodes[id] = Some(node);
    }

    fn clear(&mut self) {
        self.nodes.clear();
        self.free.clear();
    }
}

// ============================================================================
// CURSORS
// ============================================================================

/// Detached tree cursor: the descent stack of (node, slot) pairs from
/// the root to the current leaf entry. Holds no reference back to the
/// container; whoever owns the cursor must discard it when the tree
/// mutates, which the registered-cursor table below does automatically.
pub(crate) struct TreeCursor {
    stack: Vec<(NodeId, usize)>,
    started: bool,
}

impl TreeCursor {
    pub(crate) fn new() -> Self {
        Self {
            stack: Vec::new(),
            started: false,
        }
    }
}

/// One slot in the registered-cursor table
enum CursorSlot {
    /// Destroyed; reusable by the next `create_iterator`
    Free,
    /// Live cursor
    Live(TreeCursor),
    /// Exhausted or invalidated by a structural mutation
    End,
}

/// Handle to a cursor registered in an [`IndexedContainer`].
///
/// Only meaningful to the container that issued it; the container keeps
/// the cursor state and sweeps it to at-end whenever the tree mutates.
#[derive(Debug)]
pub struct ContainerIterator {
    slot: usize,
}

/// Borrowing in-order iterator over a container's objects
pub struct Iter<'a, T> {
    arena: &'a Arena<T>,
    root: Option<NodeId>,
    cursor: TreeCursor,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a Rc<T>;

    fn next(&mut self) -> Option<&'a Rc<T>> {
        cursor_next(self.arena, self.root, &mut self.cursor)
    }
}

/// Descend to the leftmost leaf entry of `node`, pushing the path.
fn descend_leftmost<T>(arena: &Arena<T>, stack: &mut Vec<(NodeId, usize)>, mut node: NodeId) {
    loop {
        stack.push((node, 0));
        match arena.node(node) {
            Node::Stem { children, .. } => node = children[0],
            Node::Leaf { .. } => return,
        }
    }
}

/// Advance the cursor one entry; returns the object now under it, or
/// None at exhaustion.
fn cursor_next<'a, T>(
    arena: &'a Arena<T>,
    root: Option<NodeId>,
    cursor: &mut TreeCursor,
) -> Option<&'a Rc<T>> {
    if !cursor.started {
        cursor.started = true;
        descend_leftmost(arena, &mut cursor.stack, root?);
        return cursor_object(arena, cursor);
    }
    // Bump within the current leaf, else climb to the next subtree.
    loop {
        let (node, slot) = *cursor.stack.last()?;
        match arena.node(node) {
            Node::Leaf { objects } => {
                if slot + 1 < objects.len() {
                    if let Some(top) = cursor.stack.last_mut() {
                        top.1 = slot + 1;
                    }
                    return cursor_object(arena, cursor);
                }
                cursor.stack.pop();
            }
            Node::Stem { children, .. } => {
                if slot + 1 < children.len() {
                    if let Some(top) = cursor.stack.last_mut() {
                        top.1 = slot + 1;
                    }
                    descend_leftmost(arena, &mut cursor.stack, children[slot + 1]);
                    return cursor_object(arena, cursor);
                }
                cursor.stack.pop();
            }
        }
    }
}

fn cursor_object<'a, T>(arena: &'a Arena<T>, cursor: &TreeCursor) -> Option<&'a Rc<T>> {
    let (node, slot) = *cursor.stack.last()?;
    match arena.node(node) {
        Node::Leaf { objects } => objects.get(slot),
        Node::Stem { .. } => None,
    }
}

// ============================================================================
// CONTAINER
// ============================================================================

/// Balanced N-way ordered tree of `Rc<T>` keyed by identifier.
///
/// `B` is the branching factor: leaves hold up to `2B` objects, stems up
/// to `2B` separator keys and `2B + 1` children. Insert, find and erase
/// are O(log n) in the live object count.
pub struct IndexedContainer<T: Identified, const B: usize = 5> {
    arena: Arena<T>,
    root: Option<NodeId>,
    len: usize,
    cursors: Vec<CursorSlot>,
}

impl<T: Identified, const B: usize> Default for IndexedContainer<T, B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Identified, const B: usize> IndexedContainer<T, B> {
    /// Create a new empty container.
    pub fn new() -> Self {
        assert!(B >= 1, "branching factor must be at least 1");
        Self {
            arena: Arena::new(),
            root: None,
            len: 0,
            cursors: Vec::new(),
        }
    }

    /// Number of live objects
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Find the object with the given identifier.
    pub fn find_by_identifier(&self, id: Identifier) -> Option<&Rc<T>> {
        let mut node = self.root?;
        loop {
            match self.arena.node(node) {
                Node::Stem { keys, children } => {
                    let slot = keys.partition_point(|k| *k < id);
                    node = children[slot];
                }
                Node::Leaf { objects } => {
                    let slot = objects.partition_point(|o| o.identifier() < id);
                    return objects.get(slot).filter(|o| o.identifier() == id);
                }
            }
        }
    }

    /// Whether this exact object (pointer identity) is resident.
    pub fn contains(&self, object: &Rc<T>) -> bool {
        match self.find_by_identifier(object.identifier()) {
            Some(found) => Rc::ptr_eq(found, object),
            None => false,
        }
    }

    /// Smallest identifier in the container
    pub fn min_identifier(&self) -> Option<Identifier> {
        let mut node = self.root?;
        loop {
            match self.arena.node(node) {
                Node::Stem { children, .. } => node = children[0],
                Node::Leaf { objects } => return objects.first().map(|o| o.identifier()),
            }
        }
    }

    /// Largest identifier in the container
    pub fn max_identifier(&self) -> Option<Identifier> {
        self.root.map(|root| self.subtree_max(root))
    }

    /// First object satisfying the predicate, in ascending identifier order.
    pub fn first_matching<F>(&self, mut pred: F) -> Option<&Rc<T>>
    where
        F: FnMut(&Rc<T>) -> bool,
    {
        self.iter().find(|o| pred(o))
    }

    /// Visit every object in ascending identifier order.
    pub fn for_each<F>(&self, f: F)
    where
        F: FnMut(&Rc<T>),
    {
        self.iter().for_each(f)
    }

    /// Advance a detached cursor owned by a collaborator (the label
    /// space's pooled iterators); the owner must discard the cursor
    /// when this container mutates.
    pub(crate) fn cursor_next_entry(&self, cursor: &mut TreeCursor) -> Option<&Rc<T>> {
        cursor_next(&self.arena, self.root, cursor)
    }

    /// Borrowing iterator in ascending identifier order
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            arena: &self.arena,
            root: self.root,
            cursor: TreeCursor::new(),
        }
    }

    // ------------------------------------------------------------------
    // Insert
    // ------------------------------------------------------------------

    /// Insert an object, acquiring a shared reference to it.
    ///
    /// Fails with `AlreadyExists` if its identifier is live, or `Memory`
    /// if node allocation fails; either way the tree is unchanged.
    pub fn insert(&mut self, object: Rc<T>) -> LabelResult<()> {
        let id = object.identifier();

        let Some(root) = self.root else {
            let leaf = self.prepare_leaf()?;
            match self.arena.node_mut(leaf) {
                Node::Leaf { objects } => objects.push(object),
                Node::Stem { .. } => unreachable!(),
            }
            self.root = Some(leaf);
            self.len = 1;
            self.invalidate_cursors();
            return Ok(());
        };

        // Read phase: descend to the insertion slot, recording the path.
        let mut path: Vec<(NodeId, usize)> = Vec::new();
        let mut node = root;
        loop {
            match self.arena.node(node) {
                Node::Stem { keys, children } => {
                    let slot = keys.partition_point(|k| *k < id);
                    if slot < keys.len() && keys[slot] == id {
                        return Err(LabelError::AlreadyExists);
                    }
                    path.push((node, slot));
                    node = children[slot];
                }
                Node::Leaf { objects } => {
                    let slot = objects.partition_point(|o| o.identifier() < id);
                    if slot < objects.len() && objects[slot].identifier() == id {
                        return Err(LabelError::AlreadyExists);
                    }
                    path.push((node, slot));
                    break;
                }
            }
        }

        // Count the run of full nodes from the leaf upward: each will
        // split, and a full root additionally demands a new root stem.
        let mut fulls = 0;
        for (nid, _) in path.iter().rev() {
            if self.is_full(*nid) {
                fulls += 1;
            } else {
                break;
            }
        }
        let new_root = fulls == path.len();

        // Fallible phase: allocate every node the splits will need.
        let mut prepared: Vec<NodeId> = Vec::new();
        if fulls > 0 {
            if let Err(e) = self.prepare_splits(fulls, new_root, &mut prepared) {
                for id in prepared {
                    self.arena.release(id);
                }
                return Err(e);
            }
        }

        // Commit phase: infallible from here on.
        let (leaf_id, leaf_slot) = *path.last().expect("descent path is non-empty");
        match self.arena.node_mut(leaf_id) {
            Node::Leaf { objects } => objects.insert(leaf_slot, object),
            Node::Stem { .. } => unreachable!(),
        }

        let mut prepared = prepared.into_iter();
        let mut depth = path.len() - 1;
        loop {
            let (nid, slot) = path[depth];
            if !self.is_overfull(nid) {
                break;
            }
            let right = prepared.next().expect("split node was prepared");
            let promoted = self.split_node(nid, right, slot == 2 * B);
            if depth == 0 {
                let root_id = prepared.next().expect("root stem was prepared");
                match self.arena.node_mut(root_id) {
                    Node::Stem { keys, children } => {
                        keys.push(promoted);
                        children.push(nid);
                        children.push(right);
                    }
                    Node::Leaf { .. } => unreachable!(),
                }
                self.root = Some(root_id);
                break;
            }
            depth -= 1;
            let (pid, pslot) = path[depth];
            match self.arena.node_mut(pid) {
                Node::Stem { keys, children } => {
                    keys.insert(pslot, promoted);
                    children.insert(pslot + 1, right);
                }
                Node::Leaf { .. } => unreachable!(),
            }
        }
        debug_assert!(prepared.next().is_none());

        self.len += 1;
        self.invalidate_cursors();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Erase
    // ------------------------------------------------------------------

    /// Remove the object with the given identifier and return it.
    pub fn remove_by_identifier(&mut self, id: Identifier) -> LabelResult<Rc<T>> {
        let root = self.root.ok_or(LabelError::NotFound)?;

        let mut path: Vec<(NodeId, usize)> = Vec::new();
        let mut node = root;
        let leaf_slot = loop {
            match self.arena.node(node) {
                Node::Stem { keys, children } => {
                    let slot = keys.partition_point(|k| *k < id);
                    path.push((node, slot));
                    node = children[slot];
                }
                Node::Leaf { objects } => {
                    let slot = objects.partition_point(|o| o.identifier() < id);
                    if slot >= objects.len() || objects[slot].identifier() != id {
                        return Err(LabelError::NotFound);
                    }
                    break slot;
                }
            }
        };

        let removed = match self.arena.node_mut(node) {
            Node::Leaf { objects } => objects.remove(leaf_slot),
            Node::Stem { .. } => unreachable!(),
        };
        self.len -= 1;

        let leaf_emptied = match self.arena.node(node) {
            Node::Leaf { objects } => objects.is_empty(),
            Node::Stem { .. } => unreachable!(),
        };
        if leaf_emptied {
            self.detach_empty_leaf(node, &path);
        }
        // The erased identifier may survive as a separator key; replace
        // it with the last key of the subtree to its left.
        self.fix_separator(id);

        self.invalidate_cursors();
        Ok(removed)
    }

    /// Remove this exact object (pointer identity).
    pub fn remove(&mut self, object: &Rc<T>) -> LabelResult<Rc<T>> {
        let id = object.identifier();
        match self.find_by_identifier(id) {
            Some(found) if Rc::ptr_eq(found, object) => self.remove_by_identifier(id),
            _ => Err(LabelError::NotFound),
        }
    }

    /// Remove every object satisfying the predicate in one tree walk,
    /// compacting nodes as it goes. Returns the count removed.
    pub fn remove_if<F>(&mut self, mut pred: F) -> usize
    where
        F: FnMut(&Rc<T>) -> bool,
    {
        let Some(root) = self.root else {
            return 0;
        };
        let (count, outcome) = self.compact_node(root, &mut pred);
        match outcome {
            Compact::Empty => self.root = None,
            Compact::Collapsed(child) => self.root = Some(child),
            Compact::Kept => {}
        }
        if count > 0 {
            self.len -= count;
            self.invalidate_cursors();
        }
        count
    }

    /// Remove every object, releasing all references.
    pub fn clear(&mut self) {
        self.arena.clear();
        self.root = None;
        self.len = 0;
        self.invalidate_cursors();
    }

    // ------------------------------------------------------------------
    // Duplicate
    // ------------------------------------------------------------------

    /// Deep-copy the tree. Leaves re-acquire shared references to the
    /// same objects; stems are duplicated recursively. Registered
    /// cursors are not carried over.
    pub fn duplicate(&self) -> LabelResult<Self> {
        let mut copy = Self::new();
        if let Some(root) = self.root {
            copy.root = Some(Self::dup_subtree(&self.arena, &mut copy, root)?);
            copy.len = self.len;
        }
        Ok(copy)
    }

    // ------------------------------------------------------------------
    // Registered cursors
    // ------------------------------------------------------------------

    /// Register a cursor positioned before the first object.
    pub fn create_iterator(&mut self) -> LabelResult<ContainerIterator> {
        for (slot, state) in self.cursors.iter_mut().enumerate() {
            if matches!(state, CursorSlot::Free) {
                *state = CursorSlot::Live(TreeCursor::new());
                return Ok(ContainerIterator { slot });
            }
        }
        self.cursors.try_reserve(1)?;
        self.cursors.push(CursorSlot::Live(TreeCursor::new()));
        Ok(ContainerIterator {
            slot: self.cursors.len() - 1,
        })
    }

    /// Advance a registered cursor; None at exhaustion or after any
    /// structural mutation invalidated it.
    pub fn iterator_next(&mut self, it: &ContainerIterator) -> Option<Rc<T>> {
        let state = match self.cursors.get_mut(it.slot) {
            Some(state @ CursorSlot::Live(_)) => state,
            _ => return None,
        };
        let mut cursor = match std::mem::replace(state, CursorSlot::End) {
            CursorSlot::Live(cursor) => cursor,
            _ => unreachable!(),
        };
        let object = cursor_next(&self.arena, self.root, &mut cursor).cloned();
        self.cursors[it.slot] = match object {
            Some(_) => CursorSlot::Live(cursor),
            None => CursorSlot::End,
        };
        object
    }

    /// Unregister a cursor, freeing its slot for reuse.
    pub fn destroy_iterator(&mut self, it: ContainerIterator) {
        if let Some(state) = self.cursors.get_mut(it.slot) {
            *state = CursorSlot::Free;
        }
    }

    fn invalidate_cursors(&mut self) {
        for state in &mut self.cursors {
            if matches!(state, CursorSlot::Live(_)) {
                *state = CursorSlot::End;
            }
        }
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn leaf_capacity() -> usize {
        2 * B
    }

    fn is_full(&self, id: NodeId) -> bool {
        match self.arena.node(id) {
            Node::Leaf { objects } => objects.len() == Self::leaf_capacity(),
            Node::Stem { keys, .. } => keys.len() == 2 * B,
        }
    }

    fn is_overfull(&self, id: NodeId) -> bool {
        match self.arena.node(id) {
            Node::Leaf { objects } => objects.len() > Self::leaf_capacity(),
            Node::Stem { keys, .. } => keys.len() > 2 * B,
        }
    }

    /// Allocate an empty leaf whose vector can absorb one transient
    /// overflow entry without reallocating.
    fn prepare_leaf(&mut self) -> LabelResult<NodeId> {
        let mut objects = Vec::new();
        objects.try_reserve_exact(2 * B + 1)?;
        self.arena.try_alloc(Node::Leaf { objects })
    }

    /// Allocate an empty stem, likewise with one slot of headroom.
    fn prepare_stem(&mut self) -> LabelResult<NodeId> {
        let mut keys = Vec::new();
        keys.try_reserve_exact(2 * B + 1)?;
        let mut children = Vec::new();
        children.try_reserve_exact(2 * B + 2)?;
        self.arena.try_alloc(Node::Stem { keys, children })
    }

    /// Allocate the nodes an insert's split cascade will consume: one
    /// leaf, a stem per full ancestor, and optionally a new root stem.
    fn prepare_splits(
        &mut self,
        fulls: usize,
        new_root: bool,
        prepared: &mut Vec<NodeId>,
    ) -> LabelResult<()> {
        prepared.try_reserve_exact(fulls + new_root as usize)?;
        prepared.push(self.prepare_leaf()?);
        for _ in 1..fulls {
            let stem = self.prepare_stem()?;
            prepared.push(stem);
        }
        if new_root {
            let stem = self.prepare_stem()?;
            prepared.push(stem);
        }
        Ok(())
    }

    /// Split an overfull node, moving its upper part into `right` (a
    /// prepared empty node of the same shape). Returns the separator
    /// key to promote. `appended` biases the split point so that an
    /// insert at the very end leaves the left node completely full.
    fn split_node(&mut self, left: NodeId, right: NodeId, appended: bool) -> Identifier {
        let mut right_node = self.arena.take(right);
        let promoted = match (self.arena.node_mut(left), &mut right_node) {
            (Node::Leaf { objects }, Node::Leaf { objects: right_objects }) => {
                debug_assert_eq!(objects.len(), 2 * B + 1);
                let split = if appended { 2 * B } else { B };
                right_objects.extend(objects.drain(split..));
                objects
                    .last()
                    .expect("left leaf keeps at least one object")
                    .identifier()
            }
            (
                Node::Stem { keys, children },
                Node::Stem {
                    keys: right_keys,
                    children: right_children,
                },
            ) => {
                debug_assert_eq!(keys.len(), 2 * B + 1);
                let split = if appended { 2 * B - 1 } else { B };
                right_keys.extend(keys.drain(split + 1..));
                right_children.extend(children.drain(split + 1..));
                keys.pop().expect("left stem keeps at least one key")
            }
            _ => unreachable!("split nodes have matching shapes"),
        };
        self.arena.put(right, right_node);
        promoted
    }

    /// Detach an emptied leaf, then collapse any single-child stem the
    /// detachment produced into its child.
    fn detach_empty_leaf(&mut self, leaf: NodeId, path: &[(NodeId, usize)]) {
        self.arena.release(leaf);
        let Some(&(parent, child_slot)) = path.last() else {
            // The leaf was the root.
            self.root = None;
            return;
        };
        let child_count = match self.arena.node_mut(parent) {
            Node::Stem { keys, children } => {
                children.remove(child_slot);
                if child_slot < keys.len() {
                    keys.remove(child_slot);
                } else {
                    keys.remove(child_slot - 1);
                }
                children.len()
            }
            Node::Leaf { .. } => unreachable!(),
        };
        if child_count > 1 {
            return;
        }
        // Single-child stem: splice the child into the grandparent.
        let only_child = match self.arena.release(parent) {
            Node::Stem { children, .. } => children[0],
            Node::Leaf { .. } => unreachable!(),
        };
        match path.len().checked_sub(2).map(|i| path[i]) {
            Some((grandparent, slot)) => match self.arena.node_mut(grandparent) {
                Node::Stem { children, .. } => children[slot] = only_child,
                Node::Leaf { .. } => unreachable!(),
            },
            None => self.root = Some(only_child),
        }
    }

    /// Replace a separator key equal to the erased identifier with the
    /// maximum of the subtree to its left. A key lives in exactly one
    /// stem, so the search stops at the first hit.
    fn fix_separator(&mut self, id: Identifier) {
        let Some(mut node) = self.root else {
            return;
        };
        loop {
            let (slot, hit, next) = match self.arena.node(node) {
                Node::Stem { keys, children } => {
                    let slot = keys.partition_point(|k| *k < id);
                    if slot < keys.len() && keys[slot] == id {
                        (slot, true, children[slot])
                    } else {
                        (slot, false, children[slot])
                    }
                }
                Node::Leaf { .. } => return,
            };
            if hit {
                let replacement = self.subtree_max(next);
                match self.arena.node_mut(node) {
                    Node::Stem { keys, .. } => keys[slot] = replacement,
                    Node::Leaf { .. } => unreachable!(),
                }
                return;
            }
            node = next;
        }
    }

    /// Last (largest) identifier in the subtree rooted at `node`.
    fn subtree_max(&self, mut node: NodeId) -> Identifier {
        loop {
            match self.arena.node(node) {
                Node::Stem { children, .. } => {
                    node = *children.last().expect("stem has children");
                }
                Node::Leaf { objects } => {
                    return objects
                        .last()
                        .expect("leaf in a live tree is non-empty")
                        .identifier();
                }
            }
        }
    }

    fn compact_node<F>(&mut self, node: NodeId, pred: &mut F) -> (usize, Compact)
    where
        F: FnMut(&Rc<T>) -> bool,
    {
        if self.arena.node(node).is_leaf() {
            let (count, emptied) = match self.arena.node_mut(node) {
                Node::Leaf { objects } => {
                    let before = objects.len();
                    objects.retain(|o| !pred(o));
                    (before - objects.len(), objects.is_empty())
                }
                Node::Stem { .. } => unreachable!(),
            };
            if emptied {
                self.arena.release(node);
                return (count, Compact::Empty);
            }
            return (count, Compact::Kept);
        }

        let kids: Vec<NodeId> = match self.arena.node(node) {
            Node::Stem { children, .. } => children.clone(),
            Node::Leaf { .. } => unreachable!(),
        };
        let mut count = 0;
        let mut survivors: Vec<NodeId> = Vec::with_capacity(kids.len());
        for kid in kids {
            let (removed, outcome) = self.compact_node(kid, pred);
            count += removed;
            match outcome {
                Compact::Empty => {}
                Compact::Kept => survivors.push(kid),
                Compact::Collapsed(child) => survivors.push(child),
            }
        }
        if survivors.is_empty() {
            self.arena.release(node);
            return (count, Compact::Empty);
        }
        if survivors.len() == 1 {
            self.arena.release(node);
            return (count, Compact::Collapsed(survivors[0]));
        }
        // Rebuild separators from the surviving subtrees.
        let maxes: Vec<Identifier> = survivors[..survivors.len() - 1]
            .iter()
            .map(|&kid| self.subtree_max(kid))
            .collect();
        match self.arena.node_mut(node) {
            Node::Stem { keys, children } => {
                children.clear();
                children.extend(survivors);
                keys.clear();
                keys.extend(maxes);
            }
            Node::Leaf { .. } => unreachable!(),
        }
        (count, Compact::Kept)
    }

    fn dup_subtree(arena: &Arena<T>, copy: &mut Self, node: NodeId) -> LabelResult<NodeId> {
        match arena.node(node) {
            Node::Leaf { objects } => {
                let new_leaf = copy.prepare_leaf()?;
                match copy.arena.node_mut(new_leaf) {
                    Node::Leaf { objects: new_objects } => {
                        new_objects.extend(objects.iter().cloned());
                    }
                    Node::Stem { .. } => unreachable!(),
                }
                Ok(new_leaf)
            }
            Node::Stem { keys, children } => {
                let new_stem = copy.prepare_stem()?;
                for (i, &child) in children.iter().enumerate() {
                    let new_child = Self::dup_subtree(arena, copy, child)?;
                    match copy.arena.node_mut(new_stem) {
                        Node::Stem {
                            keys: new_keys,
                            children: new_children,
                        } => {
                            if i < keys.len() {
                                new_keys.push(keys[i]);
                            }
                            new_children.push(new_child);
                        }
                        Node::Leaf { .. } => unreachable!(),
                    }
                }
                Ok(new_stem)
            }
        }
    }

    // ------------------------------------------------------------------
    // Validation (debug builds)
    // ------------------------------------------------------------------

    /// Validate the tree.
    ///
    /// Panics if occupancy, ordering, or separator invariants are
    /// broken.
    #[cfg(debug_assertions)]
    pub fn validate(&self) {
        let Some(root) = self.root else {
            assert_eq!(self.len, 0, "empty tree reports zero length");
            return;
        };
        let (count, _, _) = self.validate_node(root, None);
        assert_eq!(count, self.len, "tree length matches live objects");
    }

    /// Returns (object count, min id, max id) of the subtree. Erase
    /// detaches emptied leaves and collapses single-child stems without
    /// rebalancing, so sibling subtrees may differ in depth; descent,
    /// iteration, and the split cascade are all shape-agnostic.
    #[cfg(debug_assertions)]
    fn validate_node(
        &self,
        node: NodeId,
        lower: Option<Identifier>,
    ) -> (usize, Identifier, Identifier) {
        match self.arena.node(node) {
            Node::Leaf { objects } => {
                assert!(!objects.is_empty(), "no empty leaves outside the root");
                assert!(objects.len() <= 2 * B, "leaf within capacity");
                for pair in objects.windows(2) {
                    assert!(
                        pair[0].identifier() < pair[1].identifier(),
                        "leaf objects strictly ascending"
                    );
                }
                let min = objects[0].identifier();
                if let Some(lower) = lower {
                    assert!(lower < min, "subtree respects its lower bound");
                }
                (objects.len(), min, objects[objects.len() - 1].identifier())
            }
            Node::Stem { keys, children } => {
                assert_eq!(children.len(), keys.len() + 1, "stem key/child arity");
                assert!(keys.len() <= 2 * B, "stem within capacity");
                assert!(children.len() >= 2, "stem has at least two children");
                let mut count = 0;
                let mut bound = lower;
                let mut min = None;
                let mut max = 0;
                for (i, &child) in children.iter().enumerate() {
                    let (c, lo, hi) = self.validate_node(child, bound);
                    count += c;
                    min.get_or_insert(lo);
                    max = hi;
                    if i < keys.len() {
                        assert_eq!(keys[i], hi, "separator equals left subtree max");
                        bound = Some(keys[i]);
                    }
                }
                (count, min.expect("stem has children"), max)
            }
        }
    }
}

enum Compact {
    Empty,
    Kept,
    Collapsed(NodeId),
}

// ============================================================================
// IDENTIFIER CHANGE
// ============================================================================

/// Two-phase identifier-change guard across a family of related
/// containers.
///
/// `begin` detaches the object from every container in the family that
/// holds it (the held `Rc` keeps it alive); the caller then mutates the
/// object's identifier and calls [`finish`](Self::finish), which
/// re-inserts it into exactly those containers. Dropping the guard
/// without finishing re-inserts as well, so an early return cannot lose
/// the object. No other mutation may touch the family in between.
pub struct IdentifierChange<'a, T: Identified, const B: usize = 5> {
    containers: &'a mut [IndexedContainer<T, B>],
    object: Rc<T>,
    removed: Vec<bool>,
    finished: bool,
}

impl<'a, T: Identified, const B: usize> IdentifierChange<'a, T, B> {
    /// Detach `object` from every container in the family that holds it.
    pub fn begin(containers: &'a mut [IndexedContainer<T, B>], object: &Rc<T>) -> Self {
        let id = object.identifier();
        let mut removed = vec![false; containers.len()];
        for (i, container) in containers.iter_mut().enumerate() {
            let held = matches!(
                container.find_by_identifier(id),
                Some(found) if Rc::ptr_eq(found, object)
            );
            if held {
                let result = container.remove_by_identifier(id);
                debug_assert!(result.is_ok());
                removed[i] = true;
            }
        }
        Self {
            containers,
            object: Rc::clone(object),
            removed,
            finished: false,
        }
    }

    /// Re-insert the object under its (possibly changed) identifier.
    pub fn finish(mut self) -> LabelResult<()> {
        self.finished = true;
        self.reinsert()
    }

    fn reinsert(&mut self) -> LabelResult<()> {
        let mut result = Ok(());
        for (i, container) in self.containers.iter_mut().enumerate() {
            if self.removed[i] {
                self.removed[i] = false;
                if let Err(e) = container.insert(Rc::clone(&self.object)) {
                    result = Err(e);
                }
            }
        }
        result
    }
}

impl<T: Identified, const B: usize> Drop for IdentifierChange<'_, T, B> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.reinsert();
        }
    }
}
