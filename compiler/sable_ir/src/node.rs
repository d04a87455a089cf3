//! Node storage: kind plus edge slots.

use smallvec::SmallVec;

use crate::{EdgeShape, NodeClass, NodeId, NodeKind};

/// A list-valued edge. Elements may be null.
pub type EdgeList = SmallVec<[Option<NodeId>; 4]>;

/// The edges of one kind (inputs or successors) of a node.
///
/// Shaped by an [`EdgeShape`]: `direct.len()` and `lists.len()` never
/// change after construction. A list slot may itself be null (`None`),
/// which is distinct from an empty list.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Edges {
    direct: SmallVec<[Option<NodeId>; 2]>,
    lists: SmallVec<[Option<EdgeList>; 1]>,
}

impl Edges {
    /// All-null edges of the given shape. Lists start empty, not null.
    pub fn with_shape(shape: EdgeShape) -> Self {
        let mut edges = Edges::default();
        edges.reset(shape);
        edges
    }

    pub(crate) fn reset(&mut self, shape: EdgeShape) {
        self.direct.clear();
        self.direct.resize(shape.direct, None);
        self.lists.clear();
        self.lists.resize_with(shape.lists, || Some(EdgeList::new()));
    }

    #[inline]
    pub fn direct_count(&self) -> usize {
        self.direct.len()
    }

    #[inline]
    pub fn list_count(&self) -> usize {
        self.lists.len()
    }

    #[inline]
    pub fn direct(&self, slot: usize) -> Option<NodeId> {
        self.direct.get(slot).copied().flatten()
    }

    #[inline]
    pub fn list(&self, slot: usize) -> Option<&EdgeList> {
        self.lists.get(slot).and_then(Option::as_ref)
    }

    pub(crate) fn direct_mut(&mut self, slot: usize) -> Option<&mut Option<NodeId>> {
        self.direct.get_mut(slot)
    }

    pub(crate) fn list_slot_mut(&mut self, slot: usize) -> Option<&mut Option<EdgeList>> {
        self.lists.get_mut(slot)
    }

    /// Every non-null edge target: direct slots first, then list elements.
    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.direct
            .iter()
            .flatten()
            .copied()
            .chain(self.lists.iter().flatten().flatten().flatten().copied())
    }

    /// Mutable access to every edge position, null or not.
    pub(crate) fn positions_mut(&mut self) -> impl Iterator<Item = &mut Option<NodeId>> + '_ {
        self.direct
            .iter_mut()
            .chain(self.lists.iter_mut().flatten().flat_map(|list| list.iter_mut()))
    }
}

/// A node: its kind (tag plus data) and its input and successor edges.
///
/// Nodes are built detached and then handed to
/// [`Graph::add`](crate::Graph::add), which records usages and
/// predecessors for every edge.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Node {
    kind: NodeKind,
    inputs: Edges,
    successors: Edges,
}

impl Node {
    /// Node of `kind` with all edges null.
    pub fn new(kind: NodeKind) -> Self {
        let class = kind.class();
        Node {
            kind,
            inputs: Edges::with_shape(class.inputs()),
            successors: Edges::with_shape(class.successors()),
        }
    }

    /// Turn a released node into a fresh one of `kind`, keeping allocations.
    pub fn reset(&mut self, kind: NodeKind) {
        let class = kind.class();
        self.inputs.reset(class.inputs());
        self.successors.reset(class.successors());
        self.kind = kind;
    }

    #[inline]
    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    #[inline]
    pub fn class(&self) -> NodeClass {
        self.kind.class()
    }

    #[inline]
    pub fn inputs(&self) -> &Edges {
        &self.inputs
    }

    #[inline]
    pub fn successors(&self) -> &Edges {
        &self.successors
    }

    /// Replace the data of a node. The class must stay the same.
    pub fn set_kind(&mut self, kind: NodeKind) {
        debug_assert_eq!(kind.class(), self.class(), "set_kind must keep the class");
        self.kind = kind;
    }

    pub fn set_input(&mut self, slot: usize, value: Option<NodeId>) {
        if let Some(position) = self.inputs.direct_mut(slot) {
            *position = value;
        }
    }

    pub fn set_input_list(&mut self, slot: usize, list: Option<EdgeList>) {
        if let Some(position) = self.inputs.list_slot_mut(slot) {
            *position = list;
        }
    }

    pub fn set_successor(&mut self, slot: usize, value: Option<NodeId>) {
        if let Some(position) = self.successors.direct_mut(slot) {
            *position = value;
        }
    }

    pub fn set_successor_list(&mut self, slot: usize, list: Option<EdgeList>) {
        if let Some(position) = self.successors.list_slot_mut(slot) {
            *position = list;
        }
    }

    /// Builder form of [`set_input`](Self::set_input).
    #[must_use]
    pub fn with_input(mut self, slot: usize, value: NodeId) -> Self {
        self.set_input(slot, Some(value));
        self
    }

    /// Builder form of [`set_input_list`](Self::set_input_list).
    #[must_use]
    pub fn with_input_list(mut self, slot: usize, values: impl IntoIterator<Item = NodeId>) -> Self {
        self.set_input_list(slot, Some(values.into_iter().map(Some).collect()));
        self
    }

    /// Builder form of [`set_successor`](Self::set_successor).
    #[must_use]
    pub fn with_successor(mut self, slot: usize, value: NodeId) -> Self {
        self.set_successor(slot, Some(value));
        self
    }

    pub(crate) fn inputs_mut(&mut self) -> &mut Edges {
        &mut self.inputs
    }

    pub(crate) fn successors_mut(&mut self) -> &mut Edges {
        &mut self.successors
    }
}
