//! Node handles.

/// Handle of a node in a [`Graph`](crate::Graph) arena.
///
/// Handles are allocated sequentially and never reused, so a handle stays
/// valid (pointing at a possibly deleted node) for the lifetime of the graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct NodeId(u32);

impl NodeId {
    /// Create a node handle from a raw index.
    #[inline]
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Get the raw `u32` value.
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Get the index as `usize` (for indexing into side tables).
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Position in a graph's allocation history.
///
/// Nodes allocated after [`Graph::mark`](crate::Graph::mark) are "new"
/// relative to the mark. The decoder uses marks to tell nodes of the method
/// being decoded apart from nodes that existed before it started.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GraphMark(u32);

impl GraphMark {
    #[inline]
    pub(crate) fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Whether `node` was allocated at or after this mark.
    #[inline]
    pub fn is_new(self, node: NodeId) -> bool {
        node.0 >= self.0
    }
}
