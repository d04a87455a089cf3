//! The node arena.
//!
//! [`Graph`] owns every node and two side tables derived from the edges:
//! the usages multimap (for each node, the nodes that have it as an input)
//! and the predecessor map (for each node, the node that has it as a
//! successor). Every edge mutation goes through `Graph` so both tables stay
//! in sync; nodes never carry back-pointers of their own.
//!
//! Deleted nodes keep their slot with all edges cleared, so handles are
//! never reused within one graph.

mod cfg;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::{
    EdgeList, GraphError, GraphMark, GuardsStage, Node, NodeClass, NodeId, NodeKind,
};

/// Mutable sea-of-nodes program graph.
#[derive(Clone, Debug)]
pub struct Graph {
    nodes: Vec<Node>,
    alive: Vec<bool>,
    usages: Vec<SmallVec<[NodeId; 4]>>,
    predecessors: Vec<Option<NodeId>>,
    /// Value numbering for [`Graph::unique`]. Deleting a node evicts its
    /// entry. Nodes whose inputs change after insertion keep a stale entry,
    /// so lookups re-check that the mapped node is alive and still equal.
    value_numbers: FxHashMap<Node, NodeId>,
    start: NodeId,
    guards_stage: GuardsStage,
    live: usize,
}

impl Default for Graph {
    fn default() -> Self {
        Graph::new()
    }
}

impl Graph {
    /// Graph holding a single `Start` node.
    pub fn new() -> Self {
        let mut graph = Graph {
            nodes: Vec::new(),
            alive: Vec::new(),
            usages: Vec::new(),
            predecessors: Vec::new(),
            value_numbers: FxHashMap::default(),
            start: NodeId::new(0),
            guards_stage: GuardsStage::default(),
            live: 0,
        };
        graph.start = graph.add(Node::new(NodeKind::Start));
        graph
    }

    // ── Queries ─────────────────────────────────────────────────────

    #[inline]
    pub fn start(&self) -> NodeId {
        self.start
    }

    #[inline]
    pub fn guards_stage(&self) -> GuardsStage {
        self.guards_stage
    }

    pub fn set_guards_stage(&mut self, stage: GuardsStage) {
        self.guards_stage = stage;
    }

    /// The node behind `id`. Deleted nodes are returned with cleared edges.
    #[inline]
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    #[inline]
    pub fn kind(&self, id: NodeId) -> &NodeKind {
        self.nodes[id.index()].kind()
    }

    #[inline]
    pub fn class(&self, id: NodeId) -> NodeClass {
        self.nodes[id.index()].class()
    }

    #[inline]
    pub fn is_alive(&self, id: NodeId) -> bool {
        self.alive.get(id.index()).copied().unwrap_or(false)
    }

    /// Number of handles ever allocated (live or deleted).
    #[inline]
    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn live_node_count(&self) -> usize {
        self.live
    }

    /// Live nodes in allocation order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.alive
            .iter()
            .enumerate()
            .filter(|(_, alive)| **alive)
            .map(|(i, _)| Self::id_at(i))
    }

    /// Live nodes of one class in allocation order.
    pub fn nodes_of(&self, class: NodeClass) -> impl Iterator<Item = NodeId> + '_ {
        self.node_ids().filter(move |&id| self.class(id) == class)
    }

    #[inline]
    pub fn input(&self, id: NodeId, slot: usize) -> Option<NodeId> {
        self.nodes[id.index()].inputs().direct(slot)
    }

    #[inline]
    pub fn input_list(&self, id: NodeId, slot: usize) -> Option<&EdgeList> {
        self.nodes[id.index()].inputs().list(slot)
    }

    #[inline]
    pub fn successor(&self, id: NodeId, slot: usize) -> Option<NodeId> {
        self.nodes[id.index()].successors().direct(slot)
    }

    #[inline]
    pub fn successor_list(&self, id: NodeId, slot: usize) -> Option<&EdgeList> {
        self.nodes[id.index()].successors().list(slot)
    }

    /// Nodes using `id` as an input, once per input edge.
    #[inline]
    pub fn usages(&self, id: NodeId) -> &[NodeId] {
        &self.usages[id.index()]
    }

    #[inline]
    pub fn has_usages(&self, id: NodeId) -> bool {
        !self.usages[id.index()].is_empty()
    }

    #[inline]
    pub fn predecessor(&self, id: NodeId) -> Option<NodeId> {
        self.predecessors[id.index()]
    }

    /// Current allocation position. See [`GraphMark`].
    pub fn mark(&self) -> GraphMark {
        GraphMark::new(Self::id_at(self.nodes.len()).raw())
    }

    #[inline]
    pub fn is_new(&self, mark: GraphMark, id: NodeId) -> bool {
        mark.is_new(id)
    }

    #[expect(
        clippy::cast_possible_truncation,
        reason = "node handles are u32; graphs never approach 4G nodes"
    )]
    fn id_at(index: usize) -> NodeId {
        NodeId::new(index as u32)
    }

    // ── Insertion ───────────────────────────────────────────────────

    /// Attach a detached node, recording usages and predecessors.
    pub fn add(&mut self, node: Node) -> NodeId {
        let id = Self::id_at(self.nodes.len());
        for input in node.inputs().iter() {
            self.usages[input.index()].push(id);
        }
        for successor in node.successors().iter() {
            self.predecessors[successor.index()] = Some(id);
        }
        self.nodes.push(node);
        self.alive.push(true);
        self.usages.push(SmallVec::new());
        self.predecessors.push(None);
        self.live += 1;
        id
    }

    /// Shorthand for adding an edge-less node of `kind`.
    pub fn add_kind(&mut self, kind: NodeKind) -> NodeId {
        self.add(Node::new(kind))
    }

    /// Live node equal to `node` (same kind and inputs), if its class is
    /// value-numberable and one exists.
    pub fn find_duplicate(&self, node: &Node) -> Option<NodeId> {
        if !node.class().is_value_numberable() {
            return None;
        }
        let id = *self.value_numbers.get(node)?;
        (self.is_alive(id) && self.nodes[id.index()] == *node).then_some(id)
    }

    /// Add `node` unless an equal value-numberable node already exists.
    pub fn unique(&mut self, node: Node) -> NodeId {
        if let Some(existing) = self.find_duplicate(&node) {
            return existing;
        }
        let key = node.class().is_value_numberable().then(|| node.clone());
        let id = self.add(node);
        if let Some(key) = key {
            self.value_numbers.insert(key, id);
        }
        id
    }

    /// Add a copy of `id` with the same kind and inputs and no successors.
    pub fn duplicate(&mut self, id: NodeId) -> NodeId {
        let source = &self.nodes[id.index()];
        let mut copy = Node::new(source.kind().clone());
        for slot in 0..source.inputs().direct_count() {
            copy.set_input(slot, source.inputs().direct(slot));
        }
        for slot in 0..source.inputs().list_count() {
            copy.set_input_list(slot, source.inputs().list(slot).cloned());
        }
        self.add(copy)
    }

    // ── Edge mutation ───────────────────────────────────────────────

    pub fn set_kind(&mut self, id: NodeId, kind: NodeKind) {
        self.nodes[id.index()].set_kind(kind);
    }

    pub fn set_input(&mut self, id: NodeId, slot: usize, value: Option<NodeId>) {
        let Some(position) = self.nodes[id.index()].inputs_mut().direct_mut(slot) else {
            debug_assert!(false, "{id:?} has no direct input slot {slot}");
            return;
        };
        let old = std::mem::replace(position, value);
        if old == value {
            return;
        }
        if let Some(old) = old {
            self.remove_usage(old, id);
        }
        if let Some(value) = value {
            self.usages[value.index()].push(id);
        }
    }

    pub fn set_input_list(&mut self, id: NodeId, slot: usize, list: Option<EdgeList>) {
        let Some(position) = self.nodes[id.index()].inputs_mut().list_slot_mut(slot) else {
            debug_assert!(false, "{id:?} has no input list slot {slot}");
            return;
        };
        let old = std::mem::replace(position, list);
        for old in old.iter().flatten().flatten() {
            self.remove_usage(*old, id);
        }
        let added: SmallVec<[NodeId; 8]> = self
            .input_list(id, slot)
            .into_iter()
            .flatten()
            .flatten()
            .copied()
            .collect();
        for value in added {
            self.usages[value.index()].push(id);
        }
    }

    /// Append `value` to input list `slot`, creating the list if null.
    pub fn push_input(&mut self, id: NodeId, slot: usize, value: Option<NodeId>) {
        let Some(position) = self.nodes[id.index()].inputs_mut().list_slot_mut(slot) else {
            debug_assert!(false, "{id:?} has no input list slot {slot}");
            return;
        };
        position.get_or_insert_with(EdgeList::new).push(value);
        if let Some(value) = value {
            self.usages[value.index()].push(id);
        }
    }

    /// Remove element `index` of input list `slot`, shifting later elements.
    pub fn remove_input_at(&mut self, id: NodeId, slot: usize, index: usize) -> Option<NodeId> {
        let list = self.nodes[id.index()]
            .inputs_mut()
            .list_slot_mut(slot)?
            .as_mut()?;
        if index >= list.len() {
            return None;
        }
        let removed = list.remove(index);
        if let Some(removed) = removed {
            self.remove_usage(removed, id);
        }
        removed
    }

    pub fn set_successor(&mut self, id: NodeId, slot: usize, value: Option<NodeId>) {
        let Some(position) = self.nodes[id.index()].successors_mut().direct_mut(slot) else {
            debug_assert!(false, "{id:?} has no direct successor slot {slot}");
            return;
        };
        let old = std::mem::replace(position, value);
        if old == value {
            return;
        }
        if let Some(old) = old {
            if self.predecessors[old.index()] == Some(id) {
                self.predecessors[old.index()] = None;
            }
        }
        if let Some(value) = value {
            self.predecessors[value.index()] = Some(id);
        }
    }

    pub fn set_successor_list(&mut self, id: NodeId, slot: usize, list: Option<EdgeList>) {
        let Some(position) = self.nodes[id.index()].successors_mut().list_slot_mut(slot) else {
            debug_assert!(false, "{id:?} has no successor list slot {slot}");
            return;
        };
        let old = std::mem::replace(position, list);
        for old in old.iter().flatten().flatten() {
            if self.predecessors[old.index()] == Some(id) {
                self.predecessors[old.index()] = None;
            }
        }
        let added: SmallVec<[NodeId; 8]> = self
            .successor_list(id, slot)
            .into_iter()
            .flatten()
            .flatten()
            .copied()
            .collect();
        for value in added {
            self.predecessors[value.index()] = Some(id);
        }
    }

    fn remove_usage(&mut self, input: NodeId, user: NodeId) {
        let usages = &mut self.usages[input.index()];
        if let Some(pos) = usages.iter().position(|&u| u == user) {
            usages.remove(pos);
        }
    }

    // ── Replacement and deletion ────────────────────────────────────

    /// Redirect every input edge pointing at `old` to `new`.
    pub fn replace_at_usages(&mut self, old: NodeId, new: Option<NodeId>) {
        if new == Some(old) {
            return;
        }
        let users = std::mem::take(&mut self.usages[old.index()]);
        let mut visited: SmallVec<[NodeId; 8]> = SmallVec::new();
        for user in users {
            if visited.contains(&user) {
                continue;
            }
            visited.push(user);
            let mut replaced = 0;
            for position in self.nodes[user.index()].inputs_mut().positions_mut() {
                if *position == Some(old) {
                    *position = new;
                    replaced += 1;
                }
            }
            if let Some(new) = new {
                for _ in 0..replaced {
                    self.usages[new.index()].push(user);
                }
            }
        }
    }

    /// Redirect the successor edge pointing at `node` (if any) to `new`.
    pub fn replace_at_predecessor(&mut self, node: NodeId, new: Option<NodeId>) {
        let Some(pred) = self.predecessors[node.index()] else {
            return;
        };
        for position in self.nodes[pred.index()].successors_mut().positions_mut() {
            if *position == Some(node) {
                *position = new;
            }
        }
        self.predecessors[node.index()] = None;
        if let Some(new) = new {
            self.predecessors[new.index()] = Some(pred);
        }
    }

    /// Clear every edge of `id` and mark it deleted.
    ///
    /// Callers must have redirected its usages first; a remaining usage is
    /// reported by [`Graph::verify`].
    pub fn safe_delete(&mut self, id: NodeId) {
        if !self.is_alive(id) {
            return;
        }
        self.forget_value_number(id);
        self.replace_at_predecessor(id, None);
        let inputs: SmallVec<[NodeId; 8]> = self.nodes[id.index()].inputs().iter().collect();
        for input in inputs {
            self.remove_usage(input, id);
        }
        let successors: SmallVec<[NodeId; 8]> =
            self.nodes[id.index()].successors().iter().collect();
        for successor in successors {
            if self.predecessors[successor.index()] == Some(id) {
                self.predecessors[successor.index()] = None;
            }
        }
        let class = self.class(id);
        let node = &mut self.nodes[id.index()];
        node.inputs_mut().reset(class.inputs());
        node.successors_mut().reset(class.successors());
        self.usages[id.index()].clear();
        self.alive[id.index()] = false;
        self.live -= 1;
    }

    fn forget_value_number(&mut self, id: NodeId) {
        let node = &self.nodes[id.index()];
        if !node.class().is_value_numberable() {
            return;
        }
        if self.value_numbers.get(node) == Some(&id) {
            self.value_numbers.remove(node);
        }
    }

    /// Replace `old` by `new` at its usages and at its predecessor, then
    /// delete it.
    pub fn replace_and_delete(&mut self, old: NodeId, new: NodeId) {
        self.replace_at_usages(old, Some(new));
        self.replace_at_predecessor(old, Some(new));
        self.safe_delete(old);
    }

    pub fn replace_at_usages_and_delete(&mut self, old: NodeId, new: NodeId) {
        self.replace_at_usages(old, Some(new));
        self.safe_delete(old);
    }

    // ── Consistency ─────────────────────────────────────────────────

    /// Check that the side tables agree with the edges of every live node.
    pub fn verify(&self) -> Result<(), GraphError> {
        for id in self.node_ids() {
            let node = self.node(id);
            for input in node.inputs().iter() {
                if !self.is_alive(input) {
                    return Err(GraphError::DeletedTarget {
                        user: id,
                        target: input,
                    });
                }
                if !self.usages[input.index()].contains(&id) {
                    return Err(GraphError::MissingUsage { user: id, input });
                }
            }
            for successor in node.successors().iter() {
                if !self.is_alive(successor) {
                    return Err(GraphError::DeletedTarget {
                        user: id,
                        target: successor,
                    });
                }
                let recorded = self.predecessors[successor.index()];
                if recorded != Some(id) {
                    return Err(GraphError::PredecessorMismatch {
                        node: id,
                        successor,
                        recorded,
                    });
                }
            }
            for &user in self.usages(id) {
                if !self.is_alive(user) || !self.node(user).inputs().iter().any(|i| i == id) {
                    return Err(GraphError::StaleUsage {
                        node: user,
                        input: id,
                    });
                }
            }
        }
        Ok(())
    }
}
