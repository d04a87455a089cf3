//! Control-flow views over the node arena.
//!
//! Merges list their forward ends as inputs; loop ends point back at their
//! loop begin; phis point at their merge and list one value per
//! predecessor. The helpers here answer the questions the codec asks about
//! that structure (which merge does this end reach, which phi value flows
//! along this end) without callers knowing the slot layout.

use smallvec::SmallVec;

use crate::{slot, Graph, NodeClass, NodeId, NodeKind};

impl Graph {
    /// The `next` successor of a block-continuing fixed node.
    pub fn next(&self, id: NodeId) -> Option<NodeId> {
        if self.class(id).has_next() {
            self.successor(id, slot::NEXT)
        } else {
            None
        }
    }

    pub fn set_next(&mut self, id: NodeId, next: Option<NodeId>) {
        debug_assert!(self.class(id).has_next(), "{id:?} has no next");
        self.set_successor(id, slot::NEXT, next);
    }

    pub fn state_after(&self, id: NodeId) -> Option<NodeId> {
        self.class(id)
            .state_after_slot()
            .and_then(|slot| self.input(id, slot))
    }

    pub fn set_state_after(&mut self, id: NodeId, state: Option<NodeId>) {
        if let Some(slot) = self.class(id).state_after_slot() {
            self.set_input(id, slot, state);
        } else {
            debug_assert!(false, "{id:?} has no frame state");
        }
    }

    // ── Merges ──────────────────────────────────────────────────────

    /// Forward ends of a merge or loop begin, in input order.
    pub fn forward_ends(&self, merge: NodeId) -> SmallVec<[NodeId; 4]> {
        self.input_list(merge, slot::ENDS)
            .into_iter()
            .flatten()
            .flatten()
            .copied()
            .collect()
    }

    pub fn forward_end_count(&self, merge: NodeId) -> usize {
        self.input_list(merge, slot::ENDS).map_or(0, |ends| ends.len())
    }

    pub fn forward_end_at(&self, merge: NodeId, index: usize) -> Option<NodeId> {
        self.input_list(merge, slot::ENDS)
            .and_then(|ends| ends.get(index).copied().flatten())
    }

    pub fn add_forward_end(&mut self, merge: NodeId, end: NodeId) {
        self.push_input(merge, slot::ENDS, Some(end));
    }

    /// Detach `end` from `merge`, dropping the matching value of every phi.
    pub fn remove_end(&mut self, merge: NodeId, end: NodeId) {
        let Some(index) = self.phi_predecessor_index(merge, end) else {
            return;
        };
        let phis = self.phis(merge);
        if self.class(end) == NodeClass::End {
            self.remove_input_at(merge, slot::ENDS, index);
        }
        for phi in phis {
            self.remove_input_at(phi, slot::VALUES, index);
        }
    }

    /// Loop ends of a loop begin, ordered by `end_index`.
    pub fn loop_ends(&self, loop_begin: NodeId) -> SmallVec<[NodeId; 4]> {
        let mut ends: SmallVec<[NodeId; 4]> = SmallVec::new();
        for &user in self.usages(loop_begin) {
            if self.class(user) == NodeClass::LoopEnd
                && self.input(user, slot::LOOP_BEGIN) == Some(loop_begin)
                && !ends.contains(&user)
            {
                ends.push(user);
            }
        }
        ends.sort_by_key(|&end| match self.kind(end) {
            NodeKind::LoopEnd { end_index } => *end_index,
            _ => u32::MAX,
        });
        ends
    }

    pub fn loop_exits(&self, loop_begin: NodeId) -> SmallVec<[NodeId; 4]> {
        let mut exits: SmallVec<[NodeId; 4]> = SmallVec::new();
        for &user in self.usages(loop_begin) {
            if self.class(user) == NodeClass::LoopExit
                && self.input(user, slot::LOOP_BEGIN) == Some(loop_begin)
                && !exits.contains(&user)
            {
                exits.push(user);
            }
        }
        exits
    }

    /// The merge an `End` flows into, or the loop begin of a `LoopEnd`.
    pub fn end_merge(&self, end: NodeId) -> Option<NodeId> {
        match self.class(end) {
            NodeClass::LoopEnd => self.input(end, slot::LOOP_BEGIN),
            NodeClass::End => self.usages(end).iter().copied().find(|&user| {
                self.class(user).is_merge()
                    && self
                        .input_list(user, slot::ENDS)
                        .is_some_and(|ends| ends.contains(&Some(end)))
            }),
            _ => None,
        }
    }

    /// Phis attached to `merge`, in attachment order.
    pub fn phis(&self, merge: NodeId) -> SmallVec<[NodeId; 4]> {
        let mut phis: SmallVec<[NodeId; 4]> = SmallVec::new();
        for &user in self.usages(merge) {
            if self.is_phi_at_merge(user, merge) && !phis.contains(&user) {
                phis.push(user);
            }
        }
        phis
    }

    pub fn is_phi_at_merge(&self, value: NodeId, merge: NodeId) -> bool {
        self.class(value) == NodeClass::Phi && self.input(value, slot::PHI_MERGE) == Some(merge)
    }

    /// Number of values each phi at `merge` carries.
    pub fn phi_predecessor_count(&self, merge: NodeId) -> usize {
        let loop_ends = if self.class(merge) == NodeClass::LoopBegin {
            self.loop_ends(merge).len()
        } else {
            0
        };
        self.forward_end_count(merge) + loop_ends
    }

    /// Position of the phi value flowing along `end`: forward ends first,
    /// then loop ends by `end_index`.
    pub fn phi_predecessor_index(&self, merge: NodeId, end: NodeId) -> Option<usize> {
        match self.kind(end) {
            NodeKind::LoopEnd { end_index } => {
                Some(self.forward_end_count(merge) + *end_index as usize)
            }
            NodeKind::End => self
                .input_list(merge, slot::ENDS)?
                .iter()
                .position(|&e| e == Some(end)),
            _ => None,
        }
    }

    /// The value `phi` takes when control arrives along `end`.
    pub fn phi_value_at(&self, phi: NodeId, end: NodeId) -> Option<NodeId> {
        let merge = self.input(phi, slot::PHI_MERGE)?;
        let index = self.phi_predecessor_index(merge, end)?;
        self.input_list(phi, slot::VALUES)?
            .get(index)
            .copied()
            .flatten()
    }

    // ── Control-flow graph ──────────────────────────────────────────

    /// Control successors. Ends continue at their merge.
    pub fn cfg_successors(&self, id: NodeId) -> SmallVec<[NodeId; 4]> {
        if self.class(id).is_end() {
            return self.end_merge(id).into_iter().collect();
        }
        self.node(id).successors().iter().collect()
    }

    /// Control predecessors. Merges are reached from their ends.
    pub fn cfg_predecessors(&self, id: NodeId) -> SmallVec<[NodeId; 4]> {
        match self.class(id) {
            NodeClass::Merge => self.forward_ends(id),
            NodeClass::LoopBegin => {
                let mut preds = self.forward_ends(id);
                preds.extend(self.loop_ends(id));
                preds
            }
            _ => self.predecessor(id).into_iter().collect(),
        }
    }

    /// Closest block entry at or above `id` along predecessors.
    pub fn prev_begin(&self, id: NodeId) -> Option<NodeId> {
        let mut current = Some(id);
        while let Some(node) = current {
            if self.class(node).is_begin() {
                return Some(node);
            }
            current = self.predecessor(node);
        }
        None
    }

    // ── Values ──────────────────────────────────────────────────────

    pub fn is_constant(&self, id: NodeId) -> bool {
        self.class(id) == NodeClass::Constant
    }

    /// Strip `ProxyPlaceholder` wrappers.
    pub fn unwrap_placeholder(&self, value: Option<NodeId>) -> Option<NodeId> {
        let mut current = value;
        while let Some(node) = current {
            if self.class(node) != NodeClass::ProxyPlaceholder {
                break;
            }
            current = self.input(node, slot::VALUE);
        }
        current
    }

    /// Values of a frame state, in slot order.
    pub fn state_values(&self, state: NodeId) -> SmallVec<[Option<NodeId>; 8]> {
        self.input_list(state, slot::VALUES)
            .map(|values| values.iter().copied().collect())
            .unwrap_or_default()
    }
}
