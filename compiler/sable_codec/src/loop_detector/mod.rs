//! Loop reconstruction after merge explosion.
//!
//! Merge explosion leaves a method's loops as plain merges whose back
//! edges are ordinary ends. The detector finds those cycles again, turns
//! each reducible one into a loop begin with loop ends and loop exits, and
//! rewrites irreducible ones into a single loop at the explosion head that
//! dispatches on the loop variable through an integer switch.
//!
//! Only merges that loop explosion created may be loop headers; any other
//! back edge means the decoder built a broken graph.

use rustc_hash::{FxHashMap, FxHashSet};
use sable_ir::{
    slot, ConstValue, DeoptReason, EdgeList, Graph, GraphMark, Node, NodeBitMap, NodeClass,
    NodeId, NodeKind, Probability, SwitchTable,
};
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::CodecError;

struct Loop {
    header: NodeId,
    /// Back-edge ends into the header.
    ends: Vec<NodeId>,
    /// Ends leaving the loop into an explosion merge.
    exits: Vec<NodeId>,
    irreducible: bool,
}

impl Loop {
    fn new(header: NodeId) -> Self {
        Loop {
            header,
            ends: Vec::new(),
            exits: Vec::new(),
            irreducible: false,
        }
    }
}

/// Rebuilds the loops of one merge-exploded method.
pub struct LoopDetector<'a> {
    graph: &'a mut Graph,
    merges: &'a FxHashSet<NodeId>,
    head: NodeId,
    method_start: GraphMark,
    /// Dispatch switch at the head, once an irreducible loop was folded in.
    dispatch: Option<NodeId>,
}

impl<'a> LoopDetector<'a> {
    /// `merges` are the merges loop explosion created, `head` the one
    /// standing for the method's top-level loop, and `method_start` the
    /// graph mark taken before the method was decoded.
    pub fn new(
        graph: &'a mut Graph,
        merges: &'a FxHashSet<NodeId>,
        head: NodeId,
        method_start: GraphMark,
    ) -> Self {
        LoopDetector {
            graph,
            merges,
            head,
            method_start,
            dispatch: None,
        }
    }

    pub fn run(mut self) -> Result<(), CodecError> {
        let mut loops = self.find_loops()?;
        debug!(loops = loops.len(), head = ?self.head, "detecting exploded loops");

        // The head loop is last; irreducible loops hand their ends to it.
        let handler = loops.len() - 1;
        for index in 0..loops.len() {
            if loops[index].ends.is_empty() {
                continue;
            }
            self.find_loop_exits(&mut loops[index])?;
            if loops[index].irreducible {
                if index == handler {
                    return Err(CodecError::internal(
                        "the explosion head cannot be entered from outside its method",
                    ));
                }
                let (inner, rest) = loops.split_at_mut(handler);
                self.handle_irreducible_loop(&inner[index], &mut rest[0])?;
            } else {
                self.insert_loop_nodes(&loops[index])?;
            }
        }
        Ok(())
    }

    /// Depth-first walk from the head; loops come out inner before outer
    /// with the head loop last.
    fn find_loops(&mut self) -> Result<Vec<Loop>, CodecError> {
        let mut unordered: FxHashMap<NodeId, Loop> = FxHashMap::default();
        unordered.insert(self.head, Loop::new(self.head));
        let mut ordered = Vec::new();

        let mut visited = NodeBitMap::new();
        let mut active = NodeBitMap::new();
        let mut stack = vec![self.head];
        visited.mark(self.head);

        while let Some(&current) = stack.last() {
            if active.is_marked(current) {
                // Every successor is done.
                stack.pop();
                active.clear(current);
                if let Some(found) = unordered.remove(&current) {
                    ordered.push(found);
                }
                continue;
            }

            active.mark(current);
            // Loops that were never exploded are already closed.
            if self.graph.class(current) == NodeClass::LoopEnd {
                continue;
            }
            for successor in self.graph.cfg_successors(current) {
                if active.is_marked(successor) {
                    if !self.merges.contains(&successor) {
                        return Err(CodecError::internal(format!(
                            "back edge from {current:?} into {successor:?}, \
                             which loop explosion did not create"
                        )));
                    }
                    let found = unordered
                        .entry(successor)
                        .or_insert_with(|| Loop::new(successor));
                    found.ends.push(current);
                } else if visited.mark(successor) {
                    stack.push(successor);
                }
            }
        }

        match ordered.last() {
            Some(last) if last.header == self.head => Ok(ordered),
            _ => Err(CodecError::internal("explosion head is not the outermost loop")),
        }
    }

    fn find_loop_exits(&mut self, found: &mut Loop) -> Result<(), CodecError> {
        let mut possible_exits: Vec<NodeId> = Vec::new();
        let mut visited = NodeBitMap::new();
        let mut stack: Vec<NodeId> = Vec::new();
        for &end in &found.ends {
            visited.mark(end);
            stack.push(end);
        }

        while let Some(current) = stack.pop() {
            if current == found.header {
                continue;
            }
            if !self.graph.is_new(self.method_start, current) {
                // Reached code before the method: a second loop entry.
                found.irreducible = true;
                return Ok(());
            }
            for predecessor in self.graph.cfg_predecessors(current) {
                if self.graph.class(predecessor) == NodeClass::LoopExit {
                    // Inner loops are done; jump to their header and
                    // collect their exits.
                    let Some(inner) = self.graph.input(predecessor, slot::LOOP_BEGIN) else {
                        continue;
                    };
                    if visited.mark(inner) {
                        stack.push(inner);
                        possible_exits.extend(self.graph.loop_exits(inner));
                    }
                } else if visited.mark(predecessor) {
                    stack.push(predecessor);
                    if self.graph.class(predecessor).is_control_split() {
                        possible_exits.extend(self.graph.cfg_successors(predecessor));
                    }
                }
            }
        }

        // Exits can only sit where explosion left a merge with a frame
        // state: walk forward until one is reached.
        for node in possible_exits {
            if visited.mark(node) {
                stack.push(node);
            }
        }
        while let Some(current) = stack.pop() {
            for successor in self.graph.cfg_successors(current) {
                if visited.is_marked(successor) {
                    continue;
                }
                if self.merges.contains(&successor) {
                    found.exits.push(current);
                } else {
                    visited.mark(successor);
                    stack.push(successor);
                }
            }
        }

        self.coalesce_exits(found);
        Ok(())
    }

    /// Exits that all meet at one explosion merge which runs straight into
    /// another explosion merge leave the loop once, after that merge.
    fn coalesce_exits(&self, found: &mut Loop) {
        let mut targets: SmallVec<[NodeId; 4]> = SmallVec::new();
        for &exit in &found.exits {
            if let Some(merge) = self.graph.end_merge(exit) {
                if !targets.contains(&merge) {
                    targets.push(merge);
                }
            }
        }

        for merge in targets {
            let ends = self.graph.forward_ends(merge);
            if ends.len() < 2 || !ends.iter().all(|end| found.exits.contains(end)) {
                continue;
            }
            let mut current = merge;
            while let Some(next) = self.graph.next(current) {
                current = next;
            }
            let leaves_at_merge = self.graph.class(current) == NodeClass::End
                && self
                    .graph
                    .end_merge(current)
                    .is_some_and(|target| self.merges.contains(&target));
            if leaves_at_merge {
                found.exits.retain(|exit| !ends.contains(exit));
                found.exits.push(current);
                trace!(?merge, exit = ?current, "coalesced loop exits");
            }
        }
    }

    fn insert_loop_nodes(&mut self, found: &Loop) -> Result<(), CodecError> {
        let merge = found.header;
        let state = self
            .graph
            .state_after(merge)
            .ok_or_else(|| CodecError::internal(format!("loop header {merge:?} has no state")))?;
        let loop_state = self.graph.duplicate(state);
        let after_merge = self.graph.next(merge);
        self.graph.set_next(merge, None);

        let pre_loop_end = self.graph.add_kind(NodeKind::End);
        self.graph.set_next(merge, Some(pre_loop_end));
        let loop_begin = self
            .graph
            .add(Node::new(NodeKind::LoopBegin).with_input_list(slot::ENDS, [pre_loop_end]));
        self.graph.set_state_after(loop_begin, Some(loop_state));
        self.graph.set_next(loop_begin, after_merge);

        // Forward values stay with the old phi; back-edge values move to a
        // loop phi seeded with it.
        let mut phis: SmallVec<[(NodeId, NodeId); 4]> = SmallVec::new();
        for phi in self.graph.phis(merge) {
            let loop_phi = self.graph.add(
                Node::new(NodeKind::Phi).with_input(slot::PHI_MERGE, loop_begin),
            );
            self.graph.replace_at_usages(phi, Some(loop_phi));
            self.graph.push_input(loop_phi, slot::VALUES, Some(phi));
            phis.push((phi, loop_phi));
        }

        for (index, &end) in found.ends.iter().enumerate() {
            for &(phi, loop_phi) in &phis {
                let value = self.graph.phi_value_at(phi, end);
                self.graph.push_input(loop_phi, slot::VALUES, value);
            }
            self.graph.remove_end(merge, end);
            let end_index =
                u32::try_from(index).map_err(|_| CodecError::internal("too many loop ends"))?;
            let loop_end = self.graph.add(
                Node::new(NodeKind::LoopEnd { end_index })
                    .with_input(slot::LOOP_BEGIN, loop_begin),
            );
            self.graph.replace_and_delete(end, loop_end);
        }

        for &exit in &found.exits {
            let target = self.graph.end_merge(exit).ok_or_else(|| {
                CodecError::internal(format!("loop exit {exit:?} reaches no merge"))
            })?;
            let loop_exit = self.graph.add(
                Node::new(NodeKind::LoopExit).with_input(slot::LOOP_BEGIN, loop_begin),
            );
            self.graph.replace_at_predecessor(exit, Some(loop_exit));
            self.graph.set_next(loop_exit, Some(exit));
            self.assign_loop_exit_state(loop_exit, loop_begin, target, exit)?;
        }
        debug!(
            header = ?merge,
            ends = found.ends.len(),
            exits = found.exits.len(),
            "reconstructed loop"
        );
        Ok(())
    }

    /// Frame state of a new loop exit: the state of the merge it leads to,
    /// with values computed inside the loop proxied at the exit.
    fn assign_loop_exit_state(
        &mut self,
        loop_exit: NodeId,
        loop_begin: NodeId,
        target: NodeId,
        exit: NodeId,
    ) -> Result<(), CodecError> {
        let old_state = self.graph.state_after(target).ok_or_else(|| {
            CodecError::internal(format!("explosion merge {target:?} has no state"))
        })?;

        let mut loop_begin_values: FxHashSet<NodeId> = FxHashSet::default();
        let mut state = self.graph.state_after(loop_begin);
        while let Some(current) = state {
            for value in self.graph.state_values(current).into_iter().flatten() {
                if !self.graph.is_constant(value) && !self.graph.is_phi_at_merge(value, loop_begin)
                {
                    if let Some(value) = self.graph.unwrap_placeholder(Some(value)) {
                        loop_begin_values.insert(value);
                    }
                }
            }
            state = self.graph.input(current, slot::OUTER);
        }

        let mut values = EdgeList::new();
        for mut value in self.graph.state_values(old_state) {
            let mut real = self.graph.unwrap_placeholder(value);
            // The exit sits before the merge, on one of its branches.
            if let Some(phi) = real.filter(|&phi| self.graph.is_phi_at_merge(phi, target)) {
                value = self.graph.phi_value_at(phi, exit);
                real = self.graph.unwrap_placeholder(value);
            }

            let Some(real_value) = real else {
                values.push(None);
                continue;
            };
            if self.graph.is_constant(real_value)
                || loop_begin_values.contains(&real_value)
                || !self.graph.is_new(self.method_start, real_value)
            {
                values.push(Some(real_value));
                continue;
            }

            // Computed inside the loop: only a placeholder anchored at this
            // merge says where to proxy it.
            let placeholder = value
                .filter(|&v| {
                    self.graph.class(v) == NodeClass::ProxyPlaceholder
                        && self.graph.input(v, slot::PROXY_POINT) == Some(target)
                })
                .ok_or_else(|| {
                    CodecError::internal(format!(
                        "value {real_value:?} flows out of the loop at {exit:?} without a proxy anchor"
                    ))
                })?;
            let inner = self.graph.input(placeholder, slot::VALUE).ok_or_else(|| {
                CodecError::internal(format!("{placeholder:?} wraps nothing"))
            })?;
            let proxy = self.graph.add(
                Node::new(NodeKind::ValueProxy)
                    .with_input(slot::VALUE, inner)
                    .with_input(slot::PROXY_LOOP_EXIT, loop_exit),
            );
            self.graph.set_input(placeholder, slot::VALUE, Some(proxy));
            values.push(Some(proxy));
        }

        let bci = match self.graph.kind(old_state) {
            NodeKind::FrameState { bci } => *bci,
            other => {
                return Err(CodecError::internal(format!(
                    "merge state is a {:?}",
                    other.class()
                )))
            }
        };
        let mut new_state = Node::new(NodeKind::FrameState { bci });
        new_state.set_input(slot::OUTER, self.graph.input(old_state, slot::OUTER));
        new_state.set_input_list(slot::VALUES, Some(values));
        let new_state = self.graph.add(new_state);
        self.graph.set_state_after(loop_exit, Some(new_state));
        Ok(())
    }

    /// Fold an irreducible loop into the head loop: its header becomes one
    /// more case of the dispatch switch on the single varying value.
    fn handle_irreducible_loop(
        &mut self,
        found: &Loop,
        handler: &mut Loop,
    ) -> Result<(), CodecError> {
        let header = found.header;
        let head = handler.header;
        let loop_state = self.graph.state_after(header).ok_or_else(|| {
            CodecError::internal(format!("irreducible header {header:?} has no state"))
        })?;
        let head_state = self.graph.state_after(head).ok_or_else(|| {
            CodecError::internal(format!("explosion head {head:?} has no state"))
        })?;
        let loop_values = self.graph.state_values(loop_state);
        let head_values = self.graph.state_values(head_state);
        if loop_values.len() != head_values.len() {
            return Err(CodecError::internal(
                "irreducible loop state does not match the explosion head state",
            ));
        }

        // Check every restriction before touching the graph.
        let mut variable = None;
        for (index, (loop_value, head_value)) in loop_values.iter().zip(&head_values).enumerate() {
            if loop_value != head_value {
                if variable.is_some() {
                    return Err(CodecError::permanent_bailout(format!(
                        "irreducible loop must have only one variable that is changed in loop \
                         ({loop_value:?} != {head_value:?} at state index {index})"
                    )));
                }
                variable = Some(index);
            }
        }
        let variable = variable.ok_or_else(|| {
            CodecError::internal("irreducible loop state equals the explosion head state")
        })?;
        let loop_key = self.int_constant(loop_values[variable])?;
        let head_key = match self.dispatch {
            None => Some(self.int_constant(head_values[variable])?),
            Some(_) => None,
        };
        let mut table = match self.dispatch {
            Some(switch) => self.dispatch_table(switch)?,
            None => DispatchTable::default(),
        };
        if table.cases.contains_key(&loop_key) || head_key == Some(loop_key) {
            return Err(CodecError::internal(format!(
                "irreducible loop key {loop_key} dispatched twice"
            )));
        }
        if !self.graph.phis(header).is_empty() {
            return Err(CodecError::internal(format!(
                "irreducible header {header:?} carries phis"
            )));
        }
        let head_phis = self.graph.phis(head);
        let expected_phis = usize::from(self.dispatch.is_some());
        if head_phis.len() != expected_phis {
            return Err(CodecError::internal(format!(
                "explosion head {head:?} carries unexpected phis"
            )));
        }

        let phi = match (self.dispatch, head_key) {
            (Some(switch), _) => {
                let phi = self.graph.input(switch, slot::VALUE).ok_or_else(|| {
                    CodecError::internal("dispatch switch lost its value")
                })?;
                self.graph.safe_delete(switch);
                phi
            }
            (None, Some(head_key)) => {
                let head_value = head_values[variable];
                let predecessors = self.graph.phi_predecessor_count(head);
                let mut phi = Node::new(NodeKind::Phi).with_input(slot::PHI_MERGE, head);
                phi.set_input_list(
                    slot::VALUES,
                    Some(std::iter::repeat(head_value).take(predecessors).collect()),
                );
                let phi = self.graph.add(phi);

                let mut head_state_values: EdgeList = head_values.iter().copied().collect();
                head_state_values[variable] = Some(phi);
                let new_head_state = self.graph.duplicate(head_state);
                self.graph
                    .set_input_list(new_head_state, slot::VALUES, Some(head_state_values));
                self.graph.replace_at_usages(head_state, Some(new_head_state));
                if !self.graph.has_usages(head_state) {
                    self.graph.safe_delete(head_state);
                }

                let handler_next = self.graph.next(head);
                self.graph.set_next(head, None);
                let handler_begin = self.graph.add_kind(NodeKind::Begin);
                self.graph.set_next(handler_begin, handler_next);
                table.cases.insert(head_key, handler_begin);

                let deopt = self
                    .graph
                    .add_kind(NodeKind::Deoptimize(DeoptReason::UnreachedCode));
                let default = self
                    .graph
                    .add(Node::new(NodeKind::Begin).with_successor(slot::NEXT, deopt));
                table.default = Some(default);
                phi
            }
            (None, None) => {
                return Err(CodecError::internal("dispatch key of the head is missing"))
            }
        };

        let dispatch_end = self.graph.add_kind(NodeKind::End);
        let dispatch_begin = self
            .graph
            .add(Node::new(NodeKind::Begin).with_successor(slot::NEXT, dispatch_end));
        self.graph.add_forward_end(header, dispatch_end);
        table.cases.insert(loop_key, dispatch_begin);

        let loop_value = loop_values[variable];
        for &end in &found.ends {
            self.graph.remove_end(header, end);
            handler.ends.push(end);
            self.graph.add_forward_end(head, end);
            self.graph.push_input(phi, slot::VALUES, loop_value);
        }

        let default = table
            .default
            .ok_or_else(|| CodecError::internal("dispatch switch without default"))?;
        let keys: Vec<i32> = table.cases.keys().copied().collect();
        let key_count = u32::try_from(keys.len())
            .map_err(|_| CodecError::internal("too many dispatch keys"))?;
        let mut successors: EdgeList = table.cases.values().map(|&begin| Some(begin)).collect();
        successors.push(Some(default));
        let mut probabilities = vec![Probability::new(1.0 / f64::from(key_count)); keys.len()];
        probabilities.push(Probability::new(0.0));
        let mut switch = Node::new(NodeKind::IntegerSwitch(SwitchTable {
            keys,
            key_successors: (0..=key_count).collect(),
            probabilities,
        }))
        .with_input(slot::VALUE, phi);
        switch.set_successor_list(slot::SWITCH_SUCCESSORS, Some(successors));
        let switch = self.graph.add(switch);
        self.graph.set_next(head, Some(switch));
        self.dispatch = Some(switch);

        debug!(
            ?header,
            loop_key,
            cases = key_count,
            "folded irreducible loop into dispatch switch"
        );
        Ok(())
    }

    fn int_constant(&self, value: Option<NodeId>) -> Result<i32, CodecError> {
        value
            .and_then(|value| match self.graph.kind(value) {
                NodeKind::Constant(ConstValue::Int(key)) => Some(*key),
                _ => None,
            })
            .ok_or_else(|| {
                CodecError::permanent_bailout(format!(
                    "irreducible loop variable must be an integer constant, found {value:?}"
                ))
            })
    }

    /// Cases of the current dispatch switch.
    fn dispatch_table(&self, switch: NodeId) -> Result<DispatchTable, CodecError> {
        let NodeKind::IntegerSwitch(table) = self.graph.kind(switch) else {
            return Err(CodecError::internal(format!("{switch:?} is not a switch")));
        };
        let successors = self
            .graph
            .successor_list(switch, slot::SWITCH_SUCCESSORS)
            .cloned()
            .unwrap_or_default();
        let target = |index: u32| successors.get(index as usize).copied().flatten();

        let mut cases = std::collections::BTreeMap::new();
        for (&key, &successor) in table.keys.iter().zip(&table.key_successors) {
            let begin = target(successor)
                .ok_or_else(|| CodecError::internal(format!("switch key {key} has no target")))?;
            cases.insert(key, begin);
        }
        let default = table.default_successor().and_then(target);
        Ok(DispatchTable { cases, default })
    }
}

/// Dispatch cases ordered by key.
#[derive(Default)]
struct DispatchTable {
    cases: std::collections::BTreeMap<i32, NodeId>,
    default: Option<NodeId>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, reason = "tests unwrap for brevity")]
mod tests;
