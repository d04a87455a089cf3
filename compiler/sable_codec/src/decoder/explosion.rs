//! Loop explosion.
//!
//! Under a [`LoopExplosionKind`] other than `NONE` a loop is decoded once
//! per iteration. Every loop end starts (or joins) the scope of the next
//! iteration, whose loop begin becomes a plain merge. Loop exits become
//! begins that continue in the enclosing scope, with their proxies turned
//! into phis once several iterations leave the loop at the same exit.
//!
//! With [`LoopExplosionKind::MERGE`], iterations whose frame states agree
//! share one merge. Loop-carried values are wrapped in proxy placeholders
//! anchored at that merge so the loop detector can later proxy them at the
//! reconstructed loop exits.

use sable_ir::{slot, BitSet, EdgeList, Node, NodeClass, NodeId, NodeKind};
use tracing::{debug, trace};

use super::plugin::ExplosionIteration;
use super::scope::{ExplosionKey, LoopScope, LoopScopeId, MethodScopeId};
use super::{DecoderPlugin, GraphDecoder, LoopScopeTrigger};
use crate::CodecError;

impl<P: DecoderPlugin> GraphDecoder<'_, P> {
    pub(super) fn check_loop_explosion_iteration(
        &mut self,
        scope: LoopScopeId,
    ) -> Result<(), CodecError> {
        let scope = self.scopes.loop_scope(scope);
        let iteration = ExplosionIteration {
            loop_depth: scope.depth,
            iteration: scope.iteration,
            trigger: scope.trigger,
        };
        self.plugin.check_loop_explosion_iteration(&iteration)
    }

    /// Queue a sibling iteration of `sibling`'s loop and stub its loop
    /// begin.
    fn add_iteration_scope(
        &mut self,
        method: MethodScopeId,
        sibling: LoopScopeId,
        trigger: LoopScopeTrigger,
    ) -> Result<LoopScopeId, CodecError> {
        let len = self.node_count(method);
        let merge_loops = self.scopes.method(method).loop_explosion.merge_loops();
        let template = self.scopes.loop_scope(sibling);
        let (outer, depth, current, group) = (
            template.outer,
            template.depth,
            template.iteration,
            template.iterations,
        );
        let loop_begin_order_id = template
            .loop_begin_order_id
            .ok_or_else(|| CodecError::internal("loop iteration outside of any loop"))?;
        let initial = template
            .initial
            .ok_or_else(|| CodecError::internal("exploded loop scope without initial nodes"))?;

        let queues = self.scopes.iterations(group);
        let queue = match trigger {
            LoopScopeTrigger::LoopEndDuplication => &queues.from_end_duplication,
            _ => &queues.from_unrolling,
        };
        let iteration = self.scopes.next_iteration_number(queue, current);

        // Merging rewrites loop-carried values in the tables; keep those
        // rewrites private to the iteration.
        let initial = if merge_loops {
            self.scopes.copy_table(initial)
        } else {
            initial
        };
        let created = self.scopes.new_table(len);
        let scope = self.scopes.add_loop_scope(LoopScope {
            method,
            outer,
            depth,
            iteration,
            trigger,
            loop_begin_order_id: Some(loop_begin_order_id),
            nodes_to_process: BitSet::with_capacity(len),
            created,
            initial: Some(initial),
            written: Some(BitSet::with_capacity(len)),
            iterations: group,
        });
        self.check_loop_explosion_iteration(scope)?;

        let queues = self.scopes.iterations_mut(group);
        match trigger {
            LoopScopeTrigger::LoopEndDuplication => queues.from_end_duplication.push_back(scope),
            _ => queues.from_unrolling.push_back(scope),
        }
        self.register(scope, loop_begin_order_id, None);
        self.make_stub(method, scope, loop_begin_order_id)?;
        trace!(depth, iteration, ?trigger, "queued loop iteration");
        Ok(scope)
    }

    /// Scope that decodes the code after a loop exit of `scope` once more.
    pub(super) fn fork_exit_duplication_scope(
        &mut self,
        method: MethodScopeId,
        scope: LoopScopeId,
    ) -> Result<LoopScopeId, CodecError> {
        let merge_loops = self.scopes.method(method).loop_explosion.merge_loops();
        let loop_scope = self.scopes.loop_scope(scope);
        let loop_initial = loop_scope
            .initial
            .ok_or_else(|| CodecError::internal("exploded loop scope without initial nodes"))?;
        let outer_id = loop_scope
            .outer
            .ok_or_else(|| CodecError::internal("loop exit outside of any loop"))?;

        let outer = self.scopes.loop_scope(outer_id);
        let (outer_outer, depth, loop_begin_order_id, group, outer_initial) = (
            outer.outer,
            outer.depth,
            outer.loop_begin_order_id,
            outer.iterations,
            outer.initial,
        );
        let pending: Vec<usize> = outer.nodes_to_process.iter().collect();
        let iteration = self.scopes.next_iteration_number(
            &self.scopes.iterations(group).from_exit_duplication,
            outer.iteration,
        );

        let initial = match outer_initial {
            Some(table) if merge_loops => Some(self.scopes.copy_table(table)),
            other => other,
        };
        let created = self.scopes.copy_table(loop_initial);
        let len = self.node_count(method);
        let fork = self.scopes.add_loop_scope(LoopScope {
            method,
            outer: outer_outer,
            depth,
            iteration,
            trigger: LoopScopeTrigger::LoopExitDuplication,
            loop_begin_order_id,
            nodes_to_process: BitSet::with_capacity(len),
            created,
            initial,
            written: None,
            iterations: group,
        });
        self.check_loop_explosion_iteration(fork)?;

        // Nodes still pending in the enclosing scope are decoded again on
        // this path.
        for order_id in pending {
            #[expect(
                clippy::cast_possible_truncation,
                reason = "pending ids are u32 order ids"
            )]
            let order_id = order_id as u32;
            self.scopes.set_node(fork, order_id, None);
        }
        self.scopes
            .iterations_mut(group)
            .from_exit_duplication
            .push_back(fork);
        trace!(depth, iteration, "forked loop exit continuation");
        Ok(fork)
    }

    /// Scope of the next iteration of the loop enclosing an exit-duplicated
    /// scope. Loop ends reached from exit duplication all merge there.
    pub(super) fn outer_loop_merge_scope(
        &mut self,
        method: MethodScopeId,
        scope: LoopScopeId,
    ) -> Result<LoopScopeId, CodecError> {
        let group = self.scopes.loop_scope(scope).iterations;
        if let Some(&next) = self.scopes.iterations(group).from_unrolling.back() {
            return Ok(next);
        }
        self.add_iteration_scope(method, scope, LoopScopeTrigger::LoopBeginUnrolling)
    }

    /// Scope whose loop begin a loop end of `scope` flows into.
    pub(super) fn handle_loop_explosion_end(
        &mut self,
        method: MethodScopeId,
        scope: LoopScopeId,
    ) -> Result<LoopScopeId, CodecError> {
        let duplicate_ends = self
            .scopes
            .method(method)
            .loop_explosion
            .duplicate_loop_ends();
        let group = self.scopes.loop_scope(scope).iterations;
        if duplicate_ends {
            return self.add_iteration_scope(method, scope, LoopScopeTrigger::LoopEndDuplication);
        }
        match self.scopes.iterations(group).from_unrolling.back() {
            Some(&next) => Ok(next),
            None => self.add_iteration_scope(method, scope, LoopScopeTrigger::LoopBeginUnrolling),
        }
    }

    /// Turn the loop begin of an exploded iteration into a merge, or fold
    /// the iteration into an earlier one with the same frame state.
    pub(super) fn handle_loop_explosion_begin(
        &mut self,
        method: MethodScopeId,
        scope: LoopScopeId,
        loop_begin: NodeId,
    ) -> Result<(), CodecError> {
        self.check_loop_explosion_iteration(scope)?;
        let merge_loops = self.scopes.method(method).loop_explosion.merge_loops();
        let predecessors = self.graph.forward_ends(loop_begin);
        let successor = self.graph.next(loop_begin);
        let state = self
            .graph
            .state_after(loop_begin)
            .ok_or_else(|| CodecError::internal(format!("{loop_begin:?} has no frame state")))?;
        let key = ExplosionKey {
            outer: self.graph.input(state, slot::OUTER),
            values: self
                .graph
                .state_values(state)
                .into_iter()
                .map(|value| self.graph.unwrap_placeholder(value))
                .collect(),
        };
        let loop_scope = self.scopes.loop_scope(scope);
        let (group, depth) = (loop_scope.iterations, loop_scope.depth);

        if merge_loops {
            if let Some(&existing) = self.scopes.iterations(group).states.get(&key) {
                // Same state as an earlier iteration: jump back to it.
                self.graph.replace_at_usages(loop_begin, Some(existing));
                self.graph.safe_delete(loop_begin);
                if let Some(successor) = successor {
                    self.graph.safe_delete(successor);
                }
                if !self.graph.has_usages(state) {
                    self.graph.safe_delete(state);
                }
                for end in predecessors {
                    self.graph.add_forward_end(existing, end);
                }
                trace!(?existing, "merged exploded iteration");
                return Ok(());
            }
        }

        let is_head = merge_loops && depth == 1 && self.scopes.iterations(group).states.is_empty();
        if is_head && self.scopes.method(method).loop_explosion_head.is_some() {
            return Err(CodecError::permanent_bailout(
                "a merge-exploded method must not have more than one top-level loop",
            ));
        }

        let merge = self.graph.add_kind(NodeKind::Merge);
        let method_scope = self.scopes.method_mut(method);
        method_scope.loop_explosion_merges.insert(merge);
        if is_head {
            method_scope.loop_explosion_head = Some(merge);
        }
        let mark = method_scope.method_start_mark;

        if merge_loops {
            let mut values = EdgeList::new();
            let mut changed = false;
            for value in self.graph.state_values(state) {
                let wrapped = match value {
                    Some(value)
                        if !self.graph.is_constant(value) && self.graph.is_new(mark, value) =>
                    {
                        let placeholder = self.graph.unique(
                            Node::new(NodeKind::ProxyPlaceholder)
                                .with_input(slot::VALUE, value)
                                .with_input(slot::PROXY_POINT, merge),
                        );
                        self.scopes.replace_in_tables(scope, value, Some(placeholder));
                        changed = true;
                        Some(placeholder)
                    }
                    other => other,
                };
                values.push(wrapped);
            }
            if changed {
                self.graph.set_input_list(state, slot::VALUES, Some(values));
            }
        }

        self.graph.replace_at_usages(loop_begin, Some(merge));
        self.graph.safe_delete(loop_begin);
        self.graph.set_state_after(merge, Some(state));
        self.graph.set_next(merge, successor);
        for end in predecessors {
            self.graph.add_forward_end(merge, end);
        }

        if merge_loops {
            self.scopes.iterations_mut(group).states.insert(key, merge);
            self.distinct_loop_states += 1;
            debug!(
                depth,
                distinct = self.distinct_loop_states,
                "new exploded loop state"
            );
        }
        Ok(())
    }

    /// Replace an exploded loop exit by a begin continuing in `outer`, and
    /// its proxies by the values they carry (phis where iterations leaving
    /// at this exit disagree).
    pub(super) fn handle_loop_explosion_proxy_nodes(
        &mut self,
        method: MethodScopeId,
        scope: LoopScopeId,
        outer: LoopScopeId,
        loop_exit: NodeId,
        loop_exit_order_id: u32,
        successor: Option<NodeId>,
    ) -> Result<(), CodecError> {
        let state_order_id = self.read_order_id(method)?;
        let merge_loops = self.scopes.method(method).loop_explosion.merge_loops();
        let depth = self.scopes.loop_scope(scope).depth;

        let mut begin = self.graph.add_kind(NodeKind::Begin);
        self.graph.replace_at_predecessor(loop_exit, Some(begin));

        // Top-level exits of a merge-exploded loop pass through a merge of
        // their own, where the loop detector later places the loop exit.
        let placeholder_merge = if merge_loops && depth == 1 {
            let merge = self.graph.add_kind(NodeKind::Merge);
            self.scopes
                .method_mut(method)
                .loop_explosion_merges
                .insert(merge);
            let end = self.graph.add_kind(NodeKind::End);
            self.graph.set_next(begin, Some(end));
            self.graph.add_forward_end(merge, end);
            begin = self.graph.add_kind(NodeKind::Begin);
            self.graph.set_next(merge, Some(begin));
            Some(merge)
        } else {
            None
        };

        let merge = match self.lookup_node(outer, loop_exit_order_id) {
            None => {
                self.register(outer, loop_exit_order_id, Some(begin));
                self.graph.set_next(begin, successor);
                None
            }
            Some(first_exit) if self.graph.class(first_exit) == NodeClass::Begin => {
                // Second iteration leaving through this exit.
                let merge = self.graph.add_kind(NodeKind::Merge);
                self.register(outer, loop_exit_order_id, Some(merge));
                let exit_successor = self.graph.next(first_exit);
                let first_end = self.graph.add_kind(NodeKind::End);
                self.graph.set_next(first_exit, Some(first_end));
                self.graph.add_forward_end(merge, first_end);
                self.graph.set_next(merge, exit_successor);
                Some(merge)
            }
            Some(merge) => Some(merge),
        };
        if let Some(merge) = merge {
            let end = self.graph.add_kind(NodeKind::End);
            self.graph.set_next(begin, Some(end));
            self.graph.add_forward_end(merge, end);
        }

        let count = self.reader(method).get_uv_usize()?;
        let mut phi_created = false;
        for _ in 0..count {
            let proxy_order_id = self.read_order_id(method)?;
            let proxy = self
                .ensure_node_created(method, scope, proxy_order_id)?
                .ok_or_else(|| CodecError::internal("loop exit lists a null proxy"))?;
            let mut phi_input = self.graph.input(proxy, slot::VALUE);

            if let Some(placeholder_merge) = placeholder_merge {
                if let Some(value) = phi_input.filter(|&v| !self.graph.is_constant(v)) {
                    let placeholder = self.graph.unique(
                        Node::new(NodeKind::ProxyPlaceholder)
                            .with_input(slot::VALUE, value)
                            .with_input(slot::PROXY_POINT, placeholder_merge),
                    );
                    phi_input = Some(placeholder);
                }
                // The placeholder merge's state reads the proxy's value.
                self.register(scope, proxy_order_id, phi_input);
            }

            let replacement = match self.lookup_node(outer, proxy_order_id) {
                None => {
                    self.register(outer, proxy_order_id, phi_input);
                    phi_input
                }
                Some(existing) if Some(existing) == phi_input => phi_input,
                Some(existing) => {
                    let merge = merge.ok_or_else(|| {
                        CodecError::internal(format!(
                            "proxy order id {proxy_order_id} differs at an unmerged exit"
                        ))
                    })?;
                    if self.graph.is_phi_at_merge(existing, merge) {
                        self.graph.push_input(existing, slot::VALUES, phi_input);
                        Some(existing)
                    } else {
                        let predecessors = self.graph.phi_predecessor_count(merge);
                        let mut values: EdgeList = EdgeList::with_capacity(predecessors);
                        values.extend(std::iter::repeat(Some(existing)).take(predecessors.saturating_sub(1)));
                        values.push(phi_input);
                        let mut phi = Node::new(NodeKind::Phi).with_input(slot::PHI_MERGE, merge);
                        phi.set_input_list(slot::VALUES, Some(values));
                        let phi = self.graph.add(phi);
                        self.register(outer, proxy_order_id, Some(phi));
                        phi_created = true;
                        Some(phi)
                    }
                }
            };
            self.graph.replace_at_usages(proxy, replacement);
            self.graph.safe_delete(proxy);
        }

        if let Some(placeholder_merge) = placeholder_merge {
            self.register(scope, state_order_id, None);
            let state = self.ensure_node_created(method, scope, state_order_id)?;
            self.graph.set_state_after(placeholder_merge, state);
        }

        if let Some(merge) = merge {
            let old_state = self.graph.state_after(merge);
            if old_state.is_none() || phi_created {
                self.register(outer, state_order_id, None);
                let state = self.ensure_node_created(method, outer, state_order_id)?;
                self.graph.set_state_after(merge, state);
                if let Some(old) = old_state.filter(|&old| !self.graph.has_usages(old)) {
                    self.graph.safe_delete(old);
                }
            }
        }

        self.graph.safe_delete(loop_exit);
        Ok(())
    }
}
