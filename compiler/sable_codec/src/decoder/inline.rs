//! Inlining during decoding.
//!
//! When the plugin answers an invoke with [`InvokeAction::Inline`], the
//! callee is decoded into the caller's graph right where the invoke sits:
//! its first node hangs off the invoke's predecessor and its parameters
//! resolve to the call's arguments. Once the callee is fully decoded its
//! returns continue at the invoke's `next`, and its unwinds at the
//! exception edge (or a deoptimization without one).

use sable_ir::{slot, DeoptReason, EdgeList, Node, NodeClass, NodeId, NodeKind};
use tracing::debug;

use super::scope::{CallerContext, InvokeData, LoopScopeId, MethodScopeId};
use super::{DecoderPlugin, GraphDecoder, InvokeAction, InvokeSite};
use crate::{CodecError, EncodedGraph, LoopExplosionKind};

impl<P: DecoderPlugin> GraphDecoder<'_, P> {
    pub(super) fn handle_invoke(
        &mut self,
        method: MethodScopeId,
        scope: LoopScopeId,
        data: InvokeData,
    ) -> Result<LoopScopeId, CodecError> {
        let call_target = self
            .ensure_node_created(method, scope, data.call_target_order_id)?
            .ok_or_else(|| CodecError::internal(format!("{:?} has no call target", data.invoke)))?;
        let site = InvokeSite {
            invoke: data.invoke,
            call_target,
            context_type: data.context_type.clone(),
            inlining_depth: self.scopes.method(method).inlining_depth,
        };
        match self.plugin.handle_invoke(self.graph, &site)? {
            InvokeAction::Continue => {
                self.append_invoke(method, scope, &data, call_target)?;
                Ok(scope)
            }
            InvokeAction::Inline {
                callee,
                loop_explosion,
            } => self.start_inlining(method, scope, data, call_target, callee, loop_explosion),
        }
    }

    /// Keep the invoke as a call: connect its call target, state and
    /// successors.
    fn append_invoke(
        &mut self,
        method: MethodScopeId,
        scope: LoopScopeId,
        data: &InvokeData,
        call_target: NodeId,
    ) -> Result<(), CodecError> {
        let invoke = data.invoke;
        self.graph
            .set_input(invoke, slot::CALL_TARGET, Some(call_target));
        if self.graph.state_after(invoke).is_none() {
            let state = self.ensure_node_created(method, scope, data.state_after_order_id)?;
            self.graph.set_state_after(invoke, state);
        }
        let next = self.make_stub(method, scope, data.next_order_id)?;
        self.graph.set_next(invoke, next);
        if let Some(exception_order_id) = data.exception_order_id {
            let exception = self.make_stub(method, scope, exception_order_id)?;
            self.graph
                .set_successor(invoke, slot::EXCEPTION_EDGE, exception);
        }
        Ok(())
    }

    fn start_inlining(
        &mut self,
        method: MethodScopeId,
        scope: LoopScopeId,
        data: InvokeData,
        call_target: NodeId,
        callee: EncodedGraph,
        loop_explosion: LoopExplosionKind,
    ) -> Result<LoopScopeId, CodecError> {
        let invoke = data.invoke;
        let predecessor = self
            .graph
            .predecessor(invoke)
            .ok_or_else(|| CodecError::internal(format!("{invoke:?} has no predecessor")))?;
        let anchor = if self.graph.class(predecessor).has_next()
            && self.graph.next(predecessor) == Some(invoke)
        {
            self.graph.replace_at_predecessor(invoke, None);
            predecessor
        } else {
            let begin = self.graph.add_kind(NodeKind::Begin);
            self.graph.replace_at_predecessor(invoke, Some(begin));
            begin
        };

        let inlining_depth = self.scopes.method(method).inlining_depth + 1;
        let caller = CallerContext {
            loop_scope: scope,
            invoke: data,
        };
        let callee_method =
            self.new_method_scope(callee, loop_explosion, Some(caller), inlining_depth)?;
        let callee_scope = self.create_initial_loop_scope(callee_method, Some(anchor))?;

        // Parameters are numbered as one block right after the fixed nodes.
        let header = &self.scopes.method(callee_method).header;
        let (first_parameter, node_count) = (header.max_fixed_node_order_id + 1, header.node_count);
        let arguments = self
            .graph
            .input_list(call_target, slot::ARGUMENTS)
            .cloned()
            .unwrap_or_default();
        for (index, argument) in arguments.iter().enumerate() {
            let order_id = u32::try_from(index)
                .ok()
                .and_then(|index| first_parameter.checked_add(index))
                .filter(|&order_id| order_id < node_count);
            let Some(order_id) = order_id else {
                break;
            };
            // Holes in the parameter block belong to unused parameters.
            if self.peek_class(callee_method, order_id)? == NodeClass::Parameter {
                self.register(callee_scope, order_id, *argument);
            }
        }
        debug!(
            ?invoke,
            inlining_depth,
            arguments = arguments.len(),
            "inlining callee"
        );
        Ok(callee_scope)
    }

    /// Connect the returns and unwinds of a fully decoded callee to the
    /// caller and retire the invoke.
    pub(super) fn finish_inlining(
        &mut self,
        callee: MethodScopeId,
        caller: &CallerContext,
    ) -> Result<(), CodecError> {
        let scope = caller.loop_scope;
        let method = self.scopes.method_of(scope);
        let data = &caller.invoke;
        let invoke = data.invoke;

        let (returns, unwinds): (Vec<NodeId>, Vec<NodeId>) = self
            .scopes
            .method(callee)
            .return_and_unwind_nodes
            .iter()
            .copied()
            .filter(|&node| self.graph.is_alive(node))
            .partition(|&node| self.graph.class(node) == NodeClass::Return);

        if !unwinds.is_empty() {
            let handler = match data.exception_order_id {
                Some(exception_order_id) => self
                    .make_stub(method, scope, exception_order_id)?
                    .ok_or_else(|| CodecError::internal("null exception edge"))?,
                None => self
                    .graph
                    .add_kind(NodeKind::Deoptimize(DeoptReason::TransferToInterpreter)),
            };
            if let [unwind] = unwinds.as_slice() {
                self.graph.replace_and_delete(*unwind, handler);
            } else {
                let merge = self.graph.add_kind(NodeKind::Merge);
                for &unwind in &unwinds {
                    let end = self.graph.add_kind(NodeKind::End);
                    self.graph.replace_and_delete(unwind, end);
                    self.graph.add_forward_end(merge, end);
                }
                self.graph.set_next(merge, Some(handler));
            }
        }

        let value = match returns.as_slice() {
            [] => None,
            [ret] => {
                let value = self.graph.input(*ret, slot::VALUE);
                match self.make_stub(method, scope, data.next_order_id)? {
                    Some(next) => self.graph.replace_and_delete(*ret, next),
                    None => {
                        self.graph.replace_at_predecessor(*ret, None);
                        self.graph.safe_delete(*ret);
                    }
                }
                value
            }
            returns => {
                let merge = self.graph.add_kind(NodeKind::Merge);
                let state = self.ensure_node_created(method, scope, data.state_after_order_id)?;
                self.graph.set_state_after(merge, state);

                let mut values = EdgeList::with_capacity(returns.len());
                for &ret in returns {
                    values.push(self.graph.input(ret, slot::VALUE));
                    let end = self.graph.add_kind(NodeKind::End);
                    self.graph.replace_and_delete(ret, end);
                    self.graph.add_forward_end(merge, end);
                }
                let value = if values.iter().any(Option::is_some) {
                    let mut phi = Node::new(NodeKind::Phi).with_input(slot::PHI_MERGE, merge);
                    phi.set_input_list(slot::VALUES, Some(values));
                    Some(self.graph.add(phi))
                } else {
                    None
                };
                let next = self.make_stub(method, scope, data.next_order_id)?;
                self.graph.set_next(merge, next);
                value
            }
        };

        self.graph.replace_at_usages(invoke, value);
        self.register(scope, data.order_id, value);
        self.graph.safe_delete(invoke);
        for leftover in [data.call_target_order_id, data.state_after_order_id] {
            if let Some(node) = self.lookup_node(scope, leftover) {
                if self.graph.is_alive(node) && !self.graph.has_usages(node) {
                    self.graph.safe_delete(node);
                }
            }
        }
        debug!(
            ?invoke,
            returns = returns.len(),
            unwinds = unwinds.len(),
            "finished inlining"
        );
        Ok(())
    }
}
