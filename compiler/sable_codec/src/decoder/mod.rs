//! Graph decoder.
//!
//! Rebuilds a [`Graph`] from an [`EncodedGraph`], optionally exploding
//! loops and inlining callees on the way.
//!
//! # Processing model
//!
//! Fixed nodes are decoded in order-id order from a per-loop-scope
//! worklist. Reaching a fixed node for the first time creates an empty
//! *stub* of the right class and queues its order id; popping the id reads
//! the node's record and fills the stub in. Floating nodes are decoded on
//! demand ([`GraphDecoder::ensure_node_created`]) when some edge needs
//! them.
//!
//! Each loop scope owns the table mapping order ids to decoded nodes for
//! one loop nesting level (or one exploded iteration). Without loop
//! explosion all scopes of a method share one table. With explosion every
//! iteration gets its own table seeded from the state before the loop, so
//! the same order id decodes to a fresh node per iteration.
//!
//! # Hooks
//!
//! A [`DecoderPlugin`] observes floating-node insertion, fixed nodes,
//! merges and invokes, and bounds loop explosion.

mod explosion;
mod inline;
mod plugin;
mod scope;

use rustc_hash::{FxHashMap, FxHashSet};
use sable_ir::{
    slot, BitSet, EdgeList, FieldKind, FieldValue, Graph, Node, NodeClass, NodeId, NodeKind,
    Object,
};
use sable_stack::ensure_sufficient_stack;
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::encoded::{EncodedGraph, NodeReference};
use crate::layout::{
    encodes_direct_input, encodes_input_lists, encodes_successors, OrderIdWidth,
    BEGIN_NEXT_ORDER_ID_OFFSET, FIRST_NODE_ORDER_ID, NULL_ORDER_ID, START_ORDER_ID,
};
use crate::loop_detector::LoopDetector;
use crate::stream::TypeReader;
use crate::{CodecError, DecoderOptions, LoopExplosionKind};

use self::scope::{
    CallerContext, InvokeData, LoopScope, LoopScopeId, MethodScope, MethodScopeId, ScopeArena,
};

pub use self::plugin::{
    BoundedExplosion, DecoderPlugin, ExplosionIteration, FloatingAction, InvokeAction, InvokeSite,
    NoopPlugin, DEFAULT_MAX_LOOP_EXPLOSION_COUNT,
};
pub use self::scope::LoopScopeTrigger;

/// Summary of one decode call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DecodeOutcome {
    /// `Return` and `Unwind` nodes of the decoded root method that survived.
    pub return_and_unwind_nodes: Vec<NodeId>,
    /// Distinct frame states exploded loop iterations were merged into.
    pub distinct_loop_states: usize,
}

/// Decodes encoded graphs into one target graph.
pub struct GraphDecoder<'g, P> {
    graph: &'g mut Graph,
    plugin: P,
    options: DecoderOptions,
    scopes: ScopeArena,
    /// Released floating nodes, reused by class.
    pool: FxHashMap<NodeClass, Vec<Node>>,
    distinct_loop_states: usize,
}

impl<'g, P: DecoderPlugin> GraphDecoder<'g, P> {
    pub fn new(graph: &'g mut Graph, plugin: P) -> Self {
        GraphDecoder::with_options(graph, plugin, DecoderOptions::default())
    }

    pub fn with_options(graph: &'g mut Graph, plugin: P, options: DecoderOptions) -> Self {
        GraphDecoder {
            graph,
            plugin,
            options,
            scopes: ScopeArena::default(),
            pool: FxHashMap::default(),
            distinct_loop_states: 0,
        }
    }

    pub fn plugin(&self) -> &P {
        &self.plugin
    }

    pub fn plugin_mut(&mut self) -> &mut P {
        &mut self.plugin
    }

    pub fn into_plugin(self) -> P {
        self.plugin
    }

    /// Decode `encoded` into the target graph without loop explosion.
    pub fn decode(&mut self, encoded: &EncodedGraph) -> Result<DecodeOutcome, CodecError> {
        self.decode_with_references(encoded, LoopExplosionKind::NONE, &mut [])
    }

    /// Decode `encoded`, exploding its loops as `loop_explosion` says.
    pub fn decode_exploded(
        &mut self,
        encoded: &EncodedGraph,
        loop_explosion: LoopExplosionKind,
    ) -> Result<DecodeOutcome, CodecError> {
        self.decode_with_references(encoded, loop_explosion, &mut [])
    }

    /// Decode `encoded` and resolve every reference recorded while encoding
    /// it to the node decoded for it.
    pub fn decode_with_references(
        &mut self,
        encoded: &EncodedGraph,
        loop_explosion: LoopExplosionKind,
        references: &mut [NodeReference],
    ) -> Result<DecodeOutcome, CodecError> {
        self.scopes.clear();
        self.distinct_loop_states = 0;

        let method = self.new_method_scope(encoded.clone(), loop_explosion, None, 0)?;
        let guards_stage = self.scopes.method(method).header.guards_stage;
        self.graph.set_guards_stage(guards_stage);
        let root = self.create_initial_loop_scope(method, None)?;
        self.run(root)?;

        for reference in references.iter_mut() {
            self.resolve_reference(method, root, reference)?;
        }
        self.cleanup()?;
        debug!(
            tables = self.scopes.table_count(),
            distinct_loop_states = self.distinct_loop_states,
            "decoded graph"
        );

        let return_and_unwind_nodes = self
            .scopes
            .method(method)
            .return_and_unwind_nodes
            .iter()
            .copied()
            .filter(|&node| self.graph.is_alive(node))
            .collect();
        Ok(DecodeOutcome {
            return_and_unwind_nodes,
            distinct_loop_states: self.distinct_loop_states,
        })
    }

    // ── Scopes ──────────────────────────────────────────────────────

    fn new_method_scope(
        &mut self,
        encoded: EncodedGraph,
        loop_explosion: LoopExplosionKind,
        caller: Option<CallerContext>,
        inlining_depth: u32,
    ) -> Result<MethodScopeId, CodecError> {
        let header = encoded.read_header()?;
        let width = OrderIdWidth::for_node_count(header.node_count);
        let reader = TypeReader::new(encoded.encoding().bytes().clone(), 0);
        debug!(
            node_count = header.node_count,
            max_fixed = header.max_fixed_node_order_id,
            ?loop_explosion,
            inlining_depth,
            "decoding method"
        );
        Ok(self.scopes.add_method(MethodScope {
            encoded,
            reader,
            header,
            width,
            loop_explosion,
            method_start_mark: self.graph.mark(),
            return_and_unwind_nodes: Vec::new(),
            loop_explosion_merges: FxHashSet::default(),
            loop_explosion_head: None,
            caller,
            inlining_depth,
        }))
    }

    /// Method-level loop scope. Without an anchor decoding starts at the
    /// graph's start node; with one, the method's first node is attached
    /// after the anchor.
    fn create_initial_loop_scope(
        &mut self,
        method: MethodScopeId,
        anchor: Option<NodeId>,
    ) -> Result<LoopScopeId, CodecError> {
        let len = self.node_count(method);
        let created = self.scopes.new_table(len);
        let iterations = self.scopes.add_iterations();
        let scope = self.scopes.add_loop_scope(LoopScope {
            method,
            outer: None,
            depth: 0,
            iteration: 0,
            trigger: LoopScopeTrigger::Start,
            loop_begin_order_id: None,
            nodes_to_process: BitSet::with_capacity(len),
            created,
            initial: None,
            written: None,
            iterations,
        });

        match anchor {
            None => {
                let start = self.graph.start();
                self.register(scope, START_ORDER_ID, Some(start));
                self.mark_pending(scope, START_ORDER_ID);
            }
            Some(anchor) => {
                let begin = self.graph.prev_begin(anchor);
                self.register(scope, START_ORDER_ID, begin);
                let first = if (FIRST_NODE_ORDER_ID as usize) < len {
                    self.make_stub(method, scope, FIRST_NODE_ORDER_ID)?
                } else {
                    None
                };
                self.graph.set_next(anchor, first);
            }
        }
        Ok(scope)
    }

    /// Scope for a loop begin reached for the first time.
    fn enter_loop(
        &mut self,
        method: MethodScopeId,
        scope: LoopScopeId,
        loop_begin_order_id: u32,
    ) -> LoopScopeId {
        let explosion = self.scopes.method(method).loop_explosion;
        let len = self.node_count(method);
        let (initial, created) = if explosion.use_explosion() {
            (
                Some(self.scopes.snapshot(scope)),
                self.scopes.new_table(len),
            )
        } else {
            (None, self.scopes.materialize(scope))
        };
        let iterations = self.scopes.add_iterations();
        let depth = self.scopes.loop_scope(scope).depth + 1;
        let child = self.scopes.add_loop_scope(LoopScope {
            method,
            outer: Some(scope),
            depth,
            iteration: 0,
            trigger: LoopScopeTrigger::Start,
            loop_begin_order_id: Some(loop_begin_order_id),
            nodes_to_process: BitSet::with_capacity(len),
            created,
            initial,
            written: initial.map(|_| BitSet::with_capacity(len)),
            iterations,
        });
        if explosion.use_explosion() {
            self.register(scope, loop_begin_order_id, None);
        }
        self.scopes
            .loop_scope_mut(scope)
            .nodes_to_process
            .remove(loop_begin_order_id as usize);
        self.mark_pending(child, loop_begin_order_id);
        trace!(depth, loop_begin_order_id, "entered loop");
        child
    }

    fn node_count(&self, method: MethodScopeId) -> usize {
        self.scopes.method(method).header.node_count as usize
    }

    // ── Main loop ───────────────────────────────────────────────────

    fn run(&mut self, initial: LoopScopeId) -> Result<(), CodecError> {
        let mut resume = Some(initial);
        while let Some(start) = resume {
            let mut method = self.scopes.method_of(start);
            let mut current = Some(start);
            while let Some(mut scope) = current {
                while let Some(order_id) = self.scopes.loop_scope_mut(scope).nodes_to_process.pop_first() {
                    #[expect(
                        clippy::cast_possible_truncation,
                        reason = "pending ids are u32 order ids"
                    )]
                    let order_id = order_id as u32;
                    scope = self.process_next_node(scope, order_id)?;
                    method = self.scopes.method_of(scope);
                }
                current = match self.scopes.next_iteration(scope) {
                    Some(next) => Some(next),
                    None => {
                        self.scopes.propagate_created_nodes(scope);
                        self.scopes.loop_scope(scope).outer
                    }
                };
                self.scopes.release_loop_scope(scope);
            }

            self.finish_method_loops(method)?;
            resume = match self.scopes.method(method).caller.clone() {
                Some(caller) => {
                    self.finish_inlining(method, &caller)?;
                    Some(caller.loop_scope)
                }
                None => None,
            };
        }
        Ok(())
    }

    /// Turn the merges of a merge-exploded method back into loops.
    fn finish_method_loops(&mut self, method: MethodScopeId) -> Result<(), CodecError> {
        let scope = self.scopes.method_mut(method);
        if !scope.loop_explosion.merge_loops() {
            return Ok(());
        }
        let Some(head) = scope.loop_explosion_head else {
            return Ok(());
        };
        let merges = std::mem::take(&mut scope.loop_explosion_merges);
        let mark = scope.method_start_mark;
        LoopDetector::new(self.graph, &merges, head, mark).run()
    }

    fn process_next_node(
        &mut self,
        scope: LoopScopeId,
        order_id: u32,
    ) -> Result<LoopScopeId, CodecError> {
        let method = self.scopes.method_of(scope);
        let node = self.lookup_node(scope, order_id).ok_or_else(|| {
            CodecError::internal(format!("pending order id {order_id} has no stub"))
        })?;
        if !self.graph.is_alive(node) {
            return Ok(scope);
        }
        let explosion = self.scopes.method(method).loop_explosion;
        let class = self.graph.class(node);
        trace!(order_id, ?node, ?class, "decoding fixed node");

        let collapses = class == NodeClass::Merge
            || (class == NodeClass::LoopBegin
                && explosion.unroll_loops()
                && !explosion.merge_loops());
        if collapses && self.graph.forward_end_count(node) == 1 {
            self.collapse_single_end_merge(method, scope, order_id, node)?;
            return Ok(scope);
        }

        let mut successor_scope = scope;
        let mut update_predecessors = true;
        if class == NodeClass::LoopExit {
            let depth = self.scopes.loop_scope(scope).depth;
            successor_scope = if explosion.duplicate_loop_exits()
                || (explosion.merge_loops() && depth > 1)
            {
                self.fork_exit_duplication_scope(method, scope)?
            } else {
                self.scopes.loop_scope(scope).outer.ok_or_else(|| {
                    CodecError::internal(format!("loop exit {node:?} outside of any loop"))
                })?
            };
            update_predecessors = explosion.is_no_explosion();
        }

        self.seek_node(method, order_id)?;
        let encoded_class = self.read_class(method)?;
        if encoded_class != class {
            return Err(CodecError::internal(format!(
                "order id {order_id}: stub is {class:?} but the record is {encoded_class:?}"
            )));
        }
        self.make_fixed_node_inputs(method, scope, node, class)?;
        let kind = self.read_fields(method, class)?;
        self.graph.set_kind(node, kind);
        let detached_next =
            self.make_successor_stubs(method, successor_scope, node, class, update_predecessors)?;

        let result = match class {
            NodeClass::LoopBegin => {
                if explosion.use_explosion() {
                    self.handle_loop_explosion_begin(method, scope, node)?;
                }
                scope
            }
            NodeClass::LoopExit => {
                if explosion.use_explosion() {
                    self.handle_loop_explosion_proxy_nodes(
                        method,
                        scope,
                        successor_scope,
                        node,
                        order_id,
                        detached_next,
                    )?;
                } else {
                    self.handle_proxy_nodes(method, scope, node)?;
                }
                scope
            }
            NodeClass::Merge => {
                self.plugin.handle_merge(self.graph, node);
                scope
            }
            NodeClass::End | NodeClass::LoopEnd => self.handle_end(method, scope, node)?,
            NodeClass::Invoke | NodeClass::InvokeWithException => {
                let data = self.read_invoke_data(method, order_id, node, class)?;
                self.handle_invoke(method, scope, data)?
            }
            NodeClass::Return | NodeClass::Unwind => {
                self.scopes
                    .method_mut(method)
                    .return_and_unwind_nodes
                    .push(node);
                scope
            }
            _ => {
                if let Some(replacement) = self.plugin.handle_fixed_node(self.graph, node)? {
                    self.replace_fixed_node(scope, order_id, node, replacement)?;
                }
                scope
            }
        };
        Ok(result)
    }

    /// Put `replacement` in the place of the just decoded fixed `node`.
    fn replace_fixed_node(
        &mut self,
        scope: LoopScopeId,
        order_id: u32,
        node: NodeId,
        replacement: NodeId,
    ) -> Result<(), CodecError> {
        if replacement == node {
            return Ok(());
        }
        if !self.graph.is_alive(replacement) || !self.graph.class(replacement).is_fixed() {
            return Err(CodecError::internal(format!(
                "{node:?} replaced by {replacement:?}, which is not a live fixed node"
            )));
        }
        let next = self.graph.next(node);
        let successors: SmallVec<[NodeId; 4]> = self.graph.node(node).successors().iter().collect();
        for &successor in &successors {
            self.graph.replace_at_predecessor(successor, None);
        }

        let kept = if successors.contains(&replacement) {
            Some(replacement)
        } else if self.graph.class(replacement).has_next() && self.graph.next(replacement).is_none()
        {
            self.graph.set_next(replacement, next);
            next
        } else {
            None
        };
        for successor in successors {
            if Some(successor) != kept {
                self.graph.safe_delete(successor);
            }
        }

        self.graph.replace_and_delete(node, replacement);
        self.register(scope, order_id, Some(replacement));
        trace!(?node, ?replacement, "replaced fixed node");
        Ok(())
    }

    /// A merge with one forward end is not a merge: splice the end's block
    /// straight into the merge's successor.
    fn collapse_single_end_merge(
        &mut self,
        method: MethodScopeId,
        scope: LoopScopeId,
        order_id: u32,
        merge: NodeId,
    ) -> Result<(), CodecError> {
        let end = self
            .graph
            .forward_end_at(merge, 0)
            .ok_or_else(|| CodecError::internal(format!("{merge:?} lost its forward end")))?;
        for phi in self.graph.phis(merge) {
            let value = self.graph.phi_value_at(phi, end);
            self.graph.replace_at_usages(phi, value);
            self.scopes.replace_in_tables(scope, phi, value);
            self.graph.safe_delete(phi);
        }

        // Users of the merge as a block anchor use the end's block instead.
        let begin = self.graph.prev_begin(end);
        self.register(scope, order_id, begin);

        let next = self.make_stub(method, scope, order_id + BEGIN_NEXT_ORDER_ID_OFFSET)?;
        self.graph.replace_at_predecessor(end, next);
        self.graph.safe_delete(merge);
        self.graph.safe_delete(end);
        trace!(?merge, "collapsed single-end merge");
        Ok(())
    }

    // ── Ends and phis ───────────────────────────────────────────────

    fn handle_end(
        &mut self,
        method: MethodScopeId,
        scope: LoopScopeId,
        node: NodeId,
    ) -> Result<LoopScopeId, CodecError> {
        let explosion = self.scopes.method(method).loop_explosion;
        let merge_order_id = self.read_order_id(method)?;
        let is_loop_end = self.graph.class(node) == NodeClass::LoopEnd;
        let trigger = self.scopes.loop_scope(scope).trigger;

        let mut end = node;
        let mut phi_input_scope = scope;
        let mut phi_node_scope = scope;
        let mut result_scope = scope;

        // A loop end reached from an exit-duplicated scope belongs to the
        // enclosing loop, whose next iteration must merge all such ends.
        let requires_merge_of_outer_loop = explosion.unroll_loops()
            && explosion.duplicate_loop_exits()
            && !explosion.duplicate_loop_ends()
            && !explosion.merge_loops()
            && is_loop_end
            && trigger == LoopScopeTrigger::LoopExitDuplication;

        if requires_merge_of_outer_loop {
            end = self.replace_with_forward_end(node);
            phi_node_scope = self.outer_loop_merge_scope(method, scope)?;
        } else if explosion.use_explosion() && is_loop_end {
            end = self.replace_with_forward_end(node);
            phi_node_scope = self.handle_loop_explosion_end(method, scope)?;
        }

        let merge = if let Some(merge) = self.lookup_node(phi_node_scope, merge_order_id) {
            merge
        } else {
            let merge = self
                .make_stub(method, phi_node_scope, merge_order_id)?
                .ok_or_else(|| CodecError::internal(format!("{node:?} ends at no merge")))?;
            if self.graph.class(merge) == NodeClass::LoopBegin {
                let child = self.enter_loop(method, scope, merge_order_id);
                phi_input_scope = child;
                phi_node_scope = child;
                result_scope = child;
            }
            merge
        };
        if !self.graph.class(merge).is_merge() {
            return Err(CodecError::internal(format!(
                "{node:?} ends at {merge:?}, which is a {:?}",
                self.graph.class(merge)
            )));
        }

        self.handle_phi_functions(method, phi_input_scope, phi_node_scope, end, merge)?;
        Ok(result_scope)
    }

    /// Swap a loop end for a plain end at the same position.
    fn replace_with_forward_end(&mut self, loop_end: NodeId) -> NodeId {
        let end = self.graph.add_kind(NodeKind::End);
        self.graph.replace_at_predecessor(loop_end, Some(end));
        self.graph.safe_delete(loop_end);
        end
    }

    fn handle_phi_functions(
        &mut self,
        method: MethodScopeId,
        input_scope: LoopScopeId,
        node_scope: LoopScopeId,
        end: NodeId,
        merge: NodeId,
    ) -> Result<(), CodecError> {
        if self.graph.class(end) == NodeClass::LoopEnd {
            // Ends may arrive in a different order than they were encoded.
            let earlier = self
                .graph
                .loop_ends(merge)
                .iter()
                .filter(|&&other| other != end)
                .count();
            let end_index = u32::try_from(earlier)
                .map_err(|_| CodecError::internal("too many loop ends"))?;
            self.graph.set_kind(end, NodeKind::LoopEnd { end_index });
        } else {
            self.graph.add_forward_end(merge, end);
        }

        let lazy = if self.graph.class(merge) == NodeClass::LoopBegin {
            self.scopes.method(method).loop_explosion.use_explosion()
        } else {
            self.options.lazy_phis
        };

        let count = self.reader(method).get_uv_usize()?;
        let mut pairs: SmallVec<[(u32, u32); 8]> = SmallVec::with_capacity(count);
        for _ in 0..count {
            let value = self.read_order_id(method)?;
            let phi = self.read_order_id(method)?;
            pairs.push((value, phi));
        }
        let mut values: SmallVec<[Option<NodeId>; 8]> = SmallVec::with_capacity(count);
        for &(value, _) in &pairs {
            values.push(self.ensure_node_created(method, input_scope, value)?);
        }
        for (&(_, phi), value) in pairs.iter().zip(values) {
            self.handle_phi(method, node_scope, phi, value, merge, lazy)?;
        }
        Ok(())
    }

    fn handle_phi(
        &mut self,
        method: MethodScopeId,
        scope: LoopScopeId,
        phi_order_id: u32,
        value: Option<NodeId>,
        merge: NodeId,
        lazy: bool,
    ) -> Result<(), CodecError> {
        let predecessors = self.graph.phi_predecessor_count(merge);
        // With one predecessor, anything registered belongs to an earlier
        // exploded iteration that reached the same merge.
        let existing = self
            .lookup_node(scope, phi_order_id)
            .filter(|_| predecessors != 1);

        if lazy && (existing.is_none() || existing == value) {
            self.register(scope, phi_order_id, value);
        } else if let Some(phi) = existing.filter(|&e| self.graph.is_phi_at_merge(e, merge)) {
            self.graph.push_input(phi, slot::VALUES, value);
        } else {
            self.register(scope, phi_order_id, None);
            let phi = self
                .ensure_node_created(method, scope, phi_order_id)?
                .ok_or_else(|| CodecError::internal("phi order id decoded to nothing"))?;
            if self.graph.class(phi) != NodeClass::Phi {
                return Err(CodecError::internal(format!(
                    "order id {phi_order_id} is not a phi"
                )));
            }
            self.graph.set_input(phi, slot::PHI_MERGE, Some(merge));
            for _ in 1..predecessors {
                self.graph.push_input(phi, slot::VALUES, existing);
            }
            self.graph.push_input(phi, slot::VALUES, value);
        }
        Ok(())
    }

    fn handle_proxy_nodes(
        &mut self,
        method: MethodScopeId,
        scope: LoopScopeId,
        loop_exit: NodeId,
    ) -> Result<(), CodecError> {
        let state_order_id = self.read_order_id(method)?;
        let state = self.ensure_node_created(method, scope, state_order_id)?;
        self.graph.set_state_after(loop_exit, state);

        let outer = self.scopes.loop_scope(scope).outer;
        let shares_table = outer.is_some_and(|outer| {
            self.scopes.loop_scope(outer).created == self.scopes.loop_scope(scope).created
        });
        let count = self.reader(method).get_uv_usize()?;
        for _ in 0..count {
            let proxy_order_id = self.read_order_id(method)?;
            let proxy = self.ensure_node_created(method, scope, proxy_order_id)?;
            // Proxies carry values out of the loop: the outer scope sees them.
            if let (Some(outer), false) = (outer, shares_table) {
                self.register(outer, proxy_order_id, proxy);
            }
        }
        Ok(())
    }

    // ── Node creation ───────────────────────────────────────────────

    /// The node registered for `order_id`, decoding a floating node first
    /// if needed. `None` only for the null order id.
    fn ensure_node_created(
        &mut self,
        method: MethodScopeId,
        scope: LoopScopeId,
        order_id: u32,
    ) -> Result<Option<NodeId>, CodecError> {
        if order_id == NULL_ORDER_ID {
            return Ok(None);
        }
        if let Some(node) = self.lookup_node(scope, order_id) {
            return Ok(Some(node));
        }

        let node = ensure_sufficient_stack(|| self.decode_floating_node(method, scope, order_id))?;
        let id = match node.class() {
            NodeClass::Phi | NodeClass::ValueProxy => self.graph.add(node),
            _ => {
                let id = match self.plugin.before_floating_add(self.graph, &node) {
                    FloatingAction::Add => self.add_floating_node(node),
                    FloatingAction::Replace(replacement) => {
                        self.release_floating_node(node);
                        self.add_floating_node(replacement)
                    }
                    FloatingAction::Existing(existing) => {
                        self.release_floating_node(node);
                        existing
                    }
                };
                self.plugin.after_floating_add(self.graph, id)
            }
        };
        self.register(scope, order_id, Some(id));
        Ok(Some(id))
    }

    /// Read a floating node's record and build it detached, decoding its
    /// inputs first.
    fn decode_floating_node(
        &mut self,
        method: MethodScopeId,
        scope: LoopScopeId,
        order_id: u32,
    ) -> Result<Node, CodecError> {
        let saved = self.reader(method).byte_index();
        self.seek_node(method, order_id)?;
        let class = self.read_class(method)?;
        if class.is_fixed() {
            return Err(CodecError::internal(format!(
                "order id {order_id} is a fixed {class:?} that was never stubbed"
            )));
        }

        let mut node = self.allocate_floating_node(class);
        let shape = class.inputs();
        for input_slot in 0..shape.direct {
            if encodes_direct_input(class, input_slot) {
                let input = self.read_order_id(method)?;
                node.set_input(input_slot, self.ensure_input(method, scope, input)?);
            }
        }
        if encodes_input_lists(class) {
            for list_slot in 0..shape.lists {
                node.set_input_list(list_slot, self.read_input_list(method, scope)?);
            }
        }
        node.set_kind(self.read_fields(method, class)?);

        self.reader(method).set_byte_index(saved);
        Ok(node)
    }

    fn add_floating_node(&mut self, node: Node) -> NodeId {
        if !self.options.unique_floating_nodes {
            return self.graph.add(node);
        }
        if let Some(existing) = self.graph.find_duplicate(&node) {
            self.release_floating_node(node);
            return existing;
        }
        self.graph.unique(node)
    }

    fn allocate_floating_node(&mut self, class: NodeClass) -> Node {
        match self.pool.get_mut(&class).and_then(Vec::pop) {
            Some(mut node) => {
                node.reset(NodeKind::empty(class));
                node
            }
            None => Node::new(NodeKind::empty(class)),
        }
    }

    fn release_floating_node(&mut self, node: Node) {
        self.pool.entry(node.class()).or_default().push(node);
    }

    /// Stub for the fixed node at `order_id`, queued for processing. An
    /// already registered node is returned as is.
    fn make_stub(
        &mut self,
        method: MethodScopeId,
        scope: LoopScopeId,
        order_id: u32,
    ) -> Result<Option<NodeId>, CodecError> {
        if order_id == NULL_ORDER_ID {
            return Ok(None);
        }
        if let Some(node) = self.lookup_node(scope, order_id) {
            return Ok(Some(node));
        }
        let class = self.peek_class(method, order_id)?;
        if !class.is_fixed() {
            return Err(CodecError::internal(format!(
                "order id {order_id} is a floating {class:?}, expected a fixed node"
            )));
        }

        let stub = self.graph.add_kind(NodeKind::empty(class));
        self.register(scope, order_id, Some(stub));
        self.mark_pending(scope, order_id);
        Ok(Some(stub))
    }

    fn make_fixed_node_inputs(
        &mut self,
        method: MethodScopeId,
        scope: LoopScopeId,
        node: NodeId,
        class: NodeClass,
    ) -> Result<(), CodecError> {
        let shape = class.inputs();
        for input_slot in 0..shape.direct {
            if encodes_direct_input(class, input_slot) {
                let input = self.read_order_id(method)?;
                let value = self.ensure_input(method, scope, input)?;
                self.graph.set_input(node, input_slot, value);
            }
        }
        if encodes_input_lists(class) {
            for list_slot in 0..shape.lists {
                let list = self.read_input_list(method, scope)?;
                self.graph.set_input_list(node, list_slot, list);
            }
        }
        Ok(())
    }

    /// Like [`ensure_node_created`](Self::ensure_node_created), but an
    /// input whose node was deleted by loop explosion is left null.
    fn ensure_input(
        &mut self,
        method: MethodScopeId,
        scope: LoopScopeId,
        order_id: u32,
    ) -> Result<Option<NodeId>, CodecError> {
        Ok(self
            .ensure_node_created(method, scope, order_id)?
            .filter(|&node| self.graph.is_alive(node)))
    }

    fn read_input_list(
        &mut self,
        method: MethodScopeId,
        scope: LoopScopeId,
    ) -> Result<Option<EdgeList>, CodecError> {
        let Some(count) = self.read_list_count(method)? else {
            return Ok(None);
        };
        let mut list = EdgeList::with_capacity(count);
        for _ in 0..count {
            let input = self.read_order_id(method)?;
            list.push(self.ensure_input(method, scope, input)?);
        }
        Ok(Some(list))
    }

    /// Create stubs for the successors of `node` in `scope`. Returns the
    /// `next` stub instead of attaching it when predecessors are not
    /// updated.
    fn make_successor_stubs(
        &mut self,
        method: MethodScopeId,
        scope: LoopScopeId,
        node: NodeId,
        class: NodeClass,
        update_predecessors: bool,
    ) -> Result<Option<NodeId>, CodecError> {
        if !encodes_successors(class) {
            return Ok(None);
        }
        let shape = class.successors();
        let mut detached = None;
        for successor_slot in 0..shape.direct {
            let order_id = self.read_order_id(method)?;
            let stub = self.make_stub(method, scope, order_id)?;
            if update_predecessors {
                self.graph.set_successor(node, successor_slot, stub);
            } else {
                detached = stub;
            }
        }
        for list_slot in 0..shape.lists {
            let list = match self.read_list_count(method)? {
                None => None,
                Some(count) => {
                    let mut list = EdgeList::with_capacity(count);
                    for _ in 0..count {
                        let order_id = self.read_order_id(method)?;
                        list.push(self.make_stub(method, scope, order_id)?);
                    }
                    Some(list)
                }
            };
            self.graph.set_successor_list(node, list_slot, list);
        }
        Ok(detached)
    }

    fn read_invoke_data(
        &mut self,
        method: MethodScopeId,
        order_id: u32,
        invoke: NodeId,
        class: NodeClass,
    ) -> Result<InvokeData, CodecError> {
        let context_type = match self.read_object(method)? {
            None => None,
            Some(Object::Type(context)) => Some(context),
            Some(other) => {
                return Err(CodecError::internal(format!(
                    "invoke context is {other:?}, expected a type"
                )))
            }
        };
        let call_target_order_id = self.read_order_id(method)?;
        let state_after_order_id = self.read_order_id(method)?;
        let next_order_id = self.read_order_id(method)?;
        let exception_order_id = if class == NodeClass::InvokeWithException {
            let exception = self.read_order_id(method)?;
            // The exception edge's own record names its next node.
            self.read_order_id(method)?;
            Some(exception)
        } else {
            None
        };
        Ok(InvokeData {
            invoke,
            order_id,
            context_type,
            call_target_order_id,
            state_after_order_id,
            next_order_id,
            exception_order_id,
        })
    }

    // ── Tables ──────────────────────────────────────────────────────

    #[inline]
    fn lookup_node(&self, scope: LoopScopeId, order_id: u32) -> Option<NodeId> {
        self.scopes.get_node(scope, order_id)
    }

    fn register(&mut self, scope: LoopScopeId, order_id: u32, node: Option<NodeId>) {
        self.scopes.set_node(scope, order_id, node);
        if let Some(node) = node {
            self.plugin.register_node(node, order_id);
        }
    }

    fn mark_pending(&mut self, scope: LoopScopeId, order_id: u32) {
        self.scopes
            .loop_scope_mut(scope)
            .nodes_to_process
            .insert(order_id as usize);
    }

    fn resolve_reference(
        &mut self,
        method: MethodScopeId,
        scope: LoopScopeId,
        reference: &mut NodeReference,
    ) -> Result<(), CodecError> {
        let order_id = reference.order_id().ok_or_else(|| {
            CodecError::internal(format!(
                "reference to {:?} was never encoded",
                reference.source()
            ))
        })?;
        let node = match self.lookup_node(scope, order_id) {
            Some(node) => Some(node),
            None if self.peek_class(method, order_id)?.is_fixed() => None,
            None => self.ensure_node_created(method, scope, order_id)?,
        };
        let node = node.filter(|&node| self.graph.is_alive(node));
        reference.set_decoded(self.graph.unwrap_placeholder(node));
        Ok(())
    }

    // ── Reading ─────────────────────────────────────────────────────

    fn reader(&mut self, method: MethodScopeId) -> &mut TypeReader {
        &mut self.scopes.method_mut(method).reader
    }

    fn seek_node(&mut self, method: MethodScopeId, order_id: u32) -> Result<(), CodecError> {
        let scope = self.scopes.method_mut(method);
        let offset = scope
            .header
            .node_start_offsets
            .get(order_id as usize)
            .copied()
            .ok_or_else(|| {
                CodecError::internal(format!(
                    "order id {order_id} out of range ({} nodes)",
                    scope.header.node_count
                ))
            })?;
        scope.reader.set_byte_index(offset as usize);
        Ok(())
    }

    fn read_class(&mut self, method: MethodScopeId) -> Result<NodeClass, CodecError> {
        let index = self.reader(method).get_uv_u32()?;
        self.scopes.method(method).encoded.encoding().class(index)
    }

    /// Class of the record at `order_id`, leaving the reader where it was.
    fn peek_class(&mut self, method: MethodScopeId, order_id: u32) -> Result<NodeClass, CodecError> {
        let saved = self.reader(method).byte_index();
        self.seek_node(method, order_id)?;
        let class = self.read_class(method);
        self.reader(method).set_byte_index(saved);
        class
    }

    fn read_order_id(&mut self, method: MethodScopeId) -> Result<u32, CodecError> {
        let scope = self.scopes.method_mut(method);
        let width = scope.width;
        let order_id = width.read(&mut scope.reader)?;
        if order_id >= scope.header.node_count {
            return Err(CodecError::internal(format!(
                "order id {order_id} out of range ({} nodes)",
                scope.header.node_count
            )));
        }
        Ok(order_id)
    }

    /// Length of an edge list; `None` for a null list.
    fn read_list_count(&mut self, method: MethodScopeId) -> Result<Option<usize>, CodecError> {
        let count = self.reader(method).get_sv()?;
        if count == -1 {
            return Ok(None);
        }
        usize::try_from(count)
            .map(Some)
            .map_err(|_| CodecError::internal(format!("negative edge list length {count}")))
    }

    fn read_object(&mut self, method: MethodScopeId) -> Result<Option<Object>, CodecError> {
        let index = self.reader(method).get_uv_u32()?;
        Ok(self
            .scopes
            .method(method)
            .encoded
            .encoding()
            .object(index)?
            .cloned())
    }

    fn read_fields(
        &mut self,
        method: MethodScopeId,
        class: NodeClass,
    ) -> Result<NodeKind, CodecError> {
        let mut fields: SmallVec<[FieldValue; 2]> = SmallVec::new();
        for kind in class.field_kinds() {
            let field = match kind {
                FieldKind::Primitive => FieldValue::Primitive(self.reader(method).get_sv()?),
                FieldKind::Object => {
                    let object = self.read_object(method)?.ok_or_else(|| {
                        CodecError::internal(format!("{class:?} has a null object field"))
                    })?;
                    FieldValue::Object(object)
                }
            };
            fields.push(field);
        }
        NodeKind::from_fields(class, &fields).ok_or_else(|| {
            CodecError::internal(format!("fields {fields:?} do not fit {class:?}"))
        })
    }

    // ── Cleanup ─────────────────────────────────────────────────────

    /// Unwrap proxy placeholders no loop claimed, then check edge
    /// consistency.
    fn cleanup(&mut self) -> Result<(), CodecError> {
        let placeholders: Vec<NodeId> = self.graph.nodes_of(NodeClass::ProxyPlaceholder).collect();
        for placeholder in placeholders {
            if !self.graph.is_alive(placeholder) {
                continue;
            }
            let value = self.graph.input(placeholder, slot::VALUE);
            self.graph.replace_at_usages(placeholder, value);
            self.graph.safe_delete(placeholder);
        }
        self.graph.verify()?;
        Ok(())
    }
}
