//! Decoder scopes.
//!
//! Decoding state lives in four arenas addressed by index handles:
//!
//! - **Method scopes**: one per decoded method (the root graph plus every
//!   callee inlined during decoding). Own the byte reader and the
//!   per-method loop explosion bookkeeping.
//! - **Loop scopes**: one per loop nesting level and per exploded
//!   iteration. Own the worklist of pending fixed nodes.
//! - **Node tables**: order id → decoded node. Loop scopes refer to them by
//!   handle, so several scopes can share one table without aliasing
//!   references. A scope with a written set reads unwritten ids from its
//!   initial table. Tables are counted by the scopes using them and go
//!   back to a free list once the last one finishes, so exploding a loop
//!   keeps a bounded number of tables alive.
//! - **Iteration groups**: the queues of not yet processed sibling
//!   iterations of one loop, shared by every iteration of that loop, plus
//!   the state map used when merging exploded iterations.

use std::collections::VecDeque;
use std::mem;

use rustc_hash::{FxHashMap, FxHashSet};
use sable_ir::{BitSet, GraphMark, NodeId, TypeRef};
use smallvec::SmallVec;

use crate::encoded::{EncodedGraph, GraphHeader};
use crate::layout::OrderIdWidth;
use crate::stream::TypeReader;
use crate::LoopExplosionKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct MethodScopeId(usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct LoopScopeId(usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct TableId(usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct IterationsId(usize);

/// Why a loop scope was created.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LoopScopeTrigger {
    /// Method entry, or the first visit of a loop begin.
    Start,
    /// Next iteration of an unrolled loop.
    LoopBeginUnrolling,
    /// Continuation of one particular loop end.
    LoopEndDuplication,
    /// Code after one particular loop exit.
    LoopExitDuplication,
}

/// What an invoke's trailer says about its surroundings.
#[derive(Clone, Debug)]
pub(crate) struct InvokeData {
    pub invoke: NodeId,
    pub order_id: u32,
    pub context_type: Option<TypeRef>,
    pub call_target_order_id: u32,
    pub state_after_order_id: u32,
    pub next_order_id: u32,
    /// Exception edge of an `InvokeWithException`.
    pub exception_order_id: Option<u32>,
}

/// Where an inlined method returns to.
#[derive(Clone, Debug)]
pub(crate) struct CallerContext {
    pub loop_scope: LoopScopeId,
    pub invoke: InvokeData,
}

pub(crate) struct MethodScope {
    pub encoded: EncodedGraph,
    pub reader: TypeReader,
    pub header: GraphHeader,
    pub width: OrderIdWidth,
    pub loop_explosion: LoopExplosionKind,
    /// Nodes allocated before this mark belong to callers.
    pub method_start_mark: GraphMark,
    pub return_and_unwind_nodes: Vec<NodeId>,
    /// Merges standing in for exploded loop begins and exits.
    pub loop_explosion_merges: FxHashSet<NodeId>,
    /// The single top-level loop header under merge explosion.
    pub loop_explosion_head: Option<NodeId>,
    pub caller: Option<CallerContext>,
    pub inlining_depth: u32,
}

pub(crate) struct LoopScope {
    pub method: MethodScopeId,
    pub outer: Option<LoopScopeId>,
    pub depth: u32,
    pub iteration: u32,
    pub trigger: LoopScopeTrigger,
    /// Order id of the loop begin this scope iterates; `None` at method level.
    pub loop_begin_order_id: Option<u32>,
    /// Pending fixed nodes; the lowest order id is processed first.
    pub nodes_to_process: BitSet,
    pub created: TableId,
    pub initial: Option<TableId>,
    /// Order ids written in this scope. Unwritten ids read `initial`.
    pub written: Option<BitSet>,
    pub iterations: IterationsId,
}

/// Frame-state identity of an exploded iteration: the outer state plus the
/// values with proxy placeholders stripped.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct ExplosionKey {
    pub outer: Option<NodeId>,
    pub values: SmallVec<[Option<NodeId>; 8]>,
}

#[derive(Default)]
pub(crate) struct LoopIterations {
    pub from_end_duplication: VecDeque<LoopScopeId>,
    pub from_exit_duplication: VecDeque<LoopScopeId>,
    pub from_unrolling: VecDeque<LoopScopeId>,
    /// Merge created for each distinct iteration state.
    pub states: FxHashMap<ExplosionKey, NodeId>,
}

#[derive(Default)]
pub(crate) struct ScopeArena {
    methods: Vec<MethodScope>,
    loops: Vec<LoopScope>,
    tables: Vec<Vec<Option<NodeId>>>,
    /// Live loop scopes per table.
    table_users: Vec<u32>,
    free_tables: Vec<TableId>,
    iterations: Vec<LoopIterations>,
}

impl ScopeArena {
    pub fn clear(&mut self) {
        self.methods.clear();
        self.loops.clear();
        self.tables.clear();
        self.table_users.clear();
        self.free_tables.clear();
        self.iterations.clear();
    }

    // ── Allocation ──────────────────────────────────────────────────

    pub fn add_method(&mut self, scope: MethodScope) -> MethodScopeId {
        self.methods.push(scope);
        MethodScopeId(self.methods.len() - 1)
    }

    pub fn add_loop_scope(&mut self, scope: LoopScope) -> LoopScopeId {
        self.table_users[scope.created.0] += 1;
        if let Some(initial) = scope.initial {
            self.table_users[initial.0] += 1;
        }
        self.loops.push(scope);
        LoopScopeId(self.loops.len() - 1)
    }

    /// Drop the tables and worklist of a finished loop scope. Tables no
    /// other scope uses are recycled. Method-level scopes are kept: their
    /// table resolves references after decoding.
    pub fn release_loop_scope(&mut self, scope: LoopScopeId) {
        let loop_scope = &mut self.loops[scope.0];
        if loop_scope.outer.is_none() && loop_scope.trigger == LoopScopeTrigger::Start {
            return;
        }
        loop_scope.nodes_to_process = BitSet::new();
        loop_scope.written = None;
        let tables = [Some(loop_scope.created), loop_scope.initial.take()];
        for table in tables.into_iter().flatten() {
            let users = &mut self.table_users[table.0];
            *users = users.saturating_sub(1);
            if *users == 0 {
                self.free_tables.push(table);
            }
        }
    }

    pub fn add_iterations(&mut self) -> IterationsId {
        self.iterations.push(LoopIterations::default());
        IterationsId(self.iterations.len() - 1)
    }

    pub fn new_table(&mut self, len: usize) -> TableId {
        if let Some(id) = self.free_tables.pop() {
            let table = &mut self.tables[id.0];
            table.clear();
            table.resize(len, None);
            return id;
        }
        self.push_table(vec![None; len])
    }

    pub fn copy_table(&mut self, table: TableId) -> TableId {
        if let Some(id) = self.free_tables.pop() {
            let mut reused = mem::take(&mut self.tables[id.0]);
            reused.clone_from(&self.tables[table.0]);
            self.tables[id.0] = reused;
            return id;
        }
        let copy = self.tables[table.0].clone();
        self.push_table(copy)
    }

    fn push_table(&mut self, table: Vec<Option<NodeId>>) -> TableId {
        self.tables.push(table);
        self.table_users.push(0);
        TableId(self.tables.len() - 1)
    }

    /// Tables allocated so far, recycled ones included.
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    // ── Access ──────────────────────────────────────────────────────

    #[inline]
    pub fn method(&self, id: MethodScopeId) -> &MethodScope {
        &self.methods[id.0]
    }

    #[inline]
    pub fn method_mut(&mut self, id: MethodScopeId) -> &mut MethodScope {
        &mut self.methods[id.0]
    }

    #[inline]
    pub fn loop_scope(&self, id: LoopScopeId) -> &LoopScope {
        &self.loops[id.0]
    }

    #[inline]
    pub fn loop_scope_mut(&mut self, id: LoopScopeId) -> &mut LoopScope {
        &mut self.loops[id.0]
    }

    #[inline]
    pub fn iterations(&self, id: IterationsId) -> &LoopIterations {
        &self.iterations[id.0]
    }

    #[inline]
    pub fn iterations_mut(&mut self, id: IterationsId) -> &mut LoopIterations {
        &mut self.iterations[id.0]
    }

    /// Method scope of a loop scope.
    #[inline]
    pub fn method_of(&self, scope: LoopScopeId) -> MethodScopeId {
        self.loops[scope.0].method
    }

    // ── Node tables ─────────────────────────────────────────────────

    pub fn get_node(&self, scope: LoopScopeId, order_id: u32) -> Option<NodeId> {
        let scope = &self.loops[scope.0];
        let index = order_id as usize;
        let table = match (&scope.written, scope.initial) {
            (Some(written), Some(initial)) if !written.contains(index) => initial,
            _ => scope.created,
        };
        self.tables[table.0].get(index).copied().flatten()
    }

    pub fn set_node(&mut self, scope: LoopScopeId, order_id: u32, node: Option<NodeId>) {
        let index = order_id as usize;
        let scope = &mut self.loops[scope.0];
        if let Some(written) = &mut scope.written {
            written.insert(index);
        }
        if let Some(slot) = self.tables[scope.created.0].get_mut(index) {
            *slot = node;
        }
    }

    /// A table holding the latest node per order id of `scope`: its
    /// created table when it has no written set, otherwise a
    /// [`snapshot`](Self::snapshot).
    pub fn materialize(&mut self, scope: LoopScopeId) -> TableId {
        let loop_scope = &self.loops[scope.0];
        match (loop_scope.initial, &loop_scope.written) {
            (Some(_), Some(_)) => self.snapshot(scope),
            _ => loop_scope.created,
        }
    }

    /// A fresh table holding the latest node per order id of `scope`.
    pub fn snapshot(&mut self, scope: LoopScopeId) -> TableId {
        let loop_scope = &self.loops[scope.0];
        let created = loop_scope.created;
        let Some(initial) = loop_scope.initial.filter(|_| loop_scope.written.is_some()) else {
            return self.copy_table(created);
        };
        let merged = self.copy_table(initial);
        if let Some(written) = &self.loops[scope.0].written {
            for index in written.iter() {
                let node = self.tables[created.0].get(index).copied().flatten();
                if let Some(slot) = self.tables[merged.0].get_mut(index) {
                    *slot = node;
                }
            }
        }
        merged
    }

    /// Replace `old` by `new` in both tables of `scope`.
    pub fn replace_in_tables(&mut self, scope: LoopScopeId, old: NodeId, new: Option<NodeId>) {
        let loop_scope = &self.loops[scope.0];
        let tables = [Some(loop_scope.created), loop_scope.initial];
        for table in tables.into_iter().flatten() {
            for slot in &mut self.tables[table.0] {
                if *slot == Some(old) {
                    *slot = new;
                }
            }
        }
    }

    /// Copy entries the outer scope lacks, when both share a created
    /// table.
    pub fn propagate_created_nodes(&mut self, scope: LoopScopeId) {
        let Some(outer) = self.loops[scope.0].outer else {
            return;
        };
        if self.loops[scope.0].created != self.loops[outer.0].created {
            return;
        }
        let len = self.tables[self.loops[scope.0].created.0].len();
        for index in 0..len {
            #[expect(
                clippy::cast_possible_truncation,
                reason = "tables have one slot per u32 order id"
            )]
            let order_id = index as u32;
            if self.get_node(outer, order_id).is_none() {
                let node = self.get_node(scope, order_id);
                if node.is_some() {
                    self.set_node(outer, order_id, node);
                }
            }
        }
    }

    // ── Iterations ──────────────────────────────────────────────────

    /// Iteration number for a scope appended to `queue`.
    pub fn next_iteration_number(&self, queue: &VecDeque<LoopScopeId>, current: u32) -> u32 {
        queue
            .back()
            .map_or(current, |&last| self.loops[last.0].iteration)
            + 1
    }

    /// Take the next queued sibling iteration of `scope`: end
    /// duplication first, then exit duplication, then unrolling.
    pub fn next_iteration(&mut self, scope: LoopScopeId) -> Option<LoopScopeId> {
        let group = &mut self.iterations[self.loops[scope.0].iterations.0];
        group
            .from_end_duplication
            .pop_front()
            .or_else(|| group.from_exit_duplication.pop_front())
            .or_else(|| group.from_unrolling.pop_front())
    }
}
