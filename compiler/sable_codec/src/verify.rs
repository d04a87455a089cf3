//! Structural graph equivalence.
//!
//! [`verify_graphs_equal`] walks two graphs in lockstep from their start
//! nodes, pairing nodes as it goes. Ends are queued behind everything else
//! so a merge is compared only after the branches leading to it. Edges the
//! decoder rebuilds in its own order are compared by meaning instead of by
//! position: merge end lists are skipped, phi values are compared per
//! paired end, and loop ends are compared by their position among the
//! loop's ends rather than by their stored index.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;
use sable_ir::{slot, Edges, Graph, NodeClass, NodeId};

use crate::CodecError;

/// Check that `actual` is structurally equal to `expected`.
pub fn verify_graphs_equal(expected: &Graph, actual: &Graph) -> Result<(), CodecError> {
    let mut walk = LockstepWalk {
        expected,
        actual,
        mapping: FxHashMap::default(),
        worklist: VecDeque::new(),
    };
    walk.pair(expected.start(), actual.start())?;
    walk.run()
}

struct LockstepWalk<'a> {
    expected: &'a Graph,
    actual: &'a Graph,
    mapping: FxHashMap<NodeId, NodeId>,
    worklist: VecDeque<(NodeId, NodeId)>,
}

impl LockstepWalk<'_> {
    fn run(&mut self) -> Result<(), CodecError> {
        let (expected, actual) = (self.expected, self.actual);
        while let Some((e, a)) = self.worklist.pop_front() {
            let class = expected.class(e);
            if class != actual.class(a) {
                return Err(mismatch(e, a, "node classes differ"));
            }

            let (e_inputs, a_inputs) = (expected.node(e).inputs(), actual.node(a).inputs());
            if class.is_merge() {
                self.pair_direct_edges(e, a, e_inputs, a_inputs)?;
            } else if class == NodeClass::Phi {
                self.verify_phi(e, a)?;
            } else {
                self.pair_edges(e, a, e_inputs, a_inputs)?;
            }
            let (e_succ, a_succ) = (expected.node(e).successors(), actual.node(a).successors());
            self.pair_edges(e, a, e_succ, a_succ)?;

            if class == NodeClass::LoopEnd {
                self.verify_loop_end_position(e, a)?;
            } else if expected.kind(e) != actual.kind(a) {
                return Err(mismatch(e, a, "node data differs"));
            }

            if class == NodeClass::End {
                match (expected.end_merge(e), actual.end_merge(a)) {
                    (Some(e_merge), Some(a_merge)) => self.pair(e_merge, a_merge)?,
                    (None, None) => {}
                    _ => return Err(mismatch(e, a, "only one end reaches a merge")),
                }
            }
            if class.is_end() {
                self.verify_phis(e, a)?;
            }
        }
        Ok(())
    }

    /// Record `e ↔ a`, or check it against an earlier pairing.
    fn pair(&mut self, e: NodeId, a: NodeId) -> Result<(), CodecError> {
        if self.expected.class(e) != self.actual.class(a) {
            return Err(mismatch(e, a, "node classes differ"));
        }
        match self.mapping.get(&e) {
            Some(&mapped) if mapped == a => Ok(()),
            Some(&mapped) => Err(mismatch(
                e,
                a,
                &format!("already paired with {mapped:?}"),
            )),
            None => {
                self.mapping.insert(e, a);
                if self.expected.class(e).is_end() {
                    self.worklist.push_back((e, a));
                } else {
                    self.worklist.push_front((e, a));
                }
                Ok(())
            }
        }
    }

    fn pair_optional(
        &mut self,
        user: (NodeId, NodeId),
        e: Option<NodeId>,
        a: Option<NodeId>,
    ) -> Result<(), CodecError> {
        match (e, a) {
            (Some(e), Some(a)) => self.pair(e, a),
            (None, None) => Ok(()),
            _ => Err(mismatch(user.0, user.1, "edge present on one side only")),
        }
    }

    fn pair_direct_edges(
        &mut self,
        e: NodeId,
        a: NodeId,
        e_edges: &Edges,
        a_edges: &Edges,
    ) -> Result<(), CodecError> {
        if e_edges.direct_count() != a_edges.direct_count() {
            return Err(mismatch(e, a, "edge shapes differ"));
        }
        for slot in 0..e_edges.direct_count() {
            self.pair_optional((e, a), e_edges.direct(slot), a_edges.direct(slot))?;
        }
        Ok(())
    }

    fn pair_edges(
        &mut self,
        e: NodeId,
        a: NodeId,
        e_edges: &Edges,
        a_edges: &Edges,
    ) -> Result<(), CodecError> {
        self.pair_direct_edges(e, a, e_edges, a_edges)?;
        if e_edges.list_count() != a_edges.list_count() {
            return Err(mismatch(e, a, "edge shapes differ"));
        }
        for slot in 0..e_edges.list_count() {
            match (e_edges.list(slot), a_edges.list(slot)) {
                (None, None) => {}
                (Some(e_list), Some(a_list)) if e_list.len() == a_list.len() => {
                    for (&e_item, &a_item) in e_list.iter().zip(a_list.iter()) {
                        self.pair_optional((e, a), e_item, a_item)?;
                    }
                }
                _ => return Err(mismatch(e, a, "edge lists differ")),
            }
        }
        Ok(())
    }

    /// Phis are compared through their merge: same merge, and equal values
    /// along every paired end.
    fn verify_phi(&mut self, e_phi: NodeId, a_phi: NodeId) -> Result<(), CodecError> {
        let e_merge = self.expected.input(e_phi, slot::PHI_MERGE);
        let a_merge = self.actual.input(a_phi, slot::PHI_MERGE);
        self.pair_optional((e_phi, a_phi), e_merge, a_merge)?;
        let Some(e_merge) = e_merge else {
            return Ok(());
        };
        for e_end in self.expected.cfg_predecessors(e_merge) {
            let Some(&a_end) = self.mapping.get(&e_end) else {
                continue;
            };
            let e_value = self.expected.phi_value_at(e_phi, e_end);
            let a_value = self.actual.phi_value_at(a_phi, a_end);
            self.pair_optional((e_phi, a_phi), e_value, a_value)?;
        }
        Ok(())
    }

    fn verify_phis(&mut self, e_end: NodeId, a_end: NodeId) -> Result<(), CodecError> {
        let (Some(e_merge), Some(a_merge)) =
            (self.expected.end_merge(e_end), self.actual.end_merge(a_end))
        else {
            return Ok(());
        };
        let e_phis = self.expected.phis(e_merge);
        let a_phis = self.actual.phis(a_merge);
        if e_phis.len() != a_phis.len() {
            return Err(mismatch(e_merge, a_merge, "phi counts differ"));
        }
        for (&e_phi, &a_phi) in e_phis.iter().zip(a_phis.iter()) {
            self.pair(e_phi, a_phi)?;
            let e_value = self.expected.phi_value_at(e_phi, e_end);
            let a_value = self.actual.phi_value_at(a_phi, a_end);
            self.pair_optional((e_phi, a_phi), e_value, a_value)?;
        }
        Ok(())
    }

    fn verify_loop_end_position(&self, e: NodeId, a: NodeId) -> Result<(), CodecError> {
        let position = |graph: &Graph, end: NodeId| {
            graph
                .end_merge(end)
                .and_then(|begin| graph.loop_ends(begin).iter().position(|&x| x == end))
        };
        if position(self.expected, e) == position(self.actual, a) {
            Ok(())
        } else {
            Err(mismatch(e, a, "loop end positions differ"))
        }
    }
}

fn mismatch(expected: NodeId, actual: NodeId, reason: &str) -> CodecError {
    CodecError::internal(format!(
        "graphs differ at {expected:?} / {actual:?}: {reason}"
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, reason = "tests unwrap for brevity")]
mod tests;
