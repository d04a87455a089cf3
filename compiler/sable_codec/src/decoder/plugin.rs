//! Decoder hooks.
//!
//! A [`DecoderPlugin`] sees every node the decoder materializes and decides
//! what happens at invokes and how far loops may explode. Every method has
//! a default, so a plugin only overrides what it cares about. The one
//! exception in spirit is [`check_loop_explosion_iteration`]: its default
//! rejects exploding at all, so a caller that asks for loop explosion must
//! supply a termination policy such as [`BoundedExplosion`].
//!
//! [`check_loop_explosion_iteration`]: DecoderPlugin::check_loop_explosion_iteration

use sable_ir::{Graph, Node, NodeId, TypeRef};

use super::LoopScopeTrigger;
use crate::{CodecError, EncodedGraph, LoopExplosionKind};

/// Iterations a [`BoundedExplosion`] allows per loop by default.
pub const DEFAULT_MAX_LOOP_EXPLOSION_COUNT: u32 = 10_000;

/// What to do with a freshly decoded floating node.
#[derive(Debug)]
pub enum FloatingAction {
    /// Insert the node as decoded.
    Add,
    /// Insert this node instead.
    Replace(Node),
    /// Use an existing graph node instead.
    Existing(NodeId),
}

/// What to do at an invoke.
#[derive(Debug)]
pub enum InvokeAction {
    /// Keep the invoke as a call.
    Continue,
    /// Decode `callee` in place of the call.
    Inline {
        callee: EncodedGraph,
        loop_explosion: LoopExplosionKind,
    },
}

/// An invoke the decoder has reached, with its call target already built.
#[derive(Clone, Debug)]
pub struct InvokeSite {
    pub invoke: NodeId,
    pub call_target: NodeId,
    /// Receiver type recorded by the encoder.
    pub context_type: Option<TypeRef>,
    /// Number of inlined frames around the invoke.
    pub inlining_depth: u32,
}

/// One loop scope about to be decoded under loop explosion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExplosionIteration {
    pub loop_depth: u32,
    pub iteration: u32,
    pub trigger: LoopScopeTrigger,
}

pub trait DecoderPlugin {
    /// Called before a decoded floating node enters the graph. The node's
    /// inputs are already decoded.
    fn before_floating_add(&mut self, _graph: &Graph, _node: &Node) -> FloatingAction {
        FloatingAction::Add
    }

    /// Called after a floating node entered the graph. May return a
    /// different node to use in its place.
    fn after_floating_add(&mut self, _graph: &mut Graph, node: NodeId) -> NodeId {
        node
    }

    /// Called once per decoded fixed node without more specific handling,
    /// after its edges and successor stubs are set.
    ///
    /// Returning a replacement makes the decoder put it in the node's
    /// place: at the predecessor, at the usages and under the node's order
    /// id. A replacement that is one of the node's own successors is
    /// spliced in directly (folding a control split); a fresh replacement
    /// with a free `next` takes over the node's `next`. Successor stubs
    /// that end up unreachable are deleted before they are decoded.
    fn handle_fixed_node(
        &mut self,
        _graph: &mut Graph,
        _node: NodeId,
    ) -> Result<Option<NodeId>, CodecError> {
        Ok(None)
    }

    /// Called once per decoded merge.
    fn handle_merge(&mut self, _graph: &mut Graph, _merge: NodeId) {}

    fn handle_invoke(
        &mut self,
        _graph: &Graph,
        _site: &InvokeSite,
    ) -> Result<InvokeAction, CodecError> {
        Ok(InvokeAction::Continue)
    }

    /// Runaway check, called for every loop scope created under loop
    /// explosion.
    fn check_loop_explosion_iteration(
        &mut self,
        iteration: &ExplosionIteration,
    ) -> Result<(), CodecError> {
        Err(CodecError::internal(format!(
            "loop explosion requested without a termination policy \
             (loop depth {}, iteration {})",
            iteration.loop_depth, iteration.iteration
        )))
    }

    /// Called whenever a node is registered under an order id.
    fn register_node(&mut self, _node: NodeId, _order_id: u32) {}
}

/// Accepts every node as decoded. Cannot explode loops.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopPlugin;

impl DecoderPlugin for NoopPlugin {}

/// Accepts every node as decoded and bails out once a loop explodes into
/// more than `max_iterations` iterations.
#[derive(Clone, Copy, Debug)]
pub struct BoundedExplosion {
    pub max_iterations: u32,
}

impl Default for BoundedExplosion {
    fn default() -> Self {
        BoundedExplosion {
            max_iterations: DEFAULT_MAX_LOOP_EXPLOSION_COUNT,
        }
    }
}

impl DecoderPlugin for BoundedExplosion {
    fn check_loop_explosion_iteration(
        &mut self,
        iteration: &ExplosionIteration,
    ) -> Result<(), CodecError> {
        if iteration.iteration > self.max_iterations {
            return Err(CodecError::permanent_bailout(format!(
                "too many loop explosion iterations ({} at loop depth {}); \
                 does the exploded loop terminate?",
                iteration.iteration, iteration.loop_depth
            )));
        }
        Ok(())
    }
}
