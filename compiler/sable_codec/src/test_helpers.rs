//! Graph builders and plugins shared by the codec tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use sable_ir::{
    slot, BinaryOp, CompareOp, ConstValue, Graph, MethodRef, Node, NodeId, NodeKind, Probability,
};

use crate::{
    encode_single_graph, BoundedExplosion, CodecError, DecoderOptions, DecoderPlugin,
    ExplosionIteration, FloatingAction, GraphDecoder, NoopPlugin,
};

pub(crate) fn constant(graph: &mut Graph, value: i32) -> NodeId {
    graph.unique(Node::new(NodeKind::Constant(ConstValue::Int(value))))
}

pub(crate) fn parameter(graph: &mut Graph, index: u32) -> NodeId {
    graph.add_kind(NodeKind::Parameter { index })
}

/// Integer value of a constant node.
pub(crate) fn int_value(graph: &Graph, node: NodeId) -> Option<i32> {
    match graph.kind(node) {
        NodeKind::Constant(ConstValue::Int(value)) => Some(*value),
        _ => None,
    }
}

/// start -> if(p0) -> {begin -> end, begin -> end} -> merge -> return(phi(1, 2))
pub(crate) struct Diamond {
    pub graph: Graph,
    pub cond: NodeId,
    pub branch: NodeId,
    pub then_begin: NodeId,
    pub then_end: NodeId,
    pub else_begin: NodeId,
    pub else_end: NodeId,
    pub merge: NodeId,
    pub phi: NodeId,
    pub ret: NodeId,
}

pub(crate) fn diamond() -> Diamond {
    let mut graph = Graph::new();
    let cond = parameter(&mut graph, 0);
    let one = constant(&mut graph, 1);
    let two = constant(&mut graph, 2);

    let then_end = graph.add_kind(NodeKind::End);
    let else_end = graph.add_kind(NodeKind::End);
    let then_begin = graph.add(Node::new(NodeKind::Begin).with_successor(slot::NEXT, then_end));
    let else_begin = graph.add(Node::new(NodeKind::Begin).with_successor(slot::NEXT, else_end));
    let branch = graph.add(
        Node::new(NodeKind::If {
            true_probability: Probability::new(0.5),
        })
        .with_input(slot::VALUE, cond)
        .with_successor(slot::TRUE_SUCCESSOR, then_begin)
        .with_successor(slot::FALSE_SUCCESSOR, else_begin),
    );
    let start = graph.start();
    graph.set_next(start, Some(branch));

    let merge =
        graph.add(Node::new(NodeKind::Merge).with_input_list(slot::ENDS, [then_end, else_end]));
    let phi = graph.add(
        Node::new(NodeKind::Phi)
            .with_input(slot::PHI_MERGE, merge)
            .with_input_list(slot::VALUES, [one, two]),
    );
    let ret = graph.add(Node::new(NodeKind::Return).with_input(slot::VALUE, phi));
    graph.set_next(merge, Some(ret));

    Diamond {
        graph,
        cond,
        branch,
        then_begin,
        then_end,
        else_begin,
        else_end,
        merge,
        phi,
        ret,
    }
}

/// One loop carrying `v = v <op> 1` from `v = 0`, leaving while `v < p0`
/// is false and returning `v`:
///
/// ```text
/// start -> end -> loop_begin -> if(v < p0)
///     true:  begin -> loop_end
///     false: loop_exit -> return(proxy(v))
/// ```
pub(crate) fn counting_loop(op: BinaryOp) -> Graph {
    let mut graph = Graph::new();
    let limit = parameter(&mut graph, 0);
    build_counting_loop(&mut graph, op, limit);
    graph
}

/// [`counting_loop`] counting up to the constant `bound`, so it runs a
/// known number of iterations.
pub(crate) fn bounded_loop(bound: i32) -> Graph {
    let mut graph = Graph::new();
    let limit = constant(&mut graph, bound);
    build_counting_loop(&mut graph, BinaryOp::Add, limit);
    graph
}

fn build_counting_loop(graph: &mut Graph, op: BinaryOp, limit: NodeId) {
    let zero = constant(graph, 0);
    let one = constant(graph, 1);

    let entry = graph.add_kind(NodeKind::End);
    let start = graph.start();
    graph.set_next(start, Some(entry));
    let header = graph.add(Node::new(NodeKind::LoopBegin).with_input_list(slot::ENDS, [entry]));

    let phi = graph.add(
        Node::new(NodeKind::Phi)
            .with_input(slot::PHI_MERGE, header)
            .with_input_list(slot::VALUES, [zero]),
    );
    let next = graph.add(
        Node::new(NodeKind::Binary(op))
            .with_input(slot::X, phi)
            .with_input(slot::Y, one),
    );
    graph.push_input(phi, slot::VALUES, Some(next));
    let state = graph.add(
        Node::new(NodeKind::FrameState { bci: 0 }).with_input_list(slot::VALUES, [phi]),
    );
    graph.set_state_after(header, Some(state));

    let back = graph.add(
        Node::new(NodeKind::LoopEnd { end_index: 0 }).with_input(slot::LOOP_BEGIN, header),
    );
    let body = graph.add(Node::new(NodeKind::Begin).with_successor(slot::NEXT, back));

    let exit = graph.add(Node::new(NodeKind::LoopExit).with_input(slot::LOOP_BEGIN, header));
    let proxy = graph.add(
        Node::new(NodeKind::ValueProxy)
            .with_input(slot::VALUE, phi)
            .with_input(slot::PROXY_LOOP_EXIT, exit),
    );
    let exit_state = graph.add(
        Node::new(NodeKind::FrameState { bci: 5 }).with_input_list(slot::VALUES, [proxy]),
    );
    graph.set_state_after(exit, Some(exit_state));
    let ret = graph.add(Node::new(NodeKind::Return).with_input(slot::VALUE, proxy));
    graph.set_next(exit, Some(ret));

    let compare = graph.add(
        Node::new(NodeKind::Compare(CompareOp::Lt))
            .with_input(slot::X, phi)
            .with_input(slot::Y, limit),
    );
    let branch = graph.add(
        Node::new(NodeKind::If {
            true_probability: Probability::new(0.9),
        })
        .with_input(slot::VALUE, compare)
        .with_successor(slot::TRUE_SUCCESSOR, body)
        .with_successor(slot::FALSE_SUCCESSOR, exit),
    );
    graph.set_next(header, Some(branch));
}

/// start -> invoke Counter.increment(p0) -> return(invoke)
pub(crate) fn caller_graph() -> Graph {
    let mut graph = Graph::new();
    let argument = parameter(&mut graph, 0);
    let target = graph.add(
        Node::new(NodeKind::CallTarget(MethodRef::new("Counter", "increment")))
            .with_input_list(slot::ARGUMENTS, [argument]),
    );
    let state = graph.add(
        Node::new(NodeKind::FrameState { bci: 3 }).with_input_list(slot::VALUES, [argument]),
    );
    let invoke = graph.add(
        Node::new(NodeKind::Invoke { bci: 3 }).with_input(slot::CALL_TARGET, target),
    );
    graph.set_state_after(invoke, Some(state));
    let ret = graph.add(Node::new(NodeKind::Return).with_input(slot::VALUE, invoke));
    graph.set_next(invoke, Some(ret));
    let start = graph.start();
    graph.set_next(start, Some(invoke));
    graph
}

/// start -> return(p0 + 1)
pub(crate) fn increment_graph() -> Graph {
    let mut graph = Graph::new();
    let value = parameter(&mut graph, 0);
    let one = constant(&mut graph, 1);
    let sum = graph.add(
        Node::new(NodeKind::Binary(BinaryOp::Add))
            .with_input(slot::X, value)
            .with_input(slot::Y, one),
    );
    let ret = graph.add(Node::new(NodeKind::Return).with_input(slot::VALUE, sum));
    let start = graph.start();
    graph.set_next(start, Some(ret));
    graph
}

/// Encode `graph` and decode it strictly into a fresh graph.
pub(crate) fn round_trip(graph: &Graph) -> Graph {
    crate::init_tracing();
    let encoded = encode_single_graph(graph).unwrap();
    let mut decoded = Graph::new();
    GraphDecoder::with_options(&mut decoded, NoopPlugin, DecoderOptions::strict())
        .decode(&encoded)
        .unwrap();
    decoded
}

/// Folds arithmetic and comparisons on constants, folds branches on
/// constant conditions and bounds loop explosion.
#[derive(Debug)]
pub(crate) struct FoldingPlugin {
    bound: BoundedExplosion,
}

impl FoldingPlugin {
    pub(crate) fn new(max_iterations: u32) -> Self {
        FoldingPlugin {
            bound: BoundedExplosion { max_iterations },
        }
    }
}

fn constant_operand(graph: &Graph, node: &Node, slot: usize) -> Option<ConstValue> {
    node.inputs()
        .direct(slot)
        .and_then(|input| match graph.kind(input) {
            NodeKind::Constant(value) => Some(*value),
            _ => None,
        })
}

impl DecoderPlugin for FoldingPlugin {
    fn before_floating_add(&mut self, graph: &Graph, node: &Node) -> FloatingAction {
        let (Some(x), Some(y)) = (
            constant_operand(graph, node, slot::X),
            constant_operand(graph, node, slot::Y),
        ) else {
            return FloatingAction::Add;
        };
        let folded = match node.kind() {
            NodeKind::Binary(op) => op.fold(x, y),
            NodeKind::Compare(op) => op.fold(x, y),
            _ => None,
        };
        match folded {
            Some(value) => FloatingAction::Replace(Node::new(NodeKind::Constant(value))),
            None => FloatingAction::Add,
        }
    }

    fn handle_fixed_node(
        &mut self,
        graph: &mut Graph,
        node: NodeId,
    ) -> Result<Option<NodeId>, CodecError> {
        if !matches!(graph.kind(node), NodeKind::If { .. }) {
            return Ok(None);
        }
        let taken = match constant_operand(graph, graph.node(node), slot::VALUE) {
            Some(ConstValue::Bool(true)) => slot::TRUE_SUCCESSOR,
            Some(ConstValue::Bool(false)) => slot::FALSE_SUCCESSOR,
            _ => return Ok(None),
        };
        Ok(graph.successor(node, taken))
    }

    fn check_loop_explosion_iteration(
        &mut self,
        iteration: &ExplosionIteration,
    ) -> Result<(), CodecError> {
        self.bound.check_loop_explosion_iteration(iteration)
    }
}
