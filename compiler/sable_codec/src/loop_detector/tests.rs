use pretty_assertions::assert_eq;
use sable_ir::{BinaryOp, CompareOp};

use super::*;
use crate::test_helpers::{constant, parameter};

fn frame_state(graph: &mut Graph, bci: i32, values: &[NodeId]) -> NodeId {
    graph.add(
        Node::new(NodeKind::FrameState { bci }).with_input_list(slot::VALUES, values.iter().copied()),
    )
}

fn branch(graph: &mut Graph, cond: NodeId, on_true: NodeId, on_false: NodeId) -> NodeId {
    let then_begin = graph.add(Node::new(NodeKind::Begin).with_successor(slot::NEXT, on_true));
    let else_begin = graph.add(Node::new(NodeKind::Begin).with_successor(slot::NEXT, on_false));
    graph.add(
        Node::new(NodeKind::If {
            true_probability: Probability::new(0.5),
        })
        .with_input(slot::VALUE, cond)
        .with_successor(slot::TRUE_SUCCESSOR, then_begin)
        .with_successor(slot::FALSE_SUCCESSOR, else_begin),
    )
}

fn merge(graph: &mut Graph, ends: &[NodeId]) -> NodeId {
    graph.add(Node::new(NodeKind::Merge).with_input_list(slot::ENDS, ends.iter().copied()))
}

/// A merge-exploded counting loop:
///
/// ```text
/// start -> end -> M [v = phi(0, v + 1)] -> if(v < p0)
///     true:  begin -> end -> M
///     false: begin -> end -> X -> return(placeholder(v) at X)
/// ```
struct ExplodedLoop {
    graph: Graph,
    mark: GraphMark,
    header: NodeId,
    exit_merge: NodeId,
    ret: NodeId,
}

fn exploded_loop() -> ExplodedLoop {
    let mut graph = Graph::new();
    let limit = parameter(&mut graph, 0);
    let mark = graph.mark();
    let zero = constant(&mut graph, 0);
    let one = constant(&mut graph, 1);

    let entry = graph.add_kind(NodeKind::End);
    let start = graph.start();
    graph.set_next(start, Some(entry));
    let back = graph.add_kind(NodeKind::End);
    let header = merge(&mut graph, &[entry, back]);
    let value = graph.add(
        Node::new(NodeKind::Phi)
            .with_input(slot::PHI_MERGE, header)
            .with_input_list(slot::VALUES, [zero]),
    );
    let step = graph.add(
        Node::new(NodeKind::Binary(BinaryOp::Add))
            .with_input(slot::X, value)
            .with_input(slot::Y, one),
    );
    graph.push_input(value, slot::VALUES, Some(step));
    let state = frame_state(&mut graph, 0, &[value, limit]);
    graph.set_state_after(header, Some(state));

    let compare = graph.add(
        Node::new(NodeKind::Compare(CompareOp::Lt))
            .with_input(slot::X, value)
            .with_input(slot::Y, limit),
    );
    let exit_end = graph.add_kind(NodeKind::End);
    let test = branch(&mut graph, compare, back, exit_end);
    graph.set_next(header, Some(test));

    let exit_merge = merge(&mut graph, &[exit_end]);
    let placeholder = graph.add(
        Node::new(NodeKind::ProxyPlaceholder)
            .with_input(slot::VALUE, value)
            .with_input(slot::PROXY_POINT, exit_merge),
    );
    let exit_state = frame_state(&mut graph, 7, &[placeholder, limit]);
    graph.set_state_after(exit_merge, Some(exit_state));
    let ret = graph.add(Node::new(NodeKind::Return).with_input(slot::VALUE, placeholder));
    graph.set_next(exit_merge, Some(ret));

    ExplodedLoop {
        graph,
        mark,
        header,
        exit_merge,
        ret,
    }
}

#[test]
fn back_edge_becomes_loop() {
    crate::init_tracing();
    let mut l = exploded_loop();
    let merges: FxHashSet<NodeId> = [l.header, l.exit_merge].into_iter().collect();
    LoopDetector::new(&mut l.graph, &merges, l.header, l.mark)
        .run()
        .unwrap();

    let loop_begins: Vec<NodeId> = l.graph.nodes_of(NodeClass::LoopBegin).collect();
    assert_eq!(loop_begins.len(), 1);
    let loop_begin = loop_begins[0];
    assert_eq!(l.graph.loop_ends(loop_begin).len(), 1);
    let exits = l.graph.loop_exits(loop_begin);
    assert_eq!(exits.len(), 1);

    // The old header now only feeds the loop begin.
    assert_eq!(l.graph.forward_end_count(l.header), 1);
    let pre_loop_end = l.graph.next(l.header).unwrap();
    assert_eq!(l.graph.end_merge(pre_loop_end), Some(loop_begin));

    // The loop phi starts from the old phi and takes the step on the back edge.
    let loop_phis = l.graph.phis(loop_begin);
    assert_eq!(loop_phis.len(), 1);
    assert_eq!(l.graph.phi_predecessor_count(loop_begin), 2);

    // The value leaving the loop is proxied at the exit.
    let exit_state = l.graph.state_after(exits[0]).unwrap();
    let first = l.graph.state_values(exit_state)[0].unwrap();
    assert_eq!(l.graph.class(first), NodeClass::ValueProxy);
    assert_eq!(l.graph.input(first, slot::VALUE), Some(loop_phis[0]));
    assert_eq!(l.graph.input(first, slot::PROXY_LOOP_EXIT), Some(exits[0]));
    let returned = l.graph.input(l.ret, slot::VALUE).unwrap();
    assert_eq!(l.graph.unwrap_placeholder(Some(returned)), Some(first));

    assert_eq!(l.graph.verify(), Ok(()));
}

#[test]
fn back_edge_into_plain_merge_is_an_error() {
    let mut l = exploded_loop();
    let merges = FxHashSet::default();
    let result = LoopDetector::new(&mut l.graph, &merges, l.header, l.mark).run();
    assert!(matches!(result, Err(CodecError::Internal { .. })));
}

/// A cycle that can be entered at either of its merges, both carrying
/// `loop_values`:
///
/// ```text
/// split: if(cond)
///     true:  begin -> end -> first -> end -> second
///     false: begin -> end -> second
/// second -> if(cond)
///     true:  begin -> end -> first
///     false: begin -> leave
/// ```
struct Cycle {
    split: NodeId,
    first: NodeId,
    second: NodeId,
    leave: NodeId,
}

fn two_entry_cycle(graph: &mut Graph, cond: NodeId, loop_values: &[NodeId]) -> Cycle {
    let to_first = graph.add_kind(NodeKind::End);
    let to_second = graph.add_kind(NodeKind::End);
    let first_to_second = graph.add_kind(NodeKind::End);
    let back = graph.add_kind(NodeKind::End);
    let leave = graph.add_kind(NodeKind::End);
    let split = branch(graph, cond, to_first, to_second);

    let first = merge(graph, &[to_first, back]);
    let first_state = frame_state(graph, 4, loop_values);
    graph.set_state_after(first, Some(first_state));
    graph.set_next(first, Some(first_to_second));

    let second = merge(graph, &[to_second, first_to_second]);
    let second_state = frame_state(graph, 4, loop_values);
    graph.set_state_after(second, Some(second_state));
    let test = branch(graph, cond, back, leave);
    graph.set_next(second, Some(test));

    Cycle {
        split,
        first,
        second,
        leave,
    }
}

/// Two explosion merges that each entered the cycle from the head:
///
/// ```text
/// start -> end -> H -> if(p0)
///     true:  begin -> end -> A -> end -> B
///     false: begin -> end -> B
/// B -> if(p0)
///     true:  begin -> end -> A
///     false: begin -> end -> (exit) -> return
/// ```
///
/// The walk from `H` reaches `B` first, so `A -> B` is the back edge and
/// the cycle's second entry runs through `H`.
struct Irreducible {
    graph: Graph,
    mark: GraphMark,
    head: NodeId,
    merges: FxHashSet<NodeId>,
    first: NodeId,
    second: NodeId,
}

/// `head_keys` seed the head's frame state; `loop_keys` the state of both
/// cycle merges, with `None` standing for a parameter. With `exit_loop` the
/// exit path runs through a reducible loop of its own.
fn irreducible(head_keys: &[i32], loop_keys: &[Option<i32>], exit_loop: bool) -> Irreducible {
    let mut graph = Graph::new();
    let cond = parameter(&mut graph, 0);
    let entry = graph.add_kind(NodeKind::End);
    let start = graph.start();
    graph.set_next(start, Some(entry));
    let mark = graph.mark();

    let head_values: Vec<NodeId> = head_keys.iter().map(|&k| constant(&mut graph, k)).collect();
    let loop_values: Vec<NodeId> = loop_keys
        .iter()
        .map(|&k| match k {
            Some(k) => constant(&mut graph, k),
            None => cond,
        })
        .collect();

    let head = merge(&mut graph, &[entry]);
    let head_state = frame_state(&mut graph, 0, &head_values);
    graph.set_state_after(head, Some(head_state));
    let Cycle {
        split,
        first,
        second,
        leave,
    } = two_entry_cycle(&mut graph, cond, &loop_values);
    graph.set_next(head, Some(split));

    let mut merges: FxHashSet<NodeId> = [head, first, second].into_iter().collect();
    let ret = graph.add_kind(NodeKind::Return);
    if exit_loop {
        let inner_back = graph.add_kind(NodeKind::End);
        let inner = merge(&mut graph, &[leave, inner_back]);
        let inner_state = frame_state(&mut graph, 9, &head_values);
        graph.set_state_after(inner, Some(inner_state));
        let inner_exit = graph.add(Node::new(NodeKind::Begin).with_successor(slot::NEXT, ret));
        let inner_test = graph.add(
            Node::new(NodeKind::If {
                true_probability: Probability::new(0.5),
            })
            .with_input(slot::VALUE, cond)
            .with_successor(slot::FALSE_SUCCESSOR, inner_exit),
        );
        let inner_body =
            graph.add(Node::new(NodeKind::Begin).with_successor(slot::NEXT, inner_back));
        graph.set_successor(inner_test, slot::TRUE_SUCCESSOR, Some(inner_body));
        graph.set_next(inner, Some(inner_test));
        merges.insert(inner);
    } else {
        let tail = merge(&mut graph, &[leave]);
        graph.set_next(tail, Some(ret));
    }

    Irreducible {
        graph,
        mark,
        head,
        merges,
        first,
        second,
    }
}

#[test]
fn irreducible_loop_dispatches_through_switch() {
    crate::init_tracing();
    let mut g = irreducible(&[0, 5], &[Some(1), Some(5)], false);
    LoopDetector::new(&mut g.graph, &g.merges, g.head, g.mark)
        .run()
        .unwrap();

    let switches: Vec<NodeId> = g.graph.nodes_of(NodeClass::IntegerSwitch).collect();
    assert_eq!(switches.len(), 1);
    let switch = switches[0];
    let NodeKind::IntegerSwitch(table) = g.graph.kind(switch) else {
        panic!("dispatch is not a switch");
    };
    assert_eq!(table.keys, vec![0, 1]);
    assert_eq!(table.key_successors, vec![0, 1, 2]);
    assert_eq!(
        table.probabilities,
        vec![
            Probability::new(0.5),
            Probability::new(0.5),
            Probability::new(0.0)
        ]
    );

    // Unknown keys deoptimize.
    let successors = g
        .graph
        .successor_list(switch, slot::SWITCH_SUCCESSORS)
        .cloned()
        .unwrap();
    let default = successors[2].unwrap();
    let deopt = g.graph.next(default).unwrap();
    assert_eq!(
        g.graph.kind(deopt),
        &NodeKind::Deoptimize(DeoptReason::UnreachedCode)
    );

    // The head became the one loop, switching on its loop variable.
    let loop_begins: Vec<NodeId> = g.graph.nodes_of(NodeClass::LoopBegin).collect();
    assert_eq!(loop_begins.len(), 1);
    let key = g.graph.input(switch, slot::VALUE).unwrap();
    assert!(g.graph.is_phi_at_merge(key, loop_begins[0]));
    assert_eq!(g.graph.loop_ends(loop_begins[0]).len(), 1);
    assert_eq!(g.graph.verify(), Ok(()));
}

/// Loops are handled inner first, so a loop found before the irreducible
/// one is already rewritten when the bailout happens; the irreducible
/// loop itself is left untouched.
#[test]
fn two_varying_values_bail_out() {
    let mut g = irreducible(&[0, 0], &[Some(1), Some(1)], true);
    let result = LoopDetector::new(&mut g.graph, &g.merges, g.head, g.mark).run();

    let error = result.unwrap_err();
    assert!(error.is_permanent_bailout(), "{error}");
    assert_eq!(g.graph.nodes_of(NodeClass::LoopBegin).count(), 1);
    assert_eq!(g.graph.nodes_of(NodeClass::IntegerSwitch).count(), 0);
    assert_eq!(g.graph.forward_end_count(g.first), 2);
    assert_eq!(g.graph.forward_end_count(g.second), 2);
    assert!(g.graph.phis(g.head).is_empty());
    assert_eq!(g.graph.verify(), Ok(()));
}

#[test]
fn non_constant_loop_variable_bails_out() {
    let mut g = irreducible(&[0], &[None], false);
    let result = LoopDetector::new(&mut g.graph, &g.merges, g.head, g.mark).run();

    assert!(result.is_err_and(|error| error.is_permanent_bailout()));
    assert_eq!(g.graph.nodes_of(NodeClass::IntegerSwitch).count(), 0);
    assert_eq!(g.graph.nodes_of(NodeClass::LoopBegin).count(), 0);
}

/// Two irreducible cycles one after the other, each with its own key:
///
/// ```text
/// start -> end -> H [0] -> cycle [1] -> merge -> cycle [2] -> merge -> return
/// ```
///
/// The second cycle found extends the switch built for the first.
#[test]
fn second_irreducible_loop_extends_the_dispatch_switch() {
    crate::init_tracing();
    let mut graph = Graph::new();
    let cond = parameter(&mut graph, 0);
    let entry = graph.add_kind(NodeKind::End);
    let start = graph.start();
    graph.set_next(start, Some(entry));
    let mark = graph.mark();

    let keys: Vec<NodeId> = [0, 1, 2, 5].iter().map(|&k| constant(&mut graph, k)).collect();
    let head = merge(&mut graph, &[entry]);
    let head_state = frame_state(&mut graph, 0, &[keys[0], keys[3]]);
    graph.set_state_after(head, Some(head_state));

    let outer = two_entry_cycle(&mut graph, cond, &[keys[1], keys[3]]);
    graph.set_next(head, Some(outer.split));
    let between = merge(&mut graph, &[outer.leave]);
    let inner = two_entry_cycle(&mut graph, cond, &[keys[2], keys[3]]);
    graph.set_next(between, Some(inner.split));
    let tail = merge(&mut graph, &[inner.leave]);
    let ret = graph.add_kind(NodeKind::Return);
    graph.set_next(tail, Some(ret));

    let merges: FxHashSet<NodeId> = [head, outer.first, outer.second, inner.first, inner.second]
        .into_iter()
        .collect();
    LoopDetector::new(&mut graph, &merges, head, mark)
        .run()
        .unwrap();

    let switches: Vec<NodeId> = graph.nodes_of(NodeClass::IntegerSwitch).collect();
    assert_eq!(switches.len(), 1);
    let switch = switches[0];
    let NodeKind::IntegerSwitch(table) = graph.kind(switch) else {
        panic!("dispatch is not a switch");
    };
    assert_eq!(table.keys, vec![0, 1, 2]);
    assert_eq!(table.key_successors, vec![0, 1, 2, 3]);
    let third = Probability::new(1.0 / 3.0);
    assert_eq!(
        table.probabilities,
        vec![third, third, third, Probability::new(0.0)]
    );

    let successors = graph
        .successor_list(switch, slot::SWITCH_SUCCESSORS)
        .cloned()
        .unwrap();
    assert_eq!(successors.len(), 4);
    let deopt = graph.next(successors[3].unwrap()).unwrap();
    assert_eq!(
        graph.kind(deopt),
        &NodeKind::Deoptimize(DeoptReason::UnreachedCode)
    );

    let loop_begins: Vec<NodeId> = graph.nodes_of(NodeClass::LoopBegin).collect();
    assert_eq!(loop_begins.len(), 1);
    assert_eq!(graph.loop_ends(loop_begins[0]).len(), 2);
    let key = graph.input(switch, slot::VALUE).unwrap();
    assert!(graph.is_phi_at_merge(key, loop_begins[0]));
    assert_eq!(graph.forward_end_count(outer.second), 2);
    assert_eq!(graph.forward_end_count(inner.second), 2);
    assert_eq!(graph.verify(), Ok(()));
}
