use pretty_assertions::assert_eq;
use proptest::prelude::*;
use rustc_hash::FxHashSet;
use sable_ir::{ConstValue, GuardsStage, Node, Probability};

use super::order::NodeOrder;
use super::*;
use crate::layout::{FIRST_NODE_ORDER_ID, START_ORDER_ID};
use crate::stream::TypeReader;
use crate::test_helpers::{constant, counting_loop, diamond, int_value, parameter, round_trip};

/// Order id of `node`, failing the test if it has none.
fn id_of(order: &NodeOrder, node: NodeId) -> u32 {
    order.order_id(node).unwrap()
}

/// Every fixed node other than a merge is numbered after its predecessor,
/// and a begin's next directly follows the begin.
fn assert_fixed_order(graph: &Graph, order: &NodeOrder) {
    for id in graph.node_ids() {
        let class = graph.class(id);
        if !class.is_fixed() {
            continue;
        }
        let order_id = id_of(order, id);
        assert!(order_id <= order.max_fixed_node_order_id());
        if class.is_begin() {
            if let Some(next) = graph.next(id) {
                assert_eq!(id_of(order, next), order_id + 1);
            }
        }
        if let Some(predecessor) = graph.predecessor(id) {
            assert!(id_of(order, predecessor) < order_id);
        }
    }
}

/// Chained diamonds, each merging one pair of `values` and feeding the phi
/// into a sink; the last phi is returned.
fn diamond_chain(values: &[(i32, i32)]) -> Graph {
    let mut graph = Graph::new();
    let cond = parameter(&mut graph, 0);
    let mut tail = graph.start();
    let mut last = None;
    for &(left, right) in values {
        let left = constant(&mut graph, left);
        let right = constant(&mut graph, right);
        let then_end = graph.add_kind(NodeKind::End);
        let else_end = graph.add_kind(NodeKind::End);
        let then_begin = graph.add(Node::new(NodeKind::Begin).with_successor(slot::NEXT, then_end));
        let else_begin = graph.add(Node::new(NodeKind::Begin).with_successor(slot::NEXT, else_end));
        let branch = graph.add(
            Node::new(NodeKind::If {
                true_probability: Probability::new(0.25),
            })
            .with_input(slot::VALUE, cond)
            .with_successor(slot::TRUE_SUCCESSOR, then_begin)
            .with_successor(slot::FALSE_SUCCESSOR, else_begin),
        );
        graph.set_next(tail, Some(branch));
        let merge = graph
            .add(Node::new(NodeKind::Merge).with_input_list(slot::ENDS, [then_end, else_end]));
        let phi = graph.add(
            Node::new(NodeKind::Phi)
                .with_input(slot::PHI_MERGE, merge)
                .with_input_list(slot::VALUES, [left, right]),
        );
        let sink = graph.add(Node::new(NodeKind::Sink).with_input(slot::VALUE, phi));
        graph.set_next(merge, Some(sink));
        tail = sink;
        last = Some(phi);
    }
    let ret = graph.add(Node::new(NodeKind::Return));
    graph.set_input(ret, slot::VALUE, last);
    graph.set_next(tail, Some(ret));
    graph
}

// ── Order ids ───────────────────────────────────────────────────────

#[test]
fn diamond_order_ids() {
    let d = diamond();
    let order = NodeOrder::compute(&d.graph).unwrap();

    assert_eq!(id_of(&order, d.graph.start()), START_ORDER_ID);
    assert_eq!(id_of(&order, d.branch), FIRST_NODE_ORDER_ID);
    assert_eq!(id_of(&order, d.then_begin), 3);
    assert_eq!(id_of(&order, d.then_end), 4);
    assert_eq!(id_of(&order, d.else_begin), 5);
    assert_eq!(id_of(&order, d.else_end), 6);
    assert_eq!(id_of(&order, d.merge), 7);
    assert_eq!(id_of(&order, d.ret), 8);
    assert_eq!(order.max_fixed_node_order_id(), 8);

    // Parameters right after the fixed nodes, floating nodes after them.
    assert_eq!(id_of(&order, d.cond), 9);
    assert!(id_of(&order, d.phi) > 9);
    assert_eq!(order.node_count(), 13);
    assert_eq!(order.nodes()[0], None);
    assert_fixed_order(&d.graph, &order);
}

#[test]
fn parameter_block_keeps_holes() {
    let mut graph = Graph::new();
    let first = parameter(&mut graph, 0);
    let third = parameter(&mut graph, 2);
    let sum = graph.add(
        Node::new(NodeKind::Binary(sable_ir::BinaryOp::Add))
            .with_input(slot::X, first)
            .with_input(slot::Y, third),
    );
    let ret = graph.add(Node::new(NodeKind::Return).with_input(slot::VALUE, sum));
    let start = graph.start();
    graph.set_next(start, Some(ret));

    let order = NodeOrder::compute(&graph).unwrap();
    let base = order.max_fixed_node_order_id() + 1;
    assert_eq!(id_of(&order, first), base);
    assert_eq!(id_of(&order, third), base + 2);
    assert_eq!(order.nodes()[base as usize + 1], None);
    assert_eq!(id_of(&order, sum), base + 3);
}

#[test]
fn loop_order_ids() {
    let graph = counting_loop(sable_ir::BinaryOp::Add);
    let order = NodeOrder::compute(&graph).unwrap();
    assert_fixed_order(&graph, &order);
    let loop_begin = graph.nodes_of(NodeClass::LoopBegin).next().unwrap();
    let loop_end = graph.nodes_of(NodeClass::LoopEnd).next().unwrap();
    assert!(id_of(&order, loop_begin) < id_of(&order, loop_end));
}

#[test]
fn proxy_placeholder_is_rejected() {
    let mut d = diamond();
    let placeholder = d.graph.add(
        Node::new(NodeKind::ProxyPlaceholder)
            .with_input(slot::VALUE, d.phi)
            .with_input(slot::PROXY_POINT, d.merge),
    );
    d.graph.set_input(d.ret, slot::VALUE, Some(placeholder));
    let result = encode_single_graph(&d.graph);
    assert!(matches!(result, Err(CodecError::Internal { .. })));
}

// ── Wire format ─────────────────────────────────────────────────────

#[test]
fn order_id_width_follows_node_count() {
    assert_eq!(OrderIdWidth::for_node_count(12), OrderIdWidth::One);
    assert_eq!(OrderIdWidth::for_node_count(255), OrderIdWidth::One);
    assert_eq!(OrderIdWidth::for_node_count(256), OrderIdWidth::Two);
    assert_eq!(OrderIdWidth::for_node_count(65_535), OrderIdWidth::Two);
    assert_eq!(OrderIdWidth::for_node_count(65_536), OrderIdWidth::Four);

    let mut writer = TypeWriter::new();
    OrderIdWidth::One.write(&mut writer, 200);
    OrderIdWidth::Two.write(&mut writer, 300);
    OrderIdWidth::Four.write(&mut writer, 70_000);
    assert_eq!(writer.bytes_written(), 7);
    let mut reader = TypeReader::new(Arc::from(writer.into_bytes()), 0);
    assert_eq!(OrderIdWidth::One.read(&mut reader), Ok(200));
    assert_eq!(OrderIdWidth::Two.read(&mut reader), Ok(300));
    assert_eq!(OrderIdWidth::Four.read(&mut reader), Ok(70_000));
}

#[test]
fn trailer_describes_the_graph() {
    let mut d = diamond();
    d.graph.set_guards_stage(GuardsStage::FixedDeopts);
    let encoded = encode_single_graph(&d.graph).unwrap();
    let header = encoded.read_header().unwrap();

    assert_eq!(header.max_fixed_node_order_id, 8);
    assert_eq!(header.node_count, 13);
    assert_eq!(header.node_start_offsets.len(), 13);
    assert_eq!(header.guards_stage, GuardsStage::FixedDeopts);
    // Records are laid out in order-id order before the trailer.
    let offsets = &header.node_start_offsets[START_ORDER_ID as usize..];
    assert!(offsets.windows(2).all(|pair| pair[0] < pair[1]));
    assert!(offsets.iter().all(|&offset| offset < encoded.start_offset()));
}

#[test]
fn encode_requires_closed_tables() {
    let d = diamond();
    let mut encoder = GraphEncoder::new();
    encoder.prepare(&d.graph);
    assert!(matches!(
        encoder.encode(&d.graph),
        Err(CodecError::Internal { .. })
    ));
    assert!(encoder.encoding().is_err());
}

/// A default encoder starts with open tables; preparing fills them and
/// closing makes the encoding available.
#[test]
fn default_encoder_closes_prepared_tables() {
    let d = diamond();
    let mut encoder = GraphEncoder::default();
    assert!(encoder.encoding().is_err());
    encoder.prepare(&d.graph);
    assert!(!encoder.classes.is_closed());
    encoder.finish_prepare();

    // The guards stage is always interned.
    let objects = encoder.objects.values().unwrap();
    assert_eq!(objects.len(), encoder.objects.len());
    assert!(objects.contains(&Object::GuardsStage(d.graph.guards_stage())));
    let classes = encoder.classes.values().unwrap();
    assert_eq!(classes.len(), encoder.classes.len());
    encoder.encode(&d.graph).unwrap();
    let encoding = encoder.encoding().unwrap();
    assert!(encoding.classes().contains(&NodeClass::Merge));
    assert!(!encoding.bytes().is_empty());
}

/// Classes and objects are interned once for all graphs of an encoding.
#[test]
fn graphs_share_one_encoding() {
    let first = diamond().graph;
    let second = counting_loop(sable_ir::BinaryOp::Sub);
    let mut encoder = GraphEncoder::with_options(EncoderOptions {
        verify_round_trip: true,
    });
    encoder.prepare(&first);
    encoder.prepare(&second);
    encoder.finish_prepare();
    let first_offset = encoder.encode(&first).unwrap();
    let second_offset = encoder.encode(&second).unwrap();
    assert!(first_offset < second_offset);

    let encoding = encoder.into_encoding().unwrap();
    let classes = encoding.classes();
    let unique: FxHashSet<&NodeClass> = classes.iter().collect();
    assert_eq!(unique.len(), classes.len());

    for (source, offset) in [(&first, first_offset), (&second, second_offset)] {
        let encoded = EncodedGraph::new(encoding.clone(), offset);
        let mut decoded = Graph::new();
        GraphDecoder::with_options(&mut decoded, NoopPlugin, DecoderOptions::strict())
            .decode(&encoded)
            .unwrap();
        assert_eq!(verify_graphs_equal(source, &decoded), Ok(()));
    }
}

// ── Round trips ─────────────────────────────────────────────────────

/// The merged value keeps one phi with its inputs in branch order.
#[test]
fn diamond_round_trip_keeps_phi_order() {
    let d = diamond();
    let decoded = round_trip(&d.graph);

    let phis: Vec<NodeId> = decoded.nodes_of(NodeClass::Phi).collect();
    assert_eq!(phis.len(), 1);
    let merge = decoded.input(phis[0], slot::PHI_MERGE).unwrap();
    let ends = decoded.forward_ends(merge);
    let values: Vec<Option<i32>> = ends
        .iter()
        .map(|&end| decoded.phi_value_at(phis[0], end).and_then(|v| int_value(&decoded, v)))
        .collect();
    assert_eq!(values, vec![Some(1), Some(2)]);

    let ret = decoded.nodes_of(NodeClass::Return).next().unwrap();
    assert_eq!(decoded.input(ret, slot::VALUE), Some(phis[0]));
    assert_eq!(decoded.live_node_count(), d.graph.live_node_count());
}

/// More than 255 order ids switch the graph to two-byte edges.
#[test]
fn wide_graph_round_trip() {
    let mut graph = Graph::new();
    let mut tail = graph.start();
    for value in 0..150 {
        let value = graph.unique(Node::new(NodeKind::Constant(ConstValue::Long(value))));
        let sink = graph.add(Node::new(NodeKind::Sink).with_input(slot::VALUE, value));
        graph.set_next(tail, Some(sink));
        tail = sink;
    }
    let ret = graph.add_kind(NodeKind::Return);
    graph.set_next(tail, Some(ret));

    let order = NodeOrder::compute(&graph).unwrap();
    assert_eq!(OrderIdWidth::for_node_count(order.node_count()), OrderIdWidth::Two);
    let decoded = round_trip(&graph);
    assert_eq!(verify_graphs_equal(&graph, &decoded), Ok(()));
}

proptest! {
    #[test]
    fn diamond_chains_round_trip(values in prop::collection::vec((-50i32..50, -50i32..50), 1..8)) {
        let graph = diamond_chain(&values);
        let order = NodeOrder::compute(&graph).unwrap();
        assert_fixed_order(&graph, &order);

        let decoded = round_trip(&graph);
        prop_assert_eq!(verify_graphs_equal(&graph, &decoded), Ok(()));
        prop_assert_eq!(
            decoded.nodes_of(NodeClass::Phi).count(),
            graph.nodes_of(NodeClass::Phi).count()
        );
    }
}
