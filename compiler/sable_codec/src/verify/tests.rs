use pretty_assertions::assert_eq;
use sable_ir::BinaryOp;

use super::*;
use crate::test_helpers::{constant, counting_loop, diamond};

#[test]
fn identical_graphs_are_equal() {
    assert_eq!(verify_graphs_equal(&diamond().graph, &diamond().graph), Ok(()));
    let loop_graph = counting_loop(BinaryOp::Add);
    assert_eq!(verify_graphs_equal(&loop_graph, &counting_loop(BinaryOp::Add)), Ok(()));
}

#[test]
fn different_phi_value_is_reported() {
    let expected = diamond();
    let mut actual = diamond();
    let three = constant(&mut actual.graph, 3);
    actual.graph.remove_input_at(actual.phi, slot::VALUES, 1);
    actual.graph.push_input(actual.phi, slot::VALUES, Some(three));

    let result = verify_graphs_equal(&expected.graph, &actual.graph);
    assert!(matches!(result, Err(CodecError::Internal { .. })));
}

#[test]
fn different_operation_is_reported() {
    let result = verify_graphs_equal(&counting_loop(BinaryOp::Add), &counting_loop(BinaryOp::Xor));
    assert!(result.is_err());
}

/// Merge end order does not matter as long as each end carries the same
/// phi value.
#[test]
fn merge_end_order_is_ignored() {
    let expected = diamond();
    let mut actual = diamond();
    let then_value = actual.graph.phi_value_at(actual.phi, actual.then_end);
    actual.graph.remove_end(actual.merge, actual.then_end);
    actual.graph.add_forward_end(actual.merge, actual.then_end);
    actual.graph.push_input(actual.phi, slot::VALUES, then_value);
    assert_eq!(
        actual.graph.forward_ends(actual.merge).as_slice(),
        &[actual.else_end, actual.then_end]
    );

    assert_eq!(verify_graphs_equal(&expected.graph, &actual.graph), Ok(()));
}
