//! Wire layout shared by the encoder and the decoder.
//!
//! Per node: class index (uv), the encoded direct inputs (fixed-width
//! order ids), the encoded input lists (sv count, -1 for null, then ids),
//! data fields (primitive: sv; object: uv table index), successors in the
//! same shape as inputs, then the class-specific trailer.
//!
//! Some edges are never written as ordinary edges because the decoder
//! rebuilds them from trailers or from merge processing; the predicates
//! below are the single source of truth for both sides.

use sable_ir::NodeClass;

use crate::stream::{StreamError, TypeReader, TypeWriter};

pub const NULL_ORDER_ID: u32 = 0;
pub const START_ORDER_ID: u32 = 1;
pub const FIRST_NODE_ORDER_ID: u32 = 2;
/// A begin node's `next` always gets the begin's order id plus this.
pub const BEGIN_NEXT_ORDER_ID_OFFSET: u32 = 1;

/// Fixed width of every order id in one encoded graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrderIdWidth {
    One,
    Two,
    Four,
}

impl OrderIdWidth {
    pub fn for_node_count(node_count: u32) -> Self {
        if node_count <= u32::from(u8::MAX) {
            OrderIdWidth::One
        } else if node_count <= u32::from(u16::MAX) {
            OrderIdWidth::Two
        } else {
            OrderIdWidth::Four
        }
    }

    #[expect(
        clippy::cast_possible_truncation,
        reason = "the width is chosen so every order id of the graph fits"
    )]
    pub fn write(self, writer: &mut TypeWriter, order_id: u32) {
        match self {
            OrderIdWidth::One => writer.put_u1(order_id as u8),
            OrderIdWidth::Two => writer.put_u2(order_id as u16),
            OrderIdWidth::Four => writer.put_u4(order_id),
        }
    }

    pub fn read(self, reader: &mut TypeReader) -> Result<u32, StreamError> {
        Ok(match self {
            OrderIdWidth::One => u32::from(reader.get_u1()?),
            OrderIdWidth::Two => u32::from(reader.get_u2()?),
            OrderIdWidth::Four => reader.get_u4()?,
        })
    }
}

/// Whether direct input `slot` of `class` is written as an ordinary edge.
pub fn encodes_direct_input(class: NodeClass, slot: usize) -> bool {
    match class {
        NodeClass::Phi | NodeClass::Invoke | NodeClass::InvokeWithException => false,
        NodeClass::LoopExit => class.state_after_slot() != Some(slot),
        _ => true,
    }
}

/// Whether the input lists of `class` are written as ordinary edges.
pub fn encodes_input_lists(class: NodeClass) -> bool {
    !matches!(class, NodeClass::Phi | NodeClass::Merge | NodeClass::LoopBegin)
}

/// Whether the successors of `class` are written as ordinary edges.
pub fn encodes_successors(class: NodeClass) -> bool {
    !class.is_invoke()
}
