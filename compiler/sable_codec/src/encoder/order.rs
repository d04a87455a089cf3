//! Order id assignment.
//!
//! Fixed nodes are numbered in reverse postorder of the control-flow
//! skeleton, starting with `Start` at [`START_ORDER_ID`]. A begin node's
//! `next` is numbered right after the begin. Parameters follow as one
//! block indexed by parameter number (holes allowed), then every other
//! live node in arena order.

use std::collections::VecDeque;

use sable_ir::{Graph, NodeClass, NodeId, NodeKind};

use crate::layout::{BEGIN_NEXT_ORDER_ID_OFFSET, START_ORDER_ID};
use crate::CodecError;

pub(crate) struct NodeOrder {
    /// Order id per node handle; 0 while unassigned.
    order_ids: Vec<u32>,
    /// Node per order id.
    nodes: Vec<Option<NodeId>>,
    max_fixed_node_order_id: u32,
}

impl NodeOrder {
    pub(crate) fn compute(graph: &Graph) -> Result<Self, CodecError> {
        if let Some(placeholder) = graph.nodes_of(NodeClass::ProxyPlaceholder).next() {
            return Err(CodecError::internal(format!(
                "proxy placeholder {placeholder:?} cannot be encoded"
            )));
        }

        let mut numbering = Numbering {
            order_ids: vec![0; graph.capacity()],
            next_order_id: START_ORDER_ID,
        };
        numbering.number_fixed_nodes(graph);
        let max_fixed_node_order_id = numbering.next_order_id - 1;
        numbering.number_parameters(graph)?;
        for id in graph.node_ids() {
            numbering.add(id);
        }

        let mut nodes = vec![None; numbering.next_order_id as usize];
        for id in graph.node_ids() {
            let order_id = numbering.order_ids[id.index()] as usize;
            if let Some(previous) = nodes[order_id].replace(id) {
                return Err(CodecError::internal(format!(
                    "{previous:?} and {id:?} share order id {order_id}"
                )));
            }
        }

        Ok(NodeOrder {
            order_ids: numbering.order_ids,
            nodes,
            max_fixed_node_order_id,
        })
    }

    pub(crate) fn order_id(&self, node: NodeId) -> Option<u32> {
        self.order_ids
            .get(node.index())
            .copied()
            .filter(|&id| id != 0)
    }

    /// Number of order ids handed out, including 0 and parameter holes.
    #[expect(
        clippy::cast_possible_truncation,
        reason = "order ids are u32 and there is one slot per id"
    )]
    pub(crate) fn node_count(&self) -> u32 {
        self.nodes.len() as u32
    }

    pub(crate) fn max_fixed_node_order_id(&self) -> u32 {
        self.max_fixed_node_order_id
    }

    /// Node per order id; `None` for 0 and for holes.
    pub(crate) fn nodes(&self) -> &[Option<NodeId>] {
        &self.nodes
    }
}

struct Numbering {
    order_ids: Vec<u32>,
    next_order_id: u32,
}

impl Numbering {
    fn add(&mut self, node: NodeId) {
        let slot = &mut self.order_ids[node.index()];
        if *slot == 0 {
            *slot = self.next_order_id;
            self.next_order_id += 1;
        }
    }

    fn is_numbered(&self, node: NodeId) -> bool {
        self.order_ids[node.index()] != 0
    }

    /// Control-split successors go to the front of the queue (first
    /// successor first); a merge is queued at the back once all of its
    /// forward ends are numbered.
    fn number_fixed_nodes(&mut self, graph: &Graph) {
        let mut queue: VecDeque<NodeId> = VecDeque::new();
        let mut current = Some(graph.start());
        while let Some(node) = current {
            self.add(node);
            let class = graph.class(node);
            if class.is_begin() {
                if let Some(next) = graph.next(node) {
                    self.add(next);
                    debug_assert_eq!(
                        self.order_ids[next.index()],
                        self.order_ids[node.index()] + BEGIN_NEXT_ORDER_ID_OFFSET
                    );
                }
            }

            current = if class.is_control_split() {
                for &successor in graph.cfg_successors(node).iter().rev() {
                    queue.push_front(successor);
                }
                queue.pop_front()
            } else if class.has_next() {
                graph.next(node).or_else(|| queue.pop_front())
            } else {
                if class == NodeClass::End {
                    if let Some(merge) = graph.end_merge(node) {
                        let ready = graph
                            .forward_ends(merge)
                            .iter()
                            .all(|&end| self.is_numbered(end));
                        if ready {
                            queue.push_back(merge);
                        }
                    }
                }
                queue.pop_front()
            };
        }
    }

    fn number_parameters(&mut self, graph: &Graph) -> Result<(), CodecError> {
        let base = self.next_order_id;
        let mut end = base;
        for parameter in graph.nodes_of(NodeClass::Parameter) {
            let NodeKind::Parameter { index } = graph.kind(parameter) else {
                continue;
            };
            let order_id = base
                .checked_add(*index)
                .ok_or_else(|| CodecError::internal(format!("parameter index {index} too large")))?;
            self.order_ids[parameter.index()] = order_id;
            end = end.max(order_id + 1);
        }
        self.next_order_id = end;
        Ok(())
    }
}
