//! Graph encoder.
//!
//! Encoding is two-phase so several graphs can share one [`Encoding`]:
//!
//! 1. [`GraphEncoder::prepare`] each graph: count node classes and data
//!    objects into the interning tables.
//! 2. [`GraphEncoder::finish_prepare`] once: close the tables.
//! 3. [`GraphEncoder::encode`] each graph: append its nodes and trailer to
//!    the shared buffer. The returned start offset identifies the graph.
//!
//! With [`EncoderOptions::verify_round_trip`] every encoded graph is
//! decoded again by a strict decoder and compared with the source.

mod order;

use std::sync::Arc;

use sable_ir::{
    slot, EdgeList, FieldValue, Graph, NodeClass, NodeId, NodeKind, Object, TypeRef,
};
use smallvec::SmallVec;
use tracing::debug;

use crate::decoder::{GraphDecoder, NoopPlugin};
use crate::encoded::{EncodedGraph, Encoding, NodeReference};
use crate::intern::InternTable;
use crate::layout::{
    encodes_direct_input, encodes_input_lists, encodes_successors, OrderIdWidth, NULL_ORDER_ID,
};
use crate::stream::TypeWriter;
use crate::verify::verify_graphs_equal;
use crate::{CodecError, DecoderOptions, EncoderOptions};

use self::order::NodeOrder;

/// Serializes graphs into one shared [`Encoding`].
#[derive(Debug)]
pub struct GraphEncoder {
    options: EncoderOptions,
    objects: InternTable<Object>,
    classes: InternTable<NodeClass>,
    writer: TypeWriter,
}

impl Default for GraphEncoder {
    fn default() -> Self {
        GraphEncoder::new()
    }
}

impl GraphEncoder {
    pub fn new() -> Self {
        GraphEncoder::with_options(EncoderOptions::default())
    }

    pub fn with_options(options: EncoderOptions) -> Self {
        GraphEncoder {
            options,
            objects: InternTable::new(),
            classes: InternTable::new(),
            writer: TypeWriter::new(),
        }
    }

    /// Collect the classes and objects `graph` will reference.
    pub fn prepare(&mut self, graph: &Graph) {
        self.objects.add(&Object::GuardsStage(graph.guards_stage()));
        for id in graph.node_ids() {
            let node = graph.node(id);
            self.classes.add(&node.class());
            for field in node.kind().fields() {
                if let FieldValue::Object(object) = field {
                    self.objects.add(&object);
                }
            }
            if node.class().is_invoke() {
                if let Some(context) = invoke_context_type(graph, id) {
                    self.objects.add(&Object::Type(context));
                }
            }
        }
    }

    /// Close the interning tables. No graph can be prepared afterwards.
    pub fn finish_prepare(&mut self) {
        self.objects.encode_all();
        self.classes.encode_all();
        debug!(
            objects = self.objects.len(),
            classes = self.classes.len(),
            "closed interning tables"
        );
    }

    /// Append `graph` to the encoding and return its start offset.
    pub fn encode(&mut self, graph: &Graph) -> Result<u32, CodecError> {
        self.encode_with_references(graph, &mut [])
    }

    /// Like [`encode`](Self::encode), also recording the order id of each
    /// referenced source node.
    pub fn encode_with_references(
        &mut self,
        graph: &Graph,
        references: &mut [NodeReference],
    ) -> Result<u32, CodecError> {
        if !self.objects.is_closed() || !self.classes.is_closed() {
            return Err(CodecError::internal(
                "finish_prepare must run before a graph is encoded",
            ));
        }

        let order = NodeOrder::compute(graph)?;
        let width = OrderIdWidth::for_node_count(order.node_count());

        let mut offsets = vec![0usize; order.nodes().len()];
        for (order_id, node) in order.nodes().iter().enumerate() {
            if let Some(node) = *node {
                offsets[order_id] = self.writer.bytes_written();
                self.write_node(graph, &order, width, node)?;
            }
        }

        let metadata_start = self.writer.bytes_written();
        self.writer
            .put_uv(u64::from(order.max_fixed_node_order_id()));
        self.writer.put_uv(u64::from(order.node_count()));
        for offset in offsets {
            self.writer.put_uv_usize(metadata_start - offset);
        }
        let guards_stage = self.object_index(&Object::GuardsStage(graph.guards_stage()))?;
        self.writer.put_uv(u64::from(guards_stage));

        let start_offset = u32::try_from(metadata_start)
            .map_err(|_| CodecError::internal("encoding exceeds the u32 offset range"))?;

        for reference in references.iter_mut() {
            let order_id = order.order_id(reference.source()).ok_or_else(|| {
                CodecError::internal(format!(
                    "referenced node {:?} is not part of the graph",
                    reference.source()
                ))
            })?;
            reference.set_order_id(order_id);
        }

        debug!(
            nodes = order.node_count(),
            max_fixed = order.max_fixed_node_order_id(),
            start_offset,
            bytes = self.writer.bytes_written(),
            "encoded graph"
        );

        if self.options.verify_round_trip {
            let encoded = EncodedGraph::new(self.encoding()?, start_offset);
            verify_encoding(graph, &encoded)?;
        }
        Ok(start_offset)
    }

    /// Snapshot of everything encoded so far.
    pub fn encoding(&self) -> Result<Encoding, CodecError> {
        let (objects, classes) = self.closed_tables()?;
        Ok(Encoding::new(
            self.writer.as_bytes().into(),
            objects.into(),
            classes.into(),
        ))
    }

    pub fn into_encoding(self) -> Result<Encoding, CodecError> {
        let (objects, classes) = self.closed_tables()?;
        let objects: Arc<[Object]> = objects.into();
        let classes: Arc<[NodeClass]> = classes.into();
        Ok(Encoding::new(self.writer.into_bytes().into(), objects, classes))
    }

    fn closed_tables(&self) -> Result<(&[Object], &[NodeClass]), CodecError> {
        match (self.objects.values(), self.classes.values()) {
            (Some(objects), Some(classes)) => Ok((objects, classes)),
            _ => Err(CodecError::internal(
                "interning tables are still open; call finish_prepare",
            )),
        }
    }

    fn object_index(&self, object: &Object) -> Result<u32, CodecError> {
        self.objects
            .index_of(object)
            .ok_or_else(|| CodecError::internal(format!("object {object:?} was not prepared")))
    }

    // ── Node records ────────────────────────────────────────────────

    fn write_node(
        &mut self,
        graph: &Graph,
        order: &NodeOrder,
        width: OrderIdWidth,
        id: NodeId,
    ) -> Result<(), CodecError> {
        let node = graph.node(id);
        let class = node.class();
        let class_index = self
            .classes
            .index_of(&class)
            .ok_or_else(|| CodecError::internal(format!("class {class:?} was not prepared")))?;
        self.writer.put_uv(u64::from(class_index));

        let inputs = node.inputs();
        for slot in 0..inputs.direct_count() {
            if encodes_direct_input(class, slot) {
                self.write_order_id(order, width, inputs.direct(slot))?;
            }
        }
        if encodes_input_lists(class) {
            for slot in 0..inputs.list_count() {
                self.write_edge_list(order, width, inputs.list(slot))?;
            }
        }

        for field in node.kind().fields() {
            match field {
                FieldValue::Primitive(value) => self.writer.put_sv(value),
                FieldValue::Object(object) => {
                    let index = self.object_index(&object)?;
                    self.writer.put_uv(u64::from(index));
                }
            }
        }

        if encodes_successors(class) {
            let successors = node.successors();
            for slot in 0..successors.direct_count() {
                self.write_order_id(order, width, successors.direct(slot))?;
            }
            for slot in 0..successors.list_count() {
                self.write_edge_list(order, width, successors.list(slot))?;
            }
        }

        match class {
            NodeClass::End | NodeClass::LoopEnd => {
                let merge = graph.end_merge(id).ok_or_else(|| {
                    CodecError::internal(format!("{id:?} does not reach a merge"))
                })?;
                self.write_order_id(order, width, Some(merge))?;
                let phis = graph.phis(merge);
                self.writer.put_uv_usize(phis.len());
                for phi in phis {
                    self.write_order_id(order, width, graph.phi_value_at(phi, id))?;
                    self.write_order_id(order, width, Some(phi))?;
                }
            }
            NodeClass::LoopExit => {
                self.write_order_id(order, width, graph.state_after(id))?;
                let proxies = loop_exit_proxies(graph, id);
                self.writer.put_uv_usize(proxies.len());
                for proxy in proxies {
                    self.write_order_id(order, width, Some(proxy))?;
                }
            }
            NodeClass::Invoke | NodeClass::InvokeWithException => {
                let context = match invoke_context_type(graph, id) {
                    Some(context) => self.object_index(&Object::Type(context))?,
                    None => 0,
                };
                self.writer.put_uv(u64::from(context));
                self.write_order_id(order, width, graph.input(id, slot::CALL_TARGET))?;
                self.write_order_id(order, width, graph.state_after(id))?;
                self.write_order_id(order, width, graph.next(id))?;
                if class == NodeClass::InvokeWithException {
                    let exception = graph.successor(id, slot::EXCEPTION_EDGE);
                    self.write_order_id(order, width, exception)?;
                    self.write_order_id(order, width, exception.and_then(|e| graph.next(e)))?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn write_order_id(
        &mut self,
        order: &NodeOrder,
        width: OrderIdWidth,
        node: Option<NodeId>,
    ) -> Result<(), CodecError> {
        let order_id = match node {
            None => NULL_ORDER_ID,
            Some(node) => order.order_id(node).ok_or_else(|| {
                CodecError::internal(format!("edge to {node:?}, which has no order id"))
            })?,
        };
        width.write(&mut self.writer, order_id);
        Ok(())
    }

    fn write_edge_list(
        &mut self,
        order: &NodeOrder,
        width: OrderIdWidth,
        list: Option<&EdgeList>,
    ) -> Result<(), CodecError> {
        let Some(list) = list else {
            self.writer.put_sv(-1);
            return Ok(());
        };
        let len = i64::try_from(list.len())
            .map_err(|_| CodecError::internal("edge list too long"))?;
        self.writer.put_sv(len);
        for &node in list {
            self.write_order_id(order, width, node)?;
        }
        Ok(())
    }
}

/// Encode one graph into its own encoding.
pub fn encode_single_graph(graph: &Graph) -> Result<EncodedGraph, CodecError> {
    encode_single_graph_with(graph, EncoderOptions::default())
}

pub fn encode_single_graph_with(
    graph: &Graph,
    options: EncoderOptions,
) -> Result<EncodedGraph, CodecError> {
    let mut encoder = GraphEncoder::with_options(options);
    encoder.prepare(graph);
    encoder.finish_prepare();
    let start_offset = encoder.encode(graph)?;
    Ok(EncodedGraph::new(encoder.into_encoding()?, start_offset))
}

/// Decode `encoded` strictly and compare it with `graph`.
fn verify_encoding(graph: &Graph, encoded: &EncodedGraph) -> Result<(), CodecError> {
    let mut decoded = Graph::new();
    GraphDecoder::with_options(&mut decoded, NoopPlugin, DecoderOptions::strict())
        .decode(encoded)?;
    verify_graphs_equal(graph, &decoded)
}

/// Receiver context of an invoke: the holder of its call target's method.
fn invoke_context_type(graph: &Graph, invoke: NodeId) -> Option<TypeRef> {
    let call_target = graph.input(invoke, slot::CALL_TARGET)?;
    match graph.kind(call_target) {
        NodeKind::CallTarget(method) => Some(method.holder.clone()),
        _ => None,
    }
}

/// Value proxies anchored at `loop_exit`, in usage order.
fn loop_exit_proxies(graph: &Graph, loop_exit: NodeId) -> SmallVec<[NodeId; 4]> {
    let mut proxies: SmallVec<[NodeId; 4]> = SmallVec::new();
    for &user in graph.usages(loop_exit) {
        if graph.class(user) == NodeClass::ValueProxy
            && graph.input(user, slot::PROXY_LOOP_EXIT) == Some(loop_exit)
            && !proxies.contains(&user)
        {
            proxies.push(user);
        }
    }
    proxies
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, reason = "tests unwrap for brevity")]
mod tests;
