//! Encoded graphs.
//!
//! An [`Encoding`] is one byte buffer plus the object and class tables it
//! indexes into. Several [`EncodedGraph`]s may share one encoding; each
//! only adds its own start offset (the position of its trailer) and a
//! lazily filled order-id → byte-offset table.

use std::cell::OnceCell;
use std::sync::Arc;

use sable_ir::{GuardsStage, NodeClass, NodeId, Object};

use crate::stream::TypeReader;
use crate::CodecError;

/// Bytes and interned tables produced by one [`GraphEncoder`](crate::GraphEncoder).
#[derive(Clone, Debug)]
pub struct Encoding {
    bytes: Arc<[u8]>,
    objects: Arc<[Object]>,
    classes: Arc<[NodeClass]>,
}

impl Encoding {
    pub fn new(bytes: Arc<[u8]>, objects: Arc<[Object]>, classes: Arc<[NodeClass]>) -> Self {
        Encoding {
            bytes,
            objects,
            classes,
        }
    }

    pub fn bytes(&self) -> &Arc<[u8]> {
        &self.bytes
    }

    /// Interned objects; index `i` in the stream refers to `objects()[i - 1]`.
    pub fn objects(&self) -> &[Object] {
        &self.objects
    }

    pub fn classes(&self) -> &[NodeClass] {
        &self.classes
    }

    /// Object at a stream index. Index 0 is the absent object.
    pub fn object(&self, index: u32) -> Result<Option<&Object>, CodecError> {
        if index == 0 {
            return Ok(None);
        }
        self.objects
            .get(index as usize - 1)
            .map(Some)
            .ok_or_else(|| CodecError::internal(format!("object index {index} out of range")))
    }

    pub fn class(&self, index: u32) -> Result<NodeClass, CodecError> {
        index
            .checked_sub(1)
            .and_then(|i| self.classes.get(i as usize))
            .copied()
            .ok_or_else(|| CodecError::internal(format!("node class index {index} out of range")))
    }
}

/// One graph inside an [`Encoding`].
#[derive(Clone, Debug)]
pub struct EncodedGraph {
    encoding: Encoding,
    start_offset: u32,
    node_start_offsets: OnceCell<Arc<[u32]>>,
}

/// Trailer of an encoded graph.
#[derive(Clone, Debug)]
pub(crate) struct GraphHeader {
    pub max_fixed_node_order_id: u32,
    pub node_count: u32,
    pub node_start_offsets: Arc<[u32]>,
    pub guards_stage: GuardsStage,
}

impl EncodedGraph {
    pub fn new(encoding: Encoding, start_offset: u32) -> Self {
        EncodedGraph {
            encoding,
            start_offset,
            node_start_offsets: OnceCell::new(),
        }
    }

    pub fn encoding(&self) -> &Encoding {
        &self.encoding
    }

    pub fn start_offset(&self) -> u32 {
        self.start_offset
    }

    /// Read the trailer at the start offset, caching the offset table.
    pub(crate) fn read_header(&self) -> Result<GraphHeader, CodecError> {
        let mut reader = TypeReader::new(self.encoding.bytes.clone(), self.start_offset as usize);
        let max_fixed_node_order_id = reader.get_uv_u32()?;
        let node_count = reader.get_uv_u32()?;

        let node_start_offsets = if let Some(cached) = self.node_start_offsets.get() {
            for _ in 0..node_count {
                reader.get_uv()?;
            }
            cached.clone()
        } else {
            let mut offsets = Vec::with_capacity(node_count as usize);
            for order_id in 0..node_count {
                let distance = reader.get_uv_u32()?;
                let offset = self.start_offset.checked_sub(distance).ok_or_else(|| {
                    CodecError::internal(format!(
                        "order id {order_id} starts before the buffer ({distance} bytes back)"
                    ))
                })?;
                offsets.push(offset);
            }
            let offsets: Arc<[u32]> = Arc::from(offsets);
            self.node_start_offsets.get_or_init(|| offsets).clone()
        };

        let stage_index = reader.get_uv_u32()?;
        let guards_stage = match self.encoding.object(stage_index)? {
            Some(Object::GuardsStage(stage)) => *stage,
            other => {
                return Err(CodecError::internal(format!(
                    "expected guards stage in trailer, found {other:?}"
                )))
            }
        };

        Ok(GraphHeader {
            max_fixed_node_order_id,
            node_count,
            node_start_offsets,
            guards_stage,
        })
    }
}

/// Handle to a source node that survives an encode/decode round trip.
///
/// Created for a node of the graph being encoded; the encoder records the
/// node's order id and the decoder resolves it to the decoded node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeReference {
    source: NodeId,
    order_id: Option<u32>,
    decoded: Option<NodeId>,
}

impl NodeReference {
    pub fn new(source: NodeId) -> Self {
        NodeReference {
            source,
            order_id: None,
            decoded: None,
        }
    }

    pub fn source(&self) -> NodeId {
        self.source
    }

    /// Order id assigned while encoding.
    pub fn order_id(&self) -> Option<u32> {
        self.order_id
    }

    /// Node created for this reference while decoding.
    pub fn decoded(&self) -> Option<NodeId> {
        self.decoded
    }

    pub(crate) fn set_order_id(&mut self, order_id: u32) {
        self.order_id = Some(order_id);
    }

    pub(crate) fn set_decoded(&mut self, node: Option<NodeId>) {
        self.decoded = node;
    }
}
