use crate::NodeId;

/// Side-table inconsistency found by [`Graph::verify`](crate::Graph::verify).
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("live node {user:?} has edge to deleted node {target:?}")]
    DeletedTarget { user: NodeId, target: NodeId },

    #[error("input {input:?} of {user:?} does not record the usage")]
    MissingUsage { user: NodeId, input: NodeId },

    #[error("{node:?} is recorded as a usage of {input:?} but has no such input")]
    StaleUsage { node: NodeId, input: NodeId },

    #[error("successor {successor:?} of {node:?} records predecessor {recorded:?}")]
    PredecessorMismatch {
        node: NodeId,
        successor: NodeId,
        recorded: Option<NodeId>,
    },
}
