//! Sea-of-nodes program graph for the Sable compiler.
//!
//! This crate provides:
//!
//! - **Node catalogue** ([`NodeClass`], [`NodeKind`]): a closed set of node
//!   tags, each with a static edge layout and data-field layout. Fixed nodes
//!   form the control-flow skeleton; floating nodes are pure values reached
//!   through input edges.
//!
//! - **Node arena** ([`Graph`]): nodes addressed by [`NodeId`] handles, with
//!   usages and predecessors kept in side tables that every edge mutation
//!   updates.
//!
//! - **Marks and bit sets** ([`GraphMark`], [`BitSet`], [`NodeBitMap`]) for
//!   "created since" queries and graph walks.
//!
//! # Design
//!
//! Edges are plain handles. There are no back-pointers inside nodes: the
//! reverse edges live in [`Graph`], so a node can be built detached,
//! inspected, and dropped without touching the graph. The graph never
//! reuses a handle, which lets decoders keep handles in tables across
//! deletions and check liveness later.
//!
//! # Crate Dependencies
//!
//! Standalone: no other `sable_*` crate. `sable_codec` builds on it.

mod bitset;
mod error;
mod graph;
mod id;
mod kind;
mod node;

pub use bitset::{BitSet, NodeBitMap};
pub use error::GraphError;
pub use graph::Graph;
pub use id::{GraphMark, NodeId};
pub use kind::{
    slot, BinaryOp, CompareOp, ConstValue, DeoptReason, EdgeShape, FieldKind, FieldValue,
    GuardsStage, MethodRef, NodeClass, NodeKind, Object, Probability, SwitchTable, TypeRef,
};
pub use node::{EdgeList, Edges, Node};
