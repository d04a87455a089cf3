//! Binary graph codec for the Sable compiler.
//!
//! Encodes [`sable_ir::Graph`]s into a compact byte stream and decodes them
//! back, optionally exploding loops and inlining callees while decoding.
//!
//! - **Encoding** ([`GraphEncoder`], [`encode_single_graph`]): fixed nodes
//!   in reverse postorder, then parameters, then floating nodes. Classes
//!   and data objects are interned into tables shared by every graph of one
//!   [`Encoding`].
//! - **Decoding** ([`GraphDecoder`]): fixed nodes from a worklist, floating
//!   nodes on demand. A [`DecoderPlugin`] sees every node and decides about
//!   inlining and loop explosion limits.
//! - **Loop explosion** ([`LoopExplosionKind`]): unroll loops per iteration,
//!   optionally duplicating loop ends and exits, or merging iterations with
//!   equal frame states. Merged methods get their loops back from the
//!   [`LoopDetector`].
//! - **Verification** ([`verify_graphs_equal`]): structural equality of two
//!   graphs, used by the encoder's round-trip self-check.
//!
//! # Debugging
//!
//! - `RUST_LOG=sable_codec=debug`: one event per encoded graph, decoded
//!   method, inlined callee, exploded loop state and reconstructed loop.
//! - `RUST_LOG=sable_codec::decoder=trace`: every decoded fixed node.
//!
//! # Crate Dependencies
//!
//! Builds on `sable_ir` for the graph and `sable_stack` for deep floating
//! node chains.

mod decoder;
mod encoded;
mod encoder;
mod error;
mod intern;
mod layout;
mod loop_detector;
mod options;
mod stream;
mod verify;

#[cfg(test)]
mod test_helpers;

pub use decoder::{
    BoundedExplosion, DecodeOutcome, DecoderPlugin, ExplosionIteration, FloatingAction,
    GraphDecoder, InvokeAction, InvokeSite, LoopScopeTrigger, NoopPlugin,
    DEFAULT_MAX_LOOP_EXPLOSION_COUNT,
};
pub use encoded::{EncodedGraph, Encoding, NodeReference};
pub use encoder::{encode_single_graph, encode_single_graph_with, GraphEncoder};
pub use error::{Bailout, BailoutKind, CodecError};
pub use loop_detector::LoopDetector;
pub use options::{DecoderOptions, EncoderOptions, LoopExplosionKind};
pub use stream::StreamError;
pub use verify::verify_graphs_equal;

use std::sync::Once;

static TRACING_INIT: Once = Once::new();

/// Initialize tracing for debug output.
///
/// Safe to call multiple times. Does nothing unless `RUST_LOG` is set.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};

        if std::env::var("RUST_LOG").is_ok() {
            let filter = EnvFilter::from_default_env();
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true).with_level(true))
                .with(filter)
                .init();
        }
    });
}
