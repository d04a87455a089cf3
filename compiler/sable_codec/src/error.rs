//! Codec errors.
//!
//! Two failure classes leave an encode/decode call:
//!
//! - [`CodecError::Internal`] (and the wrapped stream/graph errors): the
//!   encoder or decoder broke its own invariants. Fatal for the whole
//!   compilation; never retried.
//! - [`CodecError::Bailout`]: the input is outside what the codec supports
//!   (for example an irreducible loop with two varying values). Aborts only
//!   the current compilation unit. [`BailoutKind`] tells the driver whether
//!   retrying with the same input can help.

use std::fmt;

use sable_ir::GraphError;

use crate::stream::StreamError;

/// Whether a bailout may succeed when retried with the same input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BailoutKind {
    /// Retrying the same input fails the same way.
    Permanent,
    /// Retrying may succeed (for example under different policies).
    Transient,
}

impl fmt::Display for BailoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BailoutKind::Permanent => f.write_str("permanent"),
            BailoutKind::Transient => f.write_str("transient"),
        }
    }
}

/// Compilation bailout raised by the codec.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{kind} bailout: {message}")]
pub struct Bailout {
    pub kind: BailoutKind,
    pub message: String,
}

/// Error of every encode, decode, loop-detection and verification call.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("internal graph codec error: {message}")]
    Internal { message: String },

    #[error(transparent)]
    Bailout(#[from] Bailout),

    #[error("malformed encoding: {0}")]
    Stream(#[from] StreamError),

    #[error("inconsistent graph: {0}")]
    Graph(#[from] GraphError),
}

impl CodecError {
    pub fn internal(message: impl Into<String>) -> Self {
        CodecError::Internal {
            message: message.into(),
        }
    }

    pub fn permanent_bailout(message: impl Into<String>) -> Self {
        CodecError::Bailout(Bailout {
            kind: BailoutKind::Permanent,
            message: message.into(),
        })
    }

    /// The bailout carried by this error, if it is one.
    pub fn bailout(&self) -> Option<&Bailout> {
        match self {
            CodecError::Bailout(bailout) => Some(bailout),
            _ => None,
        }
    }

    pub fn is_permanent_bailout(&self) -> bool {
        self.bailout()
            .is_some_and(|b| b.kind == BailoutKind::Permanent)
    }
}
