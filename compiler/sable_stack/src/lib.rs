//! Stack growth for recursive graph walks.
//!
//! Floating nodes are decoded on demand: materializing one node first
//! materializes its inputs, which materialize theirs, and so on. A long
//! arithmetic chain in the source graph turns into an equally deep Rust call
//! chain. Wrapping each level in [`ensure_sufficient_stack`] keeps that
//! recursion safe without rewriting it as an explicit worklist.
//!
//! # Platform Support
//!
//! - **Native targets**: `stacker` grows the stack on demand.
//! - **WASM targets**: passthrough.
//!
//! # Configuration
//!
//! - **Red zone**: 100KB. Below this, the stack is grown before recursing.
//! - **Growth size**: 1MB per growth segment.

/// Minimum stack space to keep available (100KB red zone).
const RED_ZONE: usize = 100 * 1024;

/// Stack space to allocate when growing (1MB).
const STACK_PER_RECURSION: usize = 1024 * 1024;

/// Run `f`, growing the stack first if less than the red zone remains.
///
/// ```text
/// fn ensure_node_created(&mut self, order_id: u32) -> Result<NodeId, CodecError> {
///     ensure_sufficient_stack(|| self.decode_floating_node(order_id))
/// }
/// ```
#[inline]
#[cfg(not(target_arch = "wasm32"))]
pub fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, f)
}

/// WASM version: call directly.
#[inline]
#[cfg(target_arch = "wasm32")]
pub fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    f()
}
