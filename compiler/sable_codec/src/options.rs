//! Encoder and decoder configuration.

use bitflags::bitflags;

/// Encoder configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EncoderOptions {
    /// Decode every encoded graph with a strict decoder and compare it to
    /// the source. On by default in debug builds.
    pub verify_round_trip: bool,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        EncoderOptions {
            verify_round_trip: cfg!(debug_assertions),
        }
    }
}

/// Decoder configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecoderOptions {
    /// Register a merged value directly instead of a phi while every
    /// predecessor so far supplied the same value. Loop phis stay eager
    /// unless loops are exploded.
    pub lazy_phis: bool,
    /// Value-number pure floating nodes on insertion.
    pub unique_floating_nodes: bool,
}

impl DecoderOptions {
    /// Reproduces the encoded graph node for node.
    pub fn strict() -> Self {
        DecoderOptions {
            lazy_phis: false,
            unique_floating_nodes: false,
        }
    }

    /// Skips redundant phis and deduplicates pure nodes.
    pub fn simplifying() -> Self {
        DecoderOptions {
            lazy_phis: true,
            unique_floating_nodes: true,
        }
    }
}

bitflags! {
    /// How loops of a decoded method are unrolled.
    ///
    /// Combine the building blocks or use one of the named policies.
    #[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
    pub struct LoopExplosionKind: u8 {
        /// Decode every iteration separately.
        const UNROLL = 1 << 0;
        /// Each loop end starts its own next iteration.
        const DUPLICATE_ENDS = 1 << 1;
        /// Code after a loop exit is decoded once per exiting iteration.
        const DUPLICATE_EXITS = 1 << 2;
        /// Iterations with equal frame states share one merge.
        const MERGE = 1 << 3;
    }
}

impl LoopExplosionKind {
    pub const NONE: Self = Self::empty();
    pub const FULL_UNROLL: Self = Self::UNROLL;
    pub const FULL_UNROLL_UNTIL_RETURN: Self = Self::UNROLL.union(Self::DUPLICATE_EXITS);
    pub const FULL_EXPLODE: Self = Self::UNROLL.union(Self::DUPLICATE_ENDS);
    pub const FULL_EXPLODE_UNTIL_RETURN: Self = Self::FULL_EXPLODE.union(Self::DUPLICATE_EXITS);
    pub const MERGE_EXPLODE: Self = Self::UNROLL.union(Self::MERGE);

    #[inline]
    pub fn use_explosion(self) -> bool {
        !self.is_empty()
    }

    #[inline]
    pub fn is_no_explosion(self) -> bool {
        self.is_empty()
    }

    #[inline]
    pub fn unroll_loops(self) -> bool {
        self.contains(Self::UNROLL)
    }

    #[inline]
    pub fn duplicate_loop_ends(self) -> bool {
        self.contains(Self::DUPLICATE_ENDS)
    }

    #[inline]
    pub fn duplicate_loop_exits(self) -> bool {
        self.contains(Self::DUPLICATE_EXITS)
    }

    #[inline]
    pub fn merge_loops(self) -> bool {
        self.contains(Self::MERGE)
    }
}
