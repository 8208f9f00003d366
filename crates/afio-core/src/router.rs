//! Native operation routing.
//!
//! An `OpRouter` maps an [`OpKind`] to a tier and, for io_uring, the
//! corresponding opcode.
//!
//! # Implementors
//!
//! - `ProbeRouter` (default): at create time, probes io_uring for supported
//!   opcodes via `IORING_REGISTER_PROBE`. Kinds with a supported opcode go
//!   to io_uring, everything else to the blocking tier.

use crate::aio::OpKind;
use crate::tier::Tier;

/// Routing decision for a single operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteInfo {
    pub tier: Tier,
    /// io_uring opcode (only meaningful when tier == Tier::IoUring).
    pub iouring_opcode: u8,
}

impl RouteInfo {
    pub const BLOCKING: Self = Self {
        tier: Tier::Blocking,
        iouring_opcode: 0,
    };

    pub const fn iouring(opcode: u8) -> Self {
        Self {
            tier: Tier::IoUring,
            iouring_opcode: opcode,
        }
    }
}

/// Maps operation kinds to routing decisions.
///
/// The table is built once when the facility is created and never changes.
pub trait OpRouter: Send + Sync {
    fn route(&self, kind: OpKind) -> RouteInfo;

    /// Count of kinds per tier (for diagnostics/logging).
    fn tier_counts(&self) -> TierCounts {
        let mut counts = TierCounts::default();
        for kind in OpKind::ALL {
            match self.route(kind).tier {
                Tier::IoUring => counts.iouring += 1,
                Tier::Blocking => counts.blocking += 1,
            }
        }
        counts
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TierCounts {
    pub iouring: usize,
    pub blocking: usize,
}
