//! `ProbeRouter`: default `OpRouter` implementation.
//!
//! At creation time the facility probes io_uring via
//! `IORING_REGISTER_PROBE` and hands the supported opcodes here:
//!   - Kind has a candidate opcode AND the opcode is supported → io_uring
//!   - Everything else → blocking tier
//!
//! Kinds with no io_uring opcode on any kernel we target (ftruncate,
//! fchmod, fchown, sendfile, readlink, readdir, chmod, chown) are always
//! blocking. The table is a flat array indexed by `OpKind`.

use afio_core::aio::OpKind;
use afio_core::router::{OpRouter, RouteInfo};
use io_uring::opcode;

/// `OpKind` → io_uring opcode that can carry it.
const CANDIDATES: &[(OpKind, u8)] = &[
    // File I/O
    (OpKind::Read, opcode::Read::CODE),
    (OpKind::Write, opcode::Write::CODE),
    // File lifecycle
    (OpKind::Open, opcode::OpenAt::CODE),
    (OpKind::Close, opcode::Close::CODE),
    (OpKind::Fstat, opcode::Statx::CODE),
    (OpKind::Stat, opcode::Statx::CODE),
    // Metadata
    (OpKind::Rename, opcode::RenameAt::CODE),
    (OpKind::Unlink, opcode::UnlinkAt::CODE),
    (OpKind::Rmdir, opcode::UnlinkAt::CODE), // unlinkat(AT_REMOVEDIR)
    (OpKind::Mkdir, opcode::MkDirAt::CODE),
    (OpKind::Symlink, opcode::SymlinkAt::CODE),
    (OpKind::Link, opcode::LinkAt::CODE),
];

pub struct ProbeRouter {
    table: [RouteInfo; OpKind::COUNT],
}

impl ProbeRouter {
    /// Build the routing table from the opcodes the running kernel supports.
    pub fn new(supported_opcodes: &[u8]) -> Self {
        let mut opcode_supported = [false; 256];
        for &opc in supported_opcodes {
            opcode_supported[opc as usize] = true;
        }

        let mut table = [RouteInfo::BLOCKING; OpKind::COUNT];
        for &(kind, opc) in CANDIDATES {
            if opcode_supported[opc as usize] {
                table[kind as usize] = RouteInfo::iouring(opc);
            }
        }
        Self { table }
    }

    /// Every kind on the blocking tier (io_uring unavailable or disabled).
    pub fn blocking_only() -> Self {
        Self::new(&[])
    }

    /// Every candidate opcode supported (for testing against a "latest
    /// kernel" scenario).
    pub fn all_opcodes() -> Self {
        let all: Vec<u8> = CANDIDATES.iter().map(|&(_, opc)| opc).collect();
        Self::new(&all)
    }
}

impl OpRouter for ProbeRouter {
    fn route(&self, kind: OpKind) -> RouteInfo {
        self.table[kind as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use afio_core::tier::Tier;

    #[test]
    fn unsupported_opcodes_fall_back_to_blocking() {
        let router = ProbeRouter::new(&[opcode::Read::CODE, opcode::Write::CODE]);
        assert_eq!(router.route(OpKind::Read).tier, Tier::IoUring);
        assert_eq!(router.route(OpKind::Open).tier, Tier::Blocking);
        assert_eq!(router.route(OpKind::Ftruncate).tier, Tier::Blocking);
    }

    #[test]
    fn tier_counts_cover_every_kind() {
        let counts = ProbeRouter::all_opcodes().tier_counts();
        assert_eq!(counts.iouring, CANDIDATES.len());
        assert_eq!(counts.iouring + counts.blocking, OpKind::COUNT);

        let blocking = ProbeRouter::blocking_only().tier_counts();
        assert_eq!(blocking.iouring, 0);
    }

    #[test]
    fn sendfile_and_readdir_are_always_blocking() {
        let router = ProbeRouter::all_opcodes();
        for kind in [OpKind::Sendfile, OpKind::Readdir, OpKind::Readlink, OpKind::Fchmod] {
            assert_eq!(router.route(kind), RouteInfo::BLOCKING);
        }
    }
}
