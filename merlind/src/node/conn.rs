//! Per-node connection contract (spec §4.2), grounded in
//! `original_source/module/net.c`'s `net_negotiate_socket`.
//!
//! The reactor (see `crate::mesh::reactor`) owns the actual sockets as
//! tokio tasks; this module holds the pure, independently testable part of
//! the contract: the state machine and the dual-socket tie-break.

use std::net::Ipv4Addr;

use super::model::NodeState;

/// Outcome of the collision-detection rule run when a node simultaneously
/// has an outbound connect attempt and an inbound accepted socket. Both
/// ends of a peer pair run the same comparison on their own
/// (locally-bound, remote-peer) address pair, so the decision is symmetric:
/// exactly one survives, never both, except on an exact tie (practically
/// unreachable since no two configured nodes share an address) where both
/// close and the pair retries on the next tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TieBreak {
    KeepOutbound,
    KeepInbound,
    CloseBoth,
}

pub fn resolve_tie(local_bound: (Ipv4Addr, u16), remote_peer: (Ipv4Addr, u16)) -> TieBreak {
    match local_bound.cmp(&remote_peer) {
        std::cmp::Ordering::Less => TieBreak::KeepInbound,
        std::cmp::Ordering::Greater => TieBreak::KeepOutbound,
        std::cmp::Ordering::Equal => TieBreak::CloseBoth,
    }
}

/// Legal transitions of the per-node socket state machine (spec §4.2).
/// Returns `false` for a transition the contract forbids; callers treat
/// that as a logic bug rather than recovering from it.
pub fn transition_allowed(from: NodeState, to: NodeState) -> bool {
    use NodeState::*;
    matches!(
        (from, to),
        (None, Pending)
            | (None, Negotiating)
            | (Pending, Negotiating)
            | (Pending, None)
            | (Negotiating, Connected)
            | (Negotiating, None)
            | (Connected, None)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smaller_local_address_keeps_inbound() {
        let local = (Ipv4Addr::new(10, 0, 0, 1), 15551);
        let remote = (Ipv4Addr::new(10, 0, 0, 2), 15551);
        assert_eq!(resolve_tie(local, remote), TieBreak::KeepInbound);
        // symmetric: the other side sees itself as the larger address.
        assert_eq!(resolve_tie(remote, local), TieBreak::KeepOutbound);
    }

    #[test]
    fn port_breaks_ties_on_equal_ip() {
        let a = (Ipv4Addr::new(10, 0, 0, 1), 100);
        let b = (Ipv4Addr::new(10, 0, 0, 1), 200);
        assert_eq!(resolve_tie(a, b), TieBreak::KeepInbound);
    }

    #[test]
    fn exact_match_closes_both() {
        let a = (Ipv4Addr::new(10, 0, 0, 1), 100);
        assert_eq!(resolve_tie(a, a), TieBreak::CloseBoth);
    }

    #[test]
    fn state_machine_rejects_skipping_negotiation() {
        assert!(!transition_allowed(NodeState::None, NodeState::Connected));
        assert!(transition_allowed(NodeState::Negotiating, NodeState::Connected));
    }
}
