//! Peer-group data model (spec §4.6), grounded in
//! `original_source/pgroup.c`'s `pgroup` struct: one group for the local
//! failover peers plus one group per distinct poller hostgroup selector.

use crate::node::NodeId;

pub type PgroupId = usize;

/// Normalises a raw, possibly unsorted, possibly duplicated hostgroup
/// selector (`"dmz, edge,edge"`) into a canonical comma-joined form
/// (`"dmz,edge"`) so two poller blocks that name the same set of
/// hostgroups land in the same peer group regardless of how they wrote it.
/// Mirrors `pgroup.c`'s `get_sorted_csstr`.
pub fn normalise_selector(raw: &str) -> String {
    let mut parts: Vec<&str> = raw.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()).collect();
    parts.sort_unstable();
    parts.dedup();
    parts.join(",")
}

/// One peer group: either the local failover set (`selector = None`) or a
/// poller group keyed by a normalised hostgroup selector.
#[derive(Debug, Clone)]
pub struct PeerGroup {
    pub id: PgroupId,
    pub selector: Option<String>,
    /// Configured member nodes, in stable configuration order. Index into
    /// this vector (restricted to members currently connected) is the `p`
    /// coordinate of spec §4.6's conceptual assignment matrix `A[k][p]`.
    pub configured: Vec<NodeId>,
    /// Last-known size of the slice this group owns, in objects (spec
    /// §4.6's host/service bitmaps, approximated as counts since host
    /// identity itself is supplied by the external monitoring engine, not
    /// this daemon — see DESIGN.md). Updated from the reported
    /// `host_checks_handled`/`service_checks_handled` of the group's own
    /// active members and held steady (not reset to zero) while the group
    /// has no active member, so the local group's "extra" fallback has a
    /// stable number to redistribute.
    pub known_hosts: u32,
    pub known_services: u32,
    /// Diagnostic counter: how many times a host claimed by this group was
    /// already marked handled by another poller group at build time (spec
    /// §4.6's overlap counter).
    pub overlap: u32,
}

impl PeerGroup {
    pub fn new(id: PgroupId, selector: Option<String>) -> Self {
        PeerGroup {
            id,
            selector,
            configured: Vec::new(),
            known_hosts: 0,
            known_services: 0,
            overlap: 0,
        }
    }

    pub fn is_local(&self) -> bool {
        self.selector.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalises_order_and_duplicates() {
        assert_eq!(normalise_selector("dmz, edge,edge"), "dmz,edge");
        assert_eq!(normalise_selector("edge,dmz"), "dmz,edge");
    }

    #[test]
    fn normalises_whitespace_only_entries() {
        assert_eq!(normalise_selector(" , dmz , "), "dmz");
    }
}
