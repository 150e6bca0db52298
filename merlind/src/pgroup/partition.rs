//! Deterministic host/service → peer assignment (spec §4.6), grounded in
//! `original_source/pgroup.c`'s `pgroup_assign_peer_ids` /
//! `pgroup_reassign_checks`.

use std::collections::HashMap;
use std::time::SystemTime;

use crate::node::{Assigned, Node, NodeId, NodeState, ObjectCounts, Role, SELF_NODE_ID};

use super::model::{normalise_selector, PeerGroup, PgroupId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    /// Assigned to the member at this node id.
    Node(NodeId),
    /// No member of the group was active; this daemon handles it and
    /// counts it against the group's extra counter.
    Extra,
}

/// Holds the current partitioning of all configured peer groups. Rebuilt
/// from scratch on every membership change (spec: "run partitioner on
/// membership change"); assignment is a pure function of `(group,
/// active-member-order, id)`, so rebuilding is always idempotent: the same
/// active set produces the same assignment no matter how many times it
/// runs.
#[derive(Debug, Default)]
pub struct Partitioner {
    groups: Vec<PeerGroup>,
    /// selector string -> group id, for O(1) lookup by poller hostgroup.
    by_selector: HashMap<String, PgroupId>,
    local_group: Option<PgroupId>,
    /// Active (connected) members of each group, sorted per spec §4.6's
    /// comparator. This is the `p` axis of the conceptual assignment
    /// matrix `A[k][p]`: `k` indexes `groups`, `p` indexes this vector.
    active: Vec<Vec<NodeId>>,
    /// Total host/service counts the local engine reports handling,
    /// supplied over IPC (spec §3's node-info `host_checks_handled` /
    /// `service_checks_handled`). The local group's share is this total
    /// minus whatever poller groups have claimed.
    totals: ObjectCounts,
    /// This daemon's own `info.start`, used as the local group's sort key
    /// for the unconditional self-entry (spec §4.6).
    self_start: u64,
    /// This daemon's own dense index within the local group's active,
    /// sorted member list — the `peer_id` it advertises in its own
    /// handshake (spec §3's node-info `peer_id`).
    self_peer_id: usize,
    /// This daemon's own share of the local group's host/service counts,
    /// computed the same way as every other member's `node.assigned`.
    self_assigned: Assigned,
}

impl Partitioner {
    pub fn new() -> Self {
        Partitioner::default()
    }

    pub fn groups(&self) -> &[PeerGroup] {
        &self.groups
    }

    /// (Re)builds group membership from the node table's static
    /// configuration. Call once at startup and whenever the node table's
    /// *configured* membership changes (reload); does not need calling on
    /// connect/disconnect, see [`Partitioner::rebalance`].
    pub fn build(&mut self, nodes: &mut [Node]) {
        self.groups.clear();
        self.by_selector.clear();
        self.local_group = None;

        let mut local = PeerGroup::new(0, None);
        // spec §4.6: the local group counts this daemon unconditionally,
        // alongside every configured failover peer.
        local.configured.push(SELF_NODE_ID);
        for n in nodes.iter().filter(|n| n.role == Role::Peer) {
            local.configured.push(n.id);
        }
        self.local_group = Some(0);
        self.groups.push(local);

        // Normalised selectors claimed so far, to flag the "same hostgroup
        // claimed by two different poller groups" overlap case (spec §4.6:
        // "if already in the global poller-handled bitmap, increment
        // overlap counter and log WARN"). Host-level overlap isn't
        // representable without a resolved host database (see DESIGN.md),
        // so overlap is tracked at hostgroup-token granularity instead.
        let mut claimed_tokens: HashMap<String, PgroupId> = HashMap::new();

        for n in nodes.iter().filter(|n| n.role == Role::Poller) {
            let selector = n
                .hostgroup
                .as_deref()
                .map(normalise_selector)
                .unwrap_or_default();
            let gid = *self.by_selector.entry(selector.clone()).or_insert_with(|| {
                let id = self.groups.len();
                self.groups.push(PeerGroup::new(id, Some(selector.clone())));
                id
            });
            self.groups[gid].configured.push(n.id);

            for token in selector.split(',').filter(|t| !t.is_empty()) {
                match claimed_tokens.get(token) {
                    Some(owner) if *owner != gid => {
                        self.groups[gid].overlap += 1;
                        tracing::warn!(hostgroup = token, "hostgroup claimed by more than one poller group");
                    }
                    _ => {
                        claimed_tokens.insert(token.to_string(), gid);
                    }
                }
            }
        }

        self.active = vec![Vec::new(); self.groups.len()];
        self.rebalance(nodes);
    }

    /// The local engine's self-reported total host/service counts (spec
    /// §3's node-info block), used as the universe [`Partitioner::owner`]
    /// and [`Partitioner::assign_counts`] distribute across active nodes.
    pub fn set_totals(&mut self, hosts: u32, services: u32) {
        self.totals = ObjectCounts { hosts, services };
    }

    /// Records this daemon's own start time, so the local group's
    /// unconditional self-entry sorts the same way a real member with
    /// that `info.start` would (spec §4.6's sort-and-assign comparator).
    pub fn set_self_start(&mut self, start: u64) {
        self.self_start = start;
    }

    /// This daemon's own dense index within the local group's active,
    /// sorted member list.
    pub fn self_peer_id(&self) -> usize {
        self.self_peer_id
    }

    /// This daemon's own share of the local group's host/service counts.
    pub fn self_assigned(&self) -> Assigned {
        self.self_assigned
    }

    /// Recomputes the active-member ordering for every group from current
    /// node connection state, and assigns dense `peer_id`s within each
    /// group (spec §4.6 "sort-and-assign phase"): `CONNECTED` first, then
    /// non-zero `info.start` first, then ascending `info.start`. Cheap and
    /// safe to call on every membership-change tick; always idempotent for
    /// a fixed active set.
    pub fn rebalance(&mut self, nodes: &mut [Node]) {
        let now = SystemTime::now();
        for (gid, group) in self.groups.iter().enumerate() {
            let mut members: Vec<NodeId> = group
                .configured
                .iter()
                .copied()
                .filter(|id| {
                    *id == SELF_NODE_ID
                        || nodes
                            .get(*id)
                            .map(|n| n.state == NodeState::Connected)
                            .unwrap_or(false)
                })
                .collect();
            members.sort_by_key(|id| self.sort_key_of(*id, nodes, now));
            for (peer_id, id) in members.iter().enumerate() {
                if *id == SELF_NODE_ID {
                    self.self_peer_id = peer_id;
                } else {
                    let node = &mut nodes[*id];
                    node.peer_id = peer_id;
                    node.peer_group = Some(gid);
                }
            }
            self.active[gid] = members;
        }
    }

    /// Sort key for either a real node or the local group's self-entry,
    /// mirroring [`Node::sort_key`] exactly so self interleaves correctly
    /// with real peers (spec §4.6's comparator).
    fn sort_key_of(&self, id: NodeId, nodes: &[Node], now: SystemTime) -> (u8, u8, u64) {
        if id == SELF_NODE_ID {
            let has_start = u8::from(self.self_start == 0);
            (0, has_start, self.self_start)
        } else {
            nodes[id].sort_key(now)
        }
    }

    /// Updates each group's `known_hosts`/`known_services` from its
    /// currently-active members' self-reported counts, then populates
    /// every node's `assigned.current`/`assigned.extra` (spec §4.6).
    /// Call once after [`Partitioner::rebalance`] whenever membership
    /// changed; idempotent for a fixed active set and fixed totals.
    pub fn assign_counts(&mut self, nodes: &mut [Node]) {
        for (gid, group) in self.groups.iter_mut().enumerate() {
            if group.is_local() {
                continue;
            }
            let active = &self.active[gid];
            if active.is_empty() {
                continue; // keep last-known counts for the extra fallback below
            }
            let (hosts, services) = active.iter().fold((0u32, 0u32), |(h, s), id| {
                let info = &nodes[*id].info;
                (h + info.host_checks_handled, s + info.service_checks_handled)
            });
            group.known_hosts = hosts;
            group.known_services = services;
        }

        for node in nodes.iter_mut() {
            node.assigned = Default::default();
        }
        self.self_assigned = Assigned::default();

        let claimed_hosts: u32 = self.groups.iter().filter(|g| !g.is_local()).map(|g| g.known_hosts).sum();
        let claimed_services: u32 = self.groups.iter().filter(|g| !g.is_local()).map(|g| g.known_services).sum();
        let local_hosts = self.totals.hosts.saturating_sub(claimed_hosts);
        let local_services = self.totals.services.saturating_sub(claimed_services);

        if let Some(local_gid) = self.local_group {
            let active = self.active[local_gid].clone();
            for (peer_id, id) in active.iter().enumerate() {
                let hosts = distribute(local_hosts, active.len(), peer_id);
                let services = distribute(local_services, active.len(), peer_id);
                if *id == SELF_NODE_ID {
                    self.self_assigned.current.hosts = hosts;
                    self.self_assigned.current.services = services;
                } else {
                    let node = &mut nodes[*id];
                    node.assigned.current.hosts = hosts;
                    node.assigned.current.services = services;
                }
            }

            for (gid, group) in self.groups.iter().enumerate() {
                if group.is_local() {
                    continue;
                }
                let group_active = &self.active[gid];
                if !group_active.is_empty() {
                    for (peer_id, id) in group_active.iter().enumerate() {
                        let node = &mut nodes[*id];
                        node.assigned.current.hosts = distribute(group.known_hosts, group_active.len(), peer_id);
                        node.assigned.current.services =
                            distribute(group.known_services, group_active.len(), peer_id);
                    }
                } else if !active.is_empty() {
                    // spec §4.6: a poller group with zero active members
                    // hands its work to every active local-group peer,
                    // proportioned by the same deterministic mapping.
                    for (peer_id, id) in active.iter().enumerate() {
                        let hosts = distribute(group.known_hosts, active.len(), peer_id);
                        let services = distribute(group.known_services, active.len(), peer_id);
                        if *id == SELF_NODE_ID {
                            self.self_assigned.extra.hosts += hosts;
                            self.self_assigned.extra.services += services;
                        } else {
                            let node = &mut nodes[*id];
                            node.assigned.extra.hosts += hosts;
                            node.assigned.extra.services += services;
                        }
                    }
                }
            }
        }
    }

    pub fn local_group_id(&self) -> Option<PgroupId> {
        self.local_group
    }

    pub fn group_for_selector(&self, selector: &str) -> Option<PgroupId> {
        self.by_selector.get(&normalise_selector(selector)).copied()
    }

    /// The wire `selection` value events destined for `group` should carry
    /// (spec §4.1/§4.5): the group's own id, since the local group (id 0)
    /// never needs a selection and poller groups are always id >= 1.
    pub fn selection_for_group(group: PgroupId) -> u16 {
        group as u16
    }

    /// Reverse of [`Partitioner::selection_for_group`]: the poller group a
    /// non-zero `selection` value refers to, if any group has that id.
    pub fn group_for_selection(&self, selection: u16) -> Option<PgroupId> {
        if selection == 0 {
            return None;
        }
        let gid = selection as usize;
        if gid < self.groups.len() && !self.groups[gid].is_local() {
            Some(gid)
        } else {
            None
        }
    }

    /// Deterministic owner of object `id` within `group`: `id mod
    /// active_nodes`, indexing the active list in sorted order.
    pub fn owner(&self, group: PgroupId, id: u32) -> Owner {
        let active = &self.active[group];
        if active.is_empty() {
            return Owner::Extra;
        }
        let idx = (id as usize) % active.len();
        Owner::Node(active[idx])
    }

    pub fn active_members(&self, group: PgroupId) -> &[NodeId] {
        &self.active[group]
    }
}

/// Count of ids in `[0, total)` congruent to `peer_id` modulo `active`:
/// `floor(total / active) + 1` for the first `total % active` peer ids,
/// `floor(total / active)` for the rest. Equivalent to, but cheaper than,
/// counting `id % active == peer_id` over `0..total`.
fn distribute(total: u32, active: usize, peer_id: usize) -> u32 {
    if active == 0 || peer_id >= active {
        return 0;
    }
    let total = total as usize;
    let base = total / active;
    let remainder = total % active;
    (base + usize::from(peer_id < remainder)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn mk(role: Role, hg: Option<&str>) -> Node {
        let mut n = Node::new(0, "n".into(), role, Ipv4Addr::LOCALHOST, 15551);
        n.hostgroup = hg.map(String::from);
        n
    }

    #[test]
    fn assignment_is_idempotent_for_fixed_active_set() {
        let mut nodes = vec![mk(Role::Peer, None), mk(Role::Peer, None), mk(Role::Peer, None)];
        for (i, n) in nodes.iter_mut().enumerate() {
            n.id = i;
            n.state = NodeState::Connected;
        }
        let mut p = Partitioner::new();
        p.build(&mut nodes);
        let g = p.local_group_id().unwrap();
        let first: Vec<Owner> = (0..50).map(|id| p.owner(g, id)).collect();
        p.rebalance(&mut nodes);
        let second: Vec<Owner> = (0..50).map(|id| p.owner(g, id)).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn empty_group_falls_to_extra() {
        let mut nodes = vec![mk(Role::Poller, Some("dmz"))];
        let mut p = Partitioner::new();
        p.build(&mut nodes);
        let g = p.group_for_selector("dmz").unwrap();
        assert_eq!(p.owner(g, 7), Owner::Extra);
    }

    #[test]
    fn pollers_with_same_selector_share_a_group() {
        let mut nodes = vec![mk(Role::Poller, Some("dmz, edge")), mk(Role::Poller, Some("edge,dmz"))];
        nodes[0].id = 0;
        nodes[1].id = 1;
        nodes[0].state = NodeState::Connected;
        nodes[1].state = NodeState::Connected;
        let mut p = Partitioner::new();
        p.build(&mut nodes);
        assert_eq!(p.groups().len(), 2); // local + one poller group
        let g = p.group_for_selector("edge,dmz").unwrap();
        assert_eq!(p.active_members(g).len(), 2);
    }

    #[test]
    fn rebalance_on_peer_loss_reshuffles_evenly() {
        // spec §8 scenario 3, adjusted for self counting unconditionally
        // (spec §4.6): three peers plus self makes four active members,
        // 300 hosts split 75 each; one peer leaves, the remaining two
        // plus self split 300 three ways, 100 each.
        let mut nodes = vec![mk(Role::Peer, None), mk(Role::Peer, None), mk(Role::Peer, None)];
        for (i, n) in nodes.iter_mut().enumerate() {
            n.id = i;
            n.state = NodeState::Connected;
            n.info.start = 1000 + i as u64;
        }
        let mut p = Partitioner::new();
        p.set_self_start(1);
        p.build(&mut nodes);
        p.set_totals(300, 0);
        p.assign_counts(&mut nodes);
        for n in &nodes {
            assert_eq!(n.assigned.current.hosts, 75);
        }
        assert_eq!(p.self_assigned().current.hosts, 75);

        nodes[2].state = NodeState::None;
        p.rebalance(&mut nodes);
        p.assign_counts(&mut nodes);
        assert_eq!(nodes[0].assigned.current.hosts, 100);
        assert_eq!(nodes[1].assigned.current.hosts, 100);
        assert_eq!(p.self_assigned().current.hosts, 100);
    }

    #[test]
    fn poller_group_loss_redistributes_as_extra() {
        // spec §8 scenario 4: one local peer plus self (always active)
        // plus a poller handling 50 hosts; when the poller vanishes its
        // 50 hosts land on extra, not current.
        let mut nodes = vec![mk(Role::Peer, None), mk(Role::Poller, Some("edge"))];
        nodes[0].id = 0;
        nodes[1].id = 1;
        nodes[0].state = NodeState::Connected;
        nodes[0].info.start = 1;
        nodes[1].state = NodeState::Connected;
        nodes[1].info.start = 2;
        nodes[1].info.host_checks_handled = 50;

        let mut p = Partitioner::new();
        p.set_self_start(2);
        p.build(&mut nodes);
        p.set_totals(200, 0);
        p.assign_counts(&mut nodes);
        // local group: node0 (start 1) then self (start 2), 150 local
        // hosts split two ways.
        assert_eq!(nodes[0].assigned.current.hosts, 75);
        assert_eq!(p.self_assigned().current.hosts, 75);
        assert_eq!(nodes[0].assigned.extra.hosts, 0);

        nodes[1].state = NodeState::None;
        p.rebalance(&mut nodes);
        p.assign_counts(&mut nodes);
        // local-group membership (node0 + self) is unaffected by the
        // poller leaving, so the local share is unchanged; the poller's
        // retained 50 hosts show up as extra instead.
        assert_eq!(nodes[0].assigned.current.hosts, 75);
        assert_eq!(p.self_assigned().current.hosts, 75);
        assert_eq!(nodes[0].assigned.extra.hosts, 25);
        assert_eq!(p.self_assigned().extra.hosts, 25);
    }

    #[test]
    fn local_group_always_includes_self_even_with_no_peers() {
        let mut nodes: Vec<Node> = Vec::new();
        let mut p = Partitioner::new();
        p.set_self_start(42);
        p.build(&mut nodes);
        let g = p.local_group_id().unwrap();
        assert_eq!(p.active_members(g).len(), 1);
        assert_eq!(p.self_peer_id(), 0);
        p.set_totals(10, 0);
        p.assign_counts(&mut nodes);
        assert_eq!(p.self_assigned().current.hosts, 10);
    }
}
