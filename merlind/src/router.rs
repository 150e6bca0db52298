//! Event router (spec §4.5): five ordered dispatch rules applied to every
//! inbound event, from either the IPC endpoint (the local monitoring
//! engine) or a mesh peer. Pure with respect to I/O — callers (the mesh
//! reactor) perform the actual sends; this module only decides who should
//! receive what.

use merlin_wire::{ctrl, Event, EventKind};

use crate::node::{NodeId, NodeInfo, NodeState, NodeTable, Role};
use crate::pgroup::Partitioner;

#[derive(Debug, Default)]
pub struct Outcome {
    /// Set when a peer's `CTRL_ACTIVE` handshake completed this call,
    /// i.e. the node just transitioned `Negotiating -> Connected`.
    pub became_connected: bool,
    pub forward_to_peers: Vec<(NodeId, Event)>,
    pub forward_to_ipc: Vec<Event>,
    /// Body of a `CTRL_PATHS` event, handed to the importer hook.
    pub run_import: Option<Vec<u8>>,
    /// The local engine's own node-info block, decoded from its
    /// `CTRL_ACTIVE` announcement (spec §4.5 rule 2). `Some` means the
    /// caller should store it and mark the IPC endpoint `CONNECTED`.
    pub engine_active: Option<NodeInfo>,
    /// Set when the engine's handshake indicates our view of mesh
    /// membership has drifted from its own (node-set or config-time
    /// mismatch): every peer must be disconnected so they reconnect with
    /// fresh info (spec §4.5 rule 2).
    pub disconnect_all_peers: bool,
    /// Set on a `CTRL_INACTIVE` from the engine: clear whatever engine
    /// info was previously stored (spec §4.5 rule 3).
    pub clear_engine_info: bool,
}

/// Rule order for events arriving from a mesh peer:
/// 1. `CTRL_PATHS` -> importer
/// 2. (n/a: handshake validation is rule 2 only for IPC-sourced events)
/// 3. `CTRL_INACTIVE` -> clear this peer's engine info, tell the IPC side
/// 4. (n/a: fan-out is rule 4 only for IPC-sourced events)
/// 5. everything else from a peer -> deliver to IPC only, never
///    re-broadcast (this is what keeps the mesh loop-free)
pub fn dispatch_from_peer(
    node_id: NodeId,
    event: &Event,
    nodes: &mut NodeTable,
    _partitioner: &Partitioner,
) -> Outcome {
    let mut out = Outcome::default();

    if event.header.kind == EventKind::Ctrl {
        match event.header.code {
            ctrl::PATHS => {
                out.run_import = Some(event.body.clone());
                return out;
            }
            ctrl::ACTIVE => {
                if let Some(node) = nodes.get_mut(node_id) {
                    let was_connected = node.state == NodeState::Connected;
                    if node.state == NodeState::Negotiating || node.state == NodeState::None {
                        node.state = NodeState::Connected;
                    }
                    if let Some(info) = NodeInfo::decode(&event.body) {
                        node.info = info;
                    } else {
                        node.info.start = event.header.timestamp;
                    }
                    out.became_connected = !was_connected;
                }
                return out;
            }
            ctrl::INACTIVE => {
                if let Some(node) = nodes.get_mut(node_id) {
                    node.info.active_peer_bitmap = 0;
                }
                out.forward_to_ipc.push(event.clone());
                return out;
            }
            _ => {}
        }
    }

    // Rule 5: anything else that arrived from a peer goes to the IPC
    // endpoint and stops there.
    out.forward_to_ipc.push(event.clone());
    out
}

/// Rule order for events arriving from the IPC endpoint (the local
/// monitoring engine):
/// 1. `CTRL_PATHS` -> importer
/// 2. `CTRL_ACTIVE` -> handshake validation (the engine announcing
///    itself; nothing to re-broadcast, the per-peer handshake is driven
///    independently by the mesh reactor's own `CTRL_ACTIVE` heartbeats)
/// 3. `CTRL_INACTIVE` -> clear locally-held engine info
/// 4. non-control with `code != MAGIC_NONET` -> fan out to this node's
///    failover peers and any configured masters, unless the event carries
///    a `selection` (spec §4.5: a selected event is destined for one
///    poller group's hosts only, and goes only to that group's active
///    pollers)
pub fn dispatch_from_ipc(event: &Event, nodes: &NodeTable, partitioner: &Partitioner) -> Outcome {
    let mut out = Outcome::default();

    if event.header.kind == EventKind::Ctrl {
        match event.header.code {
            ctrl::PATHS => {
                out.run_import = Some(event.body.clone());
            }
            ctrl::ACTIVE => {
                // Rule 2: the local engine announcing itself active. Validate
                // its view of mesh membership (active-peer bitmap) against
                // ours; a mismatch means every peer must reconnect with
                // fresh info rather than risk serving a stale partition.
                if let Some(info) = NodeInfo::decode(&event.body) {
                    let observed = nodes
                        .iter()
                        .filter(|n| matches!(n.role, Role::Peer) && n.is_connected())
                        .count() as u32;
                    if info.active_peer_bitmap.count_ones() != observed {
                        out.disconnect_all_peers = true;
                    }
                    out.engine_active = Some(info);
                }
            }
            ctrl::INACTIVE => {
                out.clear_engine_info = true;
            }
            _ => {}
        }
        return out;
    }

    if event.is_nonet() {
        return out;
    }

    if event.header.selection != 0 {
        if let Some(gid) = partitioner.group_for_selection(event.header.selection) {
            for id in partitioner.active_members(gid) {
                if let Some(node) = nodes.get(*id) {
                    if node.role == Role::Poller && node.is_connected() {
                        out.forward_to_peers.push((node.id, event.clone()));
                    }
                }
            }
        }
        return out;
    }

    for node in nodes
        .iter()
        .filter(|n| matches!(n.role, Role::Peer | Role::Master))
        .filter(|n| n.is_connected())
    {
        out.forward_to_peers.push((node.id, event.clone()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::node::NodeTable;
    use std::net::Ipv4Addr;

    fn table_with_one_peer() -> NodeTable {
        let mut cfg = Config::default();
        cfg.nodes.push(crate::config::NodeConfig {
            name: "p1".into(),
            role: Role::Peer,
            address: Ipv4Addr::new(10, 0, 0, 2),
            port: 15551,
            hostgroup: None,
            connect: true,
            data_timeout: 0,
        });
        NodeTable::from_config(&cfg)
    }

    #[test]
    fn peer_data_event_goes_only_to_ipc() {
        let mut nodes = table_with_one_peer();
        let partitioner = Partitioner::new();
        let ev = Event::new_data(42, 0, 0, b"x".to_vec());
        let out = dispatch_from_peer(0, &ev, &mut nodes, &partitioner);
        assert_eq!(out.forward_to_ipc.len(), 1);
        assert!(out.forward_to_peers.is_empty());
    }

    #[test]
    fn peer_active_completes_handshake_once() {
        let mut nodes = table_with_one_peer();
        nodes.get_mut(0).unwrap().state = NodeState::Negotiating;
        let partitioner = Partitioner::new();
        let ev = Event::new_ctrl(ctrl::ACTIVE, 123).with_body(vec![1]);
        let out = dispatch_from_peer(0, &ev, &mut nodes, &partitioner);
        assert!(out.became_connected);
        assert_eq!(nodes.get(0).unwrap().state, NodeState::Connected);

        let out2 = dispatch_from_peer(0, &ev, &mut nodes, &partitioner);
        assert!(!out2.became_connected);
    }

    #[test]
    fn ipc_nonet_event_is_not_forwarded() {
        let nodes = table_with_one_peer();
        let partitioner = Partitioner::new();
        let ev = Event::new_data(merlin_wire::MAGIC_NONET, 0, 0, vec![]);
        let out = dispatch_from_ipc(&ev, &nodes, &partitioner);
        assert!(out.forward_to_peers.is_empty());
    }

    #[test]
    fn ipc_data_event_fans_out_to_connected_peers() {
        let mut nodes = table_with_one_peer();
        nodes.get_mut(0).unwrap().state = NodeState::Connected;
        let partitioner = Partitioner::new();
        let ev = Event::new_data(7, 0, 0, b"abc".to_vec());
        let out = dispatch_from_ipc(&ev, &nodes, &partitioner);
        assert_eq!(out.forward_to_peers.len(), 1);
    }

    #[test]
    fn ipc_selected_event_goes_only_to_matching_poller_group() {
        let mut cfg = Config::default();
        cfg.nodes.push(crate::config::NodeConfig {
            name: "p1".into(),
            role: Role::Peer,
            address: Ipv4Addr::new(10, 0, 0, 2),
            port: 15551,
            hostgroup: None,
            connect: true,
            data_timeout: 0,
        });
        cfg.nodes.push(crate::config::NodeConfig {
            name: "edge-1".into(),
            role: Role::Poller,
            address: Ipv4Addr::new(10, 0, 1, 5),
            port: 15551,
            hostgroup: Some("edge".into()),
            connect: true,
            data_timeout: 0,
        });
        let mut nodes = NodeTable::from_config(&cfg);
        nodes.get_mut(0).unwrap().state = NodeState::Connected;
        nodes.get_mut(1).unwrap().state = NodeState::Connected;

        let mut partitioner = Partitioner::new();
        partitioner.build(nodes.as_mut_slice());
        let gid = partitioner.group_for_selector("edge").unwrap();
        let selection = Partitioner::selection_for_group(gid);

        let ev = Event::new_data(7, selection, 0, b"abc".to_vec());
        let out = dispatch_from_ipc(&ev, &nodes, &partitioner);
        assert_eq!(out.forward_to_peers.len(), 1);
        assert_eq!(out.forward_to_peers[0].0, 1);

        let unselected = Event::new_data(7, 0, 0, b"abc".to_vec());
        let out = dispatch_from_ipc(&unselected, &nodes, &partitioner);
        assert_eq!(out.forward_to_peers.len(), 1);
    }
}
