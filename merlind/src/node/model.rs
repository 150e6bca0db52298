//! Node data model (spec §3).

use std::net::Ipv4Addr;
use std::time::{Instant, SystemTime};

use crate::pgroup::PgroupId;

pub type NodeId = usize;

/// Sentinel id representing this daemon itself within a peer group's
/// active-member list (spec §4.6: "count active nodes... plus self
/// unconditionally for the local group"). Never indexes into a real
/// `NodeTable`; callers that walk an active list must special-case it.
pub const SELF_NODE_ID: NodeId = usize::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    Peer,
    Master,
    Poller,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Peer => "peer",
            Role::Master => "master",
            Role::Poller => "poller",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    None,
    Pending,
    Negotiating,
    Connected,
}

/// Node-info block exchanged on handshake (spec §3).
#[derive(Debug, Clone, Default)]
pub struct NodeInfo {
    pub protocol_version: u8,
    pub software_version: String,
    pub start: u64,
    pub last_cfg_change: u64,
    pub config_hash: [u8; 20],
    pub peer_id: usize,
    pub host_checks_handled: u32,
    pub service_checks_handled: u32,
    pub active_peer_bitmap: u64,
}

impl NodeInfo {
    /// Serialises the handshake payload carried in the body of a
    /// `CTRL_ACTIVE` event: a fixed layout, deliberately distinct from the
    /// generic frame header (spec §3's "node-info block"), since it is
    /// opaque to everything but the two daemons exchanging it.
    ///
    /// Layout: protocol(1) + sw_version length(1) + sw_version bytes +
    /// start(8) + last_cfg_change(8) + config_hash(20) + peer_id(4) +
    /// host_checks_handled(4) + service_checks_handled(4) +
    /// active_peer_bitmap(8), all multi-byte fields big-endian.
    pub fn encode(&self) -> Vec<u8> {
        let sw = self.software_version.as_bytes();
        let sw_len = sw.len().min(255) as u8;
        let mut out = Vec::with_capacity(1 + 1 + sw_len as usize + 8 + 8 + 20 + 4 + 4 + 4 + 8);
        out.push(self.protocol_version);
        out.push(sw_len);
        out.extend_from_slice(&sw[..sw_len as usize]);
        out.extend_from_slice(&self.start.to_be_bytes());
        out.extend_from_slice(&self.last_cfg_change.to_be_bytes());
        out.extend_from_slice(&self.config_hash);
        out.extend_from_slice(&(self.peer_id as u32).to_be_bytes());
        out.extend_from_slice(&self.host_checks_handled.to_be_bytes());
        out.extend_from_slice(&self.service_checks_handled.to_be_bytes());
        out.extend_from_slice(&self.active_peer_bitmap.to_be_bytes());
        out
    }

    pub fn decode(body: &[u8]) -> Option<NodeInfo> {
        let mut pos = 0usize;
        let mut take = |n: usize| -> Option<&[u8]> {
            let slice = body.get(pos..pos + n)?;
            pos += n;
            Some(slice)
        };
        let protocol_version = *take(1)?.first()?;
        let sw_len = *take(1)?.first()? as usize;
        let sw_bytes = take(sw_len)?;
        let software_version = String::from_utf8_lossy(sw_bytes).into_owned();
        let start = u64::from_be_bytes(take(8)?.try_into().ok()?);
        let last_cfg_change = u64::from_be_bytes(take(8)?.try_into().ok()?);
        let config_hash: [u8; 20] = take(20)?.try_into().ok()?;
        let peer_id = u32::from_be_bytes(take(4)?.try_into().ok()?) as usize;
        let host_checks_handled = u32::from_be_bytes(take(4)?.try_into().ok()?);
        let service_checks_handled = u32::from_be_bytes(take(4)?.try_into().ok()?);
        let active_peer_bitmap = u64::from_be_bytes(take(8)?.try_into().ok()?);
        Some(NodeInfo {
            protocol_version,
            software_version,
            start,
            last_cfg_change,
            config_hash,
            peer_id,
            host_checks_handled,
            service_checks_handled,
            active_peer_bitmap,
        })
    }
}

#[cfg(test)]
mod info_tests {
    use super::*;

    #[test]
    fn node_info_round_trips() {
        let info = NodeInfo {
            protocol_version: 1,
            software_version: "merlind-test".to_string(),
            start: 1_700_000_000,
            last_cfg_change: 1_700_000_500,
            config_hash: [7u8; 20],
            peer_id: 3,
            host_checks_handled: 42,
            service_checks_handled: 100,
            active_peer_bitmap: 0b1011,
        };
        let bytes = info.encode();
        let back = NodeInfo::decode(&bytes).unwrap();
        assert_eq!(back.protocol_version, info.protocol_version);
        assert_eq!(back.software_version, info.software_version);
        assert_eq!(back.start, info.start);
        assert_eq!(back.last_cfg_change, info.last_cfg_change);
        assert_eq!(back.config_hash, info.config_hash);
        assert_eq!(back.peer_id, info.peer_id);
        assert_eq!(back.host_checks_handled, info.host_checks_handled);
        assert_eq!(back.service_checks_handled, info.service_checks_handled);
        assert_eq!(back.active_peer_bitmap, info.active_peer_bitmap);
    }

    #[test]
    fn truncated_body_fails_to_decode() {
        assert!(NodeInfo::decode(&[1, 0]).is_none());
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectCounts {
    pub hosts: u32,
    pub services: u32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Assigned {
    pub current: ObjectCounts,
    pub extra: ObjectCounts,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Counters {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub packets_sent: u64,
    pub packets_recv: u64,
}

/// Rate-limited synchronisation state for one direction (push or fetch) of
/// the config-sync arbiter (spec §4.7), named after
/// `original_source/daemon/daemon.c`'s `merlin_child`.
#[derive(Debug, Clone, Default)]
pub struct CsyncChild {
    pub cmd: Option<String>,
    pub running: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CsyncState {
    pub push: CsyncChild,
    pub fetch: CsyncChild,
    pub last_attempt: Option<Instant>,
    pub num_attempts: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct SocketEndpoint {
    pub local: std::net::SocketAddr,
    pub peer: std::net::SocketAddr,
}

pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub role: Role,
    pub address: Ipv4Addr,
    pub port: u16,
    pub fixed_srcport: bool,
    /// Pollers only: normalised (trimmed, sorted, deduped) selector.
    pub hostgroup: Option<String>,
    pub connect_enabled: bool,
    pub data_timeout: u64,

    pub state: NodeState,
    /// `Some` while a socket (inbound or outbound) is live or negotiating.
    pub socket: Option<SocketEndpoint>,
    pub last_connect_attempt: Option<Instant>,
    pub last_connect_attempt_logged: Option<Instant>,
    pub last_recv: Option<Instant>,

    pub counters: Counters,
    pub info: NodeInfo,

    pub peer_group: Option<PgroupId>,
    pub peer_id: usize,
    pub assigned: Assigned,

    pub csync: CsyncState,

    /// Channel to the live connection's writer task, if any.
    pub sender: Option<tokio::sync::mpsc::Sender<bytes::Bytes>>,
    pub send_queue_bytes: usize,
}

impl Node {
    pub fn new(id: NodeId, name: String, role: Role, address: Ipv4Addr, port: u16) -> Self {
        Node {
            id,
            name,
            role,
            address,
            port,
            fixed_srcport: false,
            hostgroup: None,
            connect_enabled: true,
            data_timeout: 0,
            state: NodeState::None,
            socket: None,
            last_connect_attempt: None,
            last_connect_attempt_logged: None,
            last_recv: None,
            counters: Counters::default(),
            info: NodeInfo::default(),
            peer_group: None,
            peer_id: 0,
            assigned: Assigned::default(),
            csync: CsyncState::default(),
            sender: None,
            send_queue_bytes: 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == NodeState::Connected
    }

    pub fn start_time(&self) -> u64 {
        self.info.start
    }

    pub fn sort_key(&self, now: SystemTime) -> (u8, u8, u64) {
        let _ = now;
        let connected = if self.state == NodeState::Connected { 0 } else { 1 };
        let has_start = if self.info.start != 0 { 0 } else { 1 };
        (connected, has_start, self.info.start)
    }
}
