//! Flat arena node table (spec §9 design note): nodes reference their peer
//! group by index rather than by owning handle, since node ↔ peer-group
//! ownership is cyclic (a peer group names its member nodes; a node names
//! its peer group).

use std::net::Ipv4Addr;

use crate::config::{Config, NodeConfig};

use super::model::{Node, NodeId, Role};

/// Outcome of [`NodeTable::find_by_addr`] (spec §4.2 `on_accept`): an exact
/// match on the deterministic fixed-source-port scheme wins outright; a
/// presumptive match is the first same-address candidate that doesn't use
/// a fixed source port, and callers must log a warning per spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindResult {
    Exact(NodeId),
    Presumed(NodeId),
    None,
}

#[derive(Default)]
pub struct NodeTable {
    nodes: Vec<Node>,
}

impl NodeTable {
    pub fn from_config(cfg: &Config) -> Self {
        let mut table = NodeTable::default();
        for nc in &cfg.nodes {
            table.insert(nc);
        }
        table.derive_fixed_srcports();
        table
    }

    fn insert(&mut self, nc: &NodeConfig) -> NodeId {
        let id = self.nodes.len();
        let mut node = Node::new(id, nc.name.clone(), nc.role, nc.address, nc.port);
        node.hostgroup = nc.hostgroup.clone();
        node.connect_enabled = nc.connect;
        node.data_timeout = nc.data_timeout;
        self.nodes.push(node);
        id
    }

    /// Marks `fixed_srcport` on any node sharing an address with another
    /// configured node, or bound to loopback, per
    /// `original_source/daemon/daemon.c:node_preprocess_object_config`:
    /// several merlin instances on one host are told apart by binding
    /// their outbound sockets to `listen_port + target_port` instead of an
    /// ephemeral port, so an inbound accept can match them unambiguously.
    fn derive_fixed_srcports(&mut self) {
        let loopback = Ipv4Addr::LOCALHOST;
        for i in 0..self.nodes.len() {
            if self.nodes[i].address == loopback {
                self.nodes[i].fixed_srcport = true;
            }
        }
        for i in 0..self.nodes.len() {
            for j in (i + 1)..self.nodes.len() {
                if self.nodes[i].address == self.nodes[j].address {
                    self.nodes[i].fixed_srcport = true;
                    self.nodes[j].fixed_srcport = true;
                }
            }
        }
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Node> {
        self.nodes.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn as_slice(&self) -> &[Node] {
        &self.nodes
    }

    pub fn as_mut_slice(&mut self) -> &mut [Node] {
        &mut self.nodes
    }

    /// Finds the configured node matching an inbound peer address, per
    /// `original_source/module/net.c`'s `find_node`: a node whose address
    /// matches and whose expected source port (`listen_port +
    /// node.port`) equals the observed source port is an exact match and
    /// wins outright; otherwise the first non-fixed-source-port candidate
    /// sharing the address is returned as a presumptive match (and the
    /// caller logs a warning, since the spec explicitly calls this case
    /// out as needing one).
    pub fn find_by_addr(&self, addr: Ipv4Addr, source_port: u16, listen_port: u16) -> FindResult {
        let mut fallback: Option<NodeId> = None;
        for n in &self.nodes {
            if n.address != addr {
                continue;
            }
            let expected = listen_port.wrapping_add(n.port);
            if source_port == expected {
                return FindResult::Exact(n.id);
            }
            if fallback.is_none() && !n.fixed_srcport {
                fallback = Some(n.id);
            }
        }
        match fallback {
            Some(id) => FindResult::Presumed(id),
            None => FindResult::None,
        }
    }

    pub fn find_by_name(&self, name: &str) -> Option<NodeId> {
        self.nodes.iter().find(|n| n.name == name).map(|n| n.id)
    }

    pub fn peers(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.role == Role::Peer)
    }

    pub fn masters(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.role == Role::Master)
    }

    pub fn pollers(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.role == Role::Poller)
    }
}
