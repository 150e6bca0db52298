//! The mesh reactor (spec §4.3): one listening socket, a ≤2s tick driving
//! outbound connect attempts, child reaping and heartbeats, and a
//! membership-triggered partitioner run.
//!
//! Grounded in the teacher's `bgp::inst::Bgp` actor: a struct owning an
//! `mpsc` channel, fed both by its own internal tasks (accept loop,
//! per-connection reader/writer, the tick timer) and by siblings (the IPC
//! endpoint, the supervisor), dispatched from one `tokio::select!` loop.
//! This is the task-per-connection design spec §5 permits as an
//! alternative to a hand-rolled single-threaded reactor.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::{Bytes, BytesMut};
use socket2::{Domain, Socket, Type};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use merlin_wire::{ctrl, Decoded, Event};

use crate::config::{Config, ObjectConfigSync};
use crate::csync;
use crate::error::{MeshError, Result};
use crate::ipc::IpcHandle;
use crate::node::{resolve_tie, FindResult, NodeId, NodeInfo, NodeState, NodeTable, SocketEndpoint, TieBreak};
use crate::pgroup::Partitioner;
use crate::router;

const TICK: Duration = Duration::from_secs(2);
const CONNECT_RETRY: Duration = Duration::from_secs(5);
const SEND_QUEUE_LIMIT: usize = 256 * 1024;

pub enum Message {
    Inbound {
        stream: TcpStream,
        peer_addr: SocketAddr,
        local_addr: SocketAddr,
    },
    ConnectResult {
        node_id: NodeId,
        result: std::io::Result<(TcpStream, SocketAddr, SocketAddr)>,
    },
    Recv {
        node_id: NodeId,
        event: Event,
    },
    ConnGone {
        node_id: NodeId,
    },
    IpcEvent {
        event: Event,
    },
    IpcConnected,
    IpcDisconnected,
    Tick,
    /// `SIGUSR1`: write a diagnostic snapshot of every node (spec §4.8).
    Dump,
    Shutdown,
}

pub struct Mesh {
    listen_addr: Ipv4Addr,
    listen_port: u16,
    nodes: NodeTable,
    partitioner: Partitioner,
    ipc: IpcHandle,
    tx: mpsc::Sender<Message>,
    rx: mpsc::Receiver<Message>,
    membership_dirty: bool,
    start: Instant,
    start_unix: u64,
    software_version: String,
    import_program: Option<String>,
    object_config: ObjectConfigSync,
    diag_path: std::path::PathBuf,
    /// Whether the local monitoring engine currently holds the IPC socket
    /// (spec §4.4). Gates new inbound mesh connections and the config-sync
    /// arbiter's "local engine not connected" abstention row.
    ipc_connected: bool,
    /// The engine's last-advertised node-info block (spec §4.4's `info`
    /// attribute), carried to us as the body of its own `CTRL_ACTIVE`
    /// event. `None` until the engine has announced itself once.
    engine_info: Option<NodeInfo>,
    /// Spawned config-sync and importer children, tracked so shutdown can
    /// wait for all of them to finish (spec §4.8: outstanding children
    /// must reach zero before exit).
    children: JoinSet<()>,
}

impl Mesh {
    /// Pre-builds the channel the reactor will own, so callers that need
    /// to hand a [`mpsc::Sender<Message>`] to a collaborator constructed
    /// *before* the [`Mesh`] itself (the IPC endpoint, which the mesh in
    /// turn depends on) aren't stuck in a circular-construction bind.
    pub fn channel() -> (mpsc::Sender<Message>, mpsc::Receiver<Message>) {
        mpsc::channel(1024)
    }

    pub fn new(
        cfg: &Config,
        ipc: IpcHandle,
        tx: mpsc::Sender<Message>,
        rx: mpsc::Receiver<Message>,
    ) -> Self {
        let start_unix = now_unix();
        let mut partitioner = Partitioner::new();
        partitioner.set_self_start(start_unix);
        let mut nodes = NodeTable::from_config(cfg);
        partitioner.build(nodes.as_mut_slice());
        Mesh {
            listen_addr: cfg.address,
            listen_port: cfg.port,
            nodes,
            partitioner,
            ipc,
            tx,
            rx,
            membership_dirty: true,
            start: Instant::now(),
            start_unix,
            software_version: env!("CARGO_PKG_VERSION").to_string(),
            import_program: cfg.import_program.clone(),
            object_config: cfg.object_config.clone(),
            diag_path: cfg
                .pidfile
                .parent()
                .map(|p| p.join("merlind.diag"))
                .unwrap_or_else(|| std::path::PathBuf::from("/var/run/merlind.diag")),
            ipc_connected: false,
            engine_info: None,
            children: JoinSet::new(),
        }
    }

    pub fn handle(&self) -> mpsc::Sender<Message> {
        self.tx.clone()
    }

    pub async fn run(mut self) -> Result<()> {
        let listener = TcpListener::bind((self.listen_addr, self.listen_port))
            .await
            .map_err(MeshError::TransientIO)?;
        tracing::info!(addr = %self.listen_addr, port = self.listen_port, "mesh listening");

        let accept_tx = self.tx.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer_addr)) => {
                        let local_addr = match stream.local_addr() {
                            Ok(a) => a,
                            Err(_) => continue,
                        };
                        if accept_tx
                            .send(Message::Inbound {
                                stream,
                                peer_addr,
                                local_addr,
                            })
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                    }
                }
            }
        });

        let tick_tx = self.tx.clone();
        tokio::spawn(async move {
            let mut iv = tokio::time::interval(TICK);
            loop {
                iv.tick().await;
                if tick_tx.send(Message::Tick).await.is_err() {
                    break;
                }
            }
        });

        while let Some(msg) = self.rx.recv().await {
            match msg {
                Message::Shutdown => break,
                other => self.process(other).await,
            }
        }

        tracing::info!(outstanding = self.children.len(), "draining config-sync/importer children");
        while self.children.join_next().await.is_some() {}
        Ok(())
    }

    async fn process(&mut self, msg: Message) {
        match msg {
            Message::Tick => self.on_tick().await,
            Message::Inbound {
                stream,
                peer_addr,
                local_addr,
            } => self.on_inbound(stream, peer_addr, local_addr).await,
            Message::ConnectResult { node_id, result } => {
                self.on_connect_result(node_id, result).await
            }
            Message::Recv { node_id, event } => self.on_recv(node_id, event).await,
            Message::ConnGone { node_id } => self.on_conn_gone(node_id),
            Message::IpcEvent { event } => self.on_ipc_event(event).await,
            Message::IpcConnected => {
                tracing::info!("ipc endpoint connected");
                self.ipc_connected = true;
            }
            Message::IpcDisconnected => self.on_ipc_disconnected().await,
            Message::Dump => self.on_dump(),
            Message::Shutdown => unreachable!("filtered in run()"),
        }
    }

    async fn on_tick(&mut self) {
        let now = Instant::now();
        self.check_data_timeouts(now);

        let node_ids: Vec<NodeId> = self.nodes.iter().map(|n| n.id).collect();
        for id in node_ids {
            let due = {
                let node = self.nodes.get(id).unwrap();
                node.state == NodeState::None
                    && node.connect_enabled
                    && node
                        .last_connect_attempt
                        .map(|t| now.duration_since(t) >= CONNECT_RETRY)
                        .unwrap_or(true)
            };
            if due {
                self.try_connect(id).await;
            }
        }

        if self.membership_dirty {
            self.partitioner.rebalance(self.nodes.as_mut_slice());
            self.partitioner.assign_counts(self.nodes.as_mut_slice());
            self.membership_dirty = false;
        }

        csync::reap_children(&mut self.nodes);
        self.send_heartbeats().await;
    }

    /// Disconnects any `CONNECTED` node that has gone silent past its
    /// configured `data_timeout` (spec §4.2's liveness rule; 0 disables).
    fn check_data_timeouts(&mut self, now: Instant) {
        let mut stale = Vec::new();
        for node in self.nodes.iter() {
            if node.data_timeout == 0 || node.state != NodeState::Connected {
                continue;
            }
            let silent_for = node
                .last_recv
                .map(|t| now.duration_since(t))
                .unwrap_or_else(|| now.duration_since(self.start));
            if silent_for >= Duration::from_secs(node.data_timeout) {
                stale.push(node.id);
            }
        }
        for id in stale {
            tracing::warn!(node = id, "silent too long, disconnecting");
            if let Some(node) = self.nodes.get_mut(id) {
                node.state = NodeState::None;
                node.socket = None;
                node.sender = None;
            }
            self.membership_dirty = true;
        }
    }

    /// `SIGUSR1` diagnostic dump (spec §4.8, §6): one plain-text line per
    /// node with its current state, peer-group assignment and counters.
    fn on_dump(&self) {
        let mut out = String::new();
        let self_assigned = self.partitioner.self_assigned();
        out.push_str(&format!(
            "(self) peer_id={peer_id} current_hosts={ch} current_services={cs} extra_hosts={eh} extra_services={es}\n",
            peer_id = self.partitioner.self_peer_id(),
            ch = self_assigned.current.hosts,
            cs = self_assigned.current.services,
            eh = self_assigned.extra.hosts,
            es = self_assigned.extra.services,
        ));
        for node in self.nodes.iter() {
            out.push_str(&format!(
                "{name} role={role} state={state:?} peer_id={peer_id} current_hosts={ch} current_services={cs} extra_hosts={eh} extra_services={es} bytes_sent={bs} bytes_recv={br} config_hash={hash}\n",
                name = node.name,
                role = node.role.as_str(),
                state = node.state,
                peer_id = node.peer_id,
                ch = node.assigned.current.hosts,
                cs = node.assigned.current.services,
                eh = node.assigned.extra.hosts,
                es = node.assigned.extra.services,
                bs = node.counters.bytes_sent,
                br = node.counters.bytes_recv,
                hash = hex::encode(node.info.config_hash),
            ));
        }
        if let Err(e) = std::fs::write(&self.diag_path, out) {
            tracing::warn!(path = %self.diag_path.display(), error = %e, "failed to write diagnostic dump");
        } else {
            tracing::info!(path = %self.diag_path.display(), "wrote diagnostic dump");
        }
    }

    async fn try_connect(&mut self, id: NodeId) {
        let (addr, port, src_port) = {
            let node = self.nodes.get_mut(id).unwrap();
            node.state = NodeState::Pending;
            node.last_connect_attempt = Some(Instant::now());
            // spec §4.2: tell several merlin instances on one host apart by
            // binding the outbound socket to a deterministic source port
            // instead of an ephemeral one.
            let src_port = node
                .fixed_srcport
                .then(|| self.listen_port.wrapping_add(node.port));
            (node.address, node.port, src_port)
        };
        let listen_addr = self.listen_addr;
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = tokio::time::timeout(Duration::from_secs(20), async {
                let std_stream = connect_from(listen_addr, src_port, addr, port)?;
                let stream = TcpStream::from_std(std_stream)?;
                stream.writable().await?;
                if let Some(e) = stream.take_error()? {
                    return Err(e);
                }
                let local = stream.local_addr();
                let peer = stream.peer_addr();
                match (local, peer) {
                    (Ok(l), Ok(p)) => Ok((stream, l, p)),
                    (Err(e), _) | (_, Err(e)) => Err(e),
                }
            })
            .await;
            let result = match result {
                Ok(Ok(v)) => Ok(v),
                Ok(Err(e)) => Err(e),
                Err(_) => Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out")),
            };
            let _ = tx.send(Message::ConnectResult { node_id: id, result }).await;
        });
    }

    async fn on_connect_result(
        &mut self,
        node_id: NodeId,
        result: std::io::Result<(TcpStream, SocketAddr, SocketAddr)>,
    ) {
        match result {
            Ok((stream, local, peer)) => {
                self.adopt_socket(node_id, stream, local, peer, true).await;
            }
            Err(e) => {
                tracing::debug!(node = node_id, error = %e, "outbound connect failed");
                if let Some(node) = self.nodes.get_mut(node_id) {
                    node.state = NodeState::None;
                }
            }
        }
    }

    async fn on_inbound(&mut self, stream: TcpStream, peer_addr: SocketAddr, local_addr: SocketAddr) {
        if !self.ipc_connected {
            // spec §4.4: while the local engine is disconnected, no peer can
            // hand us data we'd be unable to replicate to it.
            tracing::debug!(peer = %peer_addr, "ipc endpoint down, refusing inbound mesh connection");
            return;
        }
        let SocketAddr::V4(peer_v4) = peer_addr else {
            return;
        };
        let node_id = match self
            .nodes
            .find_by_addr(*peer_v4.ip(), peer_v4.port(), self.listen_port)
        {
            FindResult::Exact(id) => id,
            FindResult::Presumed(id) => {
                tracing::warn!(peer = %peer_addr, node = id, "no exact source-port match, presuming candidate node");
                id
            }
            FindResult::None => {
                tracing::warn!(peer = %peer_addr, "rejecting connection from unconfigured peer");
                return;
            }
        };
        self.adopt_socket(node_id, stream, local_addr, peer_addr, false).await;
    }

    /// Adopts a newly-arrived socket for `node_id`, running the tie-break
    /// (spec §4.2) if the node already has one in flight.
    async fn adopt_socket(
        &mut self,
        node_id: NodeId,
        stream: TcpStream,
        local: SocketAddr,
        peer: SocketAddr,
        is_outbound: bool,
    ) {
        let existing = self.nodes.get(node_id).and_then(|n| n.socket);
        if let Some(_prev) = existing {
            let SocketAddr::V4(local_v4) = local else { return };
            let node = self.nodes.get(node_id).unwrap();
            let decision = resolve_tie(
                (local_v4.ip().to_owned(), self.listen_port),
                (node.address, node.port),
            );
            match decision {
                TieBreak::CloseBoth => {
                    tracing::warn!(node = node_id, "tie-break: exact address match, closing both sockets");
                    drop(stream);
                    if let Some(node) = self.nodes.get_mut(node_id) {
                        node.state = NodeState::None;
                        node.socket = None;
                        node.sender = None;
                    }
                    return;
                }
                TieBreak::KeepOutbound if !is_outbound => {
                    tracing::debug!(node = node_id, "tie-break: discarding inbound, keeping outbound");
                    drop(stream);
                    return;
                }
                TieBreak::KeepInbound if is_outbound => {
                    tracing::debug!(node = node_id, "tie-break: discarding outbound, keeping inbound");
                    drop(stream);
                    return;
                }
                _ => {}
            }
        }

        let node = self.nodes.get_mut(node_id).unwrap();
        node.state = NodeState::Negotiating;
        node.socket = Some(SocketEndpoint { local, peer });
        self.spawn_conn_tasks(node_id, stream);
        self.send_handshake(node_id).await;
    }

    fn spawn_conn_tasks(&mut self, node_id: NodeId, stream: TcpStream) {
        let (rd, wr) = stream.into_split();
        let (send_tx, mut send_rx) = mpsc::channel::<Bytes>(256);

        if let Some(node) = self.nodes.get_mut(node_id) {
            node.sender = Some(send_tx);
        }

        let writer_tx = self.tx.clone();
        tokio::spawn(async move {
            let mut wr = wr;
            while let Some(buf) = send_rx.recv().await {
                if wr.write_all(&buf).await.is_err() {
                    break;
                }
            }
            let _ = writer_tx.send(Message::ConnGone { node_id }).await;
        });

        let reader_tx = self.tx.clone();
        tokio::spawn(async move {
            let mut rd = rd;
            let mut buf = BytesMut::with_capacity(8192);
            loop {
                let mut chunk = [0u8; 8192];
                match rd.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    Err(_) => break,
                }
                loop {
                    match merlin_wire::decode(&mut buf) {
                        Ok(Decoded::Event(ev)) => {
                            if reader_tx.send(Message::Recv { node_id, event: ev }).await.is_err() {
                                return;
                            }
                        }
                        Ok(Decoded::NeedMore) => break,
                        Err(e) => {
                            tracing::warn!(node = node_id, error = %e, "protocol violation, dropping connection");
                            return;
                        }
                    }
                }
            }
            let _ = reader_tx.send(Message::ConnGone { node_id }).await;
        });
    }

    fn on_conn_gone(&mut self, node_id: NodeId) {
        if let Some(node) = self.nodes.get_mut(node_id) {
            if node.state != NodeState::None {
                tracing::info!(node = node_id, "peer connection lost");
            }
            node.state = NodeState::None;
            node.socket = None;
            node.sender = None;
        }
        self.membership_dirty = true;
    }

    async fn send_handshake(&mut self, node_id: NodeId) {
        let event = self.build_active_event();
        self.send_to(node_id, event).await;
    }

    /// Builds the handshake/heartbeat `CTRL_ACTIVE` event: its body is our
    /// own [`NodeInfo`] block (spec §3), so the peer on the other end can
    /// populate its copy of `node.info` the same way we populate ours in
    /// [`router::dispatch_from_peer`].
    fn build_active_event(&self) -> Event {
        let now = now_unix();
        let info = NodeInfo {
            protocol_version: merlin_wire::PROTOCOL_VERSION,
            software_version: self.software_version.clone(),
            start: self.start_unix,
            last_cfg_change: self.engine_info.as_ref().map(|i| i.last_cfg_change).unwrap_or(0),
            config_hash: self.engine_info.as_ref().map(|i| i.config_hash).unwrap_or([0u8; 20]),
            peer_id: self.partitioner.self_peer_id(),
            host_checks_handled: self.engine_info.as_ref().map(|i| i.host_checks_handled).unwrap_or(0),
            service_checks_handled: self.engine_info.as_ref().map(|i| i.service_checks_handled).unwrap_or(0),
            active_peer_bitmap: self.active_peer_bitmap(),
        };
        Event::new_ctrl(ctrl::ACTIVE, now).with_body(info.encode())
    }

    /// Bitmap of which local-group `peer_id`s are currently connected,
    /// carried in our own node-info block so the remote end can validate
    /// its view of mesh membership (spec §4.5 rule 2).
    fn active_peer_bitmap(&self) -> u64 {
        let mut bitmap = 0u64;
        for node in self.nodes.peers().filter(|n| n.is_connected()) {
            if node.peer_id < 64 {
                bitmap |= 1u64 << node.peer_id;
            }
        }
        bitmap
    }

    async fn send_heartbeats(&mut self) {
        let ids: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|n| n.is_connected())
            .map(|n| n.id)
            .collect();
        for id in ids {
            let event = self.build_active_event();
            self.send_to(id, event).await;
        }
    }

    async fn send_to(&mut self, node_id: NodeId, event: Event) {
        let mut out = BytesMut::new();
        if merlin_wire::encode(&event, &mut out).is_err() {
            return;
        }
        let bytes = out.freeze();
        let len = bytes.len();
        if let Some(node) = self.nodes.get_mut(node_id) {
            if node.send_queue_bytes + len > SEND_QUEUE_LIMIT {
                tracing::warn!(node = node_id, "send queue full, dropping connection");
                node.sender = None;
                node.state = NodeState::None;
                node.socket = None;
                return;
            }
            if let Some(tx) = node.sender.clone() {
                node.send_queue_bytes += len;
                node.counters.bytes_sent += len as u64;
                node.counters.packets_sent += 1;
                if tx.send(bytes).await.is_err() {
                    node.sender = None;
                }
            }
        }
    }

    async fn on_recv(&mut self, node_id: NodeId, event: Event) {
        if let Some(node) = self.nodes.get_mut(node_id) {
            node.last_recv = Some(Instant::now());
            node.counters.bytes_recv += event.body.len() as u64 + merlin_wire::HEADER_SIZE as u64;
            node.counters.packets_recv += 1;
        }

        let outcome = router::dispatch_from_peer(node_id, &event, &mut self.nodes, &self.partitioner);
        if outcome.became_connected {
            self.membership_dirty = true;
            let node = self.nodes.get_mut(node_id).unwrap();
            csync::on_peer_active(node);
            match &self.engine_info {
                Some(engine_info) if self.ipc_connected => {
                    csync::evaluate(
                        node,
                        &engine_info.config_hash,
                        engine_info.last_cfg_change,
                        &self.object_config,
                        &mut self.children,
                    );
                }
                _ => {
                    tracing::debug!(node = node_id, "cannot check config sync: local engine not connected");
                }
            }
        }
        for (target, ev) in outcome.forward_to_peers {
            self.send_to(target, ev).await;
        }
        for ev in outcome.forward_to_ipc {
            self.ipc.send(ev).await;
        }
        if let Some(paths) = outcome.run_import {
            self.run_importer(paths);
        }
    }

    async fn on_ipc_event(&mut self, event: Event) {
        let outcome = router::dispatch_from_ipc(&event, &self.nodes, &self.partitioner);
        if let Some(info) = outcome.engine_active {
            self.partitioner.set_totals(info.host_checks_handled, info.service_checks_handled);
            self.engine_info = Some(info);
            self.membership_dirty = true;
        }
        if outcome.clear_engine_info {
            self.engine_info = None;
        }
        if outcome.disconnect_all_peers {
            tracing::warn!("engine handshake mismatch, disconnecting all peers");
            let ids: Vec<NodeId> = self.nodes.iter().map(|n| n.id).collect();
            for id in ids {
                if let Some(node) = self.nodes.get_mut(id) {
                    node.state = NodeState::None;
                    node.socket = None;
                    node.sender = None;
                }
            }
            self.membership_dirty = true;
        }
        for (target, ev) in outcome.forward_to_peers {
            self.send_to(target, ev).await;
        }
        if let Some(paths) = outcome.run_import {
            self.run_importer(paths);
        }
    }

    fn run_importer(&mut self, paths: Vec<u8>) {
        let Some(program) = self.import_program.clone() else {
            return;
        };
        let arg = String::from_utf8_lossy(&paths).to_string();
        self.children.spawn(async move {
            csync::run_shell(&program, &[arg]).await;
        });
    }

    async fn on_ipc_disconnected(&mut self) {
        tracing::warn!("ipc endpoint disconnected, notifying peers");
        self.ipc_connected = false;
        let ids: Vec<NodeId> = self.nodes.iter().map(|n| n.id).collect();
        for id in ids {
            let inactive = Event::new_ctrl(ctrl::INACTIVE, now_unix());
            self.send_to(id, inactive).await;
        }
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Opens a non-blocking outbound socket, optionally bound to a specific
/// local port first (spec §4.2's deterministic source-port scheme), and
/// kicks off the connect. The caller waits for writability and checks
/// `SO_ERROR` to learn the outcome, same as a plain `TcpStream::connect`
/// would once awaited.
fn connect_from(
    listen_addr: Ipv4Addr,
    src_port: Option<u16>,
    addr: Ipv4Addr,
    port: u16,
) -> std::io::Result<std::net::TcpStream> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, None)?;
    socket.set_nonblocking(true)?;
    if let Some(src_port) = src_port {
        socket.set_reuse_address(true)?;
        let bind_addr: SocketAddr = (listen_addr, src_port).into();
        socket.bind(&bind_addr.into())?;
    }
    let remote: SocketAddr = (addr, port).into();
    match socket.connect(&remote.into()) {
        Ok(()) => {}
        Err(e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {}
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
        Err(e) => return Err(e),
    }
    Ok(socket.into())
}

#[cfg(test)]
mod connect_tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn connect_from_without_fixed_port_reaches_listener() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        let std_stream = connect_from(Ipv4Addr::LOCALHOST, None, Ipv4Addr::LOCALHOST, port).unwrap();
        listener.accept().unwrap();
        assert!(std_stream.peer_addr().is_ok());
    }

    #[test]
    fn connect_from_with_fixed_port_binds_local_port() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        // pick a distinct, almost-certainly-free source port for the bind.
        let src_port = port.wrapping_add(1);
        let std_stream =
            connect_from(Ipv4Addr::LOCALHOST, Some(src_port), Ipv4Addr::LOCALHOST, port).unwrap();
        listener.accept().unwrap();
        assert_eq!(std_stream.local_addr().unwrap().port(), src_port);
    }
}
