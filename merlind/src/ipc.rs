//! Local IPC endpoint (spec §4.4): a Unix-domain stream socket to the
//! monitoring engine. Re-accepts every 5s whenever no engine is connected;
//! on disconnect the mesh reactor broadcasts `CTRL_INACTIVE` to every peer
//! (spec §4.4's defining behaviour), which is why this module only owns
//! the socket and hands events to/from `crate::mesh::reactor::Mesh` rather
//! than deciding anything about the mesh itself.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, Mutex};

use merlin_wire::{Decoded, Event};

use crate::mesh::reactor::Message as MeshMessage;

const REACCEPT_INTERVAL: Duration = Duration::from_secs(5);

/// Shared handle the mesh reactor uses to push events at whichever engine
/// connection is currently live, if any.
#[derive(Clone)]
pub struct IpcHandle {
    current: Arc<Mutex<Option<mpsc::Sender<bytes::Bytes>>>>,
}

impl IpcHandle {
    pub async fn send(&self, event: Event) {
        let mut out = BytesMut::new();
        if merlin_wire::encode(&event, &mut out).is_err() {
            return;
        }
        let guard = self.current.lock().await;
        if let Some(tx) = guard.as_ref() {
            let _ = tx.send(out.freeze()).await;
        }
    }
}

/// Runs the accept-and-serve loop for the IPC endpoint until the process
/// shuts down. Binds `path` as a Unix-domain listener (removing any stale
/// socket file left behind by a previous run first, matching the
/// teacher's convention of cleaning up its own runtime-dir sockets before
/// binding).
pub async fn run(path: PathBuf, mesh_tx: mpsc::Sender<MeshMessage>) -> std::io::Result<IpcHandle> {
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path)?;
    let current = Arc::new(Mutex::new(None));
    let handle = IpcHandle {
        current: current.clone(),
    };

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    tracing::info!("ipc engine connected");
                    let _ = mesh_tx.send(MeshMessage::IpcConnected).await;
                    serve_one(stream, &current, &mesh_tx).await;
                    *current.lock().await = None;
                    let _ = mesh_tx.send(MeshMessage::IpcDisconnected).await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "ipc accept failed");
                    tokio::time::sleep(REACCEPT_INTERVAL).await;
                }
            }
        }
    });

    Ok(handle)
}

async fn serve_one(
    stream: UnixStream,
    current: &Arc<Mutex<Option<mpsc::Sender<bytes::Bytes>>>>,
    mesh_tx: &mpsc::Sender<MeshMessage>,
) {
    let (mut rd, mut wr) = stream.into_split();
    let (tx, mut rx) = mpsc::channel::<bytes::Bytes>(256);
    *current.lock().await = Some(tx);

    let writer = tokio::spawn(async move {
        while let Some(buf) = rx.recv().await {
            if wr.write_all(&buf).await.is_err() {
                break;
            }
        }
    });

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
                Ok(Decoded::Event(event)) => {
                    if mesh_tx.send(MeshMessage::IpcEvent { event }).await.is_err() {
                        return;
                    }
                }
                Ok(Decoded::NeedMore) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "ipc protocol violation");
                    writer.abort();
                    return;
                }
            }
        }
    }
    writer.abort();
}
