//! Process-level supervision (spec §4.8): signal handling and the
//! top-level shutdown sequence. Grounded in the teacher's `main.rs`
//! `#[tokio::main]` entry point, generalised from a single `tokio::select!`
//! over one `Bgp` instance to the mesh + IPC pair this daemon runs.

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;

use crate::mesh::Message as MeshMessage;

/// Installs signal handlers and blocks until a termination signal arrives,
/// forwarding a clean shutdown request to the mesh reactor. `SIGPIPE` is
/// ignored up front (spec: writes to a peer that has reset must surface as
/// an I/O error on the socket, never a process-killing signal). `SIGUSR1`
/// dumps a one-line diagnostic summary to the log rather than terminating.
pub async fn run(mesh_tx: mpsc::Sender<MeshMessage>) -> std::io::Result<()> {
    ignore_sigpipe();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigusr1 = signal(SignalKind::user_defined1())?;
    let mut sigchld = signal(SignalKind::child())?;

    loop {
        tokio::select! {
            _ = sigint.recv() => {
                tracing::info!("received SIGINT, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                tracing::info!("received SIGTERM, shutting down");
                break;
            }
            _ = sigusr1.recv() => {
                tracing::info!("received SIGUSR1, dumping diagnostics");
                let _ = mesh_tx.send(MeshMessage::Dump).await;
            }
            _ = sigchld.recv() => {
                // tokio::process::Command already reaps its own children
                // via a dedicated waiter thread; this arm exists so the
                // signal itself never interrupts the process, mirroring
                // the original daemon's non-blocking `waitpid` tick.
                tracing::debug!("received SIGCHLD");
            }
        }
    }

    let _ = mesh_tx.send(MeshMessage::Shutdown).await;
    Ok(())
}

fn ignore_sigpipe() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_IGN);
    }
}
