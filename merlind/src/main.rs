// SPDX-License-Identifier: GPL-3.0-or-later

mod config;
mod csync;
mod error;
mod ipc;
mod mesh;
mod node;
mod pgroup;
mod router;
mod supervisor;
mod version;

use version::VersionInfo;

use std::io;
use std::path::PathBuf;

use clap::Parser;
use daemonize::Daemonize;
use tracing::Level;
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::Config;

#[derive(Debug, Clone)]
pub enum LoggingOutput {
    Stdout,
    Syslog,
    File(String),
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Arg {
    /// Configuration file path (also accepted as a bare positional argument).
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    #[arg(value_name = "CONFIG")]
    config_positional: Option<PathBuf>,

    /// Run in the foreground instead of detaching.
    #[arg(short = 'd', long = "debug")]
    foreground: bool,

    /// Report whether an instance is already running, then exit.
    #[arg(short = 's')]
    status: bool,

    /// Signal the running instance to terminate, then exit.
    #[arg(short = 'k')]
    kill: bool,
}

impl Arg {
    fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .or_else(|| self.config_positional.clone())
            .unwrap_or_else(|| PathBuf::from("/etc/merlin/merlind.conf"))
    }
}

fn tracing_set(daemon_mode: bool) {
    if daemon_mode {
        setup_tracing(LoggingOutput::Syslog).unwrap_or_else(|e| {
            eprintln!("failed to set up syslog logging: {e}, falling back to file");
            setup_tracing(LoggingOutput::File("merlind.log".to_string())).unwrap_or_else(|e| {
                eprintln!("failed to set up file logging: {e}, discarding logs");
                tracing_subscriber::fmt()
                    .with_max_level(Level::INFO)
                    .with_writer(std::io::sink)
                    .init();
            });
        });
    } else {
        setup_tracing(LoggingOutput::Stdout).unwrap_or_else(|e| {
            eprintln!("failed to set up stdout logging: {e}");
            tracing_subscriber::fmt().with_max_level(Level::INFO).init();
        });
    }
}

pub fn setup_tracing(output: LoggingOutput) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match output {
        LoggingOutput::Stdout => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .init();
        }
        LoggingOutput::Syslog => {
            use std::io::Write;
            use std::sync::Mutex;
            use syslog::{Facility, Formatter3164};

            struct SyslogWriter {
                logger: Mutex<syslog::Logger<syslog::LoggerBackend, Formatter3164>>,
            }

            impl SyslogWriter {
                fn new() -> anyhow::Result<Self> {
                    let formatter = Formatter3164 {
                        facility: Facility::LOG_DAEMON,
                        hostname: None,
                        process: "merlind".to_string(),
                        pid: std::process::id(),
                    };
                    let logger = syslog::unix(formatter)
                        .map_err(|e| anyhow::anyhow!("failed to connect to syslog: {e}"))?;
                    Ok(SyslogWriter {
                        logger: Mutex::new(logger),
                    })
                }
            }

            impl Write for SyslogWriter {
                fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                    if let Ok(mut logger) = self.logger.lock() {
                        let msg = String::from_utf8_lossy(buf);
                        let _ = logger.info(msg.trim());
                    }
                    Ok(buf.len())
                }

                fn flush(&mut self) -> io::Result<()> {
                    Ok(())
                }
            }

            let writer = SyslogWriter::new()?;
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(writer))
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_ansi(false);

            tracing_subscriber::registry().with(filter).with(layer).init();
        }
        LoggingOutput::File(name) => {
            let dir = dirs::home_dir()
                .map(|mut h| {
                    h.push(".merlind");
                    h
                })
                .unwrap_or_else(|| PathBuf::from("."));
            std::fs::create_dir_all(&dir).ok();
            let writer = rolling::never(&dir, &name);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_ansi(false);
            tracing_subscriber::registry().with(filter).with(layer).init();
        }
    }
    Ok(())
}

fn daemonize(pidfile: &std::path::Path) -> anyhow::Result<()> {
    let daemonize = Daemonize::new()
        .pid_file(pidfile)
        .chown_pid_file(true)
        .working_directory("/")
        .umask(0o027);

    daemonize
        .start()
        .map_err(|e| anyhow::anyhow!("failed to daemonize: {e}"))
}

/// Reads a pidfile and checks whether the process named in it is alive
/// (`kill(pid, 0)`), per spec §6's `-s`/`-k` contract.
fn read_running_pid(pidfile: &std::path::Path) -> Option<i32> {
    let text = std::fs::read_to_string(pidfile).ok()?;
    let pid: i32 = text.trim().parse().ok()?;
    let alive = unsafe { libc::kill(pid, 0) == 0 };
    alive.then_some(pid)
}

fn ipc_socket_path(cfg: &Config) -> PathBuf {
    cfg.pidfile
        .parent()
        .map(|p| p.join("merlind.ipc.sock"))
        .unwrap_or_else(|| PathBuf::from("/var/run/merlind.ipc.sock"))
}

fn main() -> anyhow::Result<()> {
    let arg = Arg::parse();
    let config_path = arg.config_path();

    if arg.status {
        let cfg = Config::load(&config_path)?;
        match read_running_pid(&cfg.pidfile) {
            Some(pid) => {
                println!("merlind running, pid {pid}");
                std::process::exit(0);
            }
            None => {
                println!("merlind not running");
                std::process::exit(1);
            }
        }
    }

    if arg.kill {
        let cfg = Config::load(&config_path)?;
        match read_running_pid(&cfg.pidfile) {
            Some(pid) => {
                let ok = unsafe { libc::kill(pid, libc::SIGTERM) == 0 };
                std::process::exit(if ok { 0 } else { 1 });
            }
            None => std::process::exit(1),
        }
    }

    let cfg = Config::load(&config_path)?;

    if !arg.foreground {
        daemonize(&cfg.pidfile)?;
    }
    tracing_set(!arg.foreground);

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(cfg))
}

async fn run(cfg: Config) -> anyhow::Result<()> {
    let version = VersionInfo::current();
    tracing::info!(version = %version.short_version(), "merlind starting");

    let socket_path = ipc_socket_path(&cfg);
    let (mesh_tx, mesh_rx) = mesh::Mesh::channel();

    let ipc_handle = ipc::run(socket_path, mesh_tx.clone()).await?;
    let mesh = mesh::Mesh::new(&cfg, ipc_handle, mesh_tx.clone(), mesh_rx);

    let mesh_task = tokio::spawn(mesh.run());
    supervisor::run(mesh_tx).await?;
    let _ = mesh_task.await;

    tracing::info!("merlind exiting");
    Ok(())
}
