//! Typed configuration model: the recognised keys from spec §6.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use crate::error::{MeshError, Result};
use crate::node::Role;

use super::ast::Block;

pub const DEFAULT_PORT: u16 = 15551;

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub enabled: bool,
    pub log_report_data: bool,
    pub log_notifications: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            enabled: false,
            log_report_data: true,
            log_notifications: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ObjectConfigSync {
    pub push: Option<String>,
    pub fetch: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub name: String,
    pub role: Role,
    pub address: Ipv4Addr,
    pub port: u16,
    /// Pollers only: raw comma-separated hostgroup selector, pre-normalisation.
    pub hostgroup: Option<String>,
    pub connect: bool,
    pub data_timeout: u64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub address: Ipv4Addr,
    pub pidfile: PathBuf,
    pub merlin_user: Option<String>,
    pub import_program: Option<String>,
    pub database: DatabaseConfig,
    pub object_config: ObjectConfigSync,
    pub nodes: Vec<NodeConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: DEFAULT_PORT,
            address: Ipv4Addr::UNSPECIFIED,
            pidfile: PathBuf::from("/var/run/merlind.pid"),
            merlin_user: None,
            import_program: None,
            database: DatabaseConfig::default(),
            object_config: ObjectConfigSync::default(),
            nodes: Vec::new(),
        }
    }
}

fn parse_bool(s: &str) -> bool {
    matches!(s, "1" | "yes" | "true" | "on")
}

impl Config {
    pub fn from_blocks(blocks: &[Block]) -> Result<Config> {
        let mut cfg = Config::default();

        let Some(daemon) = blocks.iter().find(|b| b.name == "daemon") else {
            return Err(MeshError::Configuration(
                "missing required 'daemon' block".into(),
            ));
        };

        for v in &daemon.vars {
            match v.key.as_str() {
                "port" => {
                    cfg.port = v.value.parse().map_err(|_| {
                        MeshError::Configuration(format!("illegal port: {}", v.value))
                    })?;
                    if cfg.port == 0 {
                        return Err(MeshError::Configuration("port must be nonzero".into()));
                    }
                }
                "address" => {
                    cfg.address = v.value.parse().map_err(|_| {
                        MeshError::Configuration(format!("illegal address: {}", v.value))
                    })?;
                }
                "pidfile" => cfg.pidfile = PathBuf::from(&v.value),
                "merlin_user" => cfg.merlin_user = Some(v.value.clone()),
                "import_program" => cfg.import_program = Some(v.value.clone()),
                other => {
                    tracing::warn!(key = other, "unknown daemon variable, ignoring");
                }
            }
        }

        if let Some(db) = daemon.nested_one("database") {
            let mut d = DatabaseConfig::default();
            for v in &db.vars {
                match v.key.as_str() {
                    "enabled" => d.enabled = parse_bool(&v.value),
                    "log_report_data" => d.log_report_data = parse_bool(&v.value),
                    k if k.starts_with("log_notification") => {
                        d.log_notifications = parse_bool(&v.value)
                    }
                    _ => {
                        // opaque to the core, handed to the DB collaborator verbatim.
                    }
                }
            }
            cfg.database = d;
        }

        if let Some(oc) = daemon.nested_one("object_config") {
            cfg.object_config = ObjectConfigSync {
                push: oc.var("push").map(String::from),
                fetch: oc.var("fetch").map(String::from),
            };
        }

        for block in blocks {
            let role = match block.name.as_str() {
                "peer" => Role::Peer,
                "poller" => Role::Poller,
                "noc" => Role::Master,
                "daemon" => continue,
                other => {
                    tracing::warn!(block = other, "unrecognised top-level block, ignoring");
                    continue;
                }
            };
            let Some(name) = &block.label else {
                return Err(MeshError::Configuration(format!(
                    "{} block missing a name label",
                    block.name
                )));
            };

            let address: Ipv4Addr = block
                .var("address")
                .ok_or_else(|| {
                    MeshError::Configuration(format!("node '{name}' missing address"))
                })?
                .parse()
                .map_err(|_| MeshError::Configuration(format!("node '{name}' has illegal address")))?;

            let port = match block.var("port") {
                Some(p) => p
                    .parse()
                    .map_err(|_| MeshError::Configuration(format!("node '{name}' has illegal port")))?,
                None => cfg.port,
            };

            if role != Role::Poller && block.var("hostgroup").is_some() {
                return Err(MeshError::Configuration(format!(
                    "node '{name}': hostgroup is only valid on poller blocks"
                )));
            }

            cfg.nodes.push(NodeConfig {
                name: name.clone(),
                role,
                address,
                port,
                hostgroup: block.var("hostgroup").map(String::from),
                connect: block.var("connect").map(parse_bool).unwrap_or(true),
                data_timeout: block
                    .var("data_timeout")
                    .map(|v| v.parse().unwrap_or(0))
                    .unwrap_or(0),
            });
        }

        Ok(cfg)
    }

    pub fn load(path: &std::path::Path) -> Result<Config> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| MeshError::Configuration(format!("cannot read {}: {e}", path.display())))?;
        let (_, blocks) = super::parse::parse_file(&text)
            .map_err(|e| MeshError::Configuration(format!("parse error in {}: {e}", path.display())))?;
        Config::from_blocks(&blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<Config> {
        let (_, blocks) = super::super::parse::parse_file(text).unwrap();
        Config::from_blocks(&blocks)
    }

    #[test]
    fn minimal_config() {
        let cfg = parse("daemon { port = 15551 }").unwrap();
        assert_eq!(cfg.port, 15551);
        assert_eq!(cfg.address, Ipv4Addr::UNSPECIFIED);
    }

    #[test]
    fn rejects_illegal_port() {
        let err = parse("daemon { port = not-a-number }").unwrap_err();
        assert!(matches!(err, MeshError::Configuration(_)));
    }

    #[test]
    fn parses_nodes() {
        let cfg = parse(
            r#"
            daemon { port = 15551 }
            peer node-b { address = 10.0.0.2 }
            poller edge { address = 10.0.1.1 hostgroup = "edge,dmz" }
            noc central { address = 10.2.0.1 port = 16000 }
        "#,
        )
        .unwrap();
        assert_eq!(cfg.nodes.len(), 3);
        assert_eq!(cfg.nodes[0].role, Role::Peer);
        assert_eq!(cfg.nodes[1].role, Role::Poller);
        assert_eq!(cfg.nodes[1].hostgroup.as_deref(), Some("edge,dmz"));
        assert_eq!(cfg.nodes[2].port, 16000);
    }

    #[test]
    fn rejects_hostgroup_on_non_poller() {
        let err = parse(
            r#"
            daemon { port = 15551 }
            peer node-b { address = 10.0.0.2 hostgroup = "x" }
        "#,
        )
        .unwrap_err();
        assert!(matches!(err, MeshError::Configuration(_)));
    }
}
