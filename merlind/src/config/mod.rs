mod ast;
mod model;
mod parse;

pub use model::{Config, DatabaseConfig, NodeConfig, ObjectConfigSync, DEFAULT_PORT};
