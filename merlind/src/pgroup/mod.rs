mod model;
mod partition;

pub use model::{normalise_selector, PeerGroup, PgroupId};
pub use partition::{Owner, Partitioner};
