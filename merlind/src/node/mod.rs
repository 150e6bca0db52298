mod conn;
mod model;
mod table;

pub use conn::{resolve_tie, transition_allowed, TieBreak};
pub use model::{
    Assigned, CsyncChild, CsyncState, Node, NodeId, NodeInfo, NodeState, ObjectCounts, Role,
    SocketEndpoint, SELF_NODE_ID,
};
pub use table::{FindResult, NodeTable};
