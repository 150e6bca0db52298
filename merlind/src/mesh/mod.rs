pub mod reactor;

pub use reactor::{Mesh, Message};
