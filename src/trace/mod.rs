pub mod engine;
pub mod listener;
pub mod multi;
pub mod signatures;

pub use engine::*;
pub use listener::{Reply, ReplyListener, spawn_listener};
pub use multi::*;
pub use signatures::*;
