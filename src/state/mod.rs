pub mod hop;
pub mod session;
pub mod summary;

pub use hop::*;
pub use session::*;
pub use summary::*;
