pub mod codec;
pub mod correlate;
pub mod socket;

pub use codec::*;
pub use correlate::*;
pub use socket::*;
