pub mod config;
pub mod error;
pub mod export;
pub mod probe;
pub mod state;
pub mod trace;

#[cfg(test)]
pub(crate) mod test_utils;

pub use error::{Result, TraceError};
