//! Sent-probe signatures shared between a trace and its listener.
//!
//! The engine inserts the UDP header of each probe right before sending it,
//! and the listener checks quoted headers against the set. Entries are never
//! removed while the trace runs.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

use crate::probe::codec::UDP_HEADER_SIZE;

/// UDP header bytes of one transmitted probe
pub type Signature = [u8; UDP_HEADER_SIZE];

/// Thread-safe, insert-only set of probe signatures
#[derive(Debug, Clone, Default)]
pub struct SentSignatures {
    inner: Arc<Mutex<HashSet<Signature>>>,
}

impl SentSignatures {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the signature of an encoded probe. Returns `false` for a probe
    /// shorter than a UDP header.
    pub fn record(&self, probe: &[u8]) -> bool {
        match signature_of(probe) {
            Some(sig) => {
                self.inner.lock().insert(sig);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, sig: &Signature) -> bool {
        self.inner.lock().contains(sig)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// Leading UDP header of an encoded probe
pub fn signature_of(probe: &[u8]) -> Option<Signature> {
    probe.get(..UDP_HEADER_SIZE)?.try_into().ok()
}
