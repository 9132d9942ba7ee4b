//! Sync fences.
//!
//! The queue never waits on a fence. It records the token next to the slot
//! and hands it to the other side, which owns GPU/HW synchronization.

use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct SyncFence {
    fd: Option<OwnedFd>,
}

impl SyncFence {
    pub fn new(fd: OwnedFd) -> Self {
        Self { fd: Some(fd) }
    }

    /// A fence that is already signalled.
    pub fn invalid() -> Arc<Self> {
        Arc::new(Self { fd: None })
    }

    pub fn is_valid(&self) -> bool {
        self.fd.is_some()
    }

    /// Raw descriptor, `-1` for the invalid fence.
    pub fn get(&self) -> RawFd {
        self.fd.as_ref().map(|fd| fd.as_raw_fd()).unwrap_or(-1)
    }
}
