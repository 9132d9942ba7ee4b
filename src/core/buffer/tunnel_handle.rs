//! Opaque platform handle for tunnel (secure/protected) composition.

use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};

use crate::core::errors::GsResult;

/// An owned fd plus a run of reserved ints.
#[derive(Debug, Default)]
pub struct TunnelHandle {
    fd: Option<OwnedFd>,
    reserve: Vec<i32>,
}

impl TunnelHandle {
    /// Takes ownership of `fd`; it is closed when the handle is dropped.
    pub fn new(fd: Option<OwnedFd>, reserve: Vec<i32>) -> Self {
        Self { fd, reserve }
    }

    /// Raw descriptor, `-1` when the handle carries none.
    pub fn fd(&self) -> RawFd {
        self.fd.as_ref().map(|fd| fd.as_raw_fd()).unwrap_or(-1)
    }

    pub fn owned_fd(&self) -> Option<&OwnedFd> {
        self.fd.as_ref()
    }

    pub fn reserve_ints(&self) -> u32 {
        self.reserve.len() as u32
    }

    pub fn reserve(&self) -> &[i32] {
        &self.reserve
    }

    /// Duplicate the fd into a fresh handle with the same reserve ints.
    pub fn try_clone(&self) -> GsResult<Self> {
        let fd = match &self.fd {
            Some(fd) => Some(fd.try_clone()?),
            None => None,
        };
        Ok(Self { fd, reserve: self.reserve.clone() })
    }

    /// True when `other` is absent or differs in fd, reserve count or contents.
    pub fn different(&self, other: Option<&TunnelHandle>) -> bool {
        let Some(other) = other else {
            return true;
        };
        self.fd() != other.fd() || self.reserve != other.reserve
    }

    /// Null-aware comparison. An absent handle is never different from anything.
    pub fn differs(this: Option<&TunnelHandle>, other: Option<&TunnelHandle>) -> bool {
        match this {
            Some(handle) => handle.different(other),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_different_null() {
        let handle = TunnelHandle::new(None, vec![1, 2]);
        assert!(handle.different(None));
        assert!(!TunnelHandle::differs(None, None));
        assert!(!TunnelHandle::differs(None, Some(&handle)));
    }

    #[test]
    fn test_different_contents() {
        let a = TunnelHandle::new(None, vec![1, 2]);
        let b = TunnelHandle::new(None, vec![1, 2]);
        let c = TunnelHandle::new(None, vec![1, 3]);
        let d = TunnelHandle::new(None, vec![1]);
        assert!(!a.different(Some(&b)));
        assert!(a.different(Some(&c)));
        assert!(a.different(Some(&d)));
    }

    #[test]
    fn test_try_clone_dups_fd() {
        let file = std::fs::File::open("/dev/null").unwrap();
        let handle = TunnelHandle::new(Some(OwnedFd::from(file)), vec![7]);
        let copy = handle.try_clone().unwrap();
        assert!(copy.fd() >= 0);
        assert_ne!(copy.fd(), handle.fd());
        assert_eq!(copy.reserve(), &[7]);
        assert!(handle.different(Some(&copy)));
        assert!(!handle.different(Some(&handle)));
    }
}
