//! Owned file descriptor primitives used by the `mrb` mapping layer.
//!
//! `mrb` opens and creates its own backing files; it does not inherit them from an
//! environment-provided descriptor the way the wider shmfd tooling this crate is drawn from
//! does. What's kept here is the narrow sliver both uses share: owning a raw fd past the point
//! it was opened, and a portable `fstat` to recover a file's size before mapping it.
use std::os::unix::io::RawFd;

pub mod op;

pub use op::{Shm, ShmError, ShmVTable, Stat};

/// A file descriptor owned by this process.
///
/// Dropping a `SharedFd` closes the underlying file.
pub struct SharedFd {
    fd: RawFd,
}

impl SharedFd {
    /// Take ownership of an already-open file descriptor.
    ///
    /// # Safety
    ///
    /// `fd` must be a valid, open descriptor, and the caller must not use it through any other
    /// owner after this call.
    pub unsafe fn from_raw_fd(fd: RawFd) -> Self {
        SharedFd { fd }
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.fd
    }

    /// Release ownership, returning the raw descriptor without closing it.
    pub fn into_raw_fd(self) -> RawFd {
        let this = core::mem::ManuallyDrop::new(self);
        this.fd
    }
}

impl Drop for SharedFd {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

impl std::os::unix::io::AsRawFd for SharedFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd
    }
}
