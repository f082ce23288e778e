use super::SharedFd;
use std::ffi::c_int;
use std::sync::Arc;

/// Interact with `fstat` and related calls.
pub struct Shm {
    inner: Arc<ShmInner>,
}

struct ShmInner {
    vtable: ShmVTable,
}

/// An error returned from a `stat` call against a shared memory file.
#[derive(Debug)]
pub struct ShmError(pub c_int);

/// *Fixed* type, not platform dependent.
type OffT = i64;
type BlkSizeT = i64;
type BlkCntT = i64;
type TimeT = i64;

#[non_exhaustive]
#[derive(Default)]
pub struct Stat {
    pub st_mode: u32,
    pub st_uid: u32,
    pub st_gid: u32,
    pub st_size: OffT,
    pub st_blksize: BlkSizeT,
    pub st_blocks: BlkCntT,
    pub st_atime: TimeT,
    pub st_atime_nsec: i64,
    pub st_mtime: TimeT,
    pub st_mtime_nsec: i64,
    pub st_ctime: TimeT,
    pub st_ctime_nsec: i64,
}

/// A table of OS functions.
///
/// This enumerates the functions required to interact with the `SharedFd` object. A vtable must
/// contain functions that behave according to the POSIX/libc specification of the correspondingly
/// named functions, see the safety precondition of [`Shm::new_unchecked`]. A default table is
/// available via [`Shm::new`].
///
/// You're encouraged to provide your own objects here instead of hooking the functions themselves
/// with override/linker tricks, e.g. to exercise `mrb::map` error paths in tests.
#[non_exhaustive]
pub struct ShmVTable {
    pub fstat: fn(c_int, Option<&mut Stat>) -> c_int,
    pub errno: fn() -> c_int,
}

impl Shm {
    /// Create a `Shm` from a customized vtable.
    ///
    /// # Safety
    ///
    /// The vtable must contain a correct set of functions implementing the POSIX `fstat`
    /// interface.
    pub unsafe fn new_unchecked(vtable: ShmVTable) -> Self {
        Shm {
            inner: Arc::new(ShmInner { vtable }),
        }
    }

    pub fn new() -> Self {
        unsafe { Self::new_unchecked(ShmVTable::new_libc()) }
    }

    pub fn stat(&self, shared: &SharedFd) -> Result<Stat, ShmError> {
        let mut stat = Stat::default();
        let ret = (self.inner.vtable.fstat)(shared.as_raw_fd(), Some(&mut stat));

        if ret < 0 {
            Err(ShmError((self.inner.vtable.errno)()))
        } else {
            Ok(stat)
        }
    }
}

impl Default for Shm {
    fn default() -> Self {
        Self::new()
    }
}

impl ShmVTable {
    pub fn new_libc() -> Self {
        fn _fstat(fd: c_int, stat: Option<&mut Stat>) -> c_int {
            let mut uninit = std::mem::MaybeUninit::<libc::stat>::zeroed();
            // Safety: passing the correct pointer to a struct of libc::stat.
            let ret = unsafe { libc::fstat(fd, uninit.as_mut_ptr()) };

            if ret == 0 {
                // Safety: always initialized on return with success.
                let lstat = unsafe { uninit.assume_init() };
                if let Some(stat) = stat {
                    *stat = Stat {
                        st_mode: lstat.st_mode,
                        st_uid: lstat.st_uid,
                        st_gid: lstat.st_gid,
                        st_size: lstat.st_size,
                        st_blksize: lstat.st_blksize,
                        st_blocks: lstat.st_blocks,
                        st_atime: lstat.st_atime,
                        st_atime_nsec: lstat.st_atime_nsec,
                        st_mtime: lstat.st_mtime,
                        st_mtime_nsec: lstat.st_mtime_nsec,
                        st_ctime: lstat.st_ctime,
                        st_ctime_nsec: lstat.st_ctime_nsec,
                    };
                };
            }

            ret
        }

        fn _errno() -> c_int {
            unsafe { *libc::__errno_location() }
        }

        ShmVTable {
            fstat: _fstat,
            errno: _errno,
        }
    }
}
