//! Memory mapping, including the mirror mapping that makes the data region look contiguous
//! across its wrap point.
//!
//! The header and the data region are one ordinary `MAP_SHARED` mapping of the backing file.
//! Directly after it, a second mapping of the same length as `max_item_size` aliases the file
//! pages at the *start* of the data region. A reserved item is never larger than
//! `max_item_size`, so writing or reading one starting near the end of the data region and
//! running past it lands on the same bytes it would have wrapped to at offset zero, and neither
//! the writer nor a reader has to special-case the wrap point.
use std::ffi::c_int;
use std::io;
use std::os::unix::io::RawFd;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::error::Error;
use crate::header::{RawHeader, HEADER_SIZE};

/// The OS calls needed to establish a mirror mapping.
///
/// Exposed so tests can substitute a vtable that fails predictably instead of depending on the
/// host's actual memory layout.
#[non_exhaustive]
#[derive(Debug)]
pub struct VTable {
    pub mmap: unsafe fn(*mut libc::c_void, usize, c_int, c_int, RawFd, i64) -> *mut libc::c_void,
    pub munmap: unsafe fn(*mut libc::c_void, usize) -> c_int,
    pub remap_file_pages: unsafe fn(*mut libc::c_void, usize, c_int, isize, c_int) -> c_int,
    pub errno: fn() -> c_int,
}

#[derive(Clone, Debug)]
pub struct Mapper {
    inner: Arc<VTable>,
}

impl Mapper {
    /// # Safety
    ///
    /// The vtable's functions must behave like their POSIX/Linux namesakes.
    pub unsafe fn new_unchecked(vtable: VTable) -> Self {
        Mapper {
            inner: Arc::new(vtable),
        }
    }

    pub fn new() -> Self {
        unsafe { Self::new_unchecked(VTable::new_libc()) }
    }

    /// Map `fd`'s first `header_len + data_len` bytes, then alias `mirror_len` bytes right after
    /// it onto the file pages starting at `header_len` (the start of the data region).
    fn mirror_map(
        &self,
        fd: RawFd,
        header_len: usize,
        data_len: usize,
        mirror_len: usize,
        writable: bool,
    ) -> io::Result<NonNull<u8>> {
        let prot = if writable {
            libc::PROT_READ | libc::PROT_WRITE
        } else {
            libc::PROT_READ
        };

        // mmap past the end of the file is valid as long as the extra pages are never touched
        // directly; map_mirror reseats them onto real file pages before anything can reach them.
        let total = header_len + data_len + mirror_len;
        let base = unsafe {
            (self.inner.mmap)(
                std::ptr::null_mut(),
                total,
                prot,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(io::Error::from_raw_os_error((self.inner.errno)()));
        }
        let base = base as *mut u8;

        if mirror_len > 0 {
            let mirror_addr = unsafe { base.add(header_len + data_len) } as *mut libc::c_void;
            if !self.map_mirror(mirror_addr, fd, header_len, mirror_len, prot) {
                let err = (self.inner.errno)();
                unsafe { (self.inner.munmap)(base as *mut libc::c_void, total) };
                return Err(io::Error::from_raw_os_error(err));
            }
        }

        Ok(unsafe { NonNull::new_unchecked(base) })
    }

    /// Make `addr` alias the `len` bytes of `fd` starting at file offset `header_len`. Prefers
    /// `remap_file_pages`, which only works when both offsets are page-aligned; falls back to a
    /// second `MAP_FIXED` mmap of the same file, which always works but costs a second mapping
    /// of the pages instead of reusing the first.
    fn map_mirror(
        &self,
        addr: *mut libc::c_void,
        fd: RawFd,
        header_len: usize,
        len: usize,
        prot: c_int,
    ) -> bool {
        let page_size = page_size();
        if header_len % page_size == 0 {
            let pgoff = (header_len / page_size) as isize;
            let ret = unsafe { (self.inner.remap_file_pages)(addr, len, 0, pgoff, 0) };
            if ret == 0 {
                return true;
            }
        }

        let mirror = unsafe {
            (self.inner.mmap)(
                addr,
                len,
                prot,
                libc::MAP_SHARED | libc::MAP_FIXED,
                fd,
                header_len as i64,
            )
        };
        mirror != libc::MAP_FAILED
    }

    fn unmap(&self, addr: *mut u8, len: usize) {
        unsafe {
            (self.inner.munmap)(addr as *mut libc::c_void, len);
        }
    }
}

impl Default for Mapper {
    fn default() -> Self {
        Self::new()
    }
}

impl VTable {
    pub fn new_libc() -> Self {
        unsafe fn _mmap(
            addr: *mut libc::c_void,
            len: usize,
            prot: c_int,
            flags: c_int,
            fd: RawFd,
            off: i64,
        ) -> *mut libc::c_void {
            libc::mmap(addr, len, prot, flags, fd, off as libc::off_t)
        }

        unsafe fn _munmap(addr: *mut libc::c_void, len: usize) -> c_int {
            libc::munmap(addr, len)
        }

        unsafe fn _remap_file_pages(
            addr: *mut libc::c_void,
            size: usize,
            prot: c_int,
            pgoff: isize,
            flags: c_int,
        ) -> c_int {
            #[cfg(target_os = "linux")]
            {
                libc::syscall(libc::SYS_remap_file_pages, addr, size, prot, pgoff, flags) as c_int
            }
            #[cfg(not(target_os = "linux"))]
            {
                let _ = (addr, size, prot, pgoff, flags);
                *libc::__errno_location() = libc::ENOSYS;
                -1
            }
        }

        fn _errno() -> c_int {
            unsafe { *libc::__errno_location() }
        }

        VTable {
            mmap: _mmap,
            munmap: _munmap,
            remap_file_pages: _remap_file_pages,
            errno: _errno,
        }
    }
}

pub fn page_size() -> usize {
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}

/// Rounds `len` up to a whole number of pages.
pub fn round_to_page(len: usize) -> usize {
    let page = page_size();
    (len + page - 1) / page * page
}

/// A live mapping of a ring buffer's header, data region, and mirror.
#[derive(Debug)]
pub struct Mapping {
    mapper: Mapper,
    base: NonNull<u8>,
    header_len: usize,
    data_len: usize,
    mirror_len: usize,
}

impl Mapping {
    pub fn data_len(&self) -> usize {
        self.data_len
    }

    pub fn header(&self) -> &RawHeader {
        unsafe { &*(self.base.as_ptr() as *const RawHeader) }
    }

    /// Mutable access to the header. Only sound to call before the mapping is shared with any
    /// reader, i.e. between [`Mapping::new`] and the writer's first `activate`.
    pub fn header_mut(&mut self) -> &mut RawHeader {
        unsafe { &mut *(self.base.as_ptr() as *mut RawHeader) }
    }

    /// Pointer to offset `off` within the (mirrored, so wrap-transparent) data region.
    ///
    /// # Safety
    ///
    /// `off` must be `< data_len`; the returned pointer is valid to dereference for up to
    /// `mirror_len` bytes past `data_len - off`, i.e. for any access of at most `mirror_len`
    /// bytes starting at `off`.
    pub unsafe fn data_ptr(&self, off: u64) -> NonNull<u8> {
        let base = self.base.as_ptr().add(self.header_len);
        NonNull::new_unchecked(base.add(off as usize))
    }

    /// Establish a fresh mapping: `data_len` and `mirror_len` must already be page-rounded.
    pub fn new(
        mapper: Mapper,
        fd: RawFd,
        header_len: usize,
        data_len: usize,
        mirror_len: usize,
        writable: bool,
    ) -> Result<Self, Error> {
        let base = mapper
            .mirror_map(fd, header_len, data_len, mirror_len, writable)
            .map_err(|e| Error::MappingFailed(e.raw_os_error().unwrap_or(0)))?;
        Ok(Mapping {
            mapper,
            base,
            header_len,
            data_len,
            mirror_len,
        })
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        self.mapper
            .unmap(self.base.as_ptr(), self.header_len + self.data_len + self.mirror_len);
    }
}

unsafe impl Send for Mapping {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_to_page_rounds_up() {
        let page = page_size();
        assert_eq!(round_to_page(1), page);
        assert_eq!(round_to_page(page), page);
        assert_eq!(round_to_page(page + 1), 2 * page);
    }

    #[test]
    fn header_size_fits_a_page() {
        // Header-plus-data mapping assumes the header occupies a whole number of pages on its
        // own so the data region starts page-aligned.
        assert!(HEADER_SIZE <= page_size());
    }
}
