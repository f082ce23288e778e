//! The single-writer half: `create`, `reserve`, `commit`, `shutdown`.
use std::ffi::CString;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use mrb_fd::SharedFd;

use crate::error::Error;
use crate::header::HEADER_SIZE;
use crate::map::{round_to_page, Mapper, Mapping};
use crate::ptr::{clog, ilog, roundup, Item, PtrCodec};

/// Biggest alignment any payload's start is promised; matches what a `repr(align(32))` type
/// would get from an allocator, generous enough for SIMD loads into the payload without the
/// writer needing to know what the reader will do with the bytes.
const ALIGN: u16 = 32;

/// The write end of a ring buffer.
///
/// `Writer` holds raw pointers into the mapping, so it is `!Sync`: only one thread may drive
/// `reserve`/`commit` at a time, matching the "single writer" half of the contract. It is `Send`
/// so ownership can move to a dedicated writer thread.
#[derive(Debug)]
pub struct Writer {
    mapping: Mapping,
    codec: PtrCodec,
    data_offset: u64,
    size: u64,
    max_item_size: u64,
    pending: Option<Item>,
}

unsafe impl Send for Writer {}

impl Writer {
    /// Create a new backing file at `path` and initialize a fresh ring buffer in it.
    ///
    /// `size` and `max_item_size` are rounded up to whole pages. Fails with
    /// [`Error::AlreadyExists`] if `path` already exists.
    pub fn create(path: &Path, size: u64, max_item_size: u64) -> Result<Self, Error> {
        let size = round_to_page(size as usize) as u64;
        let max_item_size = round_to_page(max_item_size as usize) as u64;

        let c_path = CString::new(path.as_os_str().to_string_lossy().into_owned())
            .map_err(|_| Error::Io(std::io::Error::from(std::io::ErrorKind::InvalidInput)))?;

        let fd = unsafe {
            libc::open(
                c_path.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                (libc::S_IRUSR | libc::S_IRGRP | libc::S_IROTH) as libc::c_uint,
            )
        };
        if fd < 0 {
            let err = std::io::Error::last_os_error();
            return Err(if err.kind() == std::io::ErrorKind::AlreadyExists {
                Error::AlreadyExists
            } else {
                Error::Io(err)
            });
        }
        let fd = unsafe { SharedFd::from_raw_fd(fd) };

        let header_len = round_to_page(HEADER_SIZE);
        let file_len = header_len as u64 + size;
        if unsafe { libc::ftruncate(fd.as_raw_fd(), file_len as libc::off_t) } != 0 {
            let err = std::io::Error::last_os_error();
            let _ = unsafe { libc::unlink(c_path.as_ptr()) };
            return Err(Error::Io(err));
        }

        let mapper = Mapper::new();
        let mut mapping = match Mapping::new(
            mapper,
            fd.as_raw_fd(),
            header_len,
            size as usize,
            max_item_size as usize,
            true,
        ) {
            Ok(mapping) => mapping,
            Err(err) => {
                let _ = unsafe { libc::unlink(c_path.as_ptr()) };
                return Err(err);
            }
        };
        // The mapping owns the pages now; the descriptor can close like the reference writer's
        // does once its mmap has been established.
        drop(fd);

        let align_bits = ilog(ALIGN as u64);
        let off_bits = clog(size) - align_bits;
        let codec = PtrCodec { align_bits, off_bits };
        let data_offset = roundup(std::mem::size_of::<u64>() as u64, align_bits);

        mapping.header_mut().init(align_bits, off_bits, max_item_size);
        let header = mapping.header();
        header.store_tail(codec.pack(Item { seq: 1, off: 0 }), Ordering::Relaxed);
        header.activate();

        Ok(Writer {
            mapping,
            codec,
            data_offset,
            size,
            max_item_size,
            pending: None,
        })
    }

    fn framing(&self, off: u64) -> &AtomicU64 {
        unsafe { &*(self.mapping.data_ptr(off).as_ptr() as *const AtomicU64) }
    }

    /// Reserve room for a `len`-byte payload and return a pointer to write it into.
    ///
    /// The returned pointer is valid for exactly `len` bytes; writing outside that range
    /// corrupts the buffer's framing. A second `reserve` before `commit` silently discards the
    /// first reservation, mirroring the reference writer's single pending-item state.
    pub fn reserve(&mut self, len: u64) -> Result<NonNull<u8>, Error> {
        if len > self.max_item_size {
            return Err(Error::TooLarge {
                requested: len as usize,
                max: self.max_item_size as usize,
            });
        }

        let header = self.mapping.header();
        let tail = self.codec.unpack(header.tail(Ordering::Relaxed));
        let mut next = tail;
        next.off += self.data_offset + roundup(len, self.codec.align_bits);

        if next.off >= self.size {
            next.off -= self.size;
            if next.off >= self.max_item_size || next.off > tail.off {
                return Err(Error::Full);
            }
        }
        next.seq = self.codec.next_seq(next.seq);

        let mut headp = header.head(Ordering::Relaxed);
        while headp != 0 {
            let head = self.codec.unpack(headp);
            if head.off == tail.off {
                headp = 0;
                break;
            }

            if tail.off < next.off && (head.off < tail.off || next.off <= head.off) {
                break;
            }
            if next.off <= head.off && head.off < tail.off {
                break;
            }

            headp = u64::from_le(self.framing(head.off).load(Ordering::Relaxed));
        }

        header.store_head(headp, Ordering::Relaxed);
        self.framing(tail.off)
            .store(self.codec.pack(next).to_le(), Ordering::Release);

        self.pending = Some(next);
        Ok(unsafe { self.mapping.data_ptr(tail.off + self.data_offset) })
    }

    /// Publish the item last returned by [`Writer::reserve`]. A no-op if nothing is pending.
    pub fn commit(&mut self) {
        let Some(next) = self.pending.take() else {
            return;
        };

        let header = self.mapping.header();
        if header.head(Ordering::Relaxed) == 0 {
            let head = header.tail(Ordering::Relaxed);
            header.store_tail(self.codec.pack(next), Ordering::Release);
            header.store_head(head, Ordering::Relaxed);
        } else {
            header.store_tail(self.codec.pack(next), Ordering::Release);
        }
    }

    /// Mark the buffer inactive so future openers observe it as gone, then unmap it. The
    /// backing file is left on disk.
    pub fn shutdown(self) {
        self.mapping.header().deactivate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::Reader;

    fn tmp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("mrb-writer-test-{}-{}", std::process::id(), name))
    }

    #[test]
    fn create_then_reserve_commit_is_visible_to_a_reader() {
        let path = tmp_path("roundtrip");
        let _ = std::fs::remove_file(&path);

        let mut writer = Writer::create(&path, 1 << 16, 4096).unwrap();
        let ptr = writer.reserve(5).unwrap();
        unsafe { std::ptr::copy_nonoverlapping(b"hello".as_ptr(), ptr.as_ptr(), 5) };
        writer.commit();

        let mut reader = Reader::open(&path).unwrap();
        match reader.reveal().unwrap() {
            crate::reader::Reveal::Item(ptr) => {
                let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), 5) };
                assert_eq!(bytes, b"hello");
            }
            other => panic!("expected an item, got {other:?}"),
        }
        reader.release();

        writer.shutdown();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn reserve_rejects_oversized_items() {
        let path = tmp_path("oversized");
        let _ = std::fs::remove_file(&path);
        let mut writer = Writer::create(&path, 1 << 16, 64).unwrap();
        let err = writer.reserve(65).unwrap_err();
        assert!(matches!(err, Error::TooLarge { .. }));
        writer.shutdown();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn create_rejects_existing_path() {
        let path = tmp_path("exists");
        let _ = std::fs::remove_file(&path);
        let writer = Writer::create(&path, 1 << 16, 4096).unwrap();
        let err = Writer::create(&path, 1 << 16, 4096).unwrap_err();
        assert!(matches!(err, Error::AlreadyExists));
        writer.shutdown();
        let _ = std::fs::remove_file(&path);
    }
}
