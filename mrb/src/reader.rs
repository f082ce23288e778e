//! The many-reader half: `open`, `check`, `reveal`, `release`, `close`.
use std::ffi::CString;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};

use mrb_fd::{SharedFd, Shm};

use crate::error::Error;
use crate::header::{RawHeader, HEADER_SIZE};
use crate::map::{round_to_page, Mapper, Mapping};
use crate::ptr::{roundup, Item, PtrCodec};

/// Outcome of [`Reader::reveal`].
#[derive(Debug)]
pub enum Reveal {
    /// An item is available; the pointer is valid for up to `max_item_size` bytes, though the
    /// item itself may be shorter — payload framing is left to the caller.
    Item(NonNull<u8>),
    /// Nothing new has been committed since the last release.
    Empty,
    /// The writer has shut the buffer down and nothing new will ever arrive.
    Closed,
}

/// A read end of a ring buffer.
///
/// Like [`crate::Writer`], `Reader` is `!Sync` (each thread needs its own cursor) and `Send`.
#[derive(Debug)]
pub struct Reader {
    mapping: Mapping,
    codec: PtrCodec,
    data_offset: u64,
    next: Item,
}

unsafe impl Send for Reader {}

/// The handful of `RawHeader` fields `open` needs, read out of an unaligned byte buffer field by
/// field instead of by casting the buffer to `&RawHeader`. Offsets mirror `RawHeader`'s `repr(C)`
/// layout: `active: AtomicU32` at 0, `align_bits: u16` at 4, `off_bits: u16` at 6,
/// `max_item_size: u64` at 8.
struct ProbedHeader {
    active: bool,
    align_bits: u16,
    off_bits: u16,
    max_item_size: u64,
}

impl ProbedHeader {
    fn parse(bytes: &[u8]) -> Result<Self, Error> {
        let field = |range: std::ops::Range<usize>| bytes.get(range).ok_or(Error::InvalidHeader);

        let active = u32::from_le_bytes(field(0..4)?.try_into().unwrap());
        let align_bits = u16::from_le_bytes(field(4..6)?.try_into().unwrap());
        let off_bits = u16::from_le_bytes(field(6..8)?.try_into().unwrap());
        let max_item_size = u64::from_le_bytes(field(8..16)?.try_into().unwrap());

        Ok(ProbedHeader {
            active: active != 0,
            align_bits,
            off_bits,
            max_item_size,
        })
    }
}

impl Reader {
    /// Open an existing ring buffer for reading.
    ///
    /// Fails with [`Error::NotReadyYet`] if the writer hasn't activated the buffer yet (or has
    /// since shut it down and the file was since recreated smaller than its header).
    pub fn open(path: &Path) -> Result<Self, Error> {
        let c_path = CString::new(path.as_os_str().to_string_lossy().into_owned())
            .map_err(|_| Error::Io(std::io::Error::from(std::io::ErrorKind::InvalidInput)))?;

        let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_RDONLY | libc::O_CLOEXEC | libc::O_NOCTTY) };
        if fd < 0 {
            return Err(Error::Io(std::io::Error::last_os_error()));
        }
        let fd = unsafe { SharedFd::from_raw_fd(fd) };

        let shm = Shm::new();
        let stat = shm
            .stat(&fd)
            .map_err(|e| Error::Io(std::io::Error::from_raw_os_error(e.0)))?;

        let header_len = round_to_page(HEADER_SIZE);
        let mut probe = vec![0u8; header_len];
        let read = unsafe {
            libc::pread(
                fd.as_raw_fd(),
                probe.as_mut_ptr() as *mut libc::c_void,
                header_len,
                0,
            )
        };
        if read != header_len as isize {
            return Err(Error::InvalidHeader);
        }
        // `probe` is a `Vec<u8>`, only guaranteed byte-aligned; `RawHeader` holds `AtomicU64`
        // fields and needs 8-byte alignment, so the header fields are parsed out of the raw bytes
        // by hand instead of reinterpreting the buffer as `&RawHeader`.
        let header = ProbedHeader::parse(&probe)?;
        if !header.active {
            return Err(Error::NotReadyYet);
        }
        let max_item_size = header.max_item_size;
        let align_bits = header.align_bits;
        let off_bits = header.off_bits;

        let data_len = (stat.st_size as u64).saturating_sub(header_len as u64);
        let mapper = Mapper::new();
        let mapping = Mapping::new(
            mapper,
            fd.as_raw_fd(),
            header_len,
            data_len as usize,
            max_item_size as usize,
            false,
        )?;
        drop(fd);

        let codec = PtrCodec { align_bits, off_bits };
        let data_offset = roundup(std::mem::size_of::<u64>() as u64, align_bits);

        Ok(Reader {
            mapping,
            codec,
            data_offset,
            next: Item::EMPTY,
        })
    }

    fn framing(&self, off: u64) -> &AtomicU64 {
        unsafe { &*(self.mapping.data_ptr(off).as_ptr() as *const AtomicU64) }
    }

    fn header(&self) -> &RawHeader {
        self.mapping.header()
    }

    /// Whether the item this reader currently points at is still guaranteed not to have been
    /// overwritten by the writer. `false` means `reveal` must resynchronize from `head` before
    /// handing back a pointer.
    pub fn check(&self) -> bool {
        if self.next.seq == 0 {
            return false;
        }

        let head = self.codec.unpack(self.header().head(Ordering::Acquire));
        if head.seq == 0 {
            return false;
        }
        if self.next.seq >= head.seq {
            return true;
        }

        let tail = self.codec.unpack(self.header().tail(Ordering::Acquire));
        self.next.seq < tail.seq && tail.seq < head.seq
    }

    /// Look at the next not-yet-released item without consuming it.
    pub fn reveal(&mut self) -> Result<Reveal, Error> {
        if !self.check() {
            self.next = self.codec.unpack(self.header().head(Ordering::Acquire));
        }

        let tail = self.codec.unpack(self.header().tail(Ordering::Acquire));
        if self.next.seq == 0 || self.next.seq == tail.seq {
            return Ok(if self.header().is_active() {
                Reveal::Empty
            } else {
                Reveal::Closed
            });
        }

        Ok(Reveal::Item(unsafe {
            self.mapping.data_ptr(self.next.off + self.data_offset)
        }))
    }

    /// Advance past the item last handed back by `reveal`.
    pub fn release(&mut self) {
        let advanced = self
            .codec
            .unpack(u64::from_le(self.framing(self.next.off).load(Ordering::Acquire)));

        if self.check() {
            self.next = advanced;
        } else {
            self.next = self.codec.unpack(self.header().head(Ordering::Acquire));
        }
    }

    /// Unmap the buffer. Equivalent to dropping the `Reader`.
    pub fn close(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::Writer;

    fn tmp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("mrb-reader-test-{}-{}", std::process::id(), name))
    }

    #[test]
    fn reveal_is_empty_before_any_commit() {
        let path = tmp_path("empty");
        let _ = std::fs::remove_file(&path);
        let writer = Writer::create(&path, 1 << 16, 4096).unwrap();

        let mut reader = Reader::open(&path).unwrap();
        assert!(matches!(reader.reveal().unwrap(), Reveal::Empty));

        writer.shutdown();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn reveal_reports_closed_after_shutdown_and_drain() {
        let path = tmp_path("closed");
        let _ = std::fs::remove_file(&path);
        let mut writer = Writer::create(&path, 1 << 16, 4096).unwrap();
        writer.reserve(4).unwrap();
        writer.commit();

        // The reader must open while the buffer is still active; `shutdown` below only publishes
        // `active = 0` for openers that come after it.
        let mut reader = Reader::open(&path).unwrap();
        writer.shutdown();

        assert!(matches!(reader.reveal().unwrap(), Reveal::Item(_)));
        reader.release();
        assert!(matches!(reader.reveal().unwrap(), Reveal::Closed));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn open_before_activation_is_not_ready() {
        let path = tmp_path("not-ready");
        let _ = std::fs::remove_file(&path);
        std::fs::write(&path, []).unwrap();
        let err = Reader::open(&path).unwrap_err();
        assert!(matches!(err, Error::InvalidHeader));
        let _ = std::fs::remove_file(&path);
    }
}
