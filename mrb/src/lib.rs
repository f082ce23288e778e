//! Single-writer, many-reader, wait-free shared-memory ring buffer.
//!
//! A [`Writer`] publishes variable-length binary items into a memory-mapped file; any number of
//! [`Reader`]s, in this or other processes, observe them without ever blocking the writer. The
//! writer never waits on a reader and may overwrite items a slow reader hasn't gotten to yet; a
//! reader that falls behind resynchronizes to the oldest item the writer still has a record of
//! rather than stalling.
pub mod error;
pub mod header;
pub mod map;
pub mod ptr;
pub mod reader;
pub mod writer;

pub use error::Error;
pub use map::Mapper;
pub use ptr::{Item, PtrCodec};
pub use reader::{Reader, Reveal};
pub use writer::Writer;

use std::path::Path;

/// Create a new ring buffer backed by a fresh file at `path`.
///
/// `size` is the nominal capacity of the data region; `max_item_size` bounds any single
/// `reserve`. Both are rounded up to whole pages.
pub fn create(path: &Path, size: u64, max_item_size: u64) -> Result<Writer, Error> {
    Writer::create(path, size, max_item_size)
}

/// Open an existing ring buffer for reading.
pub fn open(path: &Path) -> Result<Reader, Error> {
    Reader::open(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("mrb-lib-test-{}-{}", std::process::id(), name))
    }

    #[test]
    fn create_and_open_agree_on_layout() {
        let path = tmp_path("layout");
        let _ = std::fs::remove_file(&path);

        let mut writer = create(&path, 1 << 20, 8192).unwrap();
        let ptr = writer.reserve(10).unwrap();
        unsafe { std::ptr::copy_nonoverlapping(b"0123456789".as_ptr(), ptr.as_ptr(), 10) };
        writer.commit();

        let mut reader = open(&path).unwrap();
        match reader.reveal().unwrap() {
            Reveal::Item(ptr) => {
                let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), 10) };
                assert_eq!(bytes, b"0123456789");
            }
            other => panic!("expected an item, got {other:?}"),
        }
        reader.release();

        writer.shutdown();
        let _ = std::fs::remove_file(&path);
    }
}
