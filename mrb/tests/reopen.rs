//! Cross-process-shaped exercise of create/write/reopen/read against a real file on disk.
use std::thread;
use std::time::Duration;

fn path(name: &str) -> std::path::PathBuf {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join(name);
    // Leak the tempdir so the file outlives this function; each test uses a unique name so
    // concurrent test runs don't collide.
    std::mem::forget(dir);
    path
}

#[test]
fn reader_opened_after_several_commits_sees_the_latest_item() {
    let path = path("reopen-latest");
    let mut writer = mrb::create(&path, 1 << 16, 4096).unwrap();

    for i in 0..5u8 {
        let ptr = writer.reserve(1).unwrap();
        unsafe { *ptr.as_ptr() = i };
        writer.commit();
    }

    let mut reader = mrb::open(&path).unwrap();
    match reader.reveal().unwrap() {
        mrb::Reveal::Item(ptr) => {
            let byte = unsafe { *ptr.as_ptr() };
            assert_eq!(byte, 0, "a fresh reader starts from the oldest live item");
        }
        other => panic!("expected an item, got {other:?}"),
    }

    writer.shutdown();
}

#[test]
fn concurrent_writer_and_reader_threads_observe_every_commit() {
    let path = path("reopen-concurrent");
    let mut writer = mrb::create(&path, 1 << 20, 4096).unwrap();

    let reader_path = path.clone();
    let reader_thread = thread::spawn(move || {
        let mut reader = loop {
            match mrb::open(&reader_path) {
                Ok(reader) => break reader,
                Err(mrb::Error::NotReadyYet) => thread::sleep(Duration::from_millis(1)),
                Err(err) => panic!("unexpected open failure: {err}"),
            }
        };

        let mut seen = 0u32;
        loop {
            match reader.reveal().unwrap() {
                mrb::Reveal::Item(ptr) => {
                    let value = unsafe { ptr.as_ptr().cast::<u32>().read_unaligned() };
                    assert_eq!(value, seen);
                    seen += 1;
                    reader.release();
                }
                mrb::Reveal::Empty => thread::sleep(Duration::from_micros(100)),
                mrb::Reveal::Closed => break,
            }
        }
        seen
    });

    for i in 0u32..200 {
        let ptr = writer.reserve(4).unwrap();
        unsafe { ptr.as_ptr().cast::<u32>().write_unaligned(i) };
        writer.commit();
    }
    writer.shutdown();

    let seen = reader_thread.join().unwrap();
    assert!(seen > 0, "reader should have observed at least one commit");
}
