use std::ffi::c_int;
use std::fmt;
use std::io;

/// Everything that can go wrong creating, opening, or mapping a ring buffer.
#[derive(Debug)]
pub enum Error {
    /// `create` was called against a path that already exists.
    AlreadyExists,
    /// `open` was called against a path that doesn't exist, isn't readable, or wasn't
    /// fully initialized by its writer (`active` never flipped to `1`).
    NotReadyYet,
    /// A requested item was larger than the buffer's `max_item_size`.
    TooLarge { requested: usize, max: usize },
    /// `reserve` could not find room without catching up to the writer's own tail.
    Full,
    /// The header didn't pass the sanity checks a reader applies before trusting it.
    InvalidHeader,
    /// `mmap`/`remap_file_pages` failed.
    MappingFailed(c_int),
    /// Any other OS-level failure, carried through from the originating call.
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::AlreadyExists => write!(f, "backing file already exists"),
            Error::NotReadyYet => write!(f, "buffer not ready: writer has not activated it yet"),
            Error::TooLarge { requested, max } => {
                write!(f, "item of {requested} bytes exceeds max_item_size {max}")
            }
            Error::Full => write!(f, "no room to reserve without overtaking the tail"),
            Error::InvalidHeader => write!(f, "header failed validation"),
            Error::MappingFailed(errno) => write!(f, "mmap failed with errno {errno}"),
            Error::Io(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}
