//! The frame payload convention carried over a `mrb` ring buffer.
//!
//! `mrb` itself never looks inside the bytes it moves; this crate is the one opinionated schema
//! built on top of it for a screen-capture producer: a fixed-size header describing a frame's
//! timestamp and dimensions, immediately followed by its pixel bytes.
use std::convert::TryInto;

/// Bytes occupied by an encoded [`FrameHeader`], always at the front of an item's payload.
pub const HEADER_LEN: usize = 24;

/// Describes one captured frame: when it was captured and how its pixels are laid out.
///
/// `padded_width`/`padded_height` record the stride the capture backend actually wrote with
/// (GPU capture paths commonly pad to a tile or cache-line boundary); `width`/`height` are the
/// portion of that a consumer should treat as visible.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    /// Capture timestamp in nanoseconds, nondecreasing across frames from one writer.
    pub ns: u64,
    pub width: u32,
    pub height: u32,
    pub padded_width: u32,
    pub padded_height: u32,
}

/// A decode failure: either the slice was shorter than [`HEADER_LEN`], or the dimensions
/// encoded in it are inconsistent with the number of pixel bytes that follow.
#[derive(Debug)]
pub enum FrameError {
    Truncated,
    DimensionMismatch { expected: usize, got: usize },
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::Truncated => write!(f, "payload shorter than a frame header"),
            FrameError::DimensionMismatch { expected, got } => write!(
                f,
                "frame declares {expected} bytes of pixel data but only {got} are present"
            ),
        }
    }
}

impl std::error::Error for FrameError {}

impl FrameHeader {
    /// Bytes of pixel data this header's dimensions imply, assuming one byte per pixel per
    /// padded row (callers with a different pixel format scale this themselves).
    pub fn padded_byte_len(&self) -> usize {
        self.padded_width as usize * self.padded_height as usize
    }

    pub fn encode(&self, out: &mut [u8; HEADER_LEN]) {
        out[0..8].copy_from_slice(&self.ns.to_le_bytes());
        out[8..12].copy_from_slice(&self.width.to_le_bytes());
        out[12..16].copy_from_slice(&self.height.to_le_bytes());
        out[16..20].copy_from_slice(&self.padded_width.to_le_bytes());
        out[20..24].copy_from_slice(&self.padded_height.to_le_bytes());
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_LEN {
            return Err(FrameError::Truncated);
        }
        Ok(FrameHeader {
            ns: u64::from_le_bytes(bytes[0..8].try_into().unwrap()),
            width: u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
            height: u32::from_le_bytes(bytes[12..16].try_into().unwrap()),
            padded_width: u32::from_le_bytes(bytes[16..20].try_into().unwrap()),
            padded_height: u32::from_le_bytes(bytes[20..24].try_into().unwrap()),
        })
    }
}

/// Split a revealed item's bytes into its header and pixel payload, checking that the payload is
/// at least as long as the header claims.
pub fn split(bytes: &[u8]) -> Result<(FrameHeader, &[u8]), FrameError> {
    let header = FrameHeader::decode(bytes)?;
    let pixels = &bytes[HEADER_LEN..];
    let expected = header.padded_byte_len();
    if pixels.len() < expected {
        return Err(FrameError::DimensionMismatch {
            expected,
            got: pixels.len(),
        });
    }
    Ok((header, pixels))
}

/// Encode a header and pixel payload into `dst`, returning the number of bytes written.
///
/// `dst` must be at least `HEADER_LEN + pixels.len()` bytes.
pub fn encode_into(header: &FrameHeader, pixels: &[u8], dst: &mut [u8]) -> usize {
    let mut head = [0u8; HEADER_LEN];
    header.encode(&mut head);
    dst[..HEADER_LEN].copy_from_slice(&head);
    dst[HEADER_LEN..HEADER_LEN + pixels.len()].copy_from_slice(pixels);
    HEADER_LEN + pixels.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FrameHeader {
        FrameHeader {
            ns: 1_700_000_000_000,
            width: 1920,
            height: 1080,
            padded_width: 1920,
            padded_height: 1088,
        }
    }

    #[test]
    fn header_round_trips() {
        let header = sample();
        let mut buf = [0u8; HEADER_LEN];
        header.encode(&mut buf);
        assert_eq!(FrameHeader::decode(&buf).unwrap(), header);
    }

    #[test]
    fn decode_rejects_truncated_input() {
        let buf = [0u8; HEADER_LEN - 1];
        assert!(matches!(FrameHeader::decode(&buf), Err(FrameError::Truncated)));
    }

    #[test]
    fn split_rejects_short_pixel_payload() {
        let header = sample();
        let mut payload = vec![0u8; HEADER_LEN + 10];
        header.encode((&mut payload[..HEADER_LEN]).try_into().unwrap());
        assert!(matches!(
            split(&payload),
            Err(FrameError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn encode_into_then_split_recovers_pixels() {
        let header = FrameHeader {
            ns: 42,
            width: 4,
            height: 2,
            padded_width: 4,
            padded_height: 2,
        };
        let pixels = vec![7u8; 8];
        let mut buf = vec![0u8; HEADER_LEN + pixels.len()];
        let written = encode_into(&header, &pixels, &mut buf);
        assert_eq!(written, buf.len());

        let (decoded, decoded_pixels) = split(&buf).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(decoded_pixels, pixels.as_slice());
    }
}
