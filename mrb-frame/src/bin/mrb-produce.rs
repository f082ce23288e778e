//! Demo producer: reserves and commits synthetic frames at a fixed rate.
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::Parser;
use mrb_frame::FrameHeader;
use tracing::{info, warn};

#[derive(Parser)]
struct ProduceCommand {
    /// Path of the ring buffer file to create.
    path: PathBuf,

    /// Capacity of the data region, rounded up to a whole number of pages.
    #[arg(long, default_value_t = 256 * 1024 * 1024)]
    size: u64,

    /// Largest single frame this buffer will ever hold.
    #[arg(long, default_value_t = 8 * 1024 * 1024)]
    max_item_size: u64,

    #[arg(long, default_value_t = 1920)]
    width: u32,

    #[arg(long, default_value_t = 1080)]
    height: u32,

    /// Frames per second to synthesize.
    #[arg(long, default_value_t = 30)]
    fps: u32,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let ProduceCommand {
        path,
        size,
        max_item_size,
        width,
        height,
        fps,
    } = ProduceCommand::parse();

    let mut writer = match mrb::create(&path, size, max_item_size) {
        Ok(writer) => writer,
        Err(err) => {
            tracing::error!(%err, path = %path.display(), "failed to create ring buffer");
            std::process::exit(1);
        }
    };
    info!(path = %path.display(), size, max_item_size, "ring buffer created");

    let pixels = vec![0u8; (width * height) as usize];
    let payload_len = mrb_frame::HEADER_LEN + pixels.len();
    let period = Duration::from_secs_f64(1.0 / fps as f64);

    loop {
        let ns = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        let header = FrameHeader {
            ns,
            width,
            height,
            padded_width: width,
            padded_height: height,
        };

        match writer.reserve(payload_len as u64) {
            Ok(ptr) => {
                let dst = unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr(), payload_len) };
                mrb_frame::encode_into(&header, &pixels, dst);
                writer.commit();
            }
            Err(err) => {
                warn!(%err, "failed to reserve a frame, skipping one tick");
            }
        }

        std::thread::sleep(period);
    }
}
