//! Demo consumer: prints one line per frame observed, the way the reference `monitor` tool does.
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use mrb::Reveal;
use tracing::{info, warn};

#[derive(Parser)]
struct MonitorCommand {
    /// Path of the ring buffer file to open.
    path: PathBuf,

    /// Delay between polls while the buffer is empty.
    #[arg(long, default_value_t = 10)]
    poll_interval_ms: u64,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let MonitorCommand {
        path,
        poll_interval_ms,
    } = MonitorCommand::parse();

    let mut reader = match mrb::open(&path) {
        Ok(reader) => reader,
        Err(err) => {
            tracing::error!(%err, path = %path.display(), "failed to open ring buffer");
            std::process::exit(2);
        }
    };
    info!(path = %path.display(), "monitoring");

    let poll_interval = Duration::from_millis(poll_interval_ms);
    loop {
        let revealed = loop {
            match reader.reveal() {
                Ok(Reveal::Empty) => std::thread::sleep(poll_interval),
                Ok(other) => break other,
                Err(err) => {
                    tracing::error!(%err, "reveal failed");
                    std::process::exit(3);
                }
            }
        };

        let ptr = match revealed {
            Reveal::Item(ptr) => ptr,
            Reveal::Closed => {
                info!("writer shut down, exiting");
                break;
            }
            Reveal::Empty => unreachable!("polled above"),
        };

        let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), mrb_frame::HEADER_LEN) };
        match mrb_frame::FrameHeader::decode(bytes) {
            Ok(frame) => {
                let still_valid = reader.check();
                if still_valid {
                    println!(
                        "{:.3} {}x{}",
                        frame.ns as f64 * 1e-9,
                        frame.width,
                        frame.height
                    );
                } else {
                    warn!("frame was overwritten before it could be printed");
                }
            }
            Err(err) => warn!(%err, "malformed frame header"),
        }

        reader.release();
    }
}
