pub mod audio_format;
pub mod buffer;
pub mod clock;
pub mod config;
pub mod convert;
pub mod frame;
pub mod reader;
pub mod stream_info;
pub mod timestamp;

use std::sync::Once;

static INIT_FFMPEG: Once = Once::new();

/// Global FFmpeg setup, run once per process before the first input is
/// opened. Failure is logged and left for the open call to report.
pub(crate) fn initialize_ffmpeg() {
    INIT_FFMPEG.call_once(|| {
        if let Err(e) = ffmpeg_next::init() {
            log::error!("Failed to initialize FFmpeg: {e}");
        }
    });
}
