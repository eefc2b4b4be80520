//! Frame delivery for real-time playback on top of FFmpeg.
//!
//! A [`VideoReader`](reader::VideoReader) demuxes and decodes one input on a
//! background thread into two bounded buffers. A render loop asks which
//! video frame is due at a deadline, an audio callback asks for the PCM due
//! at a deadline, and both answers come back immediately: late video frames
//! are dropped, missing audio is silence.
//!
//! ```rust,ignore
//! use av_reader::config::ReaderConfig;
//! use av_reader::reader::VideoReader;
//!
//! let mut reader = VideoReader::open(ReaderConfig::new("test.mp4"))?;
//! let clock = reader.clock();
//!
//! // audio thread, drains the player until the stream ends
//! if let Some(mut audio) = reader.take_audio_player() {
//!     std::thread::spawn(move || {
//!         let mut pcm = vec![0u8; 4096];
//!         while !audio.is_finished() {
//!             audio.fill(&mut pcm, clock.now());
//!             std::thread::sleep(std::time::Duration::from_millis(20));
//!         }
//!     });
//! }
//!
//! // render thread
//! let info = reader.select_frame(clock.now());
//! if let Some(frame) = reader.current_frame() {
//!     println!("frame {:?} at {:?}, {} dropped", info.frame_id, info.pts, info.nb_dropped);
//! }
//! ```

pub mod core;
pub mod error;

pub use crate::core::audio_format;
pub use crate::core::buffer;
pub use crate::core::clock;
pub use crate::core::config;
pub use crate::core::convert;
pub use crate::core::frame;
pub use crate::core::reader;
pub use crate::core::stream_info;
pub use crate::core::timestamp;
