use std::time::Duration;

use crate::core::audio_format::AudioFormat;
use crate::core::timestamp::Timestamp;

/// Frames buffered ahead of the render loop.
pub const DEFAULT_BUFFER_CAPACITY: usize = 10;
/// Audio frames buffered ahead of the audio callback.
pub const DEFAULT_AUDIO_BUFFER_CAPACITY: usize = 64;
/// Audio quota as a multiple of the video frame budget.
pub const DEFAULT_AUDIO_QUOTA_FACTOR: usize = 5;

/// Settings for [`VideoReader::open`](crate::reader::VideoReader::open).
///
/// ```rust,ignore
/// let config = ReaderConfig::new("test.mp4")
///     .set_frame_budget(750)
///     .set_buffer_capacity(10);
/// let reader = VideoReader::open(config)?;
/// ```
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    pub(crate) url: String,
    pub(crate) frame_budget: usize,
    pub(crate) buffer_capacity: usize,
    pub(crate) audio_buffer_capacity: usize,
    pub(crate) audio_quota_factor: usize,
    pub(crate) audio_format: AudioFormat,
    pub(crate) audio_enabled: bool,
    pub(crate) start_offset: Duration,
    pub(crate) epoch: Timestamp,
    pub(crate) align_stream_start: bool,
}

impl ReaderConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            frame_budget: usize::MAX,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            audio_buffer_capacity: DEFAULT_AUDIO_BUFFER_CAPACITY,
            audio_quota_factor: DEFAULT_AUDIO_QUOTA_FACTOR,
            audio_format: AudioFormat::default(),
            audio_enabled: true,
            start_offset: Duration::ZERO,
            epoch: Timestamp::ZERO,
            align_stream_start: false,
        }
    }

    /// Number of video frames to deliver before the decoder stops.
    /// Defaults to the whole stream.
    pub fn set_frame_budget(mut self, frame_budget: usize) -> Self {
        self.frame_budget = frame_budget;
        self
    }

    /// Maximum number of decoded video frames queued ahead of the consumer.
    pub fn set_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    /// Maximum number of decoded audio frames queued ahead of the consumer.
    pub fn set_audio_buffer_capacity(mut self, capacity: usize) -> Self {
        self.audio_buffer_capacity = capacity;
        self
    }

    /// The audio buffer accepts `frame_budget * factor` frames. This only
    /// bounds how long audio keeps flowing; the decoder still stops at end of
    /// input or when the video budget is exhausted.
    pub fn set_audio_quota_factor(mut self, factor: usize) -> Self {
        self.audio_quota_factor = factor;
        self
    }

    pub fn set_audio_format(mut self, format: AudioFormat) -> Self {
        self.audio_format = format;
        self
    }

    /// Skips audio decoding entirely. Needed when nothing will ever drain
    /// the audio buffer, otherwise the decoder stalls once it fills up.
    pub fn set_audio_enabled(mut self, enabled: bool) -> Self {
        self.audio_enabled = enabled;
        self
    }

    /// Subtracted from every presentation timestamp of both streams.
    pub fn set_start_offset(mut self, offset: Duration) -> Self {
        self.start_offset = offset;
        self
    }

    /// Clock value that corresponds to raw timestamp zero.
    pub fn set_epoch(mut self, epoch: Timestamp) -> Self {
        self.epoch = epoch;
        self
    }

    /// Also subtract each stream's declared start time, so the first frame
    /// of a stream that starts late in its container is due at zero.
    pub fn set_align_stream_start(mut self, align: bool) -> Self {
        self.align_stream_start = align;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn frame_budget(&self) -> usize {
        self.frame_budget
    }

    pub(crate) fn audio_quota(&self) -> usize {
        self.frame_budget.saturating_mul(self.audio_quota_factor)
    }
}
