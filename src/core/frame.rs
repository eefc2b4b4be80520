use std::time::Duration;

use ffmpeg_next::format::Pixel;
use ffmpeg_next::{frame, Rational};

use crate::core::timestamp::Timestamp;

/// Capabilities shared by every decoded unit travelling through a
/// [`Buffer`](crate::buffer).
pub trait Frame {
    /// `true` when the frame holds a complete decoded unit. Frames that are
    /// not valid are never queued.
    fn is_valid(&self) -> bool;

    fn timing(&self) -> &FrameTiming;

    fn presentation_timestamp(&self) -> Timestamp {
        self.timing().presentation_timestamp()
    }
}

/// Raw timestamp of a decoded unit plus everything needed to place it on
/// the playback clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTiming {
    time_base: Rational,
    raw_timestamp: i64,
    start_offset: Duration,
    epoch: Timestamp,
}

impl FrameTiming {
    pub fn new(time_base: Rational, raw_timestamp: i64) -> Self {
        Self {
            time_base,
            raw_timestamp,
            start_offset: Duration::ZERO,
            epoch: Timestamp::ZERO,
        }
    }

    pub fn with_start_offset(mut self, start_offset: Duration) -> Self {
        self.start_offset = start_offset;
        self
    }

    pub fn with_epoch(mut self, epoch: Timestamp) -> Self {
        self.epoch = epoch;
        self
    }

    pub fn time_base(&self) -> Rational {
        self.time_base
    }

    pub fn raw_timestamp(&self) -> i64 {
        self.raw_timestamp
    }

    pub fn start_offset(&self) -> Duration {
        self.start_offset
    }

    /// `epoch + raw_timestamp * time_base - start_offset`
    pub fn presentation_timestamp(&self) -> Timestamp {
        self.epoch + Timestamp::from_ticks(self.raw_timestamp, self.time_base) - self.start_offset
    }
}

/// Per-stream settings from which each frame's [`FrameTiming`] is stamped.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TimingBase {
    pub(crate) time_base: Rational,
    pub(crate) start_offset: Duration,
    pub(crate) epoch: Timestamp,
}

impl TimingBase {
    pub(crate) fn at(&self, raw_timestamp: i64) -> FrameTiming {
        FrameTiming::new(self.time_base, raw_timestamp)
            .with_start_offset(self.start_offset)
            .with_epoch(self.epoch)
    }
}

/// One decoded picture, kept in the decoder's planar layout.
pub struct VideoFrame {
    picture: frame::Video,
    timing: FrameTiming,
}

impl VideoFrame {
    pub fn new(picture: frame::Video, timing: FrameTiming) -> Self {
        Self { picture, timing }
    }

    /// Raw timestamp of a freshly decoded picture: the best-effort
    /// timestamp, falling back to the pts and finally to zero.
    pub(crate) fn raw_timestamp_of(picture: &frame::Video) -> i64 {
        picture.timestamp().or_else(|| picture.pts()).unwrap_or(0)
    }

    pub fn width(&self) -> u32 {
        self.picture.width()
    }

    pub fn height(&self) -> u32 {
        self.picture.height()
    }

    pub fn format(&self) -> Pixel {
        self.picture.format()
    }

    pub fn planes(&self) -> usize {
        self.picture.planes()
    }

    /// Bytes per row of `plane`, padding included.
    pub fn stride(&self, plane: usize) -> usize {
        self.picture.stride(plane)
    }

    pub fn plane(&self, plane: usize) -> &[u8] {
        self.picture.data(plane)
    }

    pub fn picture(&self) -> &frame::Video {
        &self.picture
    }
}

impl Frame for VideoFrame {
    fn is_valid(&self) -> bool {
        self.picture.width() > 0 && self.picture.height() > 0
    }

    fn timing(&self) -> &FrameTiming {
        &self.timing
    }
}

impl std::fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoFrame")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("format", &self.format())
            .field("timing", &self.timing)
            .finish()
    }
}

/// One decoded audio unit, already converted to the output format.
///
/// The PCM is consumed incrementally through [`fill`](Self::fill): an audio
/// callback asking for fewer bytes than the frame holds leaves the remainder
/// for its next invocation.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    pcm: Vec<u8>,
    cursor: usize,
    timing: FrameTiming,
}

impl AudioFrame {
    pub fn from_pcm(pcm: Vec<u8>, timing: FrameTiming) -> Self {
        Self {
            pcm,
            cursor: 0,
            timing,
        }
    }

    pub fn len(&self) -> usize {
        self.pcm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pcm.is_empty()
    }

    pub fn remaining_bytes(&self) -> usize {
        self.pcm.len() - self.cursor
    }

    pub fn remaining(&self) -> &[u8] {
        &self.pcm[self.cursor..]
    }

    /// Copies as much of the unread PCM as fits into `dest` and advances
    /// the read cursor. Returns the number of bytes written and whether any
    /// bytes remain afterwards.
    pub fn fill(&mut self, dest: &mut [u8]) -> (usize, bool) {
        let len = dest.len().min(self.remaining_bytes());
        dest[..len].copy_from_slice(&self.pcm[self.cursor..self.cursor + len]);
        self.cursor += len;
        (len, self.remaining_bytes() > 0)
    }
}

impl Frame for AudioFrame {
    fn is_valid(&self) -> bool {
        !self.pcm.is_empty()
    }

    fn timing(&self) -> &FrameTiming {
        &self.timing
    }
}
