//! Deadline-driven selection of what to show and what to play.
//!
//! The wall clock is the only master: a frame is due when its presentation
//! timestamp is at or before the caller's deadline. Video that falls behind
//! is caught up by skipping every due frame except the newest; audio that
//! runs ahead of the decoder is padded with silence. There is no drift
//! correction beyond that.

use log::trace;

use crate::core::buffer::{Consumer, Fetch};
use crate::core::frame::{AudioFrame, Frame};
use crate::core::timestamp::Timestamp;

/// What the render loop should display for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayFrameInfo {
    /// Position of the current frame in the decoded stream, starting at 0.
    /// `None` until a first frame has been selected.
    pub frame_id: Option<u64>,
    /// Due frames skipped during this call.
    pub nb_dropped: usize,
    /// The deadline this selection was made for.
    pub wall_timestamp: Timestamp,
    /// Presentation timestamp of the current frame.
    pub pts: Option<Timestamp>,
    /// The stream is over: the buffer is exhausted and this call selected
    /// nothing new.
    pub is_last: bool,
}

/// Video consumer state: the frame currently on screen and its position.
pub(crate) struct FrameSelector<F> {
    frames: Consumer<F>,
    current: Option<F>,
    current_id: Option<u64>,
    next_id: u64,
    total_dropped: u64,
}

impl<F: Frame> FrameSelector<F> {
    pub(crate) fn new(frames: Consumer<F>) -> Self {
        Self {
            frames,
            current: None,
            current_id: None,
            next_id: 0,
            total_dropped: 0,
        }
    }

    /// Advances to the newest frame due at `deadline`.
    ///
    /// Every due frame is taken from the buffer in order and replaces the
    /// previous candidate; all but the last one are counted as dropped.
    /// Frames not yet due stay queued. If nothing is due the current frame
    /// is kept.
    pub(crate) fn select(&mut self, deadline: Timestamp) -> DisplayFrameInfo {
        let mut taken = 0usize;
        loop {
            let due = match self.frames.get() {
                Fetch::Ready(frame) => frame.presentation_timestamp() <= deadline,
                Fetch::NotReady | Fetch::Done => false,
            };
            if !due {
                break;
            }
            let Some(frame) = self.frames.pop() else {
                break;
            };
            self.current = Some(frame);
            self.current_id = Some(self.next_id);
            self.next_id += 1;
            taken += 1;
        }

        let nb_dropped = taken.saturating_sub(1);
        self.total_dropped += nb_dropped as u64;
        if nb_dropped > 0 {
            trace!("dropped {nb_dropped} late video frames at {deadline}");
        }

        DisplayFrameInfo {
            frame_id: self.current_id,
            nb_dropped,
            wall_timestamp: deadline,
            pts: self.current.as_ref().map(|frame| frame.presentation_timestamp()),
            is_last: taken == 0 && self.frames.is_all_done(),
        }
    }

    pub(crate) fn current(&self) -> Option<&F> {
        self.current.as_ref()
    }

    pub(crate) fn total_dropped(&self) -> u64 {
        self.total_dropped
    }

    pub(crate) fn is_all_done(&self) -> bool {
        self.frames.is_all_done()
    }
}

/// Audio consumer, meant to live on the audio output thread.
///
/// Obtained from [`VideoReader::take_audio_player`](super::VideoReader::take_audio_player).
pub struct AudioPlayer {
    frames: Consumer<AudioFrame>,
    last_played: Option<AudioFrame>,
    total_discarded: u64,
}

impl AudioPlayer {
    pub(crate) fn new(frames: Consumer<AudioFrame>) -> Self {
        Self {
            frames,
            last_played: None,
            total_discarded: 0,
        }
    }

    /// Fills `dest` with the audio due at `deadline`.
    ///
    /// The partially played frame from the previous call continues first.
    /// When it is exhausted, the newest frame that is already due is taken
    /// from the buffer (older due frames are discarded). Frames still in the
    /// future are left queued and the rest of `dest` is silence. Never
    /// waits for the decoder.
    ///
    /// Returns the number of bytes of real audio written; the remaining
    /// `dest.len() - n` bytes are zero.
    pub fn fill(&mut self, dest: &mut [u8], deadline: Timestamp) -> usize {
        dest.fill(0);

        let mut written = 0;
        while written < dest.len() {
            if self
                .last_played
                .as_ref()
                .is_some_and(|frame| frame.presentation_timestamp() > deadline)
            {
                // the clock moved backwards past the retained frame
                self.last_played = None;
            }

            if self.last_played.is_none() {
                self.pull_due_frame(deadline);
            }

            let Some(frame) = self.last_played.as_mut() else {
                break;
            };
            let (len, has_more) = frame.fill(&mut dest[written..]);
            written += len;
            if !has_more {
                self.last_played = None;
            }
        }
        written
    }

    fn pull_due_frame(&mut self, deadline: Timestamp) {
        loop {
            let due = match self.frames.get() {
                Fetch::Ready(frame) => frame.presentation_timestamp() <= deadline,
                Fetch::NotReady | Fetch::Done => false,
            };
            if !due {
                return;
            }
            let Some(frame) = self.frames.pop() else {
                return;
            };
            if self.last_played.replace(frame).is_some() {
                self.total_discarded += 1;
            }
        }
    }

    /// Throws away everything due at `deadline` without playing it.
    pub(crate) fn skip_due(&mut self, deadline: Timestamp) {
        self.pull_due_frame(deadline);
        if self.last_played.take().is_some() {
            self.total_discarded += 1;
        }
    }

    /// Audio frames skipped because a newer one was already due.
    pub fn discarded_frames(&self) -> u64 {
        self.total_discarded
    }

    /// `true` once every decoded audio frame has been played or discarded.
    pub fn is_finished(&self) -> bool {
        self.last_played.is_none() && self.frames.is_all_done()
    }
}

/// Closes the audio buffer, so the decoder stops producing audio instead of
/// waiting for a consumer that is gone. Video decoding goes on.
impl Drop for AudioPlayer {
    fn drop(&mut self) {
        self.frames.set_total(0);
    }
}
