//! Background decoding with deadline-driven playback queries.
//!
//! [`VideoReader::open`] probes the input, opens one decoder per stream and
//! starts a decode thread that fills two bounded buffers, one for video and
//! one for audio. The render loop then calls [`VideoReader::select_frame`]
//! once per tick and the audio output calls [`AudioPlayer::fill`] from its
//! own thread. Neither call ever waits for the decoder.
//!
//! ```rust,ignore
//! let mut reader = VideoReader::open(ReaderConfig::new("test.mp4"))?;
//! let clock = reader.clock();
//! // the player must be drained, or dropped, for decoding to go on
//! if let Some(mut audio) = reader.take_audio_player() {
//!     std::thread::spawn(move || {
//!         let mut pcm = vec![0u8; 4096];
//!         while !audio.is_finished() {
//!             audio.fill(&mut pcm, clock.now());
//!             // hand pcm to the device
//!             std::thread::sleep(std::time::Duration::from_millis(20));
//!         }
//!     });
//! }
//! loop {
//!     let info = reader.select_frame(clock.now());
//!     if info.is_last {
//!         break;
//!     }
//!     if let Some(frame) = reader.current_frame() {
//!         // upload frame
//!     }
//! }
//! ```

mod decode_task;
mod sync;

use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use log::{debug, info, warn};

use crate::core::buffer::{self, BufferControl};
use crate::core::clock::PlaybackClock;
use crate::core::config::ReaderConfig;
use crate::core::frame::{AudioFrame, TimingBase, VideoFrame};
use crate::core::stream_info::{extract_stream_infos, init_format_context, select_streams, StreamInfo};
use crate::core::timestamp::Timestamp;
use crate::error::Result;

pub use decode_task::DecodeState;
pub use sync::{AudioPlayer, DisplayFrameInfo};

use decode_task::{AudioPath, DecodeTask, SharedState, VideoPath};
use sync::FrameSelector;

/// Playback milestones reported by [`VideoReader::select_frame`], each
/// at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// A first video frame has been selected for display.
    FirstFrame,
    /// The last video frame has been shown and nothing more will come.
    EndOfStream,
}

#[derive(Default)]
struct EventEmitter {
    subscribers: Vec<Sender<PlaybackEvent>>,
    first_frame_sent: bool,
    end_of_stream_sent: bool,
}

impl EventEmitter {
    fn subscribe(&mut self) -> Receiver<PlaybackEvent> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        self.subscribers.push(sender);
        receiver
    }

    fn emit(&mut self, event: PlaybackEvent) {
        debug!("Playback event: {event:?}");
        // subscribers that went away are forgotten
        self.subscribers.retain(|sender| sender.try_send(event).is_ok());
    }

    fn observe(&mut self, info: &DisplayFrameInfo) {
        if !self.first_frame_sent && info.frame_id.is_some() {
            self.first_frame_sent = true;
            self.emit(PlaybackEvent::FirstFrame);
        }
        if !self.end_of_stream_sent && info.is_last {
            self.end_of_stream_sent = true;
            self.emit(PlaybackEvent::EndOfStream);
        }
    }
}

/// Decodes one media input on a background thread and answers "what should
/// be visible now" queries.
///
/// The input may carry at most one video and one audio stream. Dropping the
/// reader stops the decode thread and waits for it.
pub struct VideoReader {
    url: String,
    streams: Vec<StreamInfo>,
    selector: FrameSelector<VideoFrame>,
    audio_player: Option<AudioPlayer>,
    video_control: BufferControl<VideoFrame>,
    audio_control: BufferControl<AudioFrame>,
    has_video: bool,
    has_audio: bool,
    clock: PlaybackClock,
    state: SharedState,
    events: EventEmitter,
    decode_thread: Option<JoinHandle<()>>,
}

fn stream_timing(config: &ReaderConfig, stream: &StreamInfo) -> Option<TimingBase> {
    let time_base = stream.time_base()?;
    let mut start_offset = config.start_offset;
    if config.align_stream_start {
        if let Some(start) = stream.start_time() {
            let start = Timestamp::from_ticks(start, time_base).as_micros();
            if start > 0 {
                start_offset += Duration::from_micros(start as u64);
            }
        }
    }
    Some(TimingBase {
        time_base,
        start_offset,
        epoch: config.epoch,
    })
}

fn codec_name(stream: &StreamInfo) -> &str {
    match stream {
        StreamInfo::Video { codec_name, .. } | StreamInfo::Audio { codec_name, .. } => codec_name,
        StreamInfo::Other { .. } => "unknown",
    }
}

impl VideoReader {
    /// Opens `config.url`, validates the stream layout and starts decoding.
    ///
    /// Fails if the input cannot be opened, holds no video or audio stream,
    /// or holds more than one stream of either kind. A stream whose decoder
    /// cannot be opened is not an error: it is logged and that stream is
    /// reported as finished from the start.
    pub fn open(config: ReaderConfig) -> Result<Self> {
        config.audio_format.validate()?;

        let input = init_format_context(&config.url)?;
        let streams = extract_stream_infos(&input);
        let selection = select_streams(&streams)?;

        let (video_producer, video_consumer) = buffer::bounded::<VideoFrame>(config.buffer_capacity);
        let (audio_producer, audio_consumer) = buffer::bounded::<AudioFrame>(config.audio_buffer_capacity);
        let video_control = video_producer.control();
        let audio_control = audio_producer.control();
        video_control.set_total(config.frame_budget);
        audio_control.set_total(config.audio_quota());

        let video = selection.video.and_then(|index| {
            let stream = &streams[index];
            let timing = stream_timing(&config, stream)?;
            VideoPath::open(&input, index, codec_name(stream), timing, video_producer)
                .map_err(|e| warn!("Video stream {index} will not be decoded: {e}"))
                .ok()
        });

        let audio = selection
            .audio
            .filter(|_| {
                if !config.audio_enabled {
                    debug!("Audio disabled, skipping audio stream");
                }
                config.audio_enabled
            })
            .and_then(|index| {
                let stream = &streams[index];
                let timing = stream_timing(&config, stream)?;
                AudioPath::open(
                    &input,
                    index,
                    codec_name(stream),
                    timing,
                    config.audio_format,
                    audio_producer,
                )
                .map_err(|e| warn!("Audio stream {index} will not be decoded: {e}"))
                .ok()
            });

        let has_video = video.is_some();
        let has_audio = audio.is_some();
        if !has_video {
            video_control.set_total(0);
        }
        if !has_audio {
            audio_control.set_total(0);
        }

        let state = SharedState::new();
        let task = DecodeTask::new(
            input,
            video,
            audio,
            video_control.clone(),
            audio_control.clone(),
            state.clone(),
        );
        let decode_thread = task.spawn()?;
        info!(
            "Opened {} (video: {}, audio: {})",
            config.url, has_video, has_audio
        );

        Ok(Self {
            url: config.url,
            streams,
            selector: FrameSelector::new(video_consumer),
            audio_player: has_audio.then(|| AudioPlayer::new(audio_consumer)),
            video_control,
            audio_control,
            has_video,
            has_audio,
            clock: PlaybackClock::new(),
            state,
            events: EventEmitter::default(),
            decode_thread: Some(decode_thread),
        })
    }

    /// Picks the frame to display at `deadline`, dropping frames that are
    /// already late. Never blocks; when the decoder lags behind, the
    /// previous frame stays current.
    pub fn select_frame(&mut self, deadline: Timestamp) -> DisplayFrameInfo {
        if let Some(player) = self.audio_player.as_mut() {
            player.skip_due(deadline);
        }
        let info = self.selector.select(deadline);
        self.events.observe(&info);
        info
    }

    /// [`select_frame`](Self::select_frame) at the reader's own clock.
    pub fn select_frame_now(&mut self) -> DisplayFrameInfo {
        let now = self.clock.now();
        self.select_frame(now)
    }

    /// The frame chosen by the latest [`select_frame`](Self::select_frame).
    pub fn current_frame(&self) -> Option<&VideoFrame> {
        self.selector.current()
    }

    /// Hands out the audio consumer, once. `None` if the input has no
    /// decodable audio, audio is disabled, or the player was already taken.
    ///
    /// Until the player is taken, [`select_frame`](Self::select_frame)
    /// discards the audio due at each deadline. Once taken, it has to be
    /// filled regularly or dropped: a full audio buffer stalls the decoder,
    /// and dropping the player closes the audio buffer.
    pub fn take_audio_player(&mut self) -> Option<AudioPlayer> {
        self.audio_player.take()
    }

    /// Receives [`PlaybackEvent`]s emitted from `select_frame`.
    pub fn subscribe(&mut self) -> Receiver<PlaybackEvent> {
        self.events.subscribe()
    }

    /// Wall clock started when the reader was opened.
    pub fn clock(&self) -> PlaybackClock {
        self.clock
    }

    pub fn reset_clock(&mut self) {
        self.clock.reset();
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn streams(&self) -> &[StreamInfo] {
        &self.streams
    }

    pub fn has_video(&self) -> bool {
        self.has_video
    }

    pub fn has_audio(&self) -> bool {
        self.has_audio
    }

    pub fn decode_state(&self) -> DecodeState {
        self.state.get()
    }

    /// Total video frames skipped by `select_frame` so far.
    pub fn dropped_frames(&self) -> u64 {
        self.selector.total_dropped()
    }

    /// `true` once every video frame has been consumed.
    pub fn is_finished(&self) -> bool {
        self.selector.is_all_done()
    }

    /// Stops decoding. Subsequent queries report the stream as done.
    pub fn stop(&self) {
        self.video_control.stop();
        self.audio_control.stop();
    }
}

impl Drop for VideoReader {
    fn drop(&mut self) {
        self.stop();
        if let Some(handle) = self.decode_thread.take() {
            if handle.join().is_err() {
                warn!("Decoder thread for {} panicked", self.url);
            }
        }
        debug!("Closed {}", self.url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::frame::Frame;
    use crate::error::{Error, OpenInputError};

    #[test]
    fn test_open_missing_file() {
        let result = VideoReader::open(ReaderConfig::new("not_found.mp4"));
        assert!(matches!(
            result,
            Err(Error::OpenInputStream(OpenInputError::NotFound))
        ));
    }

    #[test]
    fn test_events_emitted_once() {
        let mut events = EventEmitter::default();
        let receiver = events.subscribe();
        let mut info = DisplayFrameInfo {
            frame_id: None,
            nb_dropped: 0,
            wall_timestamp: Timestamp::ZERO,
            pts: None,
            is_last: false,
        };
        events.observe(&info);
        assert!(receiver.try_recv().is_err());

        info.frame_id = Some(0);
        events.observe(&info);
        events.observe(&info);
        assert_eq!(receiver.try_recv(), Ok(PlaybackEvent::FirstFrame));
        assert!(receiver.try_recv().is_err());

        info.is_last = true;
        events.observe(&info);
        events.observe(&info);
        assert_eq!(receiver.try_recv(), Ok(PlaybackEvent::EndOfStream));
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn test_dropped_subscriber_is_forgotten() {
        let mut events = EventEmitter::default();
        drop(events.subscribe());
        let alive = events.subscribe();
        events.emit(PlaybackEvent::FirstFrame);
        assert_eq!(events.subscribers.len(), 1);
        assert_eq!(alive.try_recv(), Ok(PlaybackEvent::FirstFrame));
    }

    #[test]
    #[ignore = "requires test.mp4 in the crate root"]
    fn test_play_through() {
        let _ = env_logger::builder().is_test(true).try_init();

        let config = ReaderConfig::new("test.mp4").set_frame_budget(50);
        let mut reader = VideoReader::open(config).unwrap();
        let events = reader.subscribe();
        let mut audio = reader.take_audio_player();
        let mut pcm = vec![0u8; 4096];

        let mut deadline = Timestamp::ZERO;
        let mut last_pts = None;
        let mut frames = 0u64;
        for _ in 0..100_000 {
            let info = reader.select_frame(deadline);
            if let Some(player) = audio.as_mut() {
                player.fill(&mut pcm, deadline);
            }
            if info.pts != last_pts {
                assert!(info.pts >= last_pts);
                assert!(reader.current_frame().map_or(false, |frame| frame.is_valid()));
                last_pts = info.pts;
                frames += 1 + info.nb_dropped as u64;
            }
            if info.is_last {
                break;
            }
            deadline = deadline + Duration::from_millis(10);
            std::thread::sleep(Duration::from_millis(1));
        }

        assert_eq!(frames, 50);
        assert!(reader.is_finished());
        assert_eq!(events.try_recv(), Ok(PlaybackEvent::FirstFrame));
        assert_eq!(events.try_recv(), Ok(PlaybackEvent::EndOfStream));
    }

    #[test]
    #[ignore = "requires test.mp4 in the crate root"]
    fn test_untaken_audio_does_not_stall_video() {
        let config = ReaderConfig::new("test.mp4")
            .set_frame_budget(50)
            .set_buffer_capacity(1);
        let mut reader = VideoReader::open(config).unwrap();

        let mut deadline = Timestamp::ZERO;
        for _ in 0..100_000 {
            if reader.select_frame(deadline).is_last {
                break;
            }
            deadline = deadline + Duration::from_millis(10);
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(reader.is_finished());
    }

    #[test]
    #[ignore = "requires test.mp4 in the crate root"]
    fn test_drop_while_decoder_is_blocked() {
        let config = ReaderConfig::new("test.mp4").set_buffer_capacity(1);
        let reader = VideoReader::open(config).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(reader.decode_state(), DecodeState::Demuxing);
        drop(reader);
    }
}
