use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use ffmpeg_next::codec;
use ffmpeg_next::decoder;
use ffmpeg_next::format::context::Input;
use ffmpeg_next::util::error::EAGAIN;
use ffmpeg_next::{frame, Packet, Rational, Rescale};
use log::{debug, error, info, warn};

use crate::core::audio_format::{ensure_channel_layout, AudioFormat, PcmConverter};
use crate::core::buffer::{BufferControl, Producer};
use crate::core::frame::{AudioFrame, Frame, TimingBase, VideoFrame};
use crate::error::{DecoderError, Error, Result};

const MAX_EAGAIN_RETRIES: u32 = 500;

/// Lifecycle of the decode thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DecodeState {
    /// Opened, thread not running yet.
    Idle = 0,
    /// Reading packets and decoding.
    Demuxing = 1,
    /// Input exhausted, draining the decoders and the resampler.
    Flushing = 2,
    /// Thread finished. Both buffers have been closed.
    Done = 3,
}

#[derive(Debug, Clone)]
pub(crate) struct SharedState(Arc<AtomicU8>);

impl SharedState {
    pub(crate) fn new() -> Self {
        Self(Arc::new(AtomicU8::new(DecodeState::Idle as u8)))
    }

    pub(crate) fn get(&self) -> DecodeState {
        match self.0.load(Ordering::Acquire) {
            0 => DecodeState::Idle,
            1 => DecodeState::Demuxing,
            2 => DecodeState::Flushing,
            _ => DecodeState::Done,
        }
    }

    fn set(&self, state: DecodeState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    /// Input exhausted or unreadable. Decoders are still flushed.
    EndOfInput,
    /// A buffer refused more frames. The thread exits right away.
    Stop,
}

/// Decoder errors that just mean "feed me more" or "fully drained".
fn is_drained(err: &ffmpeg_next::Error) -> bool {
    matches!(
        err,
        ffmpeg_next::Error::Eof | ffmpeg_next::Error::Other { errno: EAGAIN }
    )
}

fn open_decoder(input: &Input, index: usize) -> std::result::Result<decoder::Decoder, DecoderError> {
    let stream = input.stream(index).ok_or(DecoderError::OpenFailed {
        index,
        source: ffmpeg_next::Error::StreamNotFound,
    })?;
    let context = codec::context::Context::from_parameters(stream.parameters())
        .map_err(|source| DecoderError::OpenFailed { index, source })?;
    Ok(context.decoder())
}

fn map_open_error(index: usize, codec_name: &str, source: ffmpeg_next::Error) -> DecoderError {
    match source {
        ffmpeg_next::Error::DecoderNotFound => DecoderError::CodecNotFound {
            index,
            codec_name: codec_name.to_string(),
        },
        source => DecoderError::OpenFailed { index, source },
    }
}

pub(crate) struct VideoPath {
    stream_index: usize,
    decoder: decoder::Video,
    timing: TimingBase,
    frames: Producer<VideoFrame>,
}

impl VideoPath {
    pub(crate) fn open(
        input: &Input,
        index: usize,
        codec_name: &str,
        timing: TimingBase,
        frames: Producer<VideoFrame>,
    ) -> std::result::Result<Self, DecoderError> {
        let decoder = open_decoder(input, index)?
            .video()
            .map_err(|e| map_open_error(index, codec_name, e))?;
        debug!(
            "Opened video decoder for stream {index}: {codec_name} {}x{} {:?}",
            decoder.width(),
            decoder.height(),
            decoder.format()
        );
        Ok(Self {
            stream_index: index,
            decoder,
            timing,
            frames,
        })
    }

    fn decode(&mut self, packet: &Packet) -> Flow {
        if let Err(e) = self.decoder.send_packet(packet) {
            warn!("Video decoding failed on stream {}: {e}", self.stream_index);
            return Flow::EndOfInput;
        }
        self.drain()
    }

    fn flush(&mut self) -> Flow {
        if let Err(e) = self.decoder.send_eof() {
            debug!("Video decoder rejected flush: {e}");
        }
        self.drain()
    }

    /// Pushes every picture the decoder has ready.
    fn drain(&mut self) -> Flow {
        let mut picture = frame::Video::empty();
        loop {
            match self.decoder.receive_frame(&mut picture) {
                Ok(()) => {}
                Err(e) if is_drained(&e) => return Flow::Continue,
                Err(e) => {
                    warn!("Video decoding failed on stream {}: {e}", self.stream_index);
                    return Flow::EndOfInput;
                }
            }

            let raw_timestamp = VideoFrame::raw_timestamp_of(&picture);
            let decoded = std::mem::replace(&mut picture, frame::Video::empty());
            let frame = VideoFrame::new(decoded, self.timing.at(raw_timestamp));
            if !frame.is_valid() {
                continue;
            }
            if !self.frames.add(frame) {
                return Flow::Stop;
            }
        }
    }
}

/// Start of the resampler tail, whose `samples` at `rate` Hz end at `end`.
fn tail_timestamp(end: i64, samples: usize, rate: u32, time_base: Rational) -> i64 {
    if rate == 0 {
        return end;
    }
    end - (samples as i64).rescale((1, rate as i32), time_base)
}

/// Audio side of the buffer, tracking whether its quota ran out.
struct AudioSink {
    stream_index: usize,
    timing: TimingBase,
    frames: Producer<AudioFrame>,
    quota_reached: bool,
}

impl AudioSink {
    fn push(&mut self, pcm: Vec<u8>, raw_timestamp: i64) -> Flow {
        if self.quota_reached {
            return Flow::Continue;
        }
        let frame = AudioFrame::from_pcm(pcm, self.timing.at(raw_timestamp));
        if !frame.is_valid() || self.frames.add(frame) {
            return Flow::Continue;
        }
        if self.frames.control().is_stopped() {
            return Flow::Stop;
        }
        // running out of audio quota never ends the video stream
        debug!("Audio quota reached, dropping the rest of stream {}", self.stream_index);
        self.quota_reached = true;
        Flow::Continue
    }
}

pub(crate) struct AudioPath {
    decoder: decoder::Audio,
    converter: PcmConverter,
    sink: AudioSink,
    /// Raw timestamp right after the last decoded frame, for frames without
    /// one and for the resampler tail.
    next_raw_timestamp: Option<i64>,
}

impl AudioPath {
    pub(crate) fn open(
        input: &Input,
        index: usize,
        codec_name: &str,
        timing: TimingBase,
        format: AudioFormat,
        frames: Producer<AudioFrame>,
    ) -> std::result::Result<Self, DecoderError> {
        let decoder = open_decoder(input, index)?
            .audio()
            .map_err(|e| map_open_error(index, codec_name, e))?;
        debug!(
            "Opened audio decoder for stream {index}: {codec_name} {}Hz {}ch {:?}",
            decoder.rate(),
            decoder.channels(),
            decoder.format()
        );
        Ok(Self {
            decoder,
            converter: PcmConverter::new(format),
            sink: AudioSink {
                stream_index: index,
                timing,
                frames,
                quota_reached: false,
            },
            next_raw_timestamp: None,
        })
    }

    fn decode(&mut self, packet: &Packet) -> Flow {
        if let Err(e) = self.decoder.send_packet(packet) {
            warn!("Audio decoding failed on stream {}: {e}", self.sink.stream_index);
            return Flow::EndOfInput;
        }
        self.drain()
    }

    fn flush(&mut self) -> Flow {
        if let Err(e) = self.decoder.send_eof() {
            debug!("Audio decoder rejected flush: {e}");
        }
        if self.drain() == Flow::Stop {
            return Flow::Stop;
        }

        match self.converter.flush() {
            Ok(Some(tail)) => {
                let end = self.next_raw_timestamp.unwrap_or(0);
                let time_base = self.sink.timing.time_base;
                let raw_timestamp = tail_timestamp(end, tail.samples, tail.rate, time_base);
                self.sink.push(tail.pcm, raw_timestamp)
            }
            Ok(None) => Flow::Continue,
            Err(e) => {
                warn!("Audio resampler flush failed: {e}");
                Flow::Continue
            }
        }
    }

    fn drain(&mut self) -> Flow {
        let mut decoded = frame::Audio::empty();
        loop {
            match self.decoder.receive_frame(&mut decoded) {
                Ok(()) => {}
                Err(e) if is_drained(&e) => return Flow::Continue,
                Err(e) => {
                    warn!("Audio decoding failed on stream {}: {e}", self.sink.stream_index);
                    return Flow::EndOfInput;
                }
            }
            if self.sink.quota_reached {
                continue;
            }

            ensure_channel_layout(&mut decoded);
            let raw_timestamp = decoded
                .timestamp()
                .or_else(|| decoded.pts())
                .or(self.next_raw_timestamp)
                .unwrap_or(0);
            if decoded.rate() > 0 {
                let duration = (decoded.samples() as i64)
                    .rescale((1, decoded.rate() as i32), self.sink.timing.time_base);
                self.next_raw_timestamp = Some(raw_timestamp + duration);
            }

            let pcm = match self.converter.convert(&decoded) {
                Ok(pcm) => pcm,
                Err(e) => {
                    warn!("Audio conversion failed on stream {}: {e}", self.sink.stream_index);
                    return Flow::EndOfInput;
                }
            };
            let flow = self.sink.push(pcm, raw_timestamp);
            if flow != Flow::Continue {
                return flow;
            }
        }
    }
}

/// Closes both buffers when the decode thread exits, however it exits.
struct FinishGuard {
    video: BufferControl<VideoFrame>,
    audio: BufferControl<AudioFrame>,
    state: SharedState,
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.video.set_total(0);
        self.audio.set_total(0);
        self.state.set(DecodeState::Done);
    }
}

/// Everything the decode thread owns: the demuxer, the decoders and the
/// producing side of both buffers.
pub(crate) struct DecodeTask {
    input: Input,
    video: Option<VideoPath>,
    audio: Option<AudioPath>,
    video_control: BufferControl<VideoFrame>,
    audio_control: BufferControl<AudioFrame>,
    state: SharedState,
}

// SAFETY: DecodeTask owns its format context, codec contexts and resampler
// exclusively. It is moved to the decode thread once, never shared, and no
// custom AVIO or interrupt callbacks are registered on the input.
unsafe impl Send for DecodeTask {}

impl DecodeTask {
    pub(crate) fn new(
        input: Input,
        video: Option<VideoPath>,
        audio: Option<AudioPath>,
        video_control: BufferControl<VideoFrame>,
        audio_control: BufferControl<AudioFrame>,
        state: SharedState,
    ) -> Self {
        Self {
            input,
            video,
            audio,
            video_control,
            audio_control,
            state,
        }
    }

    pub(crate) fn spawn(self) -> Result<JoinHandle<()>> {
        let format_name = self.input.format().name().to_string();
        std::thread::Builder::new()
            .name(format!("decoder:{format_name}"))
            .spawn(move || self.run())
            .map_err(|e| {
                error!("Failed to spawn decoder thread for {format_name}: {e}");
                Error::ThreadExited
            })
    }

    fn run(mut self) {
        let _finish = FinishGuard {
            video: self.video_control.clone(),
            audio: self.audio_control.clone(),
            state: self.state.clone(),
        };

        self.state.set(DecodeState::Demuxing);
        debug!("Decoding started");

        if self.demux() == Flow::Stop {
            info!("Decoder received stop, finishing.");
            return;
        }

        self.state.set(DecodeState::Flushing);
        debug!("Flushing decoders");
        if let Some(video) = self.video.as_mut() {
            if video.flush() == Flow::Stop {
                info!("Decoder received stop while flushing, finishing.");
                return;
            }
        }
        if let Some(audio) = self.audio.as_mut() {
            audio.flush();
        }
        info!("Decoding finished");
    }

    fn is_stopped(&self) -> bool {
        self.video_control.is_stopped() || self.audio_control.is_stopped()
    }

    /// Nothing left that could still accept a frame.
    fn is_saturated(&self) -> bool {
        self.video.is_none() && self.audio.as_ref().map_or(true, |audio| audio.sink.quota_reached)
    }

    fn demux(&mut self) -> Flow {
        let mut eagain_retries: u32 = 0;
        loop {
            if self.is_stopped() {
                return Flow::Stop;
            }
            if self.is_saturated() {
                debug!("No stream accepts more frames");
                return Flow::Stop;
            }

            let mut packet = Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) => eagain_retries = 0,
                Err(ffmpeg_next::Error::Eof) => {
                    debug!("EOF while reading input");
                    return Flow::EndOfInput;
                }
                Err(ffmpeg_next::Error::Other { errno: EAGAIN }) => {
                    eagain_retries += 1;
                    if eagain_retries > MAX_EAGAIN_RETRIES {
                        warn!("Input kept returning EAGAIN, treating it as end of input");
                        return Flow::EndOfInput;
                    }
                    std::thread::sleep(Duration::from_millis(10));
                    continue;
                }
                Err(e) => {
                    error!("Error during demuxing: {e}");
                    return Flow::EndOfInput;
                }
            }

            let stream_index = packet.stream();
            let flow = match (self.video.as_mut(), self.audio.as_mut()) {
                (Some(video), _) if video.stream_index == stream_index => video.decode(&packet),
                (_, Some(audio)) if audio.stream_index == stream_index => audio.decode(&packet),
                _ => Flow::Continue,
            };
            if flow != Flow::Continue {
                return flow;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::buffer::{bounded, Consumer};
    use crate::core::timestamp::Timestamp;

    fn audio_sink(total: usize) -> (AudioSink, Consumer<AudioFrame>) {
        let (frames, consumer) = bounded(4);
        frames.set_total(total);
        let sink = AudioSink {
            stream_index: 1,
            timing: TimingBase {
                time_base: Rational::new(1, 48_000),
                start_offset: Duration::ZERO,
                epoch: Timestamp::ZERO,
            },
            frames,
            quota_reached: false,
        };
        (sink, consumer)
    }

    #[test]
    fn test_audio_quota_refusal_keeps_decoding() {
        let (mut sink, mut consumer) = audio_sink(1);
        assert_eq!(sink.push(vec![0; 4], 0), Flow::Continue);
        assert!(!sink.quota_reached);

        assert_eq!(sink.push(vec![0; 4], 480), Flow::Continue);
        assert!(sink.quota_reached);
        assert_eq!(sink.push(vec![0; 4], 960), Flow::Continue);

        assert_eq!(consumer.pop().map(|frame| frame.timing().raw_timestamp()), Some(0));
        assert!(consumer.pop().is_none());
        assert!(consumer.is_all_done());
    }

    #[test]
    fn test_audio_stop_refusal_ends_thread() {
        let (mut sink, _consumer) = audio_sink(10);
        assert_eq!(sink.push(vec![0; 4], 0), Flow::Continue);
        sink.frames.stop();
        assert_eq!(sink.push(vec![0; 4], 480), Flow::Stop);
        assert!(!sink.quota_reached);
    }

    #[test]
    fn test_empty_audio_is_skipped() {
        let (mut sink, mut consumer) = audio_sink(10);
        assert_eq!(sink.push(Vec::new(), 0), Flow::Continue);
        assert!(consumer.pop().is_none());
        assert!(!sink.quota_reached);
    }

    #[test]
    fn test_resampler_tail_ends_at_stream_end() {
        let time_base = Rational::new(1, 90_000);
        // 480 samples at 48 kHz last 10 ms, 900 ticks
        assert_eq!(tail_timestamp(90_000, 480, 48_000, time_base), 89_100);
        assert_eq!(tail_timestamp(90_000, 0, 48_000, time_base), 90_000);
        assert_eq!(tail_timestamp(500, 480, 0, time_base), 500);
    }

    #[test]
    fn test_shared_state_transitions() {
        let state = SharedState::new();
        assert_eq!(state.get(), DecodeState::Idle);
        state.set(DecodeState::Flushing);
        assert_eq!(state.clone().get(), DecodeState::Flushing);
        state.set(DecodeState::Done);
        assert_eq!(state.get(), DecodeState::Done);
    }

    #[test]
    fn test_decoder_drained_errors() {
        assert!(is_drained(&ffmpeg_next::Error::Eof));
        assert!(is_drained(&ffmpeg_next::Error::Other { errno: EAGAIN }));
        assert!(!is_drained(&ffmpeg_next::Error::InvalidData));
    }

    #[test]
    fn test_missing_decoder_maps_to_codec_not_found() {
        let err = map_open_error(3, "foo", ffmpeg_next::Error::DecoderNotFound);
        assert!(matches!(err, DecoderError::CodecNotFound { index: 3, .. }));
        let err = map_open_error(1, "foo", ffmpeg_next::Error::InvalidData);
        assert!(matches!(err, DecoderError::OpenFailed { index: 1, .. }));
    }

    #[test]
    fn test_finish_guard_closes_buffers() {
        let (video_producer, video_consumer) = crate::core::buffer::bounded::<VideoFrame>(2);
        let (audio_producer, mut audio_consumer) = crate::core::buffer::bounded::<AudioFrame>(2);
        video_producer.set_total(100);
        audio_producer.set_total(100);
        let state = SharedState::new();
        {
            let _finish = FinishGuard {
                video: video_producer.control(),
                audio: audio_producer.control(),
                state: state.clone(),
            };
            assert!(!video_consumer.is_all_done());
        }
        assert!(video_consumer.is_all_done());
        assert!(audio_consumer.get().is_done());
        assert_eq!(state.get(), DecodeState::Done);
    }
}
