use ffmpeg_next::format::sample::Type as SampleType;
use ffmpeg_next::format::Sample;
use ffmpeg_next::software::resampling;
use ffmpeg_next::{frame, ChannelLayout};
use log::debug;

use crate::error::DecoderError;

/// PCM layout handed to the audio-output collaborator.
///
/// The sample format must be packed (interleaved); every byte written by
/// [`AudioPlayer::fill`](crate::reader::AudioPlayer::fill) is in this format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub channels: u16,
    /// Output rate in Hz. `None` keeps the source stream's rate.
    pub sample_rate: Option<u32>,
    pub sample: Sample,
}

impl AudioFormat {
    /// Interleaved signed 16-bit stereo at the source rate.
    pub const fn stereo_s16() -> Self {
        Self {
            channels: 2,
            sample_rate: None,
            sample: Sample::I16(SampleType::Packed),
        }
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    pub fn channel_layout(&self) -> ChannelLayout {
        ChannelLayout::default(self.channels as i32)
    }

    /// Size of one sample of every channel, in bytes.
    pub fn bytes_per_frame(&self) -> usize {
        self.sample.bytes() * self.channels as usize
    }

    /// Number of PCM bytes covering `samples` samples per channel.
    pub fn buffer_size(&self, samples: usize) -> usize {
        samples * self.bytes_per_frame()
    }

    pub(crate) fn validate(&self) -> Result<(), DecoderError> {
        if self.sample.is_planar() || self.channels == 0 {
            return Err(DecoderError::UnsupportedSampleFormat(self.sample));
        }
        Ok(())
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self::stereo_s16()
    }
}

/// Fills in the channel layout some containers (MP3, WAV) leave unset,
/// assuming the default layout for the channel count.
pub(crate) fn ensure_channel_layout(decoded: &mut frame::Audio) {
    if decoded.channel_layout().is_empty() {
        let channels = decoded.channels().max(1);
        decoded.set_channel_layout(ChannelLayout::default(channels as i32));
    }
}

/// Extra output slots on top of the computed conversion size, covering
/// rounding in the resampler.
const OUTPUT_SLACK: usize = 32;

/// Output samples needed to convert `samples` input samples from
/// `in_rate` to `out_rate` when `buffered` output samples are still pending
/// in the resampler.
fn output_capacity(samples: usize, in_rate: u32, out_rate: u32, buffered: usize) -> usize {
    let converted = if in_rate == 0 {
        samples
    } else {
        (samples as u64 * u64::from(out_rate)).div_ceil(u64::from(in_rate)) as usize
    };
    converted + buffered + OUTPUT_SLACK
}

fn buffered_output_samples(resampler: &resampling::Context) -> usize {
    resampler
        .delay()
        .map_or(0, |delay| delay.output.max(0) as usize)
}

/// Samples the resampler still held at end of stream.
pub(crate) struct ResamplerTail {
    pub(crate) pcm: Vec<u8>,
    pub(crate) samples: usize,
    /// Output rate of `samples`, in Hz.
    pub(crate) rate: u32,
}

/// Converts decoded audio frames to the target [`AudioFormat`].
///
/// The resampler is only created when a frame's format, layout or rate
/// differs from the target, and is recreated if the source changes mid
/// stream.
pub(crate) struct PcmConverter {
    target: AudioFormat,
    resampler: Option<resampling::Context>,
}

impl PcmConverter {
    pub(crate) fn new(target: AudioFormat) -> Self {
        Self {
            target,
            resampler: None,
        }
    }

    fn output_rate(&self, decoded: &frame::Audio) -> u32 {
        self.target.sample_rate.unwrap_or_else(|| decoded.rate())
    }

    fn matches_target(&self, decoded: &frame::Audio) -> bool {
        decoded.format() == self.target.sample
            && decoded.channels() == self.target.channels
            && decoded.rate() == self.output_rate(decoded)
    }

    fn ensure_resampler(&mut self, decoded: &frame::Audio) -> Result<&mut resampling::Context, DecoderError> {
        let target = self.target;
        let output_rate = self.output_rate(decoded);

        match &mut self.resampler {
            Some(resampler)
                if resampler.input().format == decoded.format()
                    && resampler.input().rate == decoded.rate()
                    && resampler.input().channel_layout == decoded.channel_layout() =>
            {
                Ok(resampler)
            }
            slot => {
                debug!(
                    "Audio resampler: {:?} {}ch {}Hz -> {:?} {}ch {}Hz",
                    decoded.format(),
                    decoded.channels(),
                    decoded.rate(),
                    target.sample,
                    target.channels,
                    output_rate
                );
                let resampler = resampling::Context::get(
                    decoded.format(),
                    decoded.channel_layout(),
                    decoded.rate(),
                    target.sample,
                    target.channel_layout(),
                    output_rate,
                )
                .map_err(DecoderError::Resampler)?;
                Ok(slot.insert(resampler))
            }
        }
    }

    /// Produces the PCM bytes for one decoded frame.
    pub(crate) fn convert(&mut self, decoded: &frame::Audio) -> Result<Vec<u8>, DecoderError> {
        if self.resampler.is_none() && self.matches_target(decoded) {
            return Ok(self.packed_bytes(decoded));
        }

        let target = self.target;
        let resampler = self.ensure_resampler(decoded)?;
        let capacity = output_capacity(
            decoded.samples(),
            decoded.rate(),
            resampler.output().rate,
            buffered_output_samples(resampler),
        );
        // sized for the whole conversion, or swr keeps the excess in its FIFO
        let mut output = frame::Audio::new(target.sample, capacity, target.channel_layout());
        resampler
            .run(decoded, &mut output)
            .map_err(DecoderError::Resampler)?;
        Ok(self.packed_bytes(&output))
    }

    /// Drains samples still buffered inside the resampler at end of stream.
    pub(crate) fn flush(&mut self) -> Result<Option<ResamplerTail>, DecoderError> {
        let target = self.target;
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(None);
        };
        let buffered = buffered_output_samples(resampler);
        if buffered == 0 {
            return Ok(None);
        }

        let rate = resampler.output().rate;
        let capacity = buffered + OUTPUT_SLACK;
        let mut output = frame::Audio::new(target.sample, capacity, target.channel_layout());
        resampler.flush(&mut output).map_err(DecoderError::Resampler)?;
        let samples = output.samples();
        if samples == 0 {
            return Ok(None);
        }
        Ok(Some(ResamplerTail {
            pcm: self.packed_bytes(&output),
            samples,
            rate,
        }))
    }

    fn packed_bytes(&self, packed: &frame::Audio) -> Vec<u8> {
        let data = packed.data(0);
        let len = self.target.buffer_size(packed.samples()).min(data.len());
        data[..len].to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn audio(sample: Sample, channels: u16, rate: u32, samples: usize) -> frame::Audio {
        let mut decoded = frame::Audio::new(sample, samples, ChannelLayout::default(channels as i32));
        decoded.set_rate(rate);
        decoded
    }

    #[test]
    fn test_stereo_s16_sizes() {
        let format = AudioFormat::stereo_s16();
        assert_eq!(format.bytes_per_frame(), 4);
        assert_eq!(format.buffer_size(1024), 4096);
        assert!(format.validate().is_ok());
    }

    #[test]
    fn test_planar_target_rejected() {
        let format = AudioFormat {
            channels: 2,
            sample_rate: None,
            sample: Sample::F32(SampleType::Planar),
        };
        assert!(matches!(
            format.validate(),
            Err(DecoderError::UnsupportedSampleFormat(_))
        ));
    }

    #[test]
    fn test_matching_frame_is_copied_without_resampler() {
        let mut decoded = audio(Sample::I16(SampleType::Packed), 2, 48_000, 256);
        decoded.data_mut(0)[..4].copy_from_slice(&[1, 2, 3, 4]);
        let mut converter = PcmConverter::new(AudioFormat::stereo_s16());
        let pcm = converter.convert(&decoded).unwrap();
        assert_eq!(pcm.len(), 256 * 4);
        assert_eq!(&pcm[..4], &[1, 2, 3, 4]);
        assert!(converter.resampler.is_none());
        assert!(converter.flush().unwrap().is_none());
    }

    #[test]
    fn test_planar_float_is_resampled_to_s16() {
        let decoded = audio(Sample::F32(SampleType::Planar), 2, 48_000, 480);
        let mut converter = PcmConverter::new(AudioFormat::stereo_s16());
        let pcm = converter.convert(&decoded).unwrap();
        assert!(converter.resampler.is_some());
        assert_eq!(pcm.len() % 4, 0);
        assert!(pcm.len() <= 480 * 4);
    }

    #[test]
    fn test_output_capacity_covers_upsampling() {
        assert_eq!(output_capacity(441, 44_100, 48_000, 0), 480 + OUTPUT_SLACK);
        assert_eq!(output_capacity(1, 44_100, 48_000, 0), 2 + OUTPUT_SLACK);
        assert_eq!(output_capacity(480, 48_000, 24_000, 7), 240 + 7 + OUTPUT_SLACK);
        assert_eq!(output_capacity(64, 0, 48_000, 0), 64 + OUTPUT_SLACK);
    }

    fn upsample_441_frames(converter: &mut PcmConverter, count: usize) -> usize {
        let mut produced = 0;
        for _ in 0..count {
            let mut decoded = audio(Sample::I16(SampleType::Packed), 2, 44_100, 441);
            decoded.data_mut(0).fill(0);
            let pcm = converter.convert(&decoded).unwrap();
            assert_eq!(pcm.len() % 4, 0);
            produced += pcm.len() / 4;
        }
        produced
    }

    #[test]
    fn test_upsampling_emits_every_sample() {
        let mut converter = PcmConverter::new(AudioFormat::stereo_s16().with_sample_rate(48_000));
        let first = upsample_441_frames(&mut converter, 1);
        assert!((440..=480).contains(&first), "first frame gave {first} samples");

        // 10 ms of input is 480 samples at 48 kHz, minus the filter delay
        let produced = first + upsample_441_frames(&mut converter, 9);
        assert!((4700..=4800).contains(&produced), "got {produced} samples");
    }

    #[test]
    fn test_flush_returns_resampler_tail() {
        let mut converter = PcmConverter::new(AudioFormat::stereo_s16().with_sample_rate(48_000));
        let produced = upsample_441_frames(&mut converter, 10);

        let tail = converter.flush().unwrap().expect("resampler holds a tail");
        assert_eq!(tail.rate, 48_000);
        assert!(tail.samples > 0);
        assert_eq!(tail.pcm.len(), tail.samples * 4);
        let total = produced + tail.samples;
        assert!((4780..=4840).contains(&total), "got {total} samples");
    }

    #[test]
    fn test_missing_layout_gets_default() {
        let mut decoded = audio(Sample::I16(SampleType::Packed), 1, 8_000, 16);
        decoded.set_channel_layout(ChannelLayout::empty());
        ensure_channel_layout(&mut decoded);
        assert!(!decoded.channel_layout().is_empty());
    }
}
