use std::collections::HashMap;
use std::path::Path;

use ffmpeg_next::format::context::Input;
use ffmpeg_next::{codec, media, Dictionary, Rational, Stream};
use log::warn;

use crate::error::{FindStreamError, OpenInputError, Result};

#[derive(Debug, Clone)]
pub enum StreamInfo {
    /// Video stream information
    Video {
        /// The index of the stream within the media file.
        index: usize,

        /// The time base for the stream, representing the unit of time for each frame or packet.
        time_base: Rational,

        /// The start time of the stream, in `time_base` units.
        start_time: i64,

        /// The total duration of the stream, in `time_base` units.
        duration: i64,

        /// The total number of frames in the video stream, 0 when the container does not say.
        nb_frames: i64,

        /// The average frame rate of the stream.
        avg_frame_rate: Rational,

        /// The codec identifier used to decode the video stream.
        codec_id: codec::Id,

        /// A human-readable name of the codec used for the video stream.
        codec_name: String,

        /// The width of the video frame in pixels.
        width: u32,

        /// The height of the video frame in pixels.
        height: u32,

        /// The pixel format of the video stream (e.g., `AV_PIX_FMT_YUV420P`).
        pixel_format: i32,

        /// Frames per second, computed from `avg_frame_rate`.
        fps: f64,

        /// Metadata associated with the video stream, such as title, language, etc.
        metadata: HashMap<String, String>,
    },
    /// Audio stream information
    Audio {
        /// The index of the audio stream within the media file.
        index: usize,

        /// The time base for the stream, representing the unit of time for each audio packet.
        time_base: Rational,

        /// The start time of the audio stream, in `time_base` units.
        start_time: i64,

        /// The total duration of the audio stream, in `time_base` units.
        duration: i64,

        /// The total number of frames in the audio stream.
        nb_frames: i64,

        /// The codec identifier used to decode the audio stream (e.g., AAC).
        codec_id: codec::Id,

        /// A human-readable name of the codec used for the audio stream.
        codec_name: String,

        /// The audio sample rate, measured in samples per second (Hz).
        sample_rate: u32,

        /// Number of channels, 0 when the container leaves the layout unset.
        nb_channels: u16,

        /// The format of the audio samples (e.g., `AV_SAMPLE_FMT_FLTP` for planar float samples).
        sample_format: i32,

        /// Number of samples per channel in one frame, 0 if variable.
        frame_size: u32,

        /// Metadata associated with the audio stream, such as language, title, etc.
        metadata: HashMap<String, String>,
    },
    /// Subtitle, data, attachment or unrecognized stream. Ignored by the reader.
    Other {
        /// The index of the stream within the media file.
        index: usize,

        /// The media type reported by the container.
        media_type: media::Type,
    },
}

impl StreamInfo {
    /// Returns a human-readable label for this stream's type
    /// (e.g. `"Video"`, `"Audio"`, `"Other"`).
    pub fn stream_type(&self) -> &'static str {
        match self {
            StreamInfo::Video { .. } => "Video",
            StreamInfo::Audio { .. } => "Audio",
            StreamInfo::Other { .. } => "Other",
        }
    }

    /// Returns `true` if this is a video stream.
    pub fn is_video(&self) -> bool {
        matches!(self, StreamInfo::Video { .. })
    }

    /// Returns `true` if this is an audio stream.
    pub fn is_audio(&self) -> bool {
        matches!(self, StreamInfo::Audio { .. })
    }

    /// Returns the stream index within the media file.
    pub fn index(&self) -> usize {
        match self {
            StreamInfo::Video { index, .. }
            | StreamInfo::Audio { index, .. }
            | StreamInfo::Other { index, .. } => *index,
        }
    }

    pub fn time_base(&self) -> Option<Rational> {
        match self {
            StreamInfo::Video { time_base, .. } | StreamInfo::Audio { time_base, .. } => {
                Some(*time_base)
            }
            StreamInfo::Other { .. } => None,
        }
    }

    /// Declared start time in `time_base` units, `None` when unknown.
    pub fn start_time(&self) -> Option<i64> {
        match self {
            StreamInfo::Video { start_time, .. } | StreamInfo::Audio { start_time, .. }
                if *start_time != ffmpeg_sys_next::AV_NOPTS_VALUE =>
            {
                Some(*start_time)
            }
            _ => None,
        }
    }
}

/// The single video and single audio stream a container may carry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSelection {
    pub video: Option<usize>,
    pub audio: Option<usize>,
}

/// Checks that `streams` holds at most one video and one audio stream and
/// returns their indices. Other stream kinds are ignored.
pub fn select_streams(streams: &[StreamInfo]) -> Result<StreamSelection> {
    let video: Vec<usize> = streams.iter().filter(|s| s.is_video()).map(|s| s.index()).collect();
    let audio: Vec<usize> = streams.iter().filter(|s| s.is_audio()).map(|s| s.index()).collect();

    if video.len() > 1 {
        return Err(FindStreamError::TooManyStreams {
            media_type: "video",
            count: video.len(),
        }
        .into());
    }
    if audio.len() > 1 {
        return Err(FindStreamError::TooManyStreams {
            media_type: "audio",
            count: audio.len(),
        }
        .into());
    }
    if video.is_empty() && audio.is_empty() {
        return Err(FindStreamError::NoStreamFound.into());
    }

    for other in streams.iter().filter(|s| !s.is_video() && !s.is_audio()) {
        warn!("Ignoring {} stream {}", other.stream_type(), other.index());
    }

    Ok(StreamSelection {
        video: video.first().copied(),
        audio: audio.first().copied(),
    })
}

/// Extracts a `StreamInfo` from a single demuxer stream.
pub(crate) fn extract_stream_info(stream: &Stream) -> StreamInfo {
    let parameters = stream.parameters();
    let index = stream.index();
    let time_base = stream.time_base();
    let start_time = stream.start_time();
    let duration = stream.duration();
    let nb_frames = stream.frames();
    let avg_frame_rate = stream.avg_frame_rate();
    let codec_id = parameters.id();
    let codec_name = codec_id.name().to_string();
    let metadata = stream
        .metadata()
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    // SAFETY: the parameters belong to a stream of an open input and stay
    // valid while `stream` is borrowed. Only scalar fields are read.
    let codecpar = unsafe { &*parameters.as_ptr() };

    match parameters.medium() {
        media::Type::Video => {
            let fps = if avg_frame_rate.denominator() == 0 {
                0.0
            } else {
                f64::from(avg_frame_rate)
            };
            StreamInfo::Video {
                index,
                time_base,
                start_time,
                duration,
                nb_frames,
                avg_frame_rate,
                codec_id,
                codec_name,
                width: codecpar.width.max(0) as u32,
                height: codecpar.height.max(0) as u32,
                pixel_format: codecpar.format,
                fps,
                metadata,
            }
        }
        media::Type::Audio => {
            StreamInfo::Audio {
                index,
                time_base,
                start_time,
                duration,
                nb_frames,
                codec_id,
                codec_name,
                sample_rate: codecpar.sample_rate.max(0) as u32,
                nb_channels: codecpar.ch_layout.nb_channels.max(0) as u16,
                sample_format: codecpar.format,
                frame_size: codecpar.frame_size.max(0) as u32,
                metadata,
            }
        }
        media_type => StreamInfo::Other { index, media_type },
    }
}

/// Extracts `StreamInfo` for all streams of an open input.
pub(crate) fn extract_stream_infos(input: &Input) -> Vec<StreamInfo> {
    input.streams().map(|stream| extract_stream_info(&stream)).collect()
}

/// Retrieves information for all streams from a given media URL.
///
/// # Returns
/// - `Ok(Vec<StreamInfo>)`: A vector containing information for all detected streams.
/// - `Err`: If the file cannot be opened or stream information cannot be found.
pub fn find_all_stream_infos(url: impl AsRef<Path>) -> Result<Vec<StreamInfo>> {
    let input = init_format_context(url)?;
    Ok(extract_stream_infos(&input))
}

/// Opens `url` and probes its streams.
pub(crate) fn init_format_context(url: impl AsRef<Path>) -> Result<Input> {
    crate::core::initialize_ffmpeg();

    let mut format_opts = Dictionary::new();
    format_opts.set("scan_all_pmts", "1");

    let input = ffmpeg_next::format::input_with_dictionary(&url, format_opts)
        .map_err(OpenInputError::from)?;
    if input.nb_streams() == 0 {
        return Err(FindStreamError::NoStreamFound.into());
    }
    Ok(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(index: usize) -> StreamInfo {
        StreamInfo::Video {
            index,
            time_base: Rational::new(1, 12800),
            start_time: 0,
            duration: 128_000,
            nb_frames: 250,
            avg_frame_rate: Rational::new(25, 1),
            codec_id: codec::Id::H264,
            codec_name: "h264".to_string(),
            width: 1920,
            height: 1080,
            pixel_format: 0,
            fps: 25.0,
            metadata: HashMap::new(),
        }
    }

    fn audio(index: usize) -> StreamInfo {
        StreamInfo::Audio {
            index,
            time_base: Rational::new(1, 48000),
            start_time: ffmpeg_sys_next::AV_NOPTS_VALUE,
            duration: 480_000,
            nb_frames: 469,
            codec_id: codec::Id::AAC,
            codec_name: "aac".to_string(),
            sample_rate: 48000,
            nb_channels: 2,
            sample_format: 8,
            frame_size: 1024,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn test_not_found() {
        let result = find_all_stream_infos("not_found.mp4");
        assert!(result.is_err());

        let error = result.err().unwrap();
        println!("{error}");
        assert!(matches!(
            error,
            crate::error::Error::OpenInputStream(OpenInputError::NotFound)
        ))
    }

    #[test]
    #[ignore = "requires test.mp4 in the crate root"]
    fn test_find_all_stream_infos() {
        let stream_infos = find_all_stream_infos("test.mp4").unwrap();
        assert_eq!(2, stream_infos.len());
        for stream_info in stream_infos {
            println!("{:?}", stream_info);
        }
    }

    #[test]
    fn test_select_one_of_each() {
        let other = StreamInfo::Other {
            index: 2,
            media_type: media::Type::Subtitle,
        };
        let selection = select_streams(&[video(0), audio(1), other]).unwrap();
        assert_eq!(
            selection,
            StreamSelection {
                video: Some(0),
                audio: Some(1)
            }
        );
    }

    #[test]
    fn test_select_audio_only() {
        let selection = select_streams(&[audio(0)]).unwrap();
        assert_eq!(selection.video, None);
        assert_eq!(selection.audio, Some(0));
    }

    #[test]
    fn test_reject_two_video_streams() {
        let result = select_streams(&[video(0), video(1), audio(2)]);
        assert!(matches!(
            result,
            Err(crate::error::Error::FindStream(FindStreamError::TooManyStreams {
                media_type: "video",
                count: 2
            }))
        ));
    }

    #[test]
    fn test_reject_two_audio_streams() {
        let result = select_streams(&[audio(0), audio(1)]);
        assert!(matches!(
            result,
            Err(crate::error::Error::FindStream(FindStreamError::TooManyStreams {
                media_type: "audio",
                ..
            }))
        ));
    }

    #[test]
    fn test_reject_no_playable_stream() {
        let other = StreamInfo::Other {
            index: 0,
            media_type: media::Type::Data,
        };
        assert!(matches!(
            select_streams(&[other]),
            Err(crate::error::Error::FindStream(FindStreamError::NoStreamFound))
        ));
    }

    #[test]
    fn test_start_time_unknown() {
        assert_eq!(video(0).start_time(), Some(0));
        assert_eq!(audio(1).start_time(), None);
        assert_eq!(audio(1).time_base(), Some(Rational::new(1, 48000)));
    }
}
