use ffmpeg_next::util::error::{EACCES, EAGAIN, EINVAL, ENOENT, ENOMEM};
use thiserror::Error;

/// Result type of every fallible operation in this crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Top-level error.
///
/// Only construction-time failures surface here. Once a
/// [`VideoReader`](crate::reader::VideoReader) is running, its consumer-facing
/// calls never fail: end of input, decode errors and an explicit stop all
/// show up as "done" on the frame buffers instead.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to open input stream: {0}")]
    OpenInputStream(#[from] OpenInputError),

    #[error("Failed to find stream info: {0}")]
    FindStream(#[from] FindStreamError),

    #[error("Decoder error: {0}")]
    Decoder(#[from] DecoderError),

    #[error("Decoder thread exited before it could start")]
    ThreadExited,
}

#[derive(Error, Debug)]
pub enum OpenInputError {
    #[error("Memory allocation error")]
    OutOfMemory,

    #[error("Invalid argument provided")]
    InvalidArgument,

    #[error("File or stream not found")]
    NotFound,

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Resource temporarily unavailable")]
    WouldBlock,

    #[error("I/O error occurred while opening the input")]
    IOError,

    #[error("Invalid input data")]
    InvalidData,

    #[error("Unknown error occurred: {0}")]
    UnknownError(ffmpeg_next::Error),
}

impl From<ffmpeg_next::Error> for OpenInputError {
    fn from(err: ffmpeg_next::Error) -> Self {
        match err {
            ffmpeg_next::Error::Other { errno } => match errno {
                ENOMEM => OpenInputError::OutOfMemory,
                EINVAL => OpenInputError::InvalidArgument,
                ENOENT => OpenInputError::NotFound,
                EACCES => OpenInputError::PermissionDenied,
                EAGAIN => OpenInputError::WouldBlock,
                _ => OpenInputError::UnknownError(err),
            },
            ffmpeg_next::Error::InvalidData => OpenInputError::InvalidData,
            ffmpeg_next::Error::Eof => OpenInputError::IOError,
            _ => OpenInputError::UnknownError(err),
        }
    }
}

impl From<i32> for OpenInputError {
    fn from(code: i32) -> Self {
        OpenInputError::from(ffmpeg_next::Error::from(code))
    }
}

#[derive(Error, Debug)]
pub enum FindStreamError {
    #[error("No stream found")]
    NoStreamFound,

    #[error("Found {count} {media_type} streams, at most one is supported")]
    TooManyStreams {
        media_type: &'static str,
        count: usize,
    },

    #[error("Failed to probe stream information: {0}")]
    ProbeFailed(ffmpeg_next::Error),
}

impl From<ffmpeg_next::Error> for FindStreamError {
    fn from(err: ffmpeg_next::Error) -> Self {
        FindStreamError::ProbeFailed(err)
    }
}

#[derive(Error, Debug)]
pub enum DecoderError {
    #[error("No decoder available for stream {index} ({codec_name})")]
    CodecNotFound { index: usize, codec_name: String },

    #[error("Failed to open decoder for stream {index}: {source}")]
    OpenFailed {
        index: usize,
        #[source]
        source: ffmpeg_next::Error,
    },

    #[error("Failed to create audio resampler: {0}")]
    Resampler(ffmpeg_next::Error),

    #[error("Failed to convert picture: {0}")]
    Scaler(ffmpeg_next::Error),

    #[error("Unsupported target sample format: {0:?}")]
    UnsupportedSampleFormat(ffmpeg_next::format::Sample),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_input_error_from_errno() {
        let err = OpenInputError::from(ffmpeg_next::Error::Other { errno: ENOENT });
        assert!(matches!(err, OpenInputError::NotFound));

        let err = OpenInputError::from(ffmpeg_next::Error::Other { errno: ENOMEM });
        assert!(matches!(err, OpenInputError::OutOfMemory));

        let err = OpenInputError::from(ffmpeg_next::Error::InvalidData);
        assert!(matches!(err, OpenInputError::InvalidData));
    }

    #[test]
    fn test_too_many_streams_message() {
        let err: Error = FindStreamError::TooManyStreams {
            media_type: "video",
            count: 2,
        }
        .into();
        assert_eq!(
            err.to_string(),
            "Failed to find stream info: Found 2 video streams, at most one is supported"
        );
    }
}
