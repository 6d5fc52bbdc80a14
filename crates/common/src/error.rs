//! Central error types for the pipeline (thiserror-based).

use thiserror::Error;

use crate::codec::{CodecId, MediaKind};

/// Top-level pipeline error.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Demux error: {0}")]
    Demux(#[from] DemuxError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Mux error: {0}")]
    Mux(#[from] MuxError),

    #[error("No {0} container is open")]
    NotOpened(MediaKind),

    #[error("Stream #{index} is not of kind {expected}")]
    StreamKindMismatch { index: usize, expected: MediaKind },

    #[error("No streams enabled")]
    NoStreamsEnabled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Demuxer/container errors (open failures and seek failures).
#[derive(Error, Debug)]
pub enum DemuxError {
    #[error("Source not found: {0}")]
    NotFound(String),

    #[error("Unsupported container format: {0}")]
    UnsupportedContainer(String),

    #[error("No decodable streams found")]
    NoStreams,

    #[error("Invalid stream index: {0}")]
    InvalidStream(usize),

    #[error("Demuxer is not opened")]
    NotOpened,

    #[error("Seek failed: {0}")]
    SeekFailed(String),

    #[error("Failed to spawn read thread: {0}")]
    Thread(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by a blocking packet read.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    /// Natural end of the container.
    #[error("End of stream")]
    EndOfStream,

    /// The read was aborted through the interrupter.
    #[error("Read interrupted")]
    Interrupted,

    /// Transport-level failure (network drop, disk error).
    #[error("IO error: {0}")]
    Io(String),

    /// Undecodable container data.
    #[error("Corrupt data: {0}")]
    Corrupt(String),
}

/// Codec errors.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Unsupported codec: {0:?}")]
    UnsupportedCodec(CodecId),

    #[error("Decoder init failed for {codec:?}: {reason}")]
    Init { codec: CodecId, reason: String },

    /// A single packet was rejected. The decode loop skips it.
    #[error("Decode failed at pts {pts:?}: {reason}")]
    DecodeFailed { pts: Option<i64>, reason: String },

    /// The codec context itself is unusable. Fatal for the decoder.
    #[error("Codec context invalid")]
    InvalidSession,

    #[error("Decoder is not opened")]
    NotOpened,

    #[error("Failed to spawn decode thread: {0}")]
    Thread(String),
}

impl DecodeError {
    /// Whether the decoder must be torn down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidSession)
    }
}

/// Output container (remux) errors.
#[derive(Error, Debug)]
pub enum MuxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot determine output format for {0}")]
    UnknownFormat(String),

    #[error("Invalid muxer state: {0}")]
    InvalidState(String),

    #[error("Track error: {0}")]
    TrackError(String),

    #[error("Header write failed: {0}")]
    Header(String),

    #[error("Trailer write failed: {0}")]
    Trailer(String),

    #[error("Packet write failed: {0}")]
    Write(String),
}

/// Convenience Result type for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demux_error_converts() {
        let err: PipelineError = DemuxError::NoStreams.into();
        assert_eq!(err.to_string(), "Demux error: No decodable streams found");
    }

    #[test]
    fn fatal_decode_errors() {
        assert!(DecodeError::InvalidSession.is_fatal());
        assert!(!DecodeError::DecodeFailed {
            pts: Some(3),
            reason: "bad slice".into()
        }
        .is_fatal());
    }

    #[test]
    fn mux_error_display_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let mux_err = MuxError::from(io_err);
        assert!(mux_err.to_string().contains("IO error"));
        assert!(mux_err.to_string().contains("file not found"));
    }

    #[test]
    fn stream_kind_mismatch_display() {
        let err = PipelineError::StreamKindMismatch {
            index: 2,
            expected: MediaKind::Audio,
        };
        assert_eq!(err.to_string(), "Stream #2 is not of kind audio");
    }
}
