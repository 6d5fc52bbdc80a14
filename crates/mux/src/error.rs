//! Remuxer error types.

pub use vela_common::MuxError;

/// Convenience Result type for mux operations.
pub type MuxResult<T> = Result<T, MuxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mux_error_display_unknown_format() {
        let err = MuxError::UnknownFormat("out.xyz".into());
        assert_eq!(err.to_string(), "Cannot determine output format for out.xyz");
    }

    #[test]
    fn mux_error_display_track_error() {
        let err = MuxError::TrackError("input stream 5 not mapped".into());
        assert_eq!(err.to_string(), "Track error: input stream 5 not mapped");
    }

    #[test]
    fn mux_error_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let mux_err: MuxError = io_err.into();
        assert!(matches!(mux_err, MuxError::Io(_)));
    }
}
