//! Error types for sonoscan-media.

use std::io;
use thiserror::Error;

/// Result type for sonoscan-media operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for sonoscan-media operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from the byte source.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The source ended before a required field could be read.
    #[error("Truncated input: need {need} bytes, have {have}")]
    TruncatedInput { need: usize, have: usize },

    /// Declared sizes or fields violate structural invariants.
    #[error("Malformed container: {0}")]
    MalformedContainer(String),

    /// Track is structurally valid but lacks tables needed for duration or seeking.
    #[error("Incomplete track {track_id}: missing {}", .missing.join(", "))]
    IncompleteTrack {
        track_id: u32,
        missing: Vec<&'static str>,
    },

    /// Seek target lies outside the stream.
    #[error("Seek target {target} out of range (limit {limit})")]
    SeekOutOfRange { target: u64, limit: u64 },

    /// No valid frame could be located, or the layout cannot be rewritten.
    #[error("Unseekable stream: {0}")]
    UnseekableStream(String),

    /// Unsupported format or feature.
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl Error {
    /// Create a malformed container error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedContainer(msg.into())
    }

    /// Create an unseekable stream error.
    pub fn unseekable(msg: impl Into<String>) -> Self {
        Self::UnseekableStream(msg.into())
    }

    /// Create an unsupported error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Whether the error only affects a seek call and leaves the parse usable.
    pub fn is_seek_error(&self) -> bool {
        matches!(self, Self::SeekOutOfRange { .. } | Self::UnseekableStream(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_incomplete_track_message() {
        let err = Error::IncompleteTrack {
            track_id: 2,
            missing: vec!["stts", "stco"],
        };
        assert_eq!(err.to_string(), "Incomplete track 2: missing stts, stco");
    }

    #[test]
    fn test_seek_error_classification() {
        assert!(Error::SeekOutOfRange { target: 10, limit: 10 }.is_seek_error());
        assert!(Error::unseekable("no frames").is_seek_error());
        assert!(!Error::malformed("bad size").is_seek_error());
    }
}
