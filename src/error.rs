//! Error types for reading extraction.
//!
//! Only `InvalidInput`, `RecognizerUnavailable` and `Unrecognizable` are meant
//! to reach the caller of `recognize_reading`. Everything else is a
//! per-strategy failure that the orchestrator logs and skips.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReadingError {
    /// Bad, empty, oversized or undecodable source image.
    #[error("invalid input image: {0}")]
    InvalidInput(String),

    /// The recognizer was used before `initialize()` or after `terminate()`.
    #[error("recognizer is not ready: {0}")]
    RecognizerUnavailable(String),

    #[error("{operation} timed out after {}s", .after.as_secs())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// The engine ran but reported failure (bad arguments, crash, bad output).
    #[error("recognition failed: {0}")]
    Recognition(String),

    #[error("recognizer returned no text")]
    EmptyText,

    #[error("no blood pressure reading found in recognized text: {0:?}")]
    NoReadingFound(String),

    /// Every strategy, fallback and the combined-text salvage failed.
    #[error(
        "could not recognize a blood pressure reading; make sure the photo shows only \
         the monitor display, is well lit and the digits are in focus"
    )]
    Unrecognizable,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

impl ReadingError {
    /// Errors that end the whole run instead of just the current strategy.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ReadingError::RecognizerUnavailable(_) | ReadingError::InvalidInput(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ReadingError>;
