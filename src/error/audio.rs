// Audio error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Audio error code constants
///
/// Single source of truth for the numeric codes carried by [`AudioError`].
///
/// Error code range: 1001-1009
pub struct AudioErrorCodes {}

impl AudioErrorCodes {
    /// Platform audio backend could not be constructed
    pub const AUDIO_UNAVAILABLE: i32 = 1001;

    /// Control call issued before a successful initialize()
    pub const NOT_INITIALIZED: i32 = 1002;

    /// Tempo is not a positive finite number
    pub const TEMPO_INVALID: i32 = 1003;

    /// Failed to open or start the output stream
    pub const STREAM_OPEN_FAILED: i32 = 1004;

    /// Output stream reported an error or its owner thread went away
    pub const STREAM_FAILURE: i32 = 1005;

    /// The control-to-audio event queue had no free slot
    pub const EVENT_QUEUE_FULL: i32 = 1006;

    /// Mutex/RwLock was poisoned
    pub const LOCK_POISONED: i32 = 1007;

    /// Releasing an audio resource failed
    pub const TEARDOWN_FAILED: i32 = 1008;

    /// Engine was disposed
    pub const DISPOSED: i32 = 1009;
}

/// Log an audio error with structured context
///
/// Logs the numeric code, the component, and the human-readable message.
/// The logging is non-blocking and will not panic on failure.
pub fn log_audio_error(err: &AudioError, context: &str) {
    error!(
        "Audio error in {}: code={}, component=RhythmEngine, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Audio-related errors
///
/// Only [`AudioError::AudioUnavailable`] is ever returned to callers (from
/// `initialize()`); every other variant is logged and swallowed at the
/// control surface so rhythm mode never blocks gameplay.
///
/// Error code range: 1001-1009
#[derive(Debug, Clone, PartialEq)]
pub enum AudioError {
    /// Platform lacks a usable audio backend
    AudioUnavailable { reason: String },

    /// Control call before initialize() succeeded
    NotInitialized,

    /// Tempo must be a positive finite number of beats per minute
    TempoInvalid { bpm: f64 },

    /// Failed to open audio stream
    StreamOpenFailed { reason: String },

    /// Stream failed or its channel disconnected unexpectedly
    StreamFailure { reason: String },

    /// Sound event dropped because the event queue was full
    EventQueueFull { capacity: usize },

    /// Mutex/RwLock was poisoned
    LockPoisoned { component: String },

    /// Releasing audio resources failed
    TeardownFailed { details: String },

    /// Engine has been disposed
    Disposed,
}

impl AudioError {
    /// Collapse any bootstrap failure into `AudioUnavailable`.
    pub fn into_unavailable(self) -> AudioError {
        match self {
            AudioError::AudioUnavailable { .. } => self,
            other => AudioError::AudioUnavailable {
                reason: other.message(),
            },
        }
    }
}

impl ErrorCode for AudioError {
    fn code(&self) -> i32 {
        match self {
            AudioError::AudioUnavailable { .. } => AudioErrorCodes::AUDIO_UNAVAILABLE,
            AudioError::NotInitialized => AudioErrorCodes::NOT_INITIALIZED,
            AudioError::TempoInvalid { .. } => AudioErrorCodes::TEMPO_INVALID,
            AudioError::StreamOpenFailed { .. } => AudioErrorCodes::STREAM_OPEN_FAILED,
            AudioError::StreamFailure { .. } => AudioErrorCodes::STREAM_FAILURE,
            AudioError::EventQueueFull { .. } => AudioErrorCodes::EVENT_QUEUE_FULL,
            AudioError::LockPoisoned { .. } => AudioErrorCodes::LOCK_POISONED,
            AudioError::TeardownFailed { .. } => AudioErrorCodes::TEARDOWN_FAILED,
            AudioError::Disposed => AudioErrorCodes::DISPOSED,
        }
    }

    fn message(&self) -> String {
        match self {
            AudioError::AudioUnavailable { reason } => {
                format!("Audio unavailable: {}", reason)
            }
            AudioError::NotInitialized => {
                "Rhythm engine not initialized. Call initialize() after a user gesture.".to_string()
            }
            AudioError::TempoInvalid { bpm } => {
                format!("Tempo must be a positive number of BPM (got {})", bpm)
            }
            AudioError::StreamOpenFailed { reason } => {
                format!("Failed to open audio stream: {}", reason)
            }
            AudioError::StreamFailure { reason } => {
                format!("Audio stream failed: {}", reason)
            }
            AudioError::EventQueueFull { capacity } => {
                format!("Sound event queue full (capacity {})", capacity)
            }
            AudioError::LockPoisoned { component } => {
                format!("Lock poisoned on {}", component)
            }
            AudioError::TeardownFailed { details } => {
                format!("Teardown failed: {}", details)
            }
            AudioError::Disposed => "Rhythm engine has been disposed".to_string(),
        }
    }
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AudioError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for AudioError {}

impl From<std::io::Error> for AudioError {
    fn from(err: std::io::Error) -> Self {
        AudioError::StreamFailure {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_error_codes() {
        assert_eq!(
            AudioError::AudioUnavailable {
                reason: "test".to_string()
            }
            .code(),
            AudioErrorCodes::AUDIO_UNAVAILABLE
        );
        assert_eq!(
            AudioError::NotInitialized.code(),
            AudioErrorCodes::NOT_INITIALIZED
        );
        assert_eq!(
            AudioError::TempoInvalid { bpm: 0.0 }.code(),
            AudioErrorCodes::TEMPO_INVALID
        );
        assert_eq!(
            AudioError::StreamOpenFailed {
                reason: "test".to_string()
            }
            .code(),
            AudioErrorCodes::STREAM_OPEN_FAILED
        );
        assert_eq!(
            AudioError::StreamFailure {
                reason: "test".to_string()
            }
            .code(),
            AudioErrorCodes::STREAM_FAILURE
        );
        assert_eq!(
            AudioError::EventQueueFull { capacity: 4 }.code(),
            AudioErrorCodes::EVENT_QUEUE_FULL
        );
        assert_eq!(
            AudioError::LockPoisoned {
                component: "test".to_string()
            }
            .code(),
            AudioErrorCodes::LOCK_POISONED
        );
        assert_eq!(
            AudioError::TeardownFailed {
                details: "test".to_string()
            }
            .code(),
            AudioErrorCodes::TEARDOWN_FAILED
        );
        assert_eq!(AudioError::Disposed.code(), AudioErrorCodes::DISPOSED);
    }

    #[test]
    fn test_audio_error_messages() {
        let err = AudioError::TempoInvalid { bpm: -4.0 };
        assert_eq!(
            err.message(),
            "Tempo must be a positive number of BPM (got -4)"
        );

        let err = AudioError::NotInitialized;
        assert!(err.message().contains("initialize()"));

        let err = AudioError::AudioUnavailable {
            reason: "no output device".to_string(),
        };
        assert_eq!(err.message(), "Audio unavailable: no output device");
    }

    #[test]
    fn test_audio_error_display() {
        let err = AudioError::EventQueueFull { capacity: 64 };
        let display = format!("{}", err);
        assert!(display.contains("AudioError"));
        assert!(display.contains(&err.code().to_string()));
    }

    #[test]
    fn test_into_unavailable_wraps_bootstrap_failures() {
        let err = AudioError::StreamOpenFailed {
            reason: "device busy".to_string(),
        }
        .into_unavailable();
        match err {
            AudioError::AudioUnavailable { reason } => {
                assert!(reason.contains("device busy"));
            }
            other => panic!("Expected AudioUnavailable, got {:?}", other),
        }

        let original = AudioError::AudioUnavailable {
            reason: "headless".to_string(),
        };
        assert_eq!(original.clone().into_unavailable(), original);
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::other("thread spawn failed");
        let audio_err: AudioError = io_err.into();
        match audio_err {
            AudioError::StreamFailure { reason } => {
                assert!(reason.contains("thread spawn failed"));
            }
            _ => panic!("Expected StreamFailure"),
        }
    }
}
