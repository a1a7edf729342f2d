//! Error taxonomy for the daemon.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerError {
    /// Bad or missing setup. Fatal at startup, never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// One service has nothing playable; it is left out of the ring.
    #[error("Service '{service}' has no playable content")]
    NoContent { service: String },

    /// Every service was excluded.
    #[error("No usable music service")]
    NoService,

    /// The audio backend refused a command.
    #[error("Sink error: {0}")]
    Sink(String),

    /// The watched output device went away.
    #[error("Presence lost for device {device}")]
    PresenceLost { device: String },

    #[error("Speech synthesis failed: {0}")]
    Synthesis(String),

    #[error("Stream resolution failed: {0}")]
    Resolve(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PlayerError>;
