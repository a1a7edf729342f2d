//! Audio backend seam. The controller drives an [`AudioSink`] and learns
//! about finished streams through [`SinkNotice`]s on a channel.

use std::path::Path;

use async_trait::async_trait;

use crate::error::{PlayerError, Result};

/// What the backend reports it is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    Idle,
    Paused,
    Playing,
}

/// Lifecycle notifications. End-of-stream and playback errors both mean
/// "this item is over" to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    EndOfStream,
    Error(String),
}

/// A [`SinkEvent`] stamped with the item it belongs to, as passed to
/// [`AudioSink::set_uri`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkNotice {
    pub item: u64,
    pub event: SinkEvent,
}

/// `file://` URI for an absolute path, percent-encoded so names holding `%`
/// or spaces open the right file.
pub fn file_uri(path: &Path) -> Result<String> {
    reqwest::Url::from_file_path(path)
        .map(String::from)
        .map_err(|()| PlayerError::Resolve(format!("not an absolute path: {}", path.display())))
}

#[async_trait]
pub trait AudioSink: Send {
    /// Select what the next `play` opens. Nothing is audible until `play`.
    /// Every notice about this URI carries `item`.
    async fn set_uri(&mut self, uri: &str, item: u64) -> Result<()>;
    /// Linear level, 1.0 = unity.
    async fn set_volume(&mut self, volume: f32) -> Result<()>;
    /// Start the URI set last, or resume if it is already loaded and paused.
    async fn play(&mut self) -> Result<()>;
    async fn pause(&mut self) -> Result<()>;
    /// Drop the current item. Does not produce a `SinkEvent`.
    async fn stop(&mut self) -> Result<()>;
    async fn current_state(&mut self) -> Result<SinkState>;
    /// False once the backend process has gone away.
    fn is_alive(&mut self) -> bool {
        true
    }
    async fn shutdown(&mut self) {}
}
