//! Music sources. The set is closed: adding a variant means adding a match
//! arm everywhere the compiler asks for one.

mod local;
mod radio;
mod streaming;

pub use local::LocalService;
pub use radio::RadioService;
pub use streaming::StreamingService;

use moodbox_proto::config::ServicesConfig;
use tracing::{info, warn};

use crate::error::{PlayerError, Result};
use crate::playlist::Playlist;
use crate::track::{PlaylistId, Track};

#[derive(Debug)]
pub enum MusicService {
    Local(LocalService),
    Radio(RadioService),
    Streaming(StreamingService),
}

impl MusicService {
    /// Human-readable name, used in logs and snapshots.
    pub fn name(&self) -> &'static str {
        match self {
            MusicService::Local(_) => "Local Service",
            MusicService::Radio(_) => "Radio Service",
            MusicService::Streaming(_) => "Streaming Service",
        }
    }

    /// Directory name for this service's announcement clips.
    pub fn namespace(&self) -> &'static str {
        match self {
            MusicService::Local(_) => "local",
            MusicService::Radio(_) => "radio",
            MusicService::Streaming(_) => "streaming",
        }
    }

    pub fn playlists(&self) -> &[Playlist] {
        match self {
            MusicService::Local(s) => s.playlists(),
            MusicService::Radio(s) => s.playlists(),
            MusicService::Streaming(s) => s.playlists(),
        }
    }

    pub fn playlists_mut(&mut self) -> &mut [Playlist] {
        match self {
            MusicService::Local(s) => s.playlists_mut(),
            MusicService::Radio(s) => s.playlists_mut(),
            MusicService::Streaming(s) => s.playlists_mut(),
        }
    }

    /// URI the sink should open for `track`. Streaming URIs may expire:
    /// resolve right before playing and never keep the result.
    pub async fn resolve_stream(&self, playlist: PlaylistId, track: &Track) -> Result<String> {
        match self {
            MusicService::Local(s) => s.resolve_stream(playlist, track),
            MusicService::Radio(s) => s.resolve_stream(playlist, track),
            MusicService::Streaming(s) => s.resolve_stream(playlist, track).await,
        }
    }
}

/// Build every enabled service in ring order (local, radio, streaming).
/// A service with nothing to play is logged and left out; configuration
/// errors abort startup.
pub async fn load_services(config: &ServicesConfig) -> Result<Vec<MusicService>> {
    let mut services = Vec::new();

    if config.local.enabled {
        keep(
            &mut services,
            "local",
            LocalService::scan(&config.local.music_dir).map(MusicService::Local),
        )?;
    }
    if config.radio.enabled {
        keep(
            &mut services,
            "radio",
            RadioService::load(&config.radio)
                .await
                .map(MusicService::Radio),
        )?;
    }
    if config.streaming.enabled {
        keep(
            &mut services,
            "streaming",
            StreamingService::connect(&config.streaming)
                .await
                .map(MusicService::Streaming),
        )?;
    }

    Ok(services)
}

fn keep(
    services: &mut Vec<MusicService>,
    label: &str,
    built: Result<MusicService>,
) -> Result<()> {
    match built {
        Ok(service) => {
            info!(
                "{}: {} playlists",
                service.name(),
                service.playlists().len()
            );
            services.push(service);
            Ok(())
        }
        Err(e @ PlayerError::Configuration(_)) => Err(e),
        Err(e) => {
            warn!("Excluding {} service: {}", label, e);
            Ok(())
        }
    }
}

/// Wrap a service's playlist list, refusing an empty one.
fn require_content(service: &str, playlists: Vec<Playlist>) -> Result<Vec<Playlist>> {
    if playlists.is_empty() {
        return Err(PlayerError::NoContent {
            service: service.to_string(),
        });
    }
    Ok(playlists)
}
