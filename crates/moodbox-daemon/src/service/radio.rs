use std::collections::HashMap;
use std::path::PathBuf;

use moodbox_proto::config::RadioServiceConfig;
use moodbox_proto::stations::{
    dedup_stations, default_stations, load_stations_from_m3u, load_stations_from_toml,
    parse_m3u_from_str, save_stations_to_toml, Station,
};
use tracing::{info, warn};

use super::require_content;
use crate::error::{PlayerError, Result};
use crate::playlist::Playlist;
use crate::track::{PlaylistId, StreamKey, Track, TrackId};

/// Internet radio. Every station is a playlist holding a single track (the
/// live stream itself), so "next playlist" tunes the next station.
#[derive(Debug)]
pub struct RadioService {
    playlists: Vec<Playlist>,
    urls: HashMap<StreamKey, String>,
}

impl RadioService {
    pub async fn load(config: &RadioServiceConfig) -> Result<Self> {
        let stations = load_stations(config).await;
        Self::from_stations(stations)
    }

    pub fn from_stations(stations: Vec<Station>) -> Result<Self> {
        let mut playlists = Vec::new();
        let mut urls = HashMap::new();

        for station in dedup_stations(stations) {
            let id = PlaylistId(playlists.len());
            let track = Track::new(TrackId(0), station.name.clone());
            urls.insert(
                StreamKey {
                    playlist: id,
                    track: track.id(),
                },
                station.url,
            );
            playlists.extend(Playlist::new(id, station.name, vec![track]));
        }

        Ok(Self {
            playlists: require_content("Radio Service", playlists)?,
            urls,
        })
    }

    pub fn playlists(&self) -> &[Playlist] {
        &self.playlists
    }

    pub fn playlists_mut(&mut self) -> &mut [Playlist] {
        &mut self.playlists
    }

    pub fn resolve_stream(&self, playlist: PlaylistId, track: &Track) -> Result<String> {
        let key = StreamKey {
            playlist,
            track: track.id(),
        };
        self.urls
            .get(&key)
            .cloned()
            .ok_or_else(|| PlayerError::Resolve(format!("no station for {:?}", key)))
    }
}

/// TOML station file first, then the configured m3u (URL or path). With
/// neither, the built-in table is written to the TOML path and used.
/// Failures are logged; an empty result surfaces as `NoContent`.
async fn load_stations(config: &RadioServiceConfig) -> Vec<Station> {
    let toml_path = &config.stations_toml;
    if !toml_path.exists() && config.m3u_url.trim().is_empty() {
        let defaults = default_stations();
        match save_stations_to_toml(toml_path, &defaults) {
            Ok(()) => info!("Wrote default stations to {}", toml_path.display()),
            Err(e) => warn!("Failed to write default stations: {}", e),
        }
        return defaults;
    }
    if toml_path.exists() {
        match load_stations_from_toml(toml_path) {
            Ok(s) => {
                info!(
                    "Loaded {} stations from TOML: {}",
                    s.len(),
                    toml_path.display()
                );
                return s;
            }
            Err(e) => warn!("Failed to parse TOML stations: {}", e),
        }
    }

    let source = config.m3u_url.trim();
    if source.is_empty() {
        return Vec::new();
    }
    info!("Loading stations from m3u: {}", source);

    if source.starts_with("http://") || source.starts_with("https://") {
        match fetch_m3u_url(source).await {
            Ok(s) => {
                info!("Loaded {} stations from URL", s.len());
                return s;
            }
            Err(e) => warn!("Failed to fetch stations from URL: {}", e),
        }
    } else {
        let path = PathBuf::from(source);
        match load_stations_from_m3u(&path) {
            Ok(s) => {
                info!("Loaded {} stations from m3u file", s.len());
                return s;
            }
            Err(e) => warn!("Failed to read m3u file {}: {}", path.display(), e),
        }
    }

    Vec::new()
}

async fn fetch_m3u_url(url: &str) -> Result<Vec<Station>> {
    let response = reqwest::get(url).await?.error_for_status()?;
    let text = response.text().await?;
    Ok(parse_m3u_from_str(&text))
}
