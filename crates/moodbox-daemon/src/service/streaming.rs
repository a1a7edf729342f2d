//! Streaming catalog over HTTP.
//!
//! ```text
//! GET {api_base}/playlists             → [{ "id", "name", "tracks": [{ "id", "name" }] }]
//! GET {api_base}/tracks/{id}/stream    → { "url": "https://…?expires=…" }
//! ```
//!
//! Both requests use HTTP basic auth with the credentials from the auth
//! file. Stream URLs are short-lived and fetched for every play.

use std::collections::HashMap;
use std::path::Path;

use moodbox_proto::config::StreamingServiceConfig;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use super::require_content;
use crate::error::{PlayerError, Result};
use crate::playlist::Playlist;
use crate::track::{PlaylistId, StreamKey, Track, TrackId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    /// Auth file format: first line user name, second line app password,
    /// nothing else.
    pub fn parse(content: &str) -> Result<Self> {
        let lines: Vec<&str> = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        match lines.as_slice() {
            [user, password] => Ok(Self {
                user: user.to_string(),
                password: password.to_string(),
            }),
            _ => Err(PlayerError::Configuration(
                "improperly formatted auth file: expected user and password lines".to_string(),
            )),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PlayerError::Configuration(format!("cannot read auth file {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }
}

#[derive(Debug, Deserialize)]
struct RemotePlaylist {
    id: String,
    name: String,
    #[serde(default)]
    tracks: Vec<RemoteTrack>,
}

#[derive(Debug, Deserialize)]
struct RemoteTrack {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    url: String,
}

#[derive(Debug)]
pub struct StreamingService {
    client: Client,
    api_base: String,
    credentials: Credentials,
    playlists: Vec<Playlist>,
    /// Catalog track id for each local (playlist, track) pair.
    remote_ids: HashMap<StreamKey, String>,
}

impl StreamingService {
    pub async fn connect(config: &StreamingServiceConfig) -> Result<Self> {
        let credentials = Credentials::load(&config.auth_file)?;
        let api_base = config.api_base.trim_end_matches('/').to_string();
        let client = Client::builder()
            .user_agent(concat!("moodbox/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let catalog: Vec<RemotePlaylist> = client
            .get(format!("{}/playlists", api_base))
            .basic_auth(&credentials.user, Some(&credentials.password))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        info!("streaming: catalog has {} playlists", catalog.len());

        let (playlists, remote_ids) = build_catalog(catalog);
        Ok(Self {
            client,
            api_base,
            credentials,
            playlists: require_content("Streaming Service", playlists)?,
            remote_ids,
        })
    }

    pub fn playlists(&self) -> &[Playlist] {
        &self.playlists
    }

    pub fn playlists_mut(&mut self) -> &mut [Playlist] {
        &mut self.playlists
    }

    pub async fn resolve_stream(&self, playlist: PlaylistId, track: &Track) -> Result<String> {
        let key = StreamKey {
            playlist,
            track: track.id(),
        };
        let remote_id = self
            .remote_ids
            .get(&key)
            .ok_or_else(|| PlayerError::Resolve(format!("no catalog id for {:?}", key)))?;

        let response: StreamResponse = self
            .client
            .get(format!("{}/tracks/{}/stream", self.api_base, remote_id))
            .basic_auth(&self.credentials.user, Some(&self.credentials.password))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!("streaming: resolved {} → {}", remote_id, response.url);
        Ok(response.url)
    }
}

fn build_catalog(catalog: Vec<RemotePlaylist>) -> (Vec<Playlist>, HashMap<StreamKey, String>) {
    let mut playlists = Vec::new();
    let mut remote_ids = HashMap::new();

    for remote in catalog {
        let playlist_id = PlaylistId(playlists.len());
        let mut tracks = Vec::with_capacity(remote.tracks.len());
        for (idx, t) in remote.tracks.into_iter().enumerate() {
            let track_id = TrackId(idx);
            remote_ids.insert(
                StreamKey {
                    playlist: playlist_id,
                    track: track_id,
                },
                t.id,
            );
            tracks.push(Track::new(track_id, t.name));
        }
        match Playlist::new(playlist_id, remote.name, tracks) {
            Some(pl) => playlists.push(pl),
            None => debug!("streaming: skipping empty playlist {}", remote.id),
        }
    }

    (playlists, remote_ids)
}
