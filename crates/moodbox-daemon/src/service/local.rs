use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::require_content;
use crate::error::{PlayerError, Result};
use crate::playlist::Playlist;
use crate::sink::file_uri;
use crate::track::{PlaylistId, StreamKey, Track, TrackId};

/// Extensions mpv is known to handle on the device.
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "ogg", "flac", "wav", "m4a", "opus"];

/// Music stored on disk:
///
/// ```text
/// music_dir/
/// ├── Playlist 0/
/// │   ├── Song 0.mp3
/// │   └── Song 1.ogg
/// └── Playlist 1/
///     └── Song 0.mp3
/// ```
///
/// Directories and files are taken in name order so ids are stable across
/// restarts. Directories without any audio file are skipped.
#[derive(Debug)]
pub struct LocalService {
    playlists: Vec<Playlist>,
    files: HashMap<StreamKey, PathBuf>,
}

impl LocalService {
    pub fn scan(music_dir: &Path) -> Result<Self> {
        let root = std::fs::canonicalize(music_dir)?;
        let mut playlists = Vec::new();
        let mut files = HashMap::new();

        for dir in sorted_entries(&root)? {
            if !dir.is_dir() {
                continue;
            }
            let playlist_id = PlaylistId(playlists.len());
            let mut tracks = Vec::new();

            for file in sorted_entries(&dir)? {
                if !file.is_file() || !is_audio_file(&file) {
                    continue;
                }
                let track_id = TrackId(tracks.len());
                tracks.push(Track::new(track_id, file_name(&file)));
                files.insert(
                    StreamKey {
                        playlist: playlist_id,
                        track: track_id,
                    },
                    file,
                );
            }

            let name = file_name(&dir);
            match Playlist::new(playlist_id, name.clone(), tracks) {
                Some(pl) => {
                    debug!("local: playlist '{}' with {} tracks", name, pl.len());
                    playlists.push(pl);
                }
                None => warn!("local: skipping '{}', no audio files", dir.display()),
            }
        }

        Ok(Self {
            playlists: require_content("Local Service", playlists)?,
            files,
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
        let path = self
            .files
            .get(&key)
            .ok_or_else(|| PlayerError::Resolve(format!("no local file for {:?}", key)))?;
        // The card may have been edited while we run.
        if !path.is_file() {
            return Err(PlayerError::Resolve(format!(
                "{} no longer exists",
                path.display()
            )));
        }
        file_uri(path)
    }
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| !file_name(p).starts_with('.'))
        .collect::<Vec<_>>();
    entries.sort();
    Ok(entries)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| AUDIO_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
