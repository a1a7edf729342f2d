//! Radio station lists: TOML `[[station]]` files and m3u playlists.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Station {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

pub fn parse_m3u_from_str(content: &str) -> Vec<Station> {
    let mut stations = Vec::new();
    let mut pending_name: Option<String> = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(rest) = line.strip_prefix("#EXTINF:") {
            if let Some(comma_idx) = rest.find(',') {
                pending_name = Some(rest[comma_idx + 1..].trim().to_string());
            }
            continue;
        }

        if line.starts_with('#') {
            continue;
        }

        let url = line.to_string();
        let name = pending_name.take().unwrap_or_else(|| url.clone());
        stations.push(Station {
            name,
            url,
            ..Station::default()
        });
    }

    stations
}

pub fn load_stations_from_m3u(path: &Path) -> anyhow::Result<Vec<Station>> {
    let content = std::fs::read_to_string(path)?;
    Ok(parse_m3u_from_str(&content))
}

#[derive(Debug, Serialize, Deserialize)]
struct TomlStationFile {
    #[serde(default)]
    station: Vec<Station>,
}

pub fn parse_stations_from_toml_str(content: &str) -> anyhow::Result<Vec<Station>> {
    let file: TomlStationFile = toml::from_str(content)?;
    Ok(file.station)
}

pub fn load_stations_from_toml(path: &Path) -> anyhow::Result<Vec<Station>> {
    let content = std::fs::read_to_string(path)?;
    parse_stations_from_toml_str(&content)
}

/// Write `stations` as a `[[station]]` file, creating parent directories.
pub fn save_stations_to_toml(path: &Path, stations: &[Station]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = TomlStationFile {
        station: stations.to_vec(),
    };
    std::fs::write(path, toml::to_string_pretty(&file)?)?;
    Ok(())
}

/// Built-in station table, written out when no station source is configured.
pub fn default_stations() -> Vec<Station> {
    [
        ("Ambient noise test", "http://radio.hbr1.com:19800/ambient.ogg"),
        ("Russian Revolution Radio", "http://revolutionradio.ru/live.ogg"),
        ("Radio Rock 1", "http://stream.radioreklama.bg:80/radio1rock.ogg"),
        ("WPCE The Classical Station", "http://audio-ogg.ibiblio.org:8000/wpce.ogg"),
        (
            "UK Absolute Classic Rock",
            "http://icecast.timlradio.co.uk:80/absoluteradio.co.uk/acflac.ogg",
        ),
        (
            "UK Sixties Radio",
            "http://icecast.timlradio.co.uk:80/absoluteradio.co.uk/a6flac.ogg",
        ),
        (
            "UK Seventies Radio",
            "http://icecast.timlradio.co.uk:80/absoluteradio.co.uk/a7flac.ogg",
        ),
        (
            "UK Eighties Radio",
            "http://icecast.timlradio.co.uk:80/absoluteradio.co.uk/a8flac.ogg",
        ),
        ("Hungarian Jazz Radio", "http://194.38.105.41:8000/jazzradio_192.ogg"),
    ]
    .into_iter()
    .map(|(name, url)| Station {
        name: name.to_string(),
        url: url.to_string(),
        ..Station::default()
    })
    .collect()
}

/// Drop entries without a URL and later duplicates of a name (each
/// station's announcement clip is cached under its name).
pub fn dedup_stations(stations: Vec<Station>) -> Vec<Station> {
    let mut seen = std::collections::HashSet::new();
    stations
        .into_iter()
        .filter(|s| !s.url.trim().is_empty())
        .filter(|s| seen.insert(s.name.clone()))
        .collect()
}
