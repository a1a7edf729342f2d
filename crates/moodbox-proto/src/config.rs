use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::platform;
use super::protocol::Command;

/// Overrides the config file location.
pub const CONFIG_ENV: &str = "MOODBOX_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub tts: TtsConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub presence: PresenceConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub services: ServicesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Root of the announcement clip cache.
    #[serde(default = "platform::cache_dir")]
    pub cache_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Level for regular tracks (1.0 = 100% mpv volume).
    #[serde(default = "default_normal_volume")]
    pub normal_volume: f32,
    /// Level for announcement clips; synthesized speech is much quieter
    /// than mastered music.
    #[serde(default = "default_speech_volume")]
    pub speech_volume: f32,
    /// mpv `--audio-device`, e.g. `alsa/bluetooth`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_device: Option<String>,
    /// Pause before skipping a track whose stream could not be resolved.
    #[serde(default = "default_resolve_failure_delay_ms")]
    pub resolve_failure_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    #[serde(default = "default_tts_binary")]
    pub binary: String,
    /// Words per minute (`espeak -s`).
    #[serde(default = "default_tts_speed")]
    pub speed: u32,
    /// `espeak -a`.
    #[serde(default = "default_tts_amplitude")]
    pub amplitude: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// evdev character device of the IR receiver.
    #[serde(default = "default_remote_device")]
    pub device: PathBuf,
    #[serde(default = "default_bindings", rename = "binding")]
    pub bindings: Vec<KeyBinding>,
}

/// Maps one Linux input key code to one controller command.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyBinding {
    pub code: u16,
    pub command: Command,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Bluetooth address of the speaker being watched.
    #[serde(default)]
    pub device_id: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_control_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServicesConfig {
    #[serde(default)]
    pub local: LocalServiceConfig,
    #[serde(default)]
    pub radio: RadioServiceConfig,
    #[serde(default)]
    pub streaming: StreamingServiceConfig,
}

/// Top-level directory whose sub-directories are playlists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalServiceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_music_dir")]
    pub music_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RadioServiceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Local TOML `[[station]]` file (highest priority).
    #[serde(default = "default_stations_toml")]
    pub stations_toml: PathBuf,
    /// URL or file path of an m3u list, used when the TOML file is absent.
    #[serde(default)]
    pub m3u_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingServiceConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Base URL of the catalog API, e.g. `http://127.0.0.1:9090/api`.
    #[serde(default)]
    pub api_base: String,
    /// Two lines: user name, then app password.
    #[serde(default = "default_auth_file")]
    pub auth_file: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            cache_dir: platform::cache_dir(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            normal_volume: default_normal_volume(),
            speech_volume: default_speech_volume(),
            audio_device: None,
            resolve_failure_delay_ms: default_resolve_failure_delay_ms(),
        }
    }
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            binary: default_tts_binary(),
            speed: default_tts_speed(),
            amplitude: default_tts_amplitude(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            device: default_remote_device(),
            bindings: default_bindings(),
        }
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            device_id: String::new(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_bind_address(),
            port: default_control_port(),
        }
    }
}

impl Default for LocalServiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            music_dir: default_music_dir(),
        }
    }
}

impl Default for RadioServiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stations_toml: default_stations_toml(),
            m3u_url: String::new(),
        }
    }
}

impl Default for StreamingServiceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_base: String::new(),
            auth_file: default_auth_file(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_normal_volume() -> f32 {
    0.8
}

fn default_speech_volume() -> f32 {
    1.3
}

fn default_resolve_failure_delay_ms() -> u64 {
    1000
}

fn default_tts_binary() -> String {
    "espeak".to_string()
}

fn default_tts_speed() -> u32 {
    120
}

fn default_tts_amplitude() -> u32 {
    20
}

fn default_remote_device() -> PathBuf {
    PathBuf::from("/dev/input/by-id/usb-20a0_0004-event-kbd")
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_control_port() -> u16 {
    platform::CONTROL_TCP_PORT
}

fn default_music_dir() -> PathBuf {
    dirs::audio_dir().unwrap_or_else(|| {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Music")
    })
}

fn default_stations_toml() -> PathBuf {
    platform::config_dir().join("stations.toml")
}

fn default_auth_file() -> PathBuf {
    platform::config_dir().join("auth.file")
}

/// Linux input key codes (see `linux/input-event-codes.h`).
pub mod keys {
    pub const KEY_UP: u16 = 103;
    pub const KEY_PAGEUP: u16 = 104;
    pub const KEY_LEFT: u16 = 105;
    pub const KEY_RIGHT: u16 = 106;
    pub const KEY_DOWN: u16 = 108;
    pub const KEY_PAGEDOWN: u16 = 109;
    pub const KEY_NEXTSONG: u16 = 163;
    pub const KEY_PLAYPAUSE: u16 = 164;
    pub const KEY_PREVIOUSSONG: u16 = 165;
    pub const KEY_STOPCD: u16 = 166;
}

fn default_bindings() -> Vec<KeyBinding> {
    use keys::*;
    [
        (KEY_UP, Command::PlayPause),
        (KEY_RIGHT, Command::NextTrack),
        (KEY_LEFT, Command::PrevTrack),
        (KEY_PAGEUP, Command::NextPlaylist),
        (KEY_PAGEDOWN, Command::PrevPlaylist),
        (KEY_DOWN, Command::ToggleShuffle),
        (KEY_NEXTSONG, Command::NextService),
        (KEY_PREVIOUSSONG, Command::PrevService),
        (KEY_PLAYPAUSE, Command::PlayPause),
        (KEY_STOPCD, Command::Stop),
    ]
    .into_iter()
    .map(|(code, command)| KeyBinding { code, command })
    .collect()
}

impl Config {
    /// Load from the config path, writing a default file on first run.
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save_to(&config_path)?;
            return Ok(config);
        }

        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        match std::env::var_os(CONFIG_ENV) {
            Some(p) => PathBuf::from(p),
            None => platform::config_dir().join("config.toml"),
        }
    }

    /// Rejects settings that can never work.
    pub fn validate(&self) -> anyhow::Result<()> {
        let audio = &self.audio;
        for (name, v) in [
            ("normal_volume", audio.normal_volume),
            ("speech_volume", audio.speech_volume),
        ] {
            if !(0.0..=2.0).contains(&v) {
                anyhow::bail!("audio.{} must be within 0.0..=2.0, got {}", name, v);
            }
        }
        if self.presence.enabled && self.presence.device_id.trim().is_empty() {
            anyhow::bail!("presence.enabled requires presence.device_id");
        }
        if self.presence.poll_interval_secs == 0 {
            anyhow::bail!("presence.poll_interval_secs must be at least 1");
        }
        let streaming = &self.services.streaming;
        if streaming.enabled && streaming.api_base.trim().is_empty() {
            anyhow::bail!("services.streaming.enabled requires services.streaming.api_base");
        }
        let mut seen = std::collections::HashSet::new();
        for binding in &self.remote.bindings {
            if !seen.insert(binding.code) {
                anyhow::bail!("remote key code {} is bound more than once", binding.code);
            }
        }
        Ok(())
    }

    /// Key code to command lookup for the remote dispatcher.
    pub fn key_bindings(&self) -> HashMap<u16, Command> {
        self.remote
            .bindings
            .iter()
            .map(|b| (b.code, b.command))
            .collect()
    }
}
