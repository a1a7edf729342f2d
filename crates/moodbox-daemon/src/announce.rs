//! Pre-rendered speech clips, one per playlist name plus two global shuffle
//! clips.
//!
//! Layout under the cache root:
//!
//! ```text
//! shuffle-on.wav
//! shuffle-off.wav
//! local/<playlist name>.wav
//! radio/<station name>.wav
//! ```
//!
//! A file's existence is the only cache-hit signal; there is no metadata or
//! invalidation. [`AnnouncementCache::ensure`] synthesizes synchronously and
//! takes no locks, so it must only run during startup, before any input
//! task exists.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use moodbox_proto::config::TtsConfig;
use moodbox_proto::platform;
use tracing::{debug, info};

use crate::error::{PlayerError, Result};

pub const SHUFFLE_ON_TEXT: &str = "Setting shuffle on";
pub const SHUFFLE_OFF_TEXT: &str = "Setting shuffle off";

/// Renders text to an audio file.
pub trait SpeechSynthesizer {
    fn synthesize(&self, text: &str, output: &Path) -> Result<()>;
}

/// `espeak -s <speed> -a <amplitude> -w <file> <text>`
pub struct Espeak {
    binary: PathBuf,
    speed: u32,
    amplitude: u32,
}

impl Espeak {
    pub fn from_config(config: &TtsConfig) -> Result<Self> {
        let binary = platform::find_binary(&config.binary).ok_or_else(|| {
            PlayerError::Configuration(format!("speech binary '{}' not found", config.binary))
        })?;
        Ok(Self {
            binary,
            speed: config.speed,
            amplitude: config.amplitude,
        })
    }
}

impl SpeechSynthesizer for Espeak {
    fn synthesize(&self, text: &str, output: &Path) -> Result<()> {
        let status = std::process::Command::new(&self.binary)
            .arg("-s")
            .arg(self.speed.to_string())
            .arg("-a")
            .arg(self.amplitude.to_string())
            .arg("-w")
            .arg(output)
            .arg(text)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()?;
        if !status.success() {
            return Err(PlayerError::Synthesis(format!(
                "{} exited with {}",
                self.binary.display(),
                status
            )));
        }
        Ok(())
    }
}

pub struct AnnouncementCache<T> {
    root: PathBuf,
    tts: T,
}

/// Paths of the two global shuffle clips.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShuffleClips {
    pub on: PathBuf,
    pub off: PathBuf,
}

impl ShuffleClips {
    pub fn for_state(&self, shuffle_on: bool) -> &Path {
        if shuffle_on {
            &self.on
        } else {
            &self.off
        }
    }
}

impl<T: SpeechSynthesizer> AnnouncementCache<T> {
    pub fn new(root: impl Into<PathBuf>, tts: T) -> Self {
        Self {
            root: root.into(),
            tts,
        }
    }

    /// Clip announcing playlist `name` inside service `namespace`.
    pub fn ensure(&self, namespace: &str, name: &str) -> Result<PathBuf> {
        let path = self
            .root
            .join(sanitize(namespace))
            .join(format!("{}.wav", sanitize(name)));
        self.ensure_at(&path, &format!("Playing: {}.", name))?;
        Ok(path)
    }

    pub fn prime_shuffle_clips(&self) -> Result<ShuffleClips> {
        let clips = ShuffleClips {
            on: self.root.join("shuffle-on.wav"),
            off: self.root.join("shuffle-off.wav"),
        };
        self.ensure_at(&clips.on, SHUFFLE_ON_TEXT)?;
        self.ensure_at(&clips.off, SHUFFLE_OFF_TEXT)?;
        Ok(clips)
    }

    fn ensure_at(&self, path: &Path, text: &str) -> Result<()> {
        if path.exists() {
            debug!("announce: cache hit {}", path.display());
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        info!("announce: synthesizing '{}' → {}", text, path.display());
        self.tts.synthesize(text, path)?;
        if !path.exists() {
            return Err(PlayerError::Synthesis(format!(
                "synthesizer wrote no file at {}",
                path.display()
            )));
        }
        Ok(())
    }
}

/// Keep a name inside its directory: separators, control characters and
/// leading dots are replaced.
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Writes a placeholder file and remembers every request.
    #[derive(Default)]
    pub(crate) struct RecordingTts {
        pub calls: RefCell<Vec<(String, PathBuf)>>,
    }

    impl SpeechSynthesizer for RecordingTts {
        fn synthesize(&self, text: &str, output: &Path) -> Result<()> {
            std::fs::write(output, b"RIFF")?;
            self.calls
                .borrow_mut()
                .push((text.to_string(), output.to_path_buf()));
            Ok(())
        }
    }

    struct BrokenTts;

    impl SpeechSynthesizer for BrokenTts {
        fn synthesize(&self, _text: &str, _output: &Path) -> Result<()> {
            Err(PlayerError::Synthesis("no voice".to_string()))
        }
    }

    #[test]
    fn second_ensure_is_a_cache_hit() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AnnouncementCache::new(dir.path(), RecordingTts::default());

        let first = cache.ensure("local", "Chill").unwrap();
        let second = cache.ensure("local", "Chill").unwrap();
        assert_eq!(first, second);
        assert_eq!(first, dir.path().join("local").join("Chill.wav"));

        let calls = cache.tts.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "Playing: Chill.");
    }

    #[test]
    fn deleted_clip_is_rendered_again() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AnnouncementCache::new(dir.path(), RecordingTts::default());
        let path = cache.ensure("radio", "Radio Rock 1").unwrap();
        std::fs::remove_file(&path).unwrap();
        cache.ensure("radio", "Radio Rock 1").unwrap();
        assert_eq!(cache.tts.calls.borrow().len(), 2);
    }

    #[test]
    fn namespaces_keep_same_names_apart() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AnnouncementCache::new(dir.path(), RecordingTts::default());
        let a = cache.ensure("local", "Jazz").unwrap();
        let b = cache.ensure("radio", "Jazz").unwrap();
        assert_ne!(a, b);
        assert_eq!(cache.tts.calls.borrow().len(), 2);
    }

    #[test]
    fn shuffle_clips_live_outside_namespaces() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AnnouncementCache::new(dir.path(), RecordingTts::default());
        let clips = cache.prime_shuffle_clips().unwrap();
        cache.prime_shuffle_clips().unwrap();

        assert_eq!(clips.for_state(true), dir.path().join("shuffle-on.wav"));
        assert_eq!(clips.for_state(false), dir.path().join("shuffle-off.wav"));
        let texts: Vec<_> = cache.tts.calls.borrow().iter().map(|c| c.0.clone()).collect();
        assert_eq!(texts, vec![SHUFFLE_ON_TEXT, SHUFFLE_OFF_TEXT]);
    }

    #[test]
    fn hostile_names_stay_inside_the_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AnnouncementCache::new(dir.path(), RecordingTts::default());
        let path = cache.ensure("local", "../../etc/passwd").unwrap();
        assert!(path.starts_with(dir.path().join("local")));
        assert_eq!(path.file_name().unwrap(), "_.._etc_passwd.wav");
    }

    #[test]
    fn synthesis_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let cache = AnnouncementCache::new(dir.path(), BrokenTts);
        assert!(matches!(
            cache.ensure("local", "x"),
            Err(PlayerError::Synthesis(_))
        ));
    }
}
