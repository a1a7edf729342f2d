//! Remote-control input: key events in, controller commands out.
//!
//! A command fires on key release, and only for a key whose press was seen,
//! so press-hold-release is exactly one command however long it is held.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use async_trait::async_trait;
use moodbox_proto::protocol::Command;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::core::DaemonEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemotePhase {
    Down,
    Repeat,
    Up,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteEvent {
    pub code: u16,
    pub phase: RemotePhase,
}

#[async_trait]
pub trait RemoteSource: Send {
    /// `None` once the device is gone.
    async fn next_event(&mut self) -> Option<RemoteEvent>;
}

// ── evdev ─────────────────────────────────────────────────────────────────────

/// `struct input_event` on 64-bit Linux: two `i64` time fields, then
/// `u16 type`, `u16 code`, `i32 value`.
const INPUT_EVENT_SIZE: usize = 24;
const EV_KEY: u16 = 1;

pub fn decode_input_event(raw: &[u8; INPUT_EVENT_SIZE]) -> Option<RemoteEvent> {
    let kind = u16::from_ne_bytes([raw[16], raw[17]]);
    let code = u16::from_ne_bytes([raw[18], raw[19]]);
    let value = i32::from_ne_bytes([raw[20], raw[21], raw[22], raw[23]]);
    if kind != EV_KEY {
        return None;
    }
    let phase = match value {
        0 => RemotePhase::Up,
        1 => RemotePhase::Down,
        2 => RemotePhase::Repeat,
        _ => return None,
    };
    Some(RemoteEvent { code, phase })
}

/// Reads key events straight from a `/dev/input/event*` character device.
pub struct EvdevRemote {
    device: tokio::fs::File,
}

impl EvdevRemote {
    pub async fn open(path: &Path) -> std::io::Result<Self> {
        let device = tokio::fs::File::open(path).await?;
        info!("remote: reading {}", path.display());
        Ok(Self { device })
    }
}

#[async_trait]
impl RemoteSource for EvdevRemote {
    async fn next_event(&mut self) -> Option<RemoteEvent> {
        let mut buf = [0u8; INPUT_EVENT_SIZE];
        loop {
            if let Err(e) = self.device.read_exact(&mut buf).await {
                warn!("remote: read failed: {}", e);
                return None;
            }
            // SYN, MSC and friends are interleaved with key events.
            if let Some(event) = decode_input_event(&buf) {
                return Some(event);
            }
        }
    }
}

// ── dispatcher ────────────────────────────────────────────────────────────────

pub struct InputDispatcher<R> {
    source: R,
    bindings: HashMap<u16, Command>,
    held: HashSet<u16>,
    event_tx: mpsc::Sender<DaemonEvent>,
}

impl<R: RemoteSource> InputDispatcher<R> {
    pub fn new(
        source: R,
        bindings: HashMap<u16, Command>,
        event_tx: mpsc::Sender<DaemonEvent>,
    ) -> Self {
        Self {
            source,
            bindings,
            held: HashSet::new(),
            event_tx,
        }
    }

    /// Runs until the source ends (an error) or the controller is gone.
    pub async fn run(mut self) -> anyhow::Result<()> {
        while let Some(event) = self.source.next_event().await {
            let Some(cmd) = self.decode(event) else {
                continue;
            };
            debug!("remote: key {} → {}", event.code, cmd);
            match self.event_tx.try_send(DaemonEvent::Command(cmd)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => warn!("remote: controller busy, dropping {}", cmd),
                Err(TrySendError::Closed(_)) => return Ok(()),
            }
        }
        anyhow::bail!("remote event stream ended")
    }

    fn decode(&mut self, event: RemoteEvent) -> Option<Command> {
        match event.phase {
            RemotePhase::Down => {
                self.held.insert(event.code);
                None
            }
            RemotePhase::Repeat => None,
            RemotePhase::Up => {
                if !self.held.remove(&event.code) {
                    return None;
                }
                self.bindings.get(&event.code).copied()
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use moodbox_proto::config::{keys, Config};
    use std::collections::VecDeque;

    /// Replays a fixed list of events, then ends.
    pub(crate) struct ScriptedRemote(pub VecDeque<RemoteEvent>);

    #[async_trait]
    impl RemoteSource for ScriptedRemote {
        async fn next_event(&mut self) -> Option<RemoteEvent> {
            self.0.pop_front()
        }
    }

    fn ev(code: u16, phase: RemotePhase) -> RemoteEvent {
        RemoteEvent { code, phase }
    }

    fn bindings() -> HashMap<u16, Command> {
        Config::default().key_bindings()
    }

    async fn dispatch(events: Vec<RemoteEvent>) -> (anyhow::Result<()>, Vec<Command>) {
        let (tx, mut rx) = mpsc::channel(16);
        let dispatcher = InputDispatcher::new(ScriptedRemote(events.into()), bindings(), tx);
        let result = dispatcher.run().await;
        let mut commands = Vec::new();
        while let Ok(evt) = rx.try_recv() {
            if let DaemonEvent::Command(cmd) = evt {
                commands.push(cmd);
            }
        }
        (result, commands)
    }

    #[tokio::test]
    async fn press_hold_release_is_one_command() {
        let (result, commands) = dispatch(vec![
            ev(keys::KEY_RIGHT, RemotePhase::Down),
            ev(keys::KEY_RIGHT, RemotePhase::Repeat),
            ev(keys::KEY_RIGHT, RemotePhase::Repeat),
            ev(keys::KEY_RIGHT, RemotePhase::Up),
            ev(keys::KEY_PAGEUP, RemotePhase::Down),
            ev(keys::KEY_PAGEUP, RemotePhase::Up),
        ])
        .await;
        assert!(result.is_err(), "end of stream is an error");
        assert_eq!(commands, vec![Command::NextTrack, Command::NextPlaylist]);
    }

    #[tokio::test]
    async fn stray_release_and_unmapped_keys_are_ignored() {
        let (_, commands) = dispatch(vec![
            ev(keys::KEY_UP, RemotePhase::Up),
            ev(30, RemotePhase::Down),
            ev(30, RemotePhase::Up),
            ev(keys::KEY_DOWN, RemotePhase::Down),
            ev(keys::KEY_DOWN, RemotePhase::Up),
            ev(keys::KEY_DOWN, RemotePhase::Up),
        ])
        .await;
        assert_eq!(commands, vec![Command::ToggleShuffle]);
    }

    #[tokio::test]
    async fn full_channel_drops_instead_of_blocking() {
        let (tx, mut rx) = mpsc::channel(1);
        let events = vec![
            ev(keys::KEY_LEFT, RemotePhase::Down),
            ev(keys::KEY_LEFT, RemotePhase::Up),
            ev(keys::KEY_RIGHT, RemotePhase::Down),
            ev(keys::KEY_RIGHT, RemotePhase::Up),
        ];
        let dispatcher = InputDispatcher::new(ScriptedRemote(events.into()), bindings(), tx);
        assert!(dispatcher.run().await.is_err());
        assert!(matches!(
            rx.try_recv(),
            Ok(DaemonEvent::Command(Command::PrevTrack))
        ));
        assert!(rx.try_recv().is_err());
    }

    fn raw(kind: u16, code: u16, value: i32) -> [u8; INPUT_EVENT_SIZE] {
        let mut buf = [0u8; INPUT_EVENT_SIZE];
        buf[..8].copy_from_slice(&1_700_000_000i64.to_ne_bytes());
        buf[8..16].copy_from_slice(&250_000i64.to_ne_bytes());
        buf[16..18].copy_from_slice(&kind.to_ne_bytes());
        buf[18..20].copy_from_slice(&code.to_ne_bytes());
        buf[20..24].copy_from_slice(&value.to_ne_bytes());
        buf
    }

    #[test]
    fn decodes_key_records() {
        assert_eq!(
            decode_input_event(&raw(EV_KEY, keys::KEY_UP, 1)),
            Some(ev(keys::KEY_UP, RemotePhase::Down))
        );
        assert_eq!(
            decode_input_event(&raw(EV_KEY, keys::KEY_UP, 2)),
            Some(ev(keys::KEY_UP, RemotePhase::Repeat))
        );
        assert_eq!(
            decode_input_event(&raw(EV_KEY, keys::KEY_UP, 0)),
            Some(ev(keys::KEY_UP, RemotePhase::Up))
        );
    }

    #[test]
    fn non_key_records_are_skipped() {
        // EV_SYN / EV_MSC
        assert_eq!(decode_input_event(&raw(0, 0, 0)), None);
        assert_eq!(decode_input_event(&raw(4, 4, 458_834)), None);
    }

    #[tokio::test]
    async fn evdev_remote_reads_records_from_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("event0");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&raw(4, 4, 458_834));
        bytes.extend_from_slice(&raw(EV_KEY, keys::KEY_STOPCD, 1));
        bytes.extend_from_slice(&raw(0, 0, 0));
        std::fs::write(&path, bytes).unwrap();

        let mut remote = EvdevRemote::open(&path).await.unwrap();
        assert_eq!(
            remote.next_event().await,
            Some(ev(keys::KEY_STOPCD, RemotePhase::Down))
        );
        assert_eq!(remote.next_event().await, None);
    }
}
