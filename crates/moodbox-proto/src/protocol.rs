use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Bump when the control-socket wire format changes incompatibly.
pub const PROTOCOL_VERSION: u32 = 1;

/// Discrete controller command. The same values come from the remote
/// control, the control socket and `moodctl`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Play,
    Pause,
    PlayPause,
    NextTrack,
    PrevTrack,
    NextPlaylist,
    PrevPlaylist,
    ToggleShuffle,
    NextService,
    PrevService,
    Stop,
}

impl Command {
    pub const ALL: [Command; 11] = [
        Command::Play,
        Command::Pause,
        Command::PlayPause,
        Command::NextTrack,
        Command::PrevTrack,
        Command::NextPlaylist,
        Command::PrevPlaylist,
        Command::ToggleShuffle,
        Command::NextService,
        Command::PrevService,
        Command::Stop,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Play => "play",
            Command::Pause => "pause",
            Command::PlayPause => "play_pause",
            Command::NextTrack => "next_track",
            Command::PrevTrack => "prev_track",
            Command::NextPlaylist => "next_playlist",
            Command::PrevPlaylist => "prev_playlist",
            Command::ToggleShuffle => "toggle_shuffle",
            Command::NextService => "next_service",
            Command::PrevService => "prev_service",
            Command::Stop => "stop",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = anyhow::Error;

    /// Accepts `next_track`, `next-track` and any letter case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('-', "_");
        Command::ALL
            .into_iter()
            .find(|c| c.as_str() == wanted)
            .ok_or_else(|| anyhow::anyhow!("unknown command '{}'", s))
    }
}

/// Controller state machine states.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Idle,
    PlayingTrack,
    PlayingAnnouncement,
    Paused,
}

/// Which announcement is in flight, i.e. what to do when the clip ends.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum PendingAnnouncement {
    #[default]
    None,
    /// Playlist name read-out after switching playlists.
    Identity,
    /// "Setting shuffle on/off" after a shuffle toggle.
    ShuffleToggle,
}

/// Read-only view of the controller, published after every transition.
/// `rev` increases monotonically so clients can spot missed updates.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ControllerSnapshot {
    #[serde(default)]
    pub rev: u64,
    pub state: PlaybackState,
    pub pending: PendingAnnouncement,
    /// Names of the services in ring order.
    pub services: Vec<String>,
    pub service: Option<String>,
    pub playlist: Option<String>,
    pub track: Option<String>,
    pub shuffle: bool,
}

/// Daemon → client frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// First frame on every connection.
    Hello {
        protocol_version: u32,
        snapshot: ControllerSnapshot,
    },
    State {
        snapshot: ControllerSnapshot,
    },
    Log {
        message: String,
    },
}

/// One frame on the control socket: `u32` big-endian length, then JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

/// Largest frame body either side accepts.
pub const MAX_FRAME_LEN: usize = 64 * 1024;

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = u32::try_from(json.len())?;
        let mut out = Vec::with_capacity(4 + json.len());
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(&json);
        Ok(out)
    }

    /// Body length announced by the header at the front of `data`, once all
    /// four header bytes are there.
    pub fn frame_body_len(data: &[u8]) -> Option<usize> {
        let header: [u8; 4] = data.get(..4)?.try_into().ok()?;
        Some(u32::from_be_bytes(header) as usize)
    }

    /// Decode one frame from the front of `data`. Returns the message and the
    /// number of bytes consumed; errors when the frame is incomplete.
    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        let Some(len) = Self::frame_body_len(data) else {
            anyhow::bail!("Insufficient data for length header");
        };
        if data.len() < 4 + len {
            anyhow::bail!("Insufficient data for message");
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((msg, 4 + len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_frame_decodes_back_to_command() {
        let encoded = Message::Command(Command::NextPlaylist).encode().unwrap();
        let (decoded, len) = Message::decode(&encoded).unwrap();
        assert_eq!(len, encoded.len());
        match decoded {
            Message::Command(cmd) => assert_eq!(cmd, Command::NextPlaylist),
            other => panic!("wrong message type: {:?}", other),
        }
    }

    #[test]
    fn broadcast_is_not_mistaken_for_command() {
        let snapshot = ControllerSnapshot {
            rev: 7,
            state: PlaybackState::PlayingAnnouncement,
            pending: PendingAnnouncement::Identity,
            ..Default::default()
        };
        let encoded = Message::Broadcast(Broadcast::State { snapshot }).encode().unwrap();
        match Message::decode(&encoded).unwrap().0 {
            Message::Broadcast(Broadcast::State { snapshot }) => {
                assert_eq!(snapshot.rev, 7);
                assert_eq!(snapshot.pending, PendingAnnouncement::Identity);
            }
            other => panic!("wrong message type: {:?}", other),
        }
    }

    #[test]
    fn partial_frame_is_rejected() {
        let encoded = Message::Command(Command::Stop).encode().unwrap();
        assert!(Message::decode(&encoded[..encoded.len() - 1]).is_err());
        assert!(Message::decode(&encoded[..2]).is_err());
    }

    #[test]
    fn command_names_parse_loosely() {
        assert_eq!("next-track".parse::<Command>().unwrap(), Command::NextTrack);
        assert_eq!("TOGGLE_SHUFFLE".parse::<Command>().unwrap(), Command::ToggleShuffle);
        assert!("rewind".parse::<Command>().is_err());
        for cmd in Command::ALL {
            assert_eq!(cmd.to_string().parse::<Command>().unwrap(), cmd);
        }
    }
}
