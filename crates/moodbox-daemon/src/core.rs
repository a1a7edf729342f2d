/// PlaybackController: single-owner event loop for all playback state.
///
/// Commands (remote, control socket) and sink lifecycle events arrive on one
/// mpsc channel as `DaemonEvent`s. The controller owns the services, their
/// playlists and the `AudioSink`; no other task touches them. Each event's
/// transition completes before the next one is received.
///
/// After each transition the controller publishes a `ControllerSnapshot` to
/// the `StateManager` and broadcasts `BroadcastMessage::StateUpdated`.
///
/// Commands preempt announcements: a navigation command during an
/// announcement stops the clip and replaces the pending outcome with its own.
use std::path::Path;
use std::sync::Arc;

use moodbox_proto::config::AudioConfig;
use moodbox_proto::protocol::{Command, ControllerSnapshot, PendingAnnouncement, PlaybackState};
use moodbox_proto::state::StateManager;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

use crate::announce::ShuffleClips;
use crate::error::{PlayerError, Result};
use crate::playlist::{Direction, Playlist};
use crate::service::MusicService;
use crate::sink::{file_uri, AudioSink, SinkEvent, SinkNotice, SinkState};
use crate::BroadcastMessage;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

// ── DaemonEvent ───────────────────────────────────────────────────────────────

/// All inputs into the controller loop.
#[derive(Debug)]
pub enum DaemonEvent {
    /// A command from the remote or the control socket.
    Command(Command),
    /// An item finished. `epoch` names the item the event belongs to and
    /// must match the controller's current one.
    SinkFinished { event: SinkEvent, epoch: u64 },
    /// Periodic sink liveness check.
    HeartbeatTick,
    Shutdown,
}

impl From<SinkNotice> for DaemonEvent {
    fn from(notice: SinkNotice) -> Self {
        DaemonEvent::SinkFinished {
            event: notice.event,
            epoch: notice.item,
        }
    }
}

// ── PlaybackController ────────────────────────────────────────────────────────

pub struct PlaybackController<S> {
    sink: S,
    /// Service ring, never empty.
    services: Vec<MusicService>,
    current_service: usize,
    /// Selected playlist per service; survives service switches.
    selected: Vec<usize>,
    state: PlaybackState,
    pending: PendingAnnouncement,
    shuffle_clips: Option<ShuffleClips>,
    normal_volume: f32,
    speech_volume: f32,
    resolve_failure_delay: Duration,
    /// Bumped whenever a new item is handed to the sink.
    epoch: u64,
    /// Own channel, used for heartbeat and scheduled skips.
    event_tx: mpsc::Sender<DaemonEvent>,
    state_manager: Arc<StateManager>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
}

impl<S: AudioSink> PlaybackController<S> {
    pub fn new(
        sink: S,
        services: Vec<MusicService>,
        shuffle_clips: Option<ShuffleClips>,
        audio: &AudioConfig,
        event_tx: mpsc::Sender<DaemonEvent>,
        state_manager: Arc<StateManager>,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
    ) -> Result<Self> {
        if services.is_empty() {
            return Err(PlayerError::NoService);
        }
        let selected = vec![0; services.len()];
        Ok(Self {
            sink,
            services,
            current_service: 0,
            selected,
            state: PlaybackState::Idle,
            pending: PendingAnnouncement::None,
            shuffle_clips,
            normal_volume: audio.normal_volume,
            speech_volume: audio.speech_volume,
            resolve_failure_delay: Duration::from_millis(audio.resolve_failure_delay_ms),
            epoch: 0,
            event_tx,
            state_manager,
            broadcast_tx,
        })
    }

    /// Run the event loop. Returns on `Shutdown` or when every sender is gone.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<DaemonEvent>) -> anyhow::Result<()> {
        info!(
            "PlaybackController: starting with {} service(s)",
            self.services.len()
        );
        self.publish().await;

        let heartbeat_tx = self.event_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(HEARTBEAT_INTERVAL).await;
                if heartbeat_tx.send(DaemonEvent::HeartbeatTick).await.is_err() {
                    break;
                }
            }
        });

        while let Some(evt) = event_rx.recv().await {
            if !self.handle_event(evt).await {
                break;
            }
        }
        info!("PlaybackController: stopping sink");
        self.sink.shutdown().await;
        Ok(())
    }

    /// Apply one event. Returns false when the loop should end.
    async fn handle_event(&mut self, evt: DaemonEvent) -> bool {
        let result = match evt {
            DaemonEvent::Shutdown => {
                info!("PlaybackController: shutdown requested");
                return false;
            }
            DaemonEvent::Command(cmd) => {
                info!("PlaybackController: command {} in {:?}", cmd, self.state);
                self.handle_command(cmd).await
            }
            DaemonEvent::SinkFinished { event, epoch } => {
                if epoch != self.epoch {
                    debug!(
                        "PlaybackController: dropping {:?} for item {} (current {})",
                        event, epoch, self.epoch
                    );
                    return true;
                }
                self.on_sink_finished(event).await
            }
            DaemonEvent::HeartbeatTick => {
                self.heartbeat().await;
                return true;
            }
        };
        if let Err(e) = result {
            error!("PlaybackController: {}", e);
        }
        self.publish().await;
        true
    }

    async fn handle_command(&mut self, cmd: Command) -> Result<()> {
        match cmd {
            Command::Play => match self.state {
                PlaybackState::Idle => self.start_track().await,
                PlaybackState::Paused => self.resume().await,
                _ => Ok(()),
            },
            Command::Pause => self.pause().await,
            Command::PlayPause => match self.state {
                PlaybackState::Idle => self.start_track().await,
                PlaybackState::Paused => self.resume().await,
                PlaybackState::PlayingTrack | PlaybackState::PlayingAnnouncement => {
                    self.pause().await
                }
            },
            Command::NextTrack => self.step_track(Direction::Next).await,
            Command::PrevTrack => self.step_track(Direction::Prev).await,
            Command::NextPlaylist => self.step_playlist(Direction::Next).await,
            Command::PrevPlaylist => self.step_playlist(Direction::Prev).await,
            Command::ToggleShuffle => self.toggle_shuffle().await,
            Command::NextService => self.step_service(Direction::Next).await,
            Command::PrevService => self.step_service(Direction::Prev).await,
            Command::Stop => {
                self.stop_sink().await;
                self.pending = PendingAnnouncement::None;
                self.state = PlaybackState::Idle;
                Ok(())
            }
        }
    }

    async fn on_sink_finished(&mut self, event: SinkEvent) -> Result<()> {
        if let SinkEvent::Error(reason) = &event {
            warn!("PlaybackController: playback error: {}", reason);
        }
        match self.state {
            PlaybackState::PlayingAnnouncement => {
                debug!("announcement {:?} finished", self.pending);
                self.pending = PendingAnnouncement::None;
                self.start_track().await
            }
            PlaybackState::PlayingTrack => {
                self.playlist_mut().advance(Direction::Next);
                self.start_track().await
            }
            PlaybackState::Idle | PlaybackState::Paused => {
                debug!("stale sink event in {:?}, ignored", self.state);
                Ok(())
            }
        }
    }

    async fn heartbeat(&mut self) {
        let playing = matches!(
            self.state,
            PlaybackState::PlayingTrack | PlaybackState::PlayingAnnouncement
        );
        if !self.sink.is_alive() {
            warn!("PlaybackController: heartbeat: sink process died");
            if playing {
                if let Err(e) = self.start_track().await {
                    error!("PlaybackController: restart after sink death: {}", e);
                }
                self.publish().await;
            }
            return;
        }
        if self.state == PlaybackState::PlayingTrack {
            match self.sink.current_state().await {
                Ok(SinkState::Idle) => {
                    warn!("PlaybackController: heartbeat: sink idle while a track should play")
                }
                Ok(_) => {}
                Err(e) => debug!("PlaybackController: heartbeat query failed: {}", e),
            }
        }
    }

    // ── transitions ───────────────────────────────────────────────────────────

    async fn step_track(&mut self, direction: Direction) -> Result<()> {
        self.stop_sink().await;
        self.pending = PendingAnnouncement::None;
        self.playlist_mut().advance(direction);
        self.start_track().await
    }

    async fn step_playlist(&mut self, direction: Direction) -> Result<()> {
        self.stop_sink().await;
        let count = self.service().playlists().len();
        let idx = &mut self.selected[self.current_service];
        *idx = ring_step(*idx, count, direction);
        info!("Playlist: {}", self.playlist().name());

        let clip = self.playlist().announcement().map(Path::to_path_buf);
        match clip {
            Some(clip) => {
                self.pending = PendingAnnouncement::Identity;
                self.announce(&clip).await
            }
            None => {
                debug!("no announcement clip for '{}'", self.playlist().name());
                self.start_track().await
            }
        }
    }

    /// The new flag is the inverse of the current playlist's flag and is
    /// applied to every playlist of the current service.
    async fn toggle_shuffle(&mut self) -> Result<()> {
        self.stop_sink().await;
        let on = !self.playlist().is_shuffled();
        for playlist in self.services[self.current_service].playlists_mut() {
            playlist.set_shuffle(on);
        }
        info!("Shuffle: {}", if on { "on" } else { "off" });

        let clip = self
            .shuffle_clips
            .as_ref()
            .map(|c| c.for_state(on).to_path_buf());
        match clip {
            Some(clip) => {
                self.pending = PendingAnnouncement::ShuffleToggle;
                self.announce(&clip).await
            }
            None => self.start_track().await,
        }
    }

    async fn step_service(&mut self, direction: Direction) -> Result<()> {
        self.stop_sink().await;
        self.pending = PendingAnnouncement::None;
        self.current_service = ring_step(self.current_service, self.services.len(), direction);
        info!("Service: {}", self.service().name());
        self.start_track().await
    }

    async fn pause(&mut self) -> Result<()> {
        if matches!(
            self.state,
            PlaybackState::PlayingTrack | PlaybackState::PlayingAnnouncement
        ) {
            self.sink.pause().await?;
            self.state = PlaybackState::Paused;
        }
        Ok(())
    }

    /// A pending announcement means the paused item is a clip.
    async fn resume(&mut self) -> Result<()> {
        let (volume, state) = match self.pending {
            PendingAnnouncement::None => (self.normal_volume, PlaybackState::PlayingTrack),
            _ => (self.speech_volume, PlaybackState::PlayingAnnouncement),
        };
        self.sink.set_volume(volume).await?;
        self.sink.play().await?;
        self.state = state;
        Ok(())
    }

    async fn announce(&mut self, clip: &Path) -> Result<()> {
        self.epoch += 1;
        self.state = PlaybackState::PlayingAnnouncement;
        match file_uri(clip) {
            Ok(uri) => self.hand_over(&uri, self.speech_volume).await,
            Err(e) => {
                warn!("Cannot play announcement: {}; skipping", e);
                self.schedule_skip("announcement has no URI");
            }
        }
        Ok(())
    }

    /// Resolve and play the current track of the current playlist. A track
    /// that cannot be resolved is skipped after a delay.
    async fn start_track(&mut self) -> Result<()> {
        self.epoch += 1;
        self.state = PlaybackState::PlayingTrack;
        self.pending = PendingAnnouncement::None;

        let playlist = self.playlist();
        let (playlist_id, track) = (playlist.id(), playlist.current().clone());
        let resolved = self.service().resolve_stream(playlist_id, &track).await;
        match resolved {
            Ok(uri) => {
                info!("Playing: {} / {}", self.playlist().name(), track.name());
                self.hand_over(&uri, self.normal_volume).await;
            }
            Err(e) => {
                warn!("Cannot resolve {}: {}; skipping", track, e);
                self.schedule_skip("stream could not be resolved");
            }
        }
        Ok(())
    }

    /// Give the current item to the sink. A sink that refuses it is treated
    /// like one that finished it: the item is skipped after a delay.
    async fn hand_over(&mut self, uri: &str, volume: f32) {
        if let Err(e) = self.load(uri, volume).await {
            error!("PlaybackController: sink refused {}: {}", uri, e);
            self.schedule_skip("sink refused the item");
        }
    }

    async fn load(&mut self, uri: &str, volume: f32) -> Result<()> {
        self.sink.set_uri(uri, self.epoch).await?;
        self.sink.set_volume(volume).await?;
        self.sink.play().await
    }

    /// A failed stop leaves nothing worth waiting for; carry on.
    async fn stop_sink(&mut self) {
        if let Err(e) = self.sink.stop().await {
            warn!("PlaybackController: stop failed: {}", e);
        }
    }

    fn schedule_skip(&self, reason: &str) {
        let tx = self.event_tx.clone();
        let delay = self.resolve_failure_delay;
        let epoch = self.epoch;
        let reason = reason.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx
                .send(DaemonEvent::SinkFinished {
                    event: SinkEvent::Error(reason),
                    epoch,
                })
                .await;
        });
    }

    // ── accessors ─────────────────────────────────────────────────────────────

    fn service(&self) -> &MusicService {
        &self.services[self.current_service]
    }

    fn playlist(&self) -> &Playlist {
        &self.service().playlists()[self.selected[self.current_service]]
    }

    fn playlist_mut(&mut self) -> &mut Playlist {
        let idx = self.selected[self.current_service];
        &mut self.services[self.current_service].playlists_mut()[idx]
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        let playlist = self.playlist();
        ControllerSnapshot {
            rev: 0,
            state: self.state,
            pending: self.pending,
            services: self.services.iter().map(|s| s.name().to_string()).collect(),
            service: Some(self.service().name().to_string()),
            playlist: Some(playlist.name().to_string()),
            track: Some(playlist.current().name().to_string()),
            shuffle: playlist.is_shuffled(),
        }
    }

    async fn publish(&self) {
        let rev = self.state_manager.publish(self.snapshot()).await;
        debug!("PlaybackController: published rev {}", rev);
        let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
    }
}

fn ring_step(idx: usize, len: usize, direction: Direction) -> usize {
    match direction {
        Direction::Next => (idx + 1) % len,
        Direction::Prev => (idx + len - 1) % len,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::{LocalService, RadioService};
    use crate::sink::tests::{RecordingSink, SinkCall};
    use moodbox_proto::stations::Station;
    use std::path::PathBuf;

    const NORMAL: f32 = 0.8;
    const SPEECH: f32 = 1.3;

    struct Harness {
        controller: PlaybackController<RecordingSink>,
        event_rx: mpsc::Receiver<DaemonEvent>,
        music: tempfile::TempDir,
    }

    /// Three local playlists: "a" with two tracks, "b" and "c" with one.
    /// Every playlist gets a clip at `/clips/<name>.wav`.
    fn local_tree() -> (tempfile::TempDir, LocalService) {
        let dir = tempfile::tempdir().unwrap();
        for (playlist, tracks) in [
            ("a", &["0.mp3", "1.mp3"][..]),
            ("b", &["0.ogg"][..]),
            ("c", &["0.flac"][..]),
        ]
        {
            let pl = dir.path().join(playlist);
            std::fs::create_dir(&pl).unwrap();
            for t in tracks {
                std::fs::write(pl.join(t), b"x").unwrap();
            }
        }
        let mut local = LocalService::scan(dir.path()).unwrap();
        for pl in local.playlists_mut() {
            let clip = PathBuf::from(format!("/clips/{}.wav", pl.name()));
            pl.set_announcement(clip);
        }
        (dir, local)
    }

    fn radio() -> RadioService {
        RadioService::from_stations(vec![
            Station {
                name: "One".to_string(),
                url: "http://radio.example/one".to_string(),
                ..Station::default()
            },
            Station {
                name: "Two".to_string(),
                url: "http://radio.example/two".to_string(),
                ..Station::default()
            },
        ])
        .unwrap()
    }

    fn harness(with_radio: bool, clips: bool) -> Harness {
        let (music, local) = local_tree();
        let mut services = vec![MusicService::Local(local)];
        if with_radio {
            services.push(MusicService::Radio(radio()));
        }
        let shuffle_clips = clips.then(|| ShuffleClips {
            on: PathBuf::from("/clips/shuffle-on.wav"),
            off: PathBuf::from("/clips/shuffle-off.wav"),
        });
        let audio = AudioConfig {
            normal_volume: NORMAL,
            speech_volume: SPEECH,
            resolve_failure_delay_ms: 10,
            ..AudioConfig::default()
        };
        let (event_tx, event_rx) = mpsc::channel(16);
        let (broadcast_tx, _) = broadcast::channel(16);
        let controller = PlaybackController::new(
            RecordingSink::default(),
            services,
            shuffle_clips,
            &audio,
            event_tx,
            Arc::new(StateManager::new()),
            broadcast_tx,
        )
        .unwrap();
        Harness {
            controller,
            event_rx,
            music,
        }
    }

    impl Harness {
        async fn command(&mut self, cmd: Command) {
            assert!(self.controller.handle_event(DaemonEvent::Command(cmd)).await);
        }

        /// End of stream for the item the sink was handed last.
        async fn finished(&mut self) {
            let item = self.controller.sink.item.unwrap_or_default();
            self.finished_item(item).await;
        }

        async fn finished_item(&mut self, item: u64) {
            let notice = SinkNotice {
                item,
                event: SinkEvent::EndOfStream,
            };
            assert!(self.controller.handle_event(notice.into()).await);
        }

        fn state(&self) -> PlaybackState {
            self.controller.state
        }

        fn track(&self) -> String {
            self.controller.playlist().current().name().to_string()
        }

        fn playlist(&self) -> String {
            self.controller.playlist().name().to_string()
        }

        fn uri(&self) -> String {
            self.controller.sink.uri.clone().unwrap_or_default()
        }

        fn volume(&self) -> Option<f32> {
            self.controller.sink.volume
        }
    }

    #[tokio::test]
    async fn empty_ring_is_no_service() {
        let (event_tx, _rx) = mpsc::channel(1);
        let (broadcast_tx, _) = broadcast::channel(1);
        let result = PlaybackController::new(
            RecordingSink::default(),
            Vec::new(),
            None,
            &AudioConfig::default(),
            event_tx,
            Arc::new(StateManager::new()),
            broadcast_tx,
        );
        assert!(matches!(result, Err(PlayerError::NoService)));
    }

    #[tokio::test]
    async fn next_track_wraps_inside_the_playlist() {
        let mut h = harness(false, true);
        h.command(Command::Play).await;
        assert_eq!(h.state(), PlaybackState::PlayingTrack);
        assert_eq!(h.track(), "0.mp3");
        assert!(h.uri().starts_with("file://"));
        assert!(h.uri().ends_with("/a/0.mp3"));
        assert_eq!(h.volume(), Some(NORMAL));

        h.command(Command::NextTrack).await;
        assert_eq!(h.track(), "1.mp3");
        h.command(Command::NextTrack).await;
        assert_eq!(h.track(), "0.mp3");
        assert_eq!(h.playlist(), "a");
        assert_eq!(h.state(), PlaybackState::PlayingTrack);
    }

    #[tokio::test]
    async fn next_playlist_announces_then_plays() {
        let mut h = harness(false, true);
        h.command(Command::Play).await;
        h.controller.sink.take_calls();

        h.command(Command::NextPlaylist).await;
        assert_eq!(h.state(), PlaybackState::PlayingAnnouncement);
        assert_eq!(h.controller.pending, PendingAnnouncement::Identity);
        assert_eq!(
            h.controller.sink.take_calls(),
            vec![
                SinkCall::Stop,
                SinkCall::SetUri("file:///clips/b.wav".to_string()),
                SinkCall::SetVolume(SPEECH),
                SinkCall::Play,
            ]
        );

        h.finished().await;
        assert_eq!(h.state(), PlaybackState::PlayingTrack);
        assert_eq!(h.controller.pending, PendingAnnouncement::None);
        assert_eq!(h.playlist(), "b");
        assert_eq!(h.controller.playlist().cursor(), 0);
        assert!(h.uri().ends_with("/b/0.ogg"));
        assert_eq!(h.volume(), Some(NORMAL));
    }

    #[tokio::test]
    async fn prev_playlist_from_first_is_last() {
        let mut h = harness(false, true);
        h.command(Command::PrevPlaylist).await;
        assert_eq!(h.playlist(), "c");
        assert_eq!(h.uri(), "file:///clips/c.wav");
    }

    #[tokio::test]
    async fn end_of_track_advances() {
        let mut h = harness(false, true);
        h.command(Command::Play).await;
        h.finished().await;
        assert_eq!(h.track(), "1.mp3");
        h.finished().await;
        assert_eq!(h.track(), "0.mp3");
        assert_eq!(h.state(), PlaybackState::PlayingTrack);
    }

    #[tokio::test]
    async fn sink_finished_while_idle_or_paused_is_ignored() {
        let mut h = harness(false, true);
        h.finished().await;
        assert_eq!(h.state(), PlaybackState::Idle);
        assert!(h.controller.sink.calls.is_empty());

        h.command(Command::Play).await;
        h.command(Command::Pause).await;
        h.controller.sink.take_calls();
        h.finished().await;
        assert_eq!(h.state(), PlaybackState::Paused);
        assert_eq!(h.track(), "0.mp3");
        assert!(h.controller.sink.calls.is_empty());
    }

    #[tokio::test]
    async fn toggle_shuffle_applies_to_every_playlist_even_after_divergence() {
        let mut h = harness(false, true);
        h.controller.services[0].playlists_mut()[1].set_shuffle(true);

        h.command(Command::ToggleShuffle).await;
        assert!(h
            .controller
            .service()
            .playlists()
            .iter()
            .all(Playlist::is_shuffled));
        assert_eq!(h.uri(), "file:///clips/shuffle-on.wav");
        assert_eq!(h.controller.pending, PendingAnnouncement::ShuffleToggle);

        h.finished().await;
        assert_eq!(h.state(), PlaybackState::PlayingTrack);

        h.command(Command::ToggleShuffle).await;
        assert!(h
            .controller
            .service()
            .playlists()
            .iter()
            .all(|p| !p.is_shuffled()));
        assert_eq!(h.uri(), "file:///clips/shuffle-off.wav");
    }

    #[tokio::test]
    async fn command_preempts_announcement() {
        let mut h = harness(false, true);
        h.command(Command::NextPlaylist).await;
        assert_eq!(h.state(), PlaybackState::PlayingAnnouncement);

        h.command(Command::NextTrack).await;
        assert_eq!(h.state(), PlaybackState::PlayingTrack);
        assert_eq!(h.controller.pending, PendingAnnouncement::None);
        assert_eq!(h.playlist(), "b");
        assert_eq!(h.volume(), Some(NORMAL));
    }

    #[tokio::test]
    async fn missing_clips_go_straight_to_the_track() {
        let mut h = harness(false, false);
        h.command(Command::ToggleShuffle).await;
        assert_eq!(h.state(), PlaybackState::PlayingTrack);
        assert_eq!(h.controller.pending, PendingAnnouncement::None);
        assert!(h.controller.playlist().is_shuffled());
    }

    #[tokio::test]
    async fn service_ring_resumes_last_playlist() {
        let mut h = harness(true, true);
        h.command(Command::NextPlaylist).await;
        assert_eq!(h.playlist(), "b");

        h.command(Command::NextService).await;
        assert_eq!(h.controller.service().name(), "Radio Service");
        assert_eq!(h.state(), PlaybackState::PlayingTrack);
        assert_eq!(h.uri(), "http://radio.example/one");

        h.command(Command::NextPlaylist).await;
        h.finished().await;
        assert_eq!(h.uri(), "http://radio.example/two");

        h.command(Command::NextService).await;
        assert_eq!(h.controller.service().name(), "Local Service");
        assert_eq!(h.playlist(), "b");

        h.command(Command::PrevService).await;
        assert_eq!(h.playlist(), "Two");
    }

    #[tokio::test]
    async fn pause_and_resume_keep_the_item_level() {
        let mut h = harness(false, true);
        h.command(Command::NextPlaylist).await;
        h.command(Command::PlayPause).await;
        assert_eq!(h.state(), PlaybackState::Paused);

        h.controller.sink.take_calls();
        h.command(Command::PlayPause).await;
        assert_eq!(h.state(), PlaybackState::PlayingAnnouncement);
        assert_eq!(
            h.controller.sink.take_calls(),
            vec![SinkCall::SetVolume(SPEECH), SinkCall::Play]
        );

        h.finished().await;
        h.command(Command::Pause).await;
        h.command(Command::Play).await;
        assert_eq!(h.state(), PlaybackState::PlayingTrack);
        assert_eq!(h.volume(), Some(NORMAL));
    }

    #[tokio::test]
    async fn navigation_from_idle_starts_playback() {
        let mut h = harness(false, true);
        h.command(Command::NextTrack).await;
        assert_eq!(h.state(), PlaybackState::PlayingTrack);
        assert_eq!(h.track(), "1.mp3");

        h.command(Command::Stop).await;
        assert_eq!(h.state(), PlaybackState::Idle);
        h.command(Command::NextService).await;
        assert_eq!(h.state(), PlaybackState::PlayingTrack);
    }

    #[tokio::test]
    async fn unresolvable_track_is_skipped_later() {
        let mut h = harness(false, true);
        std::fs::remove_file(h.music.path().join("a").join("0.mp3")).unwrap();

        h.command(Command::Play).await;
        assert_eq!(h.state(), PlaybackState::PlayingTrack);
        assert!(h.controller.sink.calls.is_empty());

        let evt = h.event_rx.recv().await.unwrap();
        assert!(matches!(evt, DaemonEvent::SinkFinished { epoch: 1, .. }));
        assert!(h.controller.handle_event(evt).await);
        assert_eq!(h.track(), "1.mp3");
        assert!(h.uri().ends_with("/a/1.mp3"));
    }

    #[tokio::test]
    async fn scheduled_skip_for_an_older_item_is_dropped() {
        let mut h = harness(false, true);
        h.command(Command::Play).await;
        let old_epoch = h.controller.epoch;
        h.command(Command::NextTrack).await;
        assert_eq!(h.track(), "1.mp3");

        assert!(
            h.controller
                .handle_event(DaemonEvent::SinkFinished {
                    event: SinkEvent::Error("stream could not be resolved".to_string()),
                    epoch: old_epoch,
                })
                .await
        );
        assert_eq!(h.track(), "1.mp3");
    }

    #[tokio::test]
    async fn end_of_stream_queued_behind_a_command_is_dropped() {
        let mut h = harness(false, true);
        h.command(Command::Play).await;
        let first = h.controller.sink.item.unwrap();

        h.command(Command::NextTrack).await;
        h.finished_item(first).await;
        assert_eq!(h.track(), "1.mp3");
        assert_eq!(h.state(), PlaybackState::PlayingTrack);

        let track = h.controller.sink.item.unwrap();
        h.command(Command::NextPlaylist).await;
        h.finished_item(track).await;
        assert_eq!(h.state(), PlaybackState::PlayingAnnouncement);
        assert_eq!(h.controller.pending, PendingAnnouncement::Identity);

        h.finished().await;
        assert_eq!(h.state(), PlaybackState::PlayingTrack);
        assert_eq!(h.playlist(), "b");
    }

    #[tokio::test]
    async fn refused_item_is_skipped_like_a_finished_one() {
        let mut h = harness(false, true);
        h.controller.sink.fail_play = true;

        h.command(Command::NextPlaylist).await;
        assert_eq!(h.state(), PlaybackState::PlayingAnnouncement);
        let evt = tokio::time::timeout(Duration::from_millis(200), h.event_rx.recv())
            .await
            .expect("a skip is scheduled")
            .unwrap();
        assert!(matches!(evt, DaemonEvent::SinkFinished { .. }));

        h.controller.sink.fail_play = false;
        assert!(h.controller.handle_event(evt).await);
        assert_eq!(h.state(), PlaybackState::PlayingTrack);
        assert_eq!(h.controller.pending, PendingAnnouncement::None);
        assert!(h.uri().ends_with("/b/0.ogg"));
    }

    #[tokio::test]
    async fn refused_track_moves_on_to_the_next() {
        let mut h = harness(false, true);
        h.controller.sink.fail_play = true;
        h.command(Command::Play).await;
        assert_eq!(h.state(), PlaybackState::PlayingTrack);

        let evt = tokio::time::timeout(Duration::from_millis(200), h.event_rx.recv())
            .await
            .expect("a skip is scheduled")
            .unwrap();
        h.controller.sink.fail_play = false;
        assert!(h.controller.handle_event(evt).await);
        assert_eq!(h.track(), "1.mp3");
    }

    #[tokio::test]
    async fn snapshot_is_published_after_each_transition() {
        let mut h = harness(true, true);
        let manager = h.controller.state_manager.clone();
        h.command(Command::Play).await;
        h.command(Command::NextPlaylist).await;

        let snap = manager.get_state().await;
        assert_eq!(snap.rev, 2);
        assert_eq!(snap.state, PlaybackState::PlayingAnnouncement);
        assert_eq!(snap.pending, PendingAnnouncement::Identity);
        assert_eq!(snap.playlist.as_deref(), Some("b"));
        assert_eq!(snap.services, vec!["Local Service", "Radio Service"]);
    }

    #[tokio::test]
    async fn shutdown_ends_the_loop() {
        let mut h = harness(false, true);
        assert!(!h.controller.handle_event(DaemonEvent::Shutdown).await);
    }
}
