//! Composition root: builds the services and the sink, primes announcement
//! clips, spawns every input task and then runs the controller loop on the
//! calling task.

use std::sync::Arc;

use moodbox_proto::config::Config;
use moodbox_proto::platform::PRESENCE_LOST_EXIT_CODE;
use moodbox_proto::state::StateManager;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

use crate::announce::{AnnouncementCache, Espeak, ShuffleClips, SpeechSynthesizer};
use crate::core::{DaemonEvent, PlaybackController};
use crate::error::PlayerError;
use crate::mpv::MpvSink;
use crate::presence::{self, Bluetoothctl, PollingPresence};
use crate::remote::{EvdevRemote, InputDispatcher};
use crate::service::{load_services, MusicService};
use crate::sink::SinkNotice;
use crate::socket;
use crate::BroadcastMessage;

pub struct RemoteSupervisor {
    config: Config,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
}

impl RemoteSupervisor {
    pub fn new(config: Config, broadcast_tx: broadcast::Sender<BroadcastMessage>) -> Self {
        Self {
            config,
            broadcast_tx,
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let config = self.config;

        let mut services = load_services(&config.services).await?;
        if services.is_empty() {
            return Err(PlayerError::NoService.into());
        }
        let shuffle_clips = match Espeak::from_config(&config.tts) {
            Ok(tts) => {
                let cache = AnnouncementCache::new(&config.daemon.cache_dir, tts);
                attach_announcements(&cache, &mut services)
            }
            Err(e) => {
                warn!("Announcements disabled: {}", e);
                None
            }
        };

        let (event_tx, event_rx) = mpsc::channel::<DaemonEvent>(256);
        let (sink_tx, sink_rx) = mpsc::channel::<SinkNotice>(32);
        let state_manager = Arc::new(StateManager::new());

        let sink = MpvSink::new(config.audio.audio_device.clone(), sink_tx);
        let controller = PlaybackController::new(
            sink,
            services,
            shuffle_clips,
            &config.audio,
            event_tx.clone(),
            state_manager.clone(),
            self.broadcast_tx.clone(),
        )?;

        spawn_sink_forwarder(sink_rx, event_tx.clone());
        spawn_signal_handler(event_tx.clone());

        if config.remote.enabled {
            let bindings = config.key_bindings();
            match EvdevRemote::open(&config.remote.device).await {
                Ok(remote) => {
                    let dispatcher = InputDispatcher::new(remote, bindings, event_tx.clone());
                    tokio::spawn(async move {
                        if let Err(e) = dispatcher.run().await {
                            error!("Remote input stopped: {}", e);
                        }
                    });
                }
                Err(e) => warn!(
                    "Remote device {} unavailable: {}",
                    config.remote.device.display(),
                    e
                ),
            }
        }

        if config.presence.enabled {
            let source = PollingPresence::new(
                Bluetoothctl::from_config(&config.presence)?,
                &config.presence,
            );
            tokio::spawn(async move {
                match presence::watch(source).await {
                    Err(e @ PlayerError::PresenceLost { .. }) => {
                        error!("{}; exiting for restart", e);
                        std::process::exit(PRESENCE_LOST_EXIT_CODE);
                    }
                    Err(e) => error!("Presence monitor failed: {}", e),
                    Ok(()) => {}
                }
            });
        }

        if config.control.enabled {
            match socket::bind(&config.control.bind_address, config.control.port).await {
                Ok(listener) => {
                    socket::start_server(
                        listener,
                        state_manager.clone(),
                        event_tx.clone(),
                        self.broadcast_tx.clone(),
                    );
                }
                Err(e) => error!(
                    "Failed to bind control socket {}:{}: {}",
                    config.control.bind_address, config.control.port, e
                ),
            }
        }

        drop(event_tx);
        info!("Supervisor: running controller");
        controller.run(event_rx).await
    }
}

/// Give every playlist its identity clip and return the shuffle clips.
/// Failures only cost the affected announcement.
fn attach_announcements<T: SpeechSynthesizer>(
    cache: &AnnouncementCache<T>,
    services: &mut [MusicService],
) -> Option<ShuffleClips> {
    for service in services.iter_mut() {
        let namespace = service.namespace();
        for playlist in service.playlists_mut() {
            match cache.ensure(namespace, playlist.name()) {
                Ok(clip) => playlist.set_announcement(clip),
                Err(e) => warn!("No announcement for '{}': {}", playlist.name(), e),
            }
        }
    }
    match cache.prime_shuffle_clips() {
        Ok(clips) => Some(clips),
        Err(e) => {
            warn!("No shuffle announcements: {}", e);
            None
        }
    }
}

fn spawn_sink_forwarder(
    mut sink_rx: mpsc::Receiver<SinkNotice>,
    event_tx: mpsc::Sender<DaemonEvent>,
) {
    tokio::spawn(async move {
        while let Some(notice) = sink_rx.recv().await {
            if event_tx.send(notice.into()).await.is_err() {
                break;
            }
        }
    });
}

fn spawn_signal_handler(event_tx: mpsc::Sender<DaemonEvent>) {
    tokio::spawn(async move {
        let mut terminate =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    warn!("Cannot listen for SIGTERM: {}", e);
                    let _ = tokio::signal::ctrl_c().await;
                    let _ = event_tx.send(DaemonEvent::Shutdown).await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Ctrl-C received"),
            _ = terminate.recv() => info!("SIGTERM received"),
        }
        let _ = event_tx.send(DaemonEvent::Shutdown).await;
    });
}
