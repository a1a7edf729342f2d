mod announce;
mod core;
mod error;
mod mpv;
mod playlist;
mod presence;
mod remote;
mod service;
mod sink;
mod socket;
mod supervisor;
mod track;

use std::path::PathBuf;

use clap::Parser;
use moodbox_proto::config::Config;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, Clone)]
pub enum BroadcastMessage {
    StateUpdated,
    Log(String),
}

#[derive(Parser, Debug)]
#[command(name = "moodboxd")]
#[command(about = "Remote-controlled music player daemon")]
#[command(version)]
struct Args {
    /// Config file (default: $MOODBOX_CONFIG or ~/.config/moodbox/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// mpv --audio-device, overrides audio.audio_device
    #[arg(long)]
    audio_device: Option<String>,

    /// Take mpv/espeak/bluetoothctl from PATH only
    #[arg(long)]
    system_deps: bool,
}

/// A custom tracing layer that forwards log messages to the broadcast channel
struct BroadcastLayer {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl BroadcastLayer {
    fn new(sender: broadcast::Sender<BroadcastMessage>) -> Self {
        Self { sender }
    }
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        // Only WARN and ERROR reach control clients
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = format!("{} [{}] ", chrono::Local::now().format("%H:%M:%S"), level);
        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        // No receivers is fine
        let _ = self.sender.send(BroadcastMessage::Log(message));
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    moodbox_proto::platform::set_use_system_deps(args.system_deps);

    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(100);

    let data_dir = moodbox_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("moodboxd.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
    let broadcast_layer = BroadcastLayer::new(broadcast_tx.clone());

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .with(broadcast_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,moodbox_daemon=debug")),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    info!(
        "Config loaded from: {:?}",
        args.config.clone().unwrap_or_else(Config::config_path)
    );
    if let Some(device) = args.audio_device {
        config.audio.audio_device = Some(device);
    }

    supervisor::RemoteSupervisor::new(config, broadcast_tx)
        .run()
        .await?;

    info!("Clean shutdown");
    Ok(())
}
