//! Output-device presence. The speaker is a bluetooth device; when it drops
//! off after having been connected, the daemon exits and lets systemd bring
//! it back once the speaker returns.

use std::path::PathBuf;

use async_trait::async_trait;
use moodbox_proto::config::PresenceConfig;
use moodbox_proto::platform;
use tokio::time::{Duration, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::{PlayerError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresencePhase {
    Connected,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEvent {
    pub device_id: String,
    pub phase: PresencePhase,
}

#[async_trait]
pub trait PresenceSource: Send {
    /// Next phase change; `None` when the source can no longer observe.
    async fn next_event(&mut self) -> Option<PresenceEvent>;
}

/// One look at the device.
#[async_trait]
pub trait PresenceCheck: Send {
    async fn check(&mut self) -> std::io::Result<PresencePhase>;
}

/// Runs `bluetoothctl info <MAC>` and reads its `Connected:` line.
pub struct Bluetoothctl {
    binary: PathBuf,
    device_id: String,
}

impl Bluetoothctl {
    pub fn from_config(config: &PresenceConfig) -> Result<Self> {
        let binary = platform::find_binary("bluetoothctl").ok_or_else(|| {
            PlayerError::Configuration("bluetoothctl not found".to_string())
        })?;
        Ok(Self {
            binary,
            device_id: config.device_id.clone(),
        })
    }
}

#[async_trait]
impl PresenceCheck for Bluetoothctl {
    async fn check(&mut self) -> std::io::Result<PresencePhase> {
        let output = tokio::process::Command::new(&self.binary)
            .arg("info")
            .arg(&self.device_id)
            .output()
            .await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        // An unknown device prints "Device ... not available" and no
        // Connected line.
        Ok(match parse_connected(&stdout) {
            Some(true) => PresencePhase::Connected,
            _ => PresencePhase::Disconnected,
        })
    }
}

/// Repeats a [`PresenceCheck`] on a fixed interval and reports changes.
/// A failed check is logged and retried on the next tick.
pub struct PollingPresence<C> {
    check: C,
    device_id: String,
    ticker: Interval,
    last: Option<PresencePhase>,
    failing: bool,
}

impl<C: PresenceCheck> PollingPresence<C> {
    pub fn new(check: C, config: &PresenceConfig) -> Self {
        Self::with_interval(
            check,
            &config.device_id,
            Duration::from_secs(config.poll_interval_secs.max(1)),
        )
    }

    pub fn with_interval(check: C, device_id: &str, interval: Duration) -> Self {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            check,
            device_id: device_id.to_string(),
            ticker,
            last: None,
            failing: false,
        }
    }
}

#[async_trait]
impl<C: PresenceCheck> PresenceSource for PollingPresence<C> {
    async fn next_event(&mut self) -> Option<PresenceEvent> {
        loop {
            self.ticker.tick().await;
            let phase = match self.check.check().await {
                Ok(phase) => phase,
                Err(e) => {
                    if !self.failing {
                        warn!("presence: check of {} failed: {}", self.device_id, e);
                    }
                    self.failing = true;
                    continue;
                }
            };
            if self.failing {
                info!("presence: check of {} works again", self.device_id);
                self.failing = false;
            }
            if self.last == Some(phase) {
                continue;
            }
            debug!("presence: {} is {:?}", self.device_id, phase);
            self.last = Some(phase);
            return Some(PresenceEvent {
                device_id: self.device_id.clone(),
                phase,
            });
        }
    }
}

/// Value of the `Connected:` line of `bluetoothctl info`, if present.
pub fn parse_connected(output: &str) -> Option<bool> {
    output.lines().find_map(|line| {
        let value = line.trim().strip_prefix("Connected:")?.trim();
        match value {
            "yes" => Some(true),
            "no" => Some(false),
            _ => None,
        }
    })
}

/// Consume presence events until the device is lost. A device never seen
/// connected cannot be lost. Returns `Ok` if the source ends first.
pub async fn watch<P: PresenceSource>(mut source: P) -> Result<()> {
    let mut seen_connected = false;
    while let Some(event) = source.next_event().await {
        match event.phase {
            PresencePhase::Connected => {
                if !seen_connected {
                    info!("presence: {} connected", event.device_id);
                }
                seen_connected = true;
            }
            PresencePhase::Disconnected if seen_connected => {
                return Err(PlayerError::PresenceLost {
                    device: event.device_id,
                });
            }
            PresencePhase::Disconnected => {
                debug!("presence: {} not connected yet", event.device_id)
            }
        }
    }
    warn!("presence: source ended, no longer watching");
    Ok(())
}
