use crate::protocol::ControllerSnapshot;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared, read-mostly copy of what the controller is doing.
///
/// The playback controller is the only writer; socket clients and `moodctl`
/// read. Every write bumps `rev`.
#[derive(Default)]
pub struct StateManager {
    state: Arc<RwLock<ControllerSnapshot>>,
}

impl StateManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_state(&self) -> ControllerSnapshot {
        self.state.read().await.clone()
    }

    /// Replace the snapshot, keeping the revision counter monotonic.
    /// Returns the revision that was stored.
    pub async fn publish(&self, mut snapshot: ControllerSnapshot) -> u64 {
        let mut state = self.state.write().await;
        snapshot.rev = state.rev + 1;
        *state = snapshot;
        state.rev
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PlaybackState;

    #[tokio::test]
    async fn publish_bumps_revision() {
        let manager = StateManager::new();
        assert_eq!(manager.get_state().await.rev, 0);

        let rev = manager
            .publish(ControllerSnapshot {
                rev: 999,
                state: PlaybackState::PlayingTrack,
                ..Default::default()
            })
            .await;
        assert_eq!(rev, 1);

        let rev = manager.publish(ControllerSnapshot::default()).await;
        assert_eq!(rev, 2);
        assert_eq!(manager.get_state().await.state, PlaybackState::Idle);
    }
}
