//! Progression notification hooks.
//!
//! Level-ups, completed challenges and unlocked achievements are published
//! on a broadcast channel. Delivery to the user (toasts, push) happens in
//! subscribers; the daemon itself only logs them.

use progress_shared::challenges::ChallengeInstance;
use progress_shared::leveling::LevelUpEvent;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default channel capacity; slow subscribers lag rather than block awards
pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProgressNotification {
    LevelUp {
        user_id: String,
        event: LevelUpEvent,
    },
    ChallengeCompleted {
        user_id: String,
        instance: ChallengeInstance,
    },
    AchievementUnlocked {
        user_id: String,
        achievement_id: String,
        name: String,
    },
}

impl ProgressNotification {
    pub fn user_id(&self) -> &str {
        match self {
            ProgressNotification::LevelUp { user_id, .. }
            | ProgressNotification::ChallengeCompleted { user_id, .. }
            | ProgressNotification::AchievementUnlocked { user_id, .. } => user_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NotificationHub {
    tx: broadcast::Sender<ProgressNotification>,
}

impl NotificationHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressNotification> {
        self.tx.subscribe()
    }

    /// Fire and forget; having no subscribers is not an error
    pub fn publish(&self, notification: ProgressNotification) {
        if self.tx.send(notification).is_err() {
            debug!("No notification subscribers");
        }
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Log every notification until shutdown
pub fn spawn_logger(hub: &NotificationHub, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    let mut rx = hub.subscribe();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                received = rx.recv() => match received {
                    Ok(ProgressNotification::LevelUp { user_id, event }) => info!(
                        "[{}] Level up {} -> {} ({}{})",
                        user_id,
                        event.previous_level,
                        event.new_level,
                        event.new_tier,
                        if event.tier_changed { ", new tier" } else { "" }
                    ),
                    Ok(ProgressNotification::ChallengeCompleted { user_id, instance }) => info!(
                        "[{}] Challenge completed: {} ({} XP to claim)",
                        user_id, instance.title, instance.xp_reward
                    ),
                    Ok(ProgressNotification::AchievementUnlocked { user_id, name, .. }) => {
                        info!("[{}] Achievement unlocked: {}", user_id, name)
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Notification logger lagged, skipped {}", n)
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let hub = NotificationHub::default();
        let mut rx = hub.subscribe();
        hub.publish(ProgressNotification::AchievementUnlocked {
            user_id: "u1".into(),
            achievement_id: "streak_3".into(),
            name: "On Fire".into(),
        });
        let got = rx.recv().await.unwrap();
        assert_eq!(got.user_id(), "u1");
    }

    #[test]
    fn test_publish_without_subscribers() {
        let hub = NotificationHub::new(4);
        hub.publish(ProgressNotification::AchievementUnlocked {
            user_id: "u1".into(),
            achievement_id: "x".into(),
            name: "X".into(),
        });
    }
}
