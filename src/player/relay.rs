//! Player observer relay
//!
//! Engine threads report time, state and events by player id. The relay
//! looks the id up and forwards to the registered observer; unknown or
//! removed ids are silently dropped.

use crate::player::{PlayerEvent, PlayerId, PlayerObserver, PlayerState};
use log::{debug, info, warn};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of one observer per player
#[derive(Default)]
pub struct PlaybackRelay {
    observers: RwLock<HashMap<PlayerId, Arc<dyn PlayerObserver>>>,
}

impl PlaybackRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `observer` for `player_id`, replacing any previous one
    pub fn add(&self, player_id: PlayerId, observer: Arc<dyn PlayerObserver>) {
        if self.observers.write().insert(player_id.clone(), observer).is_some() {
            warn!("Replaced observer for player {}", player_id);
        } else {
            info!("Registered observer for player {}", player_id);
        }
    }

    /// Idempotent; returns whether an observer was removed
    pub fn remove(&self, player_id: &PlayerId) -> bool {
        let removed = self.observers.write().remove(player_id).is_some();
        if removed {
            info!("Removed observer for player {}", player_id);
        }
        removed
    }

    pub fn contains(&self, player_id: &PlayerId) -> bool {
        self.observers.read().contains_key(player_id)
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }

    // The lock is released before calling out so observers may re-enter.
    fn observer(&self, player_id: &PlayerId) -> Option<Arc<dyn PlayerObserver>> {
        let observer = self.observers.read().get(player_id).cloned();
        if observer.is_none() {
            debug!("No observer for player {}, dropping notification", player_id);
        }
        observer
    }

    pub fn notify_time(&self, player_id: &PlayerId, time: f64) {
        if let Some(observer) = self.observer(player_id) {
            observer.notify_time(player_id, time);
        }
    }

    pub fn notify_state(&self, player_id: &PlayerId, state: PlayerState) {
        if let Some(observer) = self.observer(player_id) {
            observer.notify_state(player_id, state);
        }
    }

    pub fn notify_event(&self, player_id: &PlayerId, event: PlayerEvent, value: &str) {
        if let Some(observer) = self.observer(player_id) {
            observer.notify_event(player_id, event, value);
        }
    }

    /// Surface a failure: `Error` state followed by `OnError` with the code
    pub fn report_error(&self, player_id: &PlayerId, code: i32) {
        warn!("Player {} reported error {}", player_id, code);
        if let Some(observer) = self.observer(player_id) {
            observer.notify_state(player_id, PlayerState::Error);
            observer.notify_event(player_id, PlayerEvent::OnError, &code.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{Notification, RecordingObserver};

    #[test]
    fn test_forwarding() {
        let relay = PlaybackRelay::new();
        let observer = Arc::new(RecordingObserver::new());
        let id = PlayerId::new("player-1");
        relay.add(id.clone(), observer.clone());

        relay.notify_state(&id, PlayerState::Playing);
        relay.notify_time(&id, 1.5);
        relay.notify_event(&id, PlayerEvent::UpdateCacheTime, "12.5");

        assert_eq!(
            observer.notifications(),
            vec![
                Notification::State(PlayerState::Playing),
                Notification::Time(1.5),
                Notification::Event(PlayerEvent::UpdateCacheTime, "12.5".to_string()),
            ]
        );
    }

    #[test]
    fn test_unknown_and_removed_ids_are_noops() {
        let relay = PlaybackRelay::new();
        let observer = Arc::new(RecordingObserver::new());
        let id = PlayerId::new("player-1");

        relay.notify_state(&id, PlayerState::Playing);
        relay.add(id.clone(), observer.clone());
        assert!(relay.remove(&id));
        assert!(!relay.remove(&id));
        relay.notify_event(&id, PlayerEvent::PlayEnd, "");
        relay.report_error(&id, 3);

        assert!(observer.notifications().is_empty());
        assert!(relay.is_empty());
    }

    #[test]
    fn test_report_error() {
        let relay = PlaybackRelay::new();
        let observer = Arc::new(RecordingObserver::new());
        let id = PlayerId::new("player-1");
        relay.add(id.clone(), observer.clone());

        relay.report_error(&id, -38);
        assert_eq!(
            observer.notifications(),
            vec![
                Notification::State(PlayerState::Error),
                Notification::Event(PlayerEvent::OnError, "-38".to_string()),
            ]
        );
    }

    #[test]
    fn test_observers_are_isolated() {
        let relay = PlaybackRelay::new();
        let first = Arc::new(RecordingObserver::new());
        let second = Arc::new(RecordingObserver::new());
        relay.add(PlayerId::new("a"), first.clone());
        relay.add(PlayerId::new("b"), second.clone());

        relay.notify_state(&PlayerId::new("b"), PlayerState::Completed);
        assert!(first.notifications().is_empty());
        assert_eq!(second.notifications(), vec![Notification::State(PlayerState::Completed)]);
    }
}
