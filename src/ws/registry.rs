//! Connection registry: the single source of truth for which users have an
//! open channel and how to write to it.
//!
//! One live connection per user — admitting a user who is already registered
//! replaces the previous entry, and the superseded channel is closed
//! best-effort. Eviction is observed by callers through the return values of
//! `send` and `broadcast`; the registry itself never talks to the presence
//! or notification layers.

use axum::extract::ws::{CloseFrame, Message};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::error::RealtimeError;
use crate::ws::protocol::ServerEvent;

/// Type alias for the sender half of a WebSocket connection's channel.
/// Other parts of the system can clone this to push messages to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<Message>;

/// Close code sent to a connection replaced by a newer one for the same user.
const CLOSE_SUPERSEDED: u16 = 4000;

struct ConnectionEntry {
    tx: ConnectionSender,
    connected_at: DateTime<Utc>,
}

/// Live user-id → channel mapping. Explicitly constructed at startup and
/// shared via `AppState`, not an ambient singleton.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<i64, ConnectionEntry>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the channel for a user. The prior channel,
    /// if any, receives a best-effort close frame.
    pub fn admit(&self, user_id: i64, tx: ConnectionSender) {
        let entry = ConnectionEntry {
            tx,
            connected_at: Utc::now(),
        };
        if let Some(prev) = self.connections.insert(user_id, entry) {
            let _ = prev.tx.send(Message::Close(Some(CloseFrame {
                code: CLOSE_SUPERSEDED,
                reason: "Superseded by newer connection".into(),
            })));
            tracing::debug!(user_id, "connection replaced");
        } else {
            tracing::debug!(user_id, "connection registered");
        }
    }

    /// Remove the entry for a user. Idempotent: evicting an absent user
    /// is a no-op.
    pub fn evict(&self, user_id: i64) {
        if self.connections.remove(&user_id).is_some() {
            tracing::debug!(user_id, "connection evicted");
        }
    }

    /// Remove the entry only if it still belongs to the given sender.
    /// Used on actor shutdown so a replaced connection's cleanup does not
    /// tear down its successor. Returns whether an entry was removed.
    pub fn evict_if_owner(&self, user_id: i64, tx: &ConnectionSender) -> bool {
        self.connections
            .remove_if(&user_id, |_, entry| entry.tx.same_channel(tx))
            .is_some()
    }

    pub fn is_connected(&self, user_id: i64) -> bool {
        self.connections.contains_key(&user_id)
    }

    pub fn connected_count(&self) -> usize {
        self.connections.len()
    }

    /// When the user's current connection was admitted.
    pub fn connected_since(&self, user_id: i64) -> Option<DateTime<Utc>> {
        self.connections.get(&user_id).map(|e| e.connected_at)
    }

    /// Identity-checked eviction after a failed write. Only removes the
    /// entry if it still holds the channel that failed — a replacement
    /// admitted in the window between observing the failure and applying
    /// the eviction is spared. Returns whether the dead entry was removed.
    fn evict_failed(&self, user_id: i64, tx: &ConnectionSender) -> bool {
        let removed = self
            .connections
            .remove_if(&user_id, |_, entry| entry.tx.same_channel(tx))
            .is_some();
        if removed {
            tracing::info!(user_id, "channel write failed, connection evicted");
        } else {
            tracing::debug!(user_id, "stale write failure, entry already replaced");
        }
        removed
    }

    /// Serialize `event` and deliver it to a user's channel.
    ///
    /// Returns `Ok(true)` on delivery, `Ok(false)` if the user has no open
    /// channel (recipient offline — not an error). A failed channel write
    /// evicts the entry and surfaces as `Delivery` so the caller can
    /// broadcast the offline transition. If the dead channel was already
    /// replaced by a newer connection, the user is still live: the failure
    /// is reported as the recipient simply not having received this send.
    pub fn send(&self, user_id: i64, event: &ServerEvent) -> Result<bool, RealtimeError> {
        let Some(entry) = self.connections.get(&user_id) else {
            return Ok(false);
        };

        let text = match serde_json::to_string(event) {
            Ok(t) => t,
            Err(e) => {
                tracing::error!(user_id, error = %e, "failed to serialize outbound envelope");
                return Ok(false);
            }
        };

        let tx = entry.tx.clone();
        let sent = tx.send(Message::Text(text.into()));
        // Release the map guard before mutating the same shard.
        drop(entry);

        if sent.is_ok() {
            Ok(true)
        } else if self.evict_failed(user_id, &tx) {
            Err(RealtimeError::Delivery(user_id))
        } else {
            Ok(false)
        }
    }

    /// Deliver `event` to every registered channel except `exclude`.
    ///
    /// Failures never interrupt the fan-out pass: dead entries are collected
    /// during iteration and evicted afterwards (mutating the map
    /// mid-iteration is forbidden). Returns the user ids that were evicted
    /// so the caller can demote their presence.
    pub fn broadcast(&self, event: &ServerEvent, exclude: Option<i64>) -> Vec<i64> {
        let text = match serde_json::to_string(event) {
            Ok(t) => t,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize broadcast envelope");
                return Vec::new();
            }
        };
        let msg = Message::Text(text.into());

        let mut failed: Vec<(i64, ConnectionSender)> = Vec::new();
        for entry in self.connections.iter() {
            let user_id = *entry.key();
            if Some(user_id) == exclude {
                continue;
            }
            if entry.value().tx.send(msg.clone()).is_err() {
                failed.push((user_id, entry.value().tx.clone()));
            }
        }

        let mut evicted = Vec::new();
        for (user_id, tx) in &failed {
            if self.evict_failed(*user_id, tx) {
                evicted.push(*user_id);
            }
        }

        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    fn pong() -> ServerEvent {
        ServerEvent::Pong {
            timestamp: json!(1),
        }
    }

    fn channel() -> (ConnectionSender, UnboundedReceiver<Message>) {
        unbounded_channel()
    }

    #[test]
    fn admit_replaces_prior_connection() {
        let registry = ConnectionRegistry::new();
        let (tx1, mut rx1) = channel();
        let (tx2, mut rx2) = channel();

        registry.admit(7, tx1);
        registry.admit(7, tx2);

        // Old channel got a close frame, new channel gets subsequent sends.
        assert!(matches!(rx1.try_recv(), Ok(Message::Close(_))));
        assert_eq!(registry.send(7, &pong()).unwrap(), true);
        assert!(matches!(rx2.try_recv(), Ok(Message::Text(_))));
        assert!(rx1.try_recv().is_err());
    }

    #[test]
    fn evict_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (tx, _rx) = channel();
        registry.admit(1, tx);

        registry.evict(1);
        registry.evict(1);
        registry.evict(99);
        assert!(!registry.is_connected(1));
    }

    #[test]
    fn send_to_absent_user_is_offline_not_error() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.send(5, &pong()).unwrap(), false);
    }

    #[test]
    fn failed_send_evicts_and_reports() {
        let registry = ConnectionRegistry::new();
        let (tx, rx) = channel();
        registry.admit(3, tx);
        drop(rx);

        let err = registry.send(3, &pong()).unwrap_err();
        assert!(matches!(err, RealtimeError::Delivery(3)));
        assert!(!registry.is_connected(3));
    }

    #[test]
    fn broadcast_excludes_originator_and_evicts_dead() {
        let registry = ConnectionRegistry::new();
        let (tx_a, mut rx_a) = channel();
        let (tx_b, mut rx_b) = channel();
        let (tx_c, rx_c) = channel();
        registry.admit(1, tx_a);
        registry.admit(2, tx_b);
        registry.admit(3, tx_c);
        drop(rx_c); // user 3's channel is dead

        let evicted = registry.broadcast(&pong(), Some(1));

        assert_eq!(evicted, vec![3]);
        assert!(!registry.is_connected(3));
        assert!(rx_a.try_recv().is_err(), "originator must not receive");
        assert!(matches!(rx_b.try_recv(), Ok(Message::Text(_))));
        assert!(rx_b.try_recv().is_err(), "exactly one delivery per peer");
    }

    #[test]
    fn evict_if_owner_spares_replacement() {
        let registry = ConnectionRegistry::new();
        let (tx1, _rx1) = channel();
        let (tx2, _rx2) = channel();

        registry.admit(4, tx1.clone());
        registry.admit(4, tx2);

        // The replaced actor's cleanup must not evict the new connection.
        assert!(!registry.evict_if_owner(4, &tx1));
        assert!(registry.is_connected(4));
    }

    #[test]
    fn stale_write_failure_spares_replacement() {
        let registry = ConnectionRegistry::new();
        let (tx1, rx1) = channel();
        let (tx2, mut rx2) = channel();

        registry.admit(6, tx1.clone());
        drop(rx1);
        // A reconnect lands between the failed write and the eviction sweep.
        registry.admit(6, tx2);

        // Applying the stale failure must leave the live replacement alone.
        assert!(!registry.evict_failed(6, &tx1));
        assert!(registry.is_connected(6));
        assert_eq!(registry.send(6, &pong()).unwrap(), true);
        assert!(matches!(rx2.try_recv(), Ok(Message::Text(_))));
    }
}
