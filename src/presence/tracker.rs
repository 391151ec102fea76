//! Server-side presence tracking and broadcast.
//!
//! In-memory presence store (DashMap) keyed by canonical numeric user id.
//! Every status transition broadcasts the full snapshot of all records —
//! list, not delta — to every connected client, and records the user's
//! last-active timestamp in the profile store best-effort.
//!
//! Records are never deleted: a user who has ever connected keeps an
//! offline record for the process lifetime. Bounded-population trade-off.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;

use crate::db::DbPool;
use crate::store::profiles;
use crate::ws::protocol::{ActivityEvent, PresenceEntry, ServerEvent};
use crate::ws::ConnectionRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceStatus {
    Online,
    Offline,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}

/// Info tracked per user in the presence map.
#[derive(Debug, Clone)]
pub struct PresenceRecord {
    pub user_id: i64,
    pub status: PresenceStatus,
    pub last_seen: DateTime<Utc>,
}

/// Presence state machine per user: Unknown → Online ⇄ Offline.
/// Sole owner of the presence map; mutations happen only through the
/// connect/disconnect/sweep entry points below.
pub struct PresenceTracker {
    records: DashMap<i64, PresenceRecord>,
    registry: Arc<ConnectionRegistry>,
    db: DbPool,
}

impl PresenceTracker {
    pub fn new(registry: Arc<ConnectionRegistry>, db: DbPool) -> Self {
        Self {
            records: DashMap::new(),
            registry,
            db,
        }
    }

    /// Mark a user online after the registry has admitted their channel,
    /// then broadcast the snapshot to everyone.
    pub async fn connect(&self, user_id: i64) {
        self.set_status(user_id, PresenceStatus::Online).await;
        self.broadcast_snapshot().await;
    }

    /// Mark a user offline after their channel was evicted, then broadcast.
    pub async fn disconnect(&self, user_id: i64) {
        self.set_status(user_id, PresenceStatus::Offline).await;
        self.broadcast_snapshot().await;
    }

    /// A caller observed this user's channel die mid-send. Same transition
    /// as an explicit disconnect.
    pub async fn mark_offline(&self, user_id: i64) {
        self.disconnect(user_id).await;
    }

    /// Fan a transient activity event out to every peer except the
    /// originator. Not recorded in the presence map.
    pub async fn activity(&self, user_id: i64, activity_type: &str, details: serde_json::Value) {
        let event = ServerEvent::UserActivity {
            data: ActivityEvent {
                user_id,
                activity_type: activity_type.to_string(),
                timestamp: Utc::now().to_rfc3339(),
                details,
            },
        };

        let evicted = self.registry.broadcast(&event, Some(user_id));
        if !evicted.is_empty() {
            for uid in evicted {
                self.set_status(uid, PresenceStatus::Offline).await;
            }
            self.broadcast_snapshot().await;
        }
    }

    /// Demote a batch of users whose channels were found dead in one pass,
    /// with a single aggregated snapshot broadcast at the end.
    pub async fn demote_evicted(&self, user_ids: &[i64]) {
        if user_ids.is_empty() {
            return;
        }
        for &user_id in user_ids {
            self.set_status(user_id, PresenceStatus::Offline).await;
        }
        self.broadcast_snapshot().await;
    }

    /// Demote every online record whose last-seen is older than `threshold`.
    /// One aggregated snapshot broadcast per sweep, not one per user.
    /// Returns the number of users demoted.
    pub async fn sweep_idle(&self, threshold: Duration) -> usize {
        let cutoff = Utc::now() - threshold;

        let stale: Vec<i64> = self
            .records
            .iter()
            .filter(|r| r.status == PresenceStatus::Online && r.last_seen < cutoff)
            .map(|r| r.user_id)
            .collect();

        for &user_id in &stale {
            self.set_status(user_id, PresenceStatus::Offline).await;
        }
        if !stale.is_empty() {
            self.broadcast_snapshot().await;
            tracing::info!(count = stale.len(), "idle sweep demoted users to offline");
        }

        stale.len()
    }

    /// One user's presence record, if they have ever connected.
    pub fn get(&self, user_id: i64) -> Option<PresenceEntry> {
        self.records.get(&user_id).map(|r| record_entry(&r))
    }

    /// Snapshot of every record, online and offline.
    pub fn snapshot(&self) -> Vec<PresenceEntry> {
        self.records.iter().map(|r| record_entry(&r)).collect()
    }

    async fn set_status(&self, user_id: i64, status: PresenceStatus) {
        let now = Utc::now();
        self.records.insert(
            user_id,
            PresenceRecord {
                user_id,
                status,
                last_seen: now,
            },
        );

        // Best-effort: a profile write failure must never abort the transition.
        if let Err(e) = profiles::update_last_active(&self.db, user_id, now).await {
            tracing::warn!(user_id, error = %e, "failed to record last-active timestamp");
        }
    }

    /// Broadcast the full snapshot to all connected clients. Channels found
    /// dead during the pass are evicted and demoted, and the (now smaller)
    /// snapshot is rebroadcast; the loop terminates because each pass
    /// strictly shrinks the registry.
    async fn broadcast_snapshot(&self) {
        loop {
            let event = ServerEvent::PresenceUpdate {
                data: self.snapshot(),
            };
            let evicted = self.registry.broadcast(&event, None);
            if evicted.is_empty() {
                break;
            }
            for user_id in evicted {
                self.set_status(user_id, PresenceStatus::Offline).await;
            }
        }
    }
}

fn record_entry(record: &PresenceRecord) -> PresenceEntry {
    PresenceEntry {
        user_id: record.user_id,
        status: record.status.as_str().to_string(),
        last_seen: record.last_seen.to_rfc3339(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db_in_memory;
    use axum::extract::ws::Message;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    async fn tracker_with_users(ids: &[i64]) -> (PresenceTracker, Arc<ConnectionRegistry>) {
        let db = init_db_in_memory().unwrap();
        for &id in ids {
            profiles::insert_user(&db, id, &format!("user{id}"))
                .await
                .unwrap();
        }
        let registry = Arc::new(ConnectionRegistry::new());
        (PresenceTracker::new(registry.clone(), db), registry)
    }

    fn recv_json(rx: &mut UnboundedReceiver<Message>) -> serde_json::Value {
        match rx.try_recv() {
            Ok(Message::Text(text)) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn connect_broadcasts_online_snapshot_to_peers() {
        let (tracker, registry) = tracker_with_users(&[1, 2]).await;
        let (tx_a, mut rx_a) = unbounded_channel();
        registry.admit(1, tx_a);
        tracker.connect(1).await;
        let _ = rx_a.try_recv(); // own snapshot

        let (tx_b, _rx_b) = unbounded_channel();
        registry.admit(2, tx_b);
        tracker.connect(2).await;

        let snapshot = recv_json(&mut rx_a);
        assert_eq!(snapshot["type"], "presence_update");
        let entry = snapshot["data"]
            .as_array()
            .unwrap()
            .iter()
            .find(|e| e["user_id"] == 2)
            .expect("user 2 in snapshot");
        assert_eq!(entry["status"], "online");
    }

    #[tokio::test]
    async fn activity_skips_originator() {
        let (tracker, registry) = tracker_with_users(&[1, 2]).await;
        let (tx_a, mut rx_a) = unbounded_channel();
        let (tx_b, mut rx_b) = unbounded_channel();
        registry.admit(1, tx_a);
        registry.admit(2, tx_b);

        tracker.activity(1, "typing", serde_json::json!({})).await;

        let event = recv_json(&mut rx_b);
        assert_eq!(event["type"], "user_activity");
        assert_eq!(event["data"]["user_id"], 1);
        assert_eq!(event["data"]["activity_type"], "typing");
        assert!(rx_a.try_recv().is_err(), "no echo back to originator");
    }

    #[tokio::test]
    async fn disconnect_keeps_record_as_offline() {
        let (tracker, registry) = tracker_with_users(&[1]).await;
        let (tx, _rx) = unbounded_channel();
        registry.admit(1, tx);
        tracker.connect(1).await;

        registry.evict(1);
        tracker.disconnect(1).await;

        let entry = tracker.get(1).expect("record survives disconnect");
        assert_eq!(entry.status, "offline");
    }

    #[tokio::test]
    async fn idle_sweep_demotes_only_stale_online_records() {
        let (tracker, _registry) = tracker_with_users(&[1, 2, 3]).await;
        tracker.set_status(1, PresenceStatus::Online).await;
        tracker.set_status(2, PresenceStatus::Online).await;
        tracker.set_status(3, PresenceStatus::Offline).await;

        // Backdate user 1 past the threshold.
        tracker.records.get_mut(&1).unwrap().last_seen = Utc::now() - Duration::hours(1);

        let swept = tracker.sweep_idle(Duration::minutes(30)).await;
        assert_eq!(swept, 1);
        assert_eq!(tracker.get(1).unwrap().status, "offline");
        assert_eq!(tracker.get(2).unwrap().status, "online");
    }

    #[tokio::test]
    async fn snapshot_broadcast_heals_dead_channels() {
        let (tracker, registry) = tracker_with_users(&[1, 2]).await;
        let (tx_a, mut rx_a) = unbounded_channel();
        let (tx_b, rx_b) = unbounded_channel();
        registry.admit(1, tx_a);
        registry.admit(2, tx_b);
        tracker.set_status(1, PresenceStatus::Online).await;
        tracker.set_status(2, PresenceStatus::Online).await;
        drop(rx_b); // user 2's channel dies silently

        tracker.broadcast_snapshot().await;

        assert!(!registry.is_connected(2));
        assert_eq!(tracker.get(2).unwrap().status, "offline");
        // Survivor saw a rebroadcast reflecting the eviction.
        let mut last = None;
        while let Ok(Message::Text(text)) = rx_a.try_recv() {
            last = Some(serde_json::from_str::<serde_json::Value>(&text).unwrap());
        }
        let last = last.expect("at least one snapshot");
        let entry = last["data"]
            .as_array()
            .unwrap()
            .iter()
            .find(|e| e["user_id"] == 2)
            .unwrap();
        assert_eq!(entry["status"], "offline");
    }
}
