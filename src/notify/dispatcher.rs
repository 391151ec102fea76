//! Notification dispatcher: bridges persisted notification intent to live
//! delivery, and tracks per-user topic subscriptions.
//!
//! Durability comes first: a notification is written to the store before any
//! delivery attempt, and a failed live send never rolls the write back — the
//! row stays unread and is flushed on the recipient's next connect.

use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;

use crate::db::models::NotificationRow;
use crate::db::DbPool;
use crate::error::RealtimeError;
use crate::presence::PresenceTracker;
use crate::store::notifications::{self, NewNotification};
use crate::ws::protocol::{ReadAck, ServerEvent};
use crate::ws::ConnectionRegistry;

/// Notification types every user is subscribed to on connect.
pub const DEFAULT_SUBSCRIPTIONS: [&str; 5] = [
    "message",
    "task_assigned",
    "sprint_update",
    "system",
    "mention",
];

pub struct NotificationDispatcher {
    registry: Arc<ConnectionRegistry>,
    presence: Arc<PresenceTracker>,
    db: DbPool,
    /// Per-user topic filters. Advisory in the current design: delivery is
    /// not gated on membership. Gating would go in `push_to` if a stricter
    /// routing policy is ever adopted.
    subscriptions: DashMap<i64, HashSet<String>>,
}

impl NotificationDispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>, presence: Arc<PresenceTracker>, db: DbPool) -> Self {
        Self {
            registry,
            presence,
            db,
            subscriptions: DashMap::new(),
        }
    }

    /// Seed the default subscription set on connect.
    pub fn register(&self, user_id: i64) {
        self.subscriptions.insert(
            user_id,
            DEFAULT_SUBSCRIPTIONS.iter().map(|s| s.to_string()).collect(),
        );
    }

    /// Discard the subscription set on disconnect. Not persisted.
    pub fn deregister(&self, user_id: i64) {
        self.subscriptions.remove(&user_id);
    }

    /// Persist a notification, then attempt immediate delivery.
    ///
    /// A store rejection propagates as `Persistence` and no live delivery is
    /// attempted. A delivery failure is absorbed: the row is durable and the
    /// recipient picks it up on reconnect.
    pub async fn create_and_send(
        &self,
        recipient_id: i64,
        kind: &str,
        message: &str,
        sender_id: Option<i64>,
        payload: Option<serde_json::Value>,
    ) -> Result<NotificationRow, RealtimeError> {
        let row = notifications::create_notification(
            &self.db,
            NewNotification {
                recipient_id,
                sender_id,
                kind: kind.to_string(),
                message: message.to_string(),
                payload,
            },
        )
        .await?;

        let event = ServerEvent::Notification {
            data: row.clone().into(),
        };
        self.push_to(recipient_id, &event).await;

        Ok(row)
    }

    /// Deliver the unread backlog in creation order, right after admission.
    /// A failed send mid-flush has already evicted the connection, so the
    /// flush stops there; the remaining rows stay unread for next time.
    /// Returns the number of notifications delivered.
    pub async fn flush_pending(&self, user_id: i64) -> Result<usize, RealtimeError> {
        let backlog = notifications::unread_notifications(&self.db, user_id).await?;

        let mut delivered = 0;
        for row in backlog {
            let event = ServerEvent::Notification { data: row.into() };
            match self.registry.send(user_id, &event) {
                Ok(true) => delivered += 1,
                Ok(false) => break,
                Err(e) => {
                    tracing::info!(user_id, error = %e, "flush interrupted by dead channel");
                    self.presence.mark_offline(user_id).await;
                    break;
                }
            }
        }

        Ok(delivered)
    }

    /// Flip the persisted read flag, then push a lightweight acknowledgment
    /// back to the user's channel if connected. `user_id` only addresses the
    /// acknowledgment: ownership of the notification is deliberately not
    /// checked here.
    pub async fn mark_read(
        &self,
        notification_id: i64,
        user_id: i64,
    ) -> Result<NotificationRow, RealtimeError> {
        let row = notifications::mark_notification_read(&self.db, notification_id).await?;

        let ack = ServerEvent::NotificationRead {
            data: ReadAck {
                notification_id,
                read_at: Utc::now().to_rfc3339(),
            },
        };
        self.push_to(user_id, &ack).await;

        Ok(row)
    }

    /// Set union on the user's subscription set. Always succeeds.
    pub fn subscribe(&self, user_id: i64, types: Vec<String>) {
        self.subscriptions.entry(user_id).or_default().extend(types);
    }

    /// Set difference on the user's subscription set. Always succeeds.
    pub fn unsubscribe(&self, user_id: i64, types: Vec<String>) {
        if let Some(mut set) = self.subscriptions.get_mut(&user_id) {
            for t in &types {
                set.remove(t);
            }
        }
    }

    /// The user's current subscription set (empty if not connected).
    pub fn subscriptions_for(&self, user_id: i64) -> Vec<String> {
        let mut types: Vec<String> = self
            .subscriptions
            .get(&user_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        types.sort();
        types
    }

    /// Send to one user; a dead channel demotes their presence, an offline
    /// recipient is a silent no-op.
    async fn push_to(&self, user_id: i64, event: &ServerEvent) {
        match self.registry.send(user_id, event) {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(user_id, "recipient offline, no live delivery");
            }
            Err(e) => {
                tracing::info!(user_id, error = %e, "live delivery failed");
                self.presence.mark_offline(user_id).await;
            }
        }
    }
}
