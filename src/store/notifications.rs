//! Notification persistence store: create, unread backlog, mark-read.

use chrono::Utc;
use rusqlite::OptionalExtension;

use crate::db::models::NotificationRow;
use crate::db::DbPool;
use crate::error::RealtimeError;

/// Fields for a notification about to be persisted.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub recipient_id: i64,
    pub sender_id: Option<i64>,
    pub kind: String,
    pub message: String,
    pub payload: Option<serde_json::Value>,
}

/// Persist a new notification and return the stored row (with generated id).
pub async fn create_notification(
    db: &DbPool,
    new: NewNotification,
) -> Result<NotificationRow, RealtimeError> {
    let db = db.clone();

    tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|_| RealtimeError::Persistence("database lock poisoned".into()))?;

        let created_at = Utc::now().to_rfc3339();
        let payload_text = new
            .payload
            .as_ref()
            .map(|p| serde_json::to_string(p))
            .transpose()
            .map_err(|e| RealtimeError::Persistence(e.to_string()))?;

        conn.execute(
            "INSERT INTO notifications (recipient_id, sender_id, type, message, payload, is_read, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)",
            rusqlite::params![
                new.recipient_id,
                new.sender_id,
                new.kind,
                new.message,
                payload_text,
                created_at,
            ],
        )?;

        Ok(NotificationRow {
            id: conn.last_insert_rowid(),
            recipient_id: new.recipient_id,
            sender_id: new.sender_id,
            kind: new.kind,
            message: new.message,
            payload: new.payload,
            is_read: false,
            created_at,
        })
    })
    .await?
}

/// Fetch all unread notifications for a user, oldest first.
/// Used to flush the backlog when the user reconnects.
pub async fn unread_notifications(
    db: &DbPool,
    user_id: i64,
) -> Result<Vec<NotificationRow>, RealtimeError> {
    let db = db.clone();

    tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|_| RealtimeError::Persistence("database lock poisoned".into()))?;

        let mut stmt = conn.prepare(
            "SELECT id, recipient_id, sender_id, type, message, payload, is_read, created_at
             FROM notifications
             WHERE recipient_id = ?1 AND is_read = 0
             ORDER BY created_at ASC, id ASC",
        )?;

        let rows = stmt
            .query_map(rusqlite::params![user_id], row_to_notification)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    })
    .await?
}

/// Flip a notification's read flag and return the updated row.
/// Fails with `NotFound` if no row has the given id.
pub async fn mark_notification_read(
    db: &DbPool,
    notification_id: i64,
) -> Result<NotificationRow, RealtimeError> {
    let db = db.clone();

    tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|_| RealtimeError::Persistence("database lock poisoned".into()))?;

        let updated = conn.execute(
            "UPDATE notifications SET is_read = 1 WHERE id = ?1",
            rusqlite::params![notification_id],
        )?;
        if updated == 0 {
            return Err(RealtimeError::NotFound(notification_id));
        }

        let row = conn
            .query_row(
                "SELECT id, recipient_id, sender_id, type, message, payload, is_read, created_at
                 FROM notifications WHERE id = ?1",
                rusqlite::params![notification_id],
                row_to_notification,
            )
            .optional()?
            .ok_or(RealtimeError::NotFound(notification_id))?;

        Ok(row)
    })
    .await?
}

fn row_to_notification(row: &rusqlite::Row<'_>) -> Result<NotificationRow, rusqlite::Error> {
    let payload_text: Option<String> = row.get(5)?;
    Ok(NotificationRow {
        id: row.get(0)?,
        recipient_id: row.get(1)?,
        sender_id: row.get(2)?,
        kind: row.get(3)?,
        message: row.get(4)?,
        payload: payload_text.and_then(|t| serde_json::from_str(&t).ok()),
        is_read: row.get::<_, i64>(6)? != 0,
        created_at: row.get(7)?,
    })
}
