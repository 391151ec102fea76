//! Profile store and user directory: identity lookup at the connection
//! admission boundary, plus the best-effort last-active timestamp write.

use chrono::{DateTime, Utc};

use crate::db::DbPool;
use crate::error::RealtimeError;

/// Check whether a user id resolves to a known identity.
pub async fn user_exists(db: &DbPool, user_id: i64) -> Result<bool, RealtimeError> {
    let db = db.clone();

    tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|_| RealtimeError::Persistence("database lock poisoned".into()))?;

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM users WHERE id = ?1",
            rusqlite::params![user_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    })
    .await?
}

/// Record a user's last-active timestamp. Callers treat failures here as
/// ignorable: a presence transition must never abort on a profile write.
pub async fn update_last_active(
    db: &DbPool,
    user_id: i64,
    at: DateTime<Utc>,
) -> Result<(), RealtimeError> {
    let db = db.clone();

    tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|_| RealtimeError::Persistence("database lock poisoned".into()))?;

        conn.execute(
            "INSERT INTO user_profiles (user_id, last_active_at) VALUES (?1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET last_active_at = ?2",
            rusqlite::params![user_id, at.to_rfc3339()],
        )?;
        Ok(())
    })
    .await?
}

/// Insert a user row. Registration is out of scope for this service;
/// this exists for tests and seeding.
pub async fn insert_user(db: &DbPool, user_id: i64, username: &str) -> Result<(), RealtimeError> {
    let db = db.clone();
    let username = username.to_string();

    tokio::task::spawn_blocking(move || {
        let conn = db
            .lock()
            .map_err(|_| RealtimeError::Persistence("database lock poisoned".into()))?;

        conn.execute(
            "INSERT INTO users (id, username, created_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![user_id, username, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db_in_memory;

    #[tokio::test]
    async fn unknown_user_does_not_exist() {
        let db = init_db_in_memory().unwrap();
        assert!(!user_exists(&db, 42).await.unwrap());

        insert_user(&db, 42, "carol").await.unwrap();
        assert!(user_exists(&db, 42).await.unwrap());
    }

    #[tokio::test]
    async fn last_active_upserts() {
        let db = init_db_in_memory().unwrap();
        insert_user(&db, 1, "alice").await.unwrap();

        // Two writes for the same user must not conflict.
        update_last_active(&db, 1, Utc::now()).await.unwrap();
        update_last_active(&db, 1, Utc::now()).await.unwrap();
    }

    #[tokio::test]
    async fn last_active_for_unknown_user_fails() {
        let db = init_db_in_memory().unwrap();
        let err = update_last_active(&db, 9, Utc::now()).await.unwrap_err();
        assert!(matches!(err, RealtimeError::Persistence(_)));
    }
}
