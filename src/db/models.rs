//! Database row types for all tables.
//! These correspond 1:1 to the SQLite schema defined in migrations.rs.

/// User record in the users table. Exists only as the identity collaborator
/// for connection admission — registration lives outside this service.
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub created_at: String,
}

/// Per-user profile row carrying the last-active timestamp.
#[derive(Debug, Clone)]
pub struct UserProfileRow {
    pub user_id: i64,
    pub last_active_at: Option<String>,
}

/// Persisted notification. `payload` is an optional JSON document stored
/// as TEXT; `created_at` is RFC 3339 UTC.
#[derive(Debug, Clone)]
pub struct NotificationRow {
    pub id: i64,
    pub recipient_id: i64,
    pub sender_id: Option<i64>,
    pub kind: String,
    pub message: String,
    pub payload: Option<serde_json::Value>,
    pub is_read: bool,
    pub created_at: String,
}
