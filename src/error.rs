//! Error taxonomy for the realtime core.
//!
//! Delivery failures are non-fatal signals (the registry evicts the dead
//! channel and callers demote presence); persistence and not-found errors
//! propagate to whoever asked for the operation.

#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    /// The recipient's channel write failed. The registry has already
    /// evicted the connection by the time this surfaces.
    #[error("channel to user {0} is closed")]
    Delivery(i64),

    /// The persistence store rejected a read or write. Never retried here.
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// The referenced notification does not exist.
    #[error("notification {0} not found")]
    NotFound(i64),

    /// Inbound envelope could not be parsed. The message is dropped;
    /// the connection stays open.
    #[error("malformed client message: {0}")]
    MalformedMessage(String),
}

impl From<rusqlite::Error> for RealtimeError {
    fn from(e: rusqlite::Error) -> Self {
        RealtimeError::Persistence(e.to_string())
    }
}

impl From<tokio::task::JoinError> for RealtimeError {
    fn from(e: tokio::task::JoinError) -> Self {
        RealtimeError::Persistence(format!("blocking task failed: {e}"))
    }
}
