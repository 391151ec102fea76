use std::sync::Arc;

use crate::db::DbPool;
use crate::notify::NotificationDispatcher;
use crate::presence::PresenceTracker;
use crate::ws::ConnectionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
///
/// The registry, tracker, and dispatcher are constructed once here and
/// injected everywhere — there are no ambient singletons.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection wrapped in Arc<Mutex>
    pub db: DbPool,
    /// Live user → channel mapping
    pub registry: Arc<ConnectionRegistry>,
    /// Online/offline state per user
    pub presence: Arc<PresenceTracker>,
    /// Notification persistence bridge + subscription sets
    pub dispatcher: Arc<NotificationDispatcher>,
}

impl AppState {
    /// Wire up the service graph over a database pool. Leaf to root:
    /// registry, then presence tracker, then dispatcher.
    pub fn new(db: DbPool) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let presence = Arc::new(PresenceTracker::new(registry.clone(), db.clone()));
        let dispatcher = Arc::new(NotificationDispatcher::new(
            registry.clone(),
            presence.clone(),
            db.clone(),
        ));

        Self {
            db,
            registry,
            presence,
            dispatcher,
        }
    }
}
