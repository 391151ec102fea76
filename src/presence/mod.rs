pub mod routes;
pub mod tracker;

pub use tracker::{PresenceStatus, PresenceTracker};
