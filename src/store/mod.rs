//! Persistence collaborators consumed by the realtime core.
//!
//! Each function takes the shared pool and runs its query on the blocking
//! thread pool. The realtime core treats these as external stores: it does
//! not own the schema, only the create/read/mark-read contract.

pub mod notifications;
pub mod profiles;
