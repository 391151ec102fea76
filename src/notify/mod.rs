pub mod dispatcher;
pub mod routes;

pub use dispatcher::NotificationDispatcher;
