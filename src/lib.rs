//! Pulse real-time server library.
//! This crate exposes internal modules for integration testing.
//! The binary entry point is in main.rs.

pub mod config;
pub mod db;
pub mod error;
pub mod notify;
pub mod presence;
pub mod reaper;
pub mod routes;
pub mod state;
pub mod store;
pub mod ws;
