//! Relay server and per-client connection handling.

pub mod core;
pub mod handlers;

pub use core::RelayServer;
