//! Mirror server for IDE chat panels: authenticated HTTP and WebSocket
//! surface over the bridge engine.

pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod push_store;
pub mod server;
pub mod styles;
