//! Protocol agent
//!
//! Dispatches inbound editor requests to sessions and serves the
//! connection until the editor goes away.

mod core;
mod handlers;
mod runner;

pub use core::{BridgeAgent, MaintenanceReport};
pub use runner::{serve, serve_stdio};
