//! Session management
//!
//! This module handles:
//! - Session lifecycle (create, get, destroy, idle reaping)
//! - Prompt turns against the backend
//! - Conversation history and outbound update buffering

mod history;
mod manager;
#[allow(clippy::module_inception)]
mod session;
mod turn;
mod update_buffer;

pub use history::{History, HistoryEntry, Role};
pub use manager::SessionManager;
pub use session::{Session, SessionState};
pub use turn::{TurnServices, TurnTicket};
pub use update_buffer::UpdateBuffer;
