//! Conversion between wire content and backend text/events
//!
//! - prompt `ContentBlock`s → backend prompt text
//! - backend events → `session/update` notifications

pub mod notification;
mod prompt;

pub use notification::{NotificationConverter, tool_call_fields};
pub use prompt::{RenderedPrompt, render_prompt};
