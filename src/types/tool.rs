//! Tool call types shared by the session, permission and tool layers

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tool kind for categorizing tools in the editor UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// File read operations
    Read,
    /// File edit/write operations
    Edit,
    /// Command execution
    Execute,
    /// Search operations
    Search,
    /// Other/unknown tool types
    #[default]
    Other,
}

/// Tool category used for permission option sets and cache keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolType {
    Read,
    FileEdit,
    Execute,
    Search,
    Other,
}

impl ToolType {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolType::Read => "read",
            ToolType::FileEdit => "file_edit",
            ToolType::Execute => "execute",
            ToolType::Search => "search",
            ToolType::Other => "other",
        }
    }

    /// UI kind reported in tool call updates
    pub fn kind(self) -> ToolKind {
        match self {
            ToolType::Read => ToolKind::Read,
            ToolType::FileEdit => ToolKind::Edit,
            ToolType::Execute => ToolKind::Execute,
            ToolType::Search => ToolKind::Search,
            ToolType::Other => ToolKind::Other,
        }
    }
}

impl fmt::Display for ToolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of a tool call, one variant per tool type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolCallKind {
    Read {
        path: String,
    },
    FileEdit {
        path: String,
        /// Text to replace; `None` writes `new_text` as the whole file
        #[serde(default)]
        old_text: Option<String>,
        new_text: String,
    },
    Execute {
        command: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
    Search {
        pattern: String,
    },
    Other {
        #[serde(default)]
        input: Value,
    },
}

/// A tool invocation proposed by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub kind: ToolCallKind,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: ToolCallKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            kind,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn tool_type(&self) -> ToolType {
        match self.kind {
            ToolCallKind::Read { .. } => ToolType::Read,
            ToolCallKind::FileEdit { .. } => ToolType::FileEdit,
            ToolCallKind::Execute { .. } => ToolType::Execute,
            ToolCallKind::Search { .. } => ToolType::Search,
            ToolCallKind::Other { .. } => ToolType::Other,
        }
    }

    /// The parameter that distinguishes one call of this type from another
    ///
    /// Path for read/file_edit, command for execute, pattern for search,
    /// tool name otherwise.
    pub fn discriminator(&self) -> &str {
        match &self.kind {
            ToolCallKind::Read { path } | ToolCallKind::FileEdit { path, .. } => path,
            ToolCallKind::Execute { command, .. } => command,
            ToolCallKind::Search { pattern } => pattern,
            ToolCallKind::Other { .. } => &self.name,
        }
    }

    /// File path touched by this call, if any
    pub fn path(&self) -> Option<&str> {
        match &self.kind {
            ToolCallKind::Read { path } | ToolCallKind::FileEdit { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Human-readable title for the editor UI
    pub fn title(&self) -> String {
        match &self.kind {
            ToolCallKind::Read { path } => format!("Read {}", path),
            ToolCallKind::FileEdit {
                path,
                old_text: None,
                ..
            } => format!("Write to {}", path),
            ToolCallKind::FileEdit { path, .. } => format!("Edit {}", path),
            ToolCallKind::Execute { command, .. } => {
                if self.description.is_empty() {
                    format!("Run: {}", truncate_chars(command, 50))
                } else {
                    self.description.clone()
                }
            }
            ToolCallKind::Search { pattern } => format!("Search: {}", pattern),
            ToolCallKind::Other { .. } => self.name.clone(),
        }
    }

    /// Raw parameters as reported to the editor
    pub fn raw_input(&self) -> Value {
        serde_json::to_value(&self.kind).unwrap_or(Value::Null)
    }
}

/// Truncate to at most `max_chars` characters, adding "..." if truncated
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let keep: String = s.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", keep)
}
