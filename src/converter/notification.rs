//! Backend events to `session/update` payloads

use std::path::PathBuf;

use crate::types::ToolCall;
use crate::types::protocol::{
    ContentBlock, Diff, Plan, PlanEntry, SessionNotification, SessionUpdate, ToolCallContent,
    ToolCallLocation, ToolCallReport, ToolCallStatus, ToolCallUpdate,
};

/// Builds session notifications for one session
#[derive(Debug, Clone)]
pub struct NotificationConverter {
    session_id: String,
}

impl NotificationConverter {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
        }
    }

    pub fn wrap(&self, update: SessionUpdate) -> SessionNotification {
        SessionNotification {
            session_id: self.session_id.clone(),
            update,
        }
    }

    pub fn agent_message(&self, text: impl Into<String>) -> SessionNotification {
        self.wrap(SessionUpdate::AgentMessageChunk {
            content: ContentBlock::text(text),
        })
    }

    pub fn agent_thought(&self, text: impl Into<String>) -> SessionNotification {
        self.wrap(SessionUpdate::AgentThoughtChunk {
            content: ContentBlock::text(text),
        })
    }

    pub fn user_message(&self, text: impl Into<String>) -> SessionNotification {
        self.wrap(SessionUpdate::UserMessageChunk {
            content: ContentBlock::text(text),
        })
    }

    pub fn plan(&self, entries: Vec<PlanEntry>) -> SessionNotification {
        self.wrap(SessionUpdate::Plan(Plan { entries }))
    }

    /// First report of a tool call, in `pending` state
    pub fn tool_call_started(&self, call: &ToolCall) -> SessionNotification {
        self.wrap(SessionUpdate::ToolCall(ToolCallReport {
            tool_call_id: call.id.clone(),
            title: call.title(),
            kind: call.tool_type().kind(),
            status: ToolCallStatus::Pending,
            content: Vec::new(),
            locations: locations(call),
            raw_input: Some(call.raw_input()),
        }))
    }

    pub fn tool_call_in_progress(&self, call_id: &str) -> SessionNotification {
        self.wrap(SessionUpdate::ToolCallUpdate(ToolCallUpdate {
            tool_call_id: call_id.to_string(),
            status: Some(ToolCallStatus::InProgress),
            ..Default::default()
        }))
    }

    /// Terminal state of a tool call, with its output and optional diff
    pub fn tool_call_finished(
        &self,
        call_id: &str,
        status: ToolCallStatus,
        output: &str,
        diff: Option<Diff>,
    ) -> SessionNotification {
        let mut content = Vec::new();
        if !output.is_empty() {
            content.push(ToolCallContent::Content {
                content: ContentBlock::text(output),
            });
        }
        if let Some(diff) = diff {
            content.push(ToolCallContent::Diff(diff));
        }
        self.wrap(SessionUpdate::ToolCallUpdate(ToolCallUpdate {
            tool_call_id: call_id.to_string(),
            status: Some(status),
            content: (!content.is_empty()).then_some(content),
            ..Default::default()
        }))
    }
}

fn locations(call: &ToolCall) -> Vec<ToolCallLocation> {
    call.path()
        .map(|p| {
            vec![ToolCallLocation {
                path: PathBuf::from(p),
                line: None,
            }]
        })
        .unwrap_or_default()
}

/// Tool call fields as shown in a permission prompt
pub fn tool_call_fields(call: &ToolCall) -> ToolCallUpdate {
    let locations = locations(call);
    ToolCallUpdate {
        tool_call_id: call.id.clone(),
        title: Some(call.title()),
        kind: Some(call.tool_type().kind()),
        status: None,
        content: None,
        locations: (!locations.is_empty()).then_some(locations),
        raw_input: Some(call.raw_input()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ToolCallKind, ToolKind};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn edit_call() -> ToolCall {
        ToolCall::new(
            "t1",
            "edit",
            ToolCallKind::FileEdit {
                path: "/proj/src/lib.rs".into(),
                old_text: Some("a".into()),
                new_text: "b".into(),
            },
        )
    }

    #[test]
    fn test_tool_call_started() {
        let converter = NotificationConverter::new("s1");
        let notification = converter.tool_call_started(&edit_call());
        let SessionUpdate::ToolCall(report) = notification.update else {
            panic!("expected tool_call");
        };
        assert_eq!(report.title, "Edit /proj/src/lib.rs");
        assert_eq!(report.kind, ToolKind::Edit);
        assert_eq!(report.status, ToolCallStatus::Pending);
        assert_eq!(report.locations.len(), 1);
    }

    #[test]
    fn test_tool_call_finished_wire_shape() {
        let converter = NotificationConverter::new("s1");
        let notification = converter.tool_call_finished("t1", ToolCallStatus::Failed, "denied", None);
        assert_eq!(
            serde_json::to_value(&notification).unwrap(),
            json!({
                "sessionId": "s1",
                "update": {
                    "sessionUpdate": "tool_call_update",
                    "toolCallId": "t1",
                    "status": "failed",
                    "content": [{"type": "content", "content": {"type": "text", "text": "denied"}}]
                }
            })
        );
    }

    #[test]
    fn test_permission_fields() {
        let fields = tool_call_fields(&edit_call());
        assert_eq!(fields.title.as_deref(), Some("Edit /proj/src/lib.rs"));
        assert_eq!(fields.kind, Some(ToolKind::Edit));
        assert!(fields.status.is_none());
    }
}
