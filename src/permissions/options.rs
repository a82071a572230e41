//! Permission option sets offered to the editor, per tool type

use crate::types::ToolType;
use crate::types::protocol::{PermissionOption, PermissionOptionKind};

pub const ALLOW_ONCE: &str = "allow_once";
pub const REJECT_ONCE: &str = "reject_once";
pub const ALLOW_ALL_READS: &str = "allow_all_reads";
pub const ALLOW_ALL_SEARCHES: &str = "allow_all_searches";
pub const ALLOW_FILE: &str = "allow_file";
pub const REJECT_FILE: &str = "reject_file";
pub const ALLOW_COMMAND: &str = "allow_command";
pub const REJECT_COMMAND: &str = "reject_command";

fn option(id: &str, name: &str, kind: PermissionOptionKind) -> PermissionOption {
    PermissionOption {
        option_id: id.to_string(),
        name: name.to_string(),
        kind,
    }
}

/// Options presented for a tool of the given type
///
/// Read and search offer a kind-wide grant; file edits and commands offer
/// persistent allow and deny for the specific path or command.
pub fn options_for(tool_type: ToolType) -> Vec<PermissionOption> {
    use PermissionOptionKind::*;

    match tool_type {
        ToolType::Read => vec![
            option(ALLOW_ALL_READS, "Allow all reads", AllowAlways),
            option(ALLOW_ONCE, "Allow", AllowOnce),
            option(REJECT_ONCE, "Reject", RejectOnce),
        ],
        ToolType::Search => vec![
            option(ALLOW_ALL_SEARCHES, "Allow all searches", AllowAlways),
            option(ALLOW_ONCE, "Allow", AllowOnce),
            option(REJECT_ONCE, "Reject", RejectOnce),
        ],
        ToolType::FileEdit => vec![
            option(ALLOW_FILE, "Always allow edits to this file", AllowAlways),
            option(ALLOW_ONCE, "Allow", AllowOnce),
            option(REJECT_ONCE, "Reject", RejectOnce),
            option(REJECT_FILE, "Never allow edits to this file", RejectAlways),
        ],
        ToolType::Execute => vec![
            option(ALLOW_COMMAND, "Always allow this command", AllowAlways),
            option(ALLOW_ONCE, "Allow", AllowOnce),
            option(REJECT_ONCE, "Reject", RejectOnce),
            option(REJECT_COMMAND, "Never allow this command", RejectAlways),
        ],
        ToolType::Other => vec![
            option(ALLOW_ONCE, "Allow", AllowOnce),
            option(REJECT_ONCE, "Reject", RejectOnce),
        ],
    }
}

/// Whether an `AllowAlways` grant for this type covers every call of the type
pub fn grant_is_kind_wide(tool_type: ToolType) -> bool {
    matches!(tool_type, ToolType::Read | ToolType::Search)
}
