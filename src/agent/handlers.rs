//! Protocol request handlers
//!
//! Implements handlers for:
//! - initialize: negotiate version and capabilities
//! - session/new, session/load, session/prompt, session/cancel
//! - fs/read_text_file, fs/write_text_file (capability gated)

use tracing::instrument;

use super::core::BridgeAgent;
use crate::files::slice_lines;
use crate::resolver::{ensure_contained, normalize};
use crate::transport::Admission;
use crate::types::protocol::{
    AgentCapabilities, CancelNotification, Implementation, InitializeRequest, InitializeResponse,
    LoadSessionRequest, LoadSessionResponse, NewSessionRequest, NewSessionResponse,
    PROTOCOL_VERSION, PromptCapabilities, PromptRequest, PromptResponse, ReadTextFileRequest,
    ReadTextFileResponse, WriteTextFileRequest, WriteTextFileResponse,
};
use crate::types::{AgentError, Result};

#[instrument(
    name = "initialize",
    skip_all,
    fields(protocol_version = request.protocol_version)
)]
pub fn initialize(agent: &BridgeAgent, request: InitializeRequest) -> InitializeResponse {
    let protocol_version = request.protocol_version.min(PROTOCOL_VERSION);
    agent.set_capabilities(request.client_capabilities);

    tracing::info!(
        negotiated = protocol_version,
        read_text_file = request.client_capabilities.fs.read_text_file,
        write_text_file = request.client_capabilities.fs.write_text_file,
        "Handling initialize request"
    );

    InitializeResponse {
        protocol_version,
        agent_capabilities: AgentCapabilities {
            load_session: true,
            prompt_capabilities: PromptCapabilities {
                image: true,
                embedded_context: true,
            },
        },
        agent_info: Implementation {
            name: agent.name().to_string(),
            version: agent.version().to_string(),
        },
    }
}

#[instrument(name = "session_new", skip_all, fields(cwd = %request.cwd.display()))]
pub fn new_session(agent: &BridgeAgent, request: NewSessionRequest) -> Result<NewSessionResponse> {
    if !request.cwd.is_absolute() {
        return Err(AgentError::invalid_params(format!(
            "cwd must be an absolute path: {}",
            request.cwd.display()
        )));
    }
    let session = agent.sessions().create(normalize(&request.cwd))?;
    Ok(NewSessionResponse {
        session_id: session.session_id.clone(),
    })
}

#[instrument(name = "session_load", skip_all, fields(session_id = %request.session_id))]
pub async fn load_session(
    agent: &BridgeAgent,
    request: LoadSessionRequest,
    mut admission: Admission,
) -> Result<LoadSessionResponse> {
    let session = agent.sessions().get_or_error(&request.session_id)?;
    if let Some(cwd) = &request.cwd {
        if normalize(cwd) != session.cwd {
            return Err(AgentError::invalid_params(format!(
                "cwd {} does not match the session root {}",
                cwd.display(),
                session.cwd.display()
            )));
        }
    }

    session.touch();
    let replayed = session.replay_history();
    admission.admit();
    session.flush_updates().await;
    tracing::info!(replayed, "Session loaded");
    Ok(LoadSessionResponse {})
}

#[instrument(
    name = "session_prompt",
    skip_all,
    fields(session_id = %request.session_id, blocks = request.prompt.len())
)]
pub async fn prompt(
    agent: &BridgeAgent,
    request: PromptRequest,
    mut admission: Admission,
) -> Result<PromptResponse> {
    let session = agent.sessions().get_or_error(&request.session_id)?;
    let services = agent.services()?;
    // A cancel read after this frame must find the turn
    let ticket = session.reserve_turn()?;
    admission.admit();
    let stop_reason = session.run_prompt(ticket, request.prompt, &services).await?;
    Ok(PromptResponse { stop_reason })
}

pub fn cancel(agent: &BridgeAgent, notification: CancelNotification) {
    match agent.sessions().get(&notification.session_id) {
        Some(session) => {
            if !session.cancel() {
                tracing::debug!(session_id = %notification.session_id, "Cancel with no prompt in flight");
            }
        }
        None => {
            tracing::debug!(session_id = %notification.session_id, "Cancel for unknown session");
        }
    }
}

#[instrument(name = "fs_read_text_file", skip_all, fields(session_id = %request.session_id))]
pub async fn read_text_file(
    agent: &BridgeAgent,
    request: ReadTextFileRequest,
) -> Result<ReadTextFileResponse> {
    let session = agent.sessions().get_or_error(&request.session_id)?;
    let path = ensure_contained(&session.cwd, &request.path)?;
    let content = tokio::fs::read_to_string(&path).await?;
    Ok(ReadTextFileResponse {
        content: slice_lines(&content, request.line, request.limit),
    })
}

#[instrument(name = "fs_write_text_file", skip_all, fields(session_id = %request.session_id))]
pub async fn write_text_file(
    agent: &BridgeAgent,
    request: WriteTextFileRequest,
) -> Result<WriteTextFileResponse> {
    let session = agent.sessions().get_or_error(&request.session_id)?;
    let path = ensure_contained(&session.cwd, &request.path)?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, request.content).await?;
    agent.resolver().invalidate_content(&path);
    Ok(WriteTextFileResponse {})
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, BackendError, BackendRequest, EventStream};
    use crate::client::testing::RecordingClient;
    use crate::types::BridgeConfig;
    use crate::types::protocol::{ClientCapabilities, FileSystemCapability, SessionUpdate};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    struct EchoBackend;

    #[async_trait]
    impl Backend for EchoBackend {
        async fn submit(
            &self,
            request: BackendRequest,
            _cancel: CancellationToken,
        ) -> std::result::Result<EventStream, BackendError> {
            let reply = format!("echo: {}", request.prompt);
            Ok(Box::pin(futures::stream::iter([Ok(
                crate::backend::BackendEvent::MessageChunk(reply),
            )])))
        }
    }

    fn agent(client: Arc<RecordingClient>, max_sessions: usize) -> BridgeAgent {
        let mut config = BridgeConfig::default();
        config.sessions.max_sessions = max_sessions;
        let agent = BridgeAgent::new(config, Arc::new(EchoBackend), client);
        initialize(
            &agent,
            InitializeRequest {
                protocol_version: 7,
                client_capabilities: ClientCapabilities {
                    fs: FileSystemCapability {
                        read_text_file: true,
                        write_text_file: true,
                    },
                },
            },
        );
        agent
    }

    fn new_in(agent: &BridgeAgent, dir: &TempDir) -> String {
        new_session(
            agent,
            NewSessionRequest {
                cwd: dir.path().to_path_buf(),
            },
        )
        .unwrap()
        .session_id
    }

    #[test]
    fn test_initialize_negotiates_lowest_version() {
        let agent = BridgeAgent::new(
            BridgeConfig::default(),
            Arc::new(EchoBackend),
            Arc::new(RecordingClient::default()),
        );
        let response = initialize(
            &agent,
            InitializeRequest {
                protocol_version: 9,
                client_capabilities: ClientCapabilities::default(),
            },
        );
        assert_eq!(response.protocol_version, PROTOCOL_VERSION);
        assert!(response.agent_capabilities.load_session);
        assert_eq!(response.agent_info.name, "acp-bridge");
    }

    #[tokio::test]
    async fn test_new_session_requires_absolute_cwd() {
        let agent = agent(Arc::new(RecordingClient::default()), 4);
        let err = new_session(
            &agent,
            NewSessionRequest {
                cwd: PathBuf::from("relative/dir"),
            },
        )
        .unwrap_err();
        assert!(matches!(err, AgentError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn test_load_replays_history() {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(RecordingClient::default());
        let agent = agent(Arc::clone(&client), 4);
        let session_id = new_in(&agent, &dir);

        let response = prompt(
            &agent,
            PromptRequest {
                session_id: session_id.clone(),
                prompt: vec![crate::types::protocol::ContentBlock::text("ping")],
            },
            Admission::default(),
        )
        .await
        .unwrap();
        assert_eq!(response.stop_reason, crate::types::protocol::StopReason::EndTurn);

        let before = client.updates().len();
        load_session(
            &agent,
            LoadSessionRequest {
                session_id: session_id.clone(),
                cwd: Some(dir.path().to_path_buf()),
            },
            Admission::default(),
        )
        .await
        .unwrap();

        let replayed: Vec<_> = client.updates().into_iter().skip(before).collect();
        assert_eq!(replayed.len(), 2);
        assert!(matches!(
            replayed[0].update,
            SessionUpdate::UserMessageChunk { .. }
        ));
    }

    #[tokio::test]
    async fn test_load_rejects_other_cwd_and_unknown_id() {
        let dir = TempDir::new().unwrap();
        let agent = agent(Arc::new(RecordingClient::default()), 4);
        let session_id = new_in(&agent, &dir);

        let err = load_session(
            &agent,
            LoadSessionRequest {
                session_id,
                cwd: Some(PathBuf::from("/elsewhere")),
            },
            Admission::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AgentError::InvalidParams(_)));

        let err = load_session(
            &agent,
            LoadSessionRequest {
                session_id: "nope".into(),
                cwd: None,
            },
            Admission::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AgentError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_prompt_after_destroy_is_not_found() {
        let dir = TempDir::new().unwrap();
        let agent = agent(Arc::new(RecordingClient::default()), 4);
        let session_id = new_in(&agent, &dir);
        agent.sessions().destroy(&session_id);

        let err = prompt(
            &agent,
            PromptRequest {
                session_id,
                prompt: vec![],
            },
            Admission::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AgentError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_fs_write_then_read_and_traversal() {
        let dir = TempDir::new().unwrap();
        let agent = agent(Arc::new(RecordingClient::default()), 4);
        let session_id = new_in(&agent, &dir);

        write_text_file(
            &agent,
            WriteTextFileRequest {
                session_id: session_id.clone(),
                path: dir.path().join("sub/new.txt"),
                content: "a\nb\n".into(),
            },
        )
        .await
        .unwrap();
        let read = read_text_file(
            &agent,
            ReadTextFileRequest {
                session_id: session_id.clone(),
                path: dir.path().join("sub/new.txt"),
                line: None,
                limit: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(read.content, "a\nb\n");

        let err = read_text_file(
            &agent,
            ReadTextFileRequest {
                session_id,
                path: PathBuf::from("/etc/passwd"),
                line: None,
                limit: None,
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AgentError::Resolve(_)));
    }

    #[tokio::test]
    async fn test_cancel_unknown_session_is_harmless() {
        let agent = agent(Arc::new(RecordingClient::default()), 4);
        cancel(
            &agent,
            CancelNotification {
                session_id: "ghost".into(),
            },
        );
    }
}
