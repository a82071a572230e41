//! One prompt turn: backend events in, session updates and tool runs out

use std::fmt;
use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::backend::{Backend, BackendEvent, BackendRequest, ToolOutcome, ToolStatus};
use crate::client::EditorClient;
use crate::converter::render_prompt;
use crate::files::FileAccess;
use crate::permissions::PermissionEngine;
use crate::resolver::FileResolver;
use crate::telemetry::ErrorTraceExt;
use crate::tools::{ToolContext, ToolExecutor};
use crate::types::protocol::{ContentBlock, StopReason, ToolCallStatus};
use crate::types::{AgentError, Result, ToolCall, ToolCallKind};

use super::history::HistoryEntry;
use super::session::{Session, SessionState};

/// Shared collaborators a turn needs
#[derive(Clone)]
pub struct TurnServices {
    pub backend: Arc<dyn Backend>,
    pub permissions: Arc<PermissionEngine>,
    pub resolver: Arc<FileResolver>,
    pub tools: Arc<dyn ToolExecutor>,
    pub client: Arc<dyn EditorClient>,
    pub files: FileAccess,
}

impl fmt::Debug for TurnServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TurnServices")
            .field("permissions", &self.permissions)
            .field("resolver", &self.resolver)
            .field("files", &self.files)
            .finish_non_exhaustive()
    }
}

/// A prompt's reserved place in its session's turn order
///
/// Taking a ticket cancels the turn in flight, so tickets must be taken in
/// the order prompts arrive.
#[derive(Debug)]
pub struct TurnTicket {
    seq: u64,
    token: CancellationToken,
}

impl Session {
    /// Reserve the next turn, superseding the one in flight
    pub fn reserve_turn(&self) -> Result<TurnTicket> {
        if self.is_destroyed() {
            return Err(AgentError::session_not_found(&self.session_id));
        }
        let (seq, token) = self.begin_turn();
        Ok(TurnTicket { seq, token })
    }

    /// Run one prompt turn to completion
    ///
    /// A turn already in flight is cancelled first; this one starts once it
    /// has finished. Cancellation resolves with [`StopReason::Cancelled`].
    pub async fn prompt(
        &self,
        blocks: Vec<ContentBlock>,
        services: &TurnServices,
    ) -> Result<StopReason> {
        let ticket = self.reserve_turn()?;
        self.run_prompt(ticket, blocks, services).await
    }

    /// Run a turn reserved with [`Session::reserve_turn`]
    #[tracing::instrument(name = "prompt", skip_all, fields(session_id = %self.session_id, turn = ticket.seq))]
    pub async fn run_prompt(
        &self,
        ticket: TurnTicket,
        blocks: Vec<ContentBlock>,
        services: &TurnServices,
    ) -> Result<StopReason> {
        let TurnTicket { seq, token } = ticket;

        let guard = tokio::select! {
            guard = self.prompt_lock.lock() => guard,
            () = token.cancelled() => {
                self.end_turn(seq);
                return Ok(StopReason::Cancelled);
            }
            () = tokio::time::sleep(self.cancel_grace) => {
                tracing::warn!(
                    grace_ms = self.cancel_grace.as_millis(),
                    "Previous prompt did not stop within the grace period"
                );
                token.cancel();
                self.end_turn(seq);
                return Err(AgentError::internal("previous prompt is still running"));
            }
        };

        self.set_state(SessionState::Prompting);
        self.touch();
        services.permissions.purge_once();

        let result = self.run_turn(blocks, services, &token).await;

        self.flush_updates().await;
        self.end_turn(seq);
        self.set_state(SessionState::Idle);
        self.touch();
        drop(guard);

        match result {
            Ok(stop) => {
                tracing::info!(stop_reason = ?stop, "Prompt finished");
                Ok(stop)
            }
            Err(_) if token.is_cancelled() => Ok(StopReason::Cancelled),
            Err(e) => {
                e.trace_error("session/prompt");
                Err(e)
            }
        }
    }

    async fn run_turn(
        &self,
        blocks: Vec<ContentBlock>,
        services: &TurnServices,
        token: &CancellationToken,
    ) -> Result<StopReason> {
        let rendered = render_prompt(
            &self.session_id,
            &self.cwd,
            &blocks,
            &services.resolver,
            &services.files,
        )
        .await;

        let request = BackendRequest {
            session_id: self.session_id.clone(),
            cwd: self.cwd.clone(),
            prompt: rendered.text,
            history: self.history(),
        };
        self.record(HistoryEntry::user(rendered.user_text));

        let mut events = tokio::select! {
            stream = services.backend.submit(request, token.clone()) => stream?,
            () = token.cancelled() => return Ok(StopReason::Cancelled),
        };

        let mut reply = String::new();
        let stop = loop {
            let event = tokio::select! {
                biased;
                () = token.cancelled() => break StopReason::Cancelled,
                event = events.next() => event,
            };
            let Some(event) = event else {
                break StopReason::EndTurn;
            };
            self.touch();

            match event? {
                BackendEvent::MessageChunk(text) => {
                    reply.push_str(&text);
                    self.emit(self.converter().agent_message(text));
                }
                BackendEvent::ThoughtChunk(text) => {
                    self.emit(self.converter().agent_thought(text));
                }
                BackendEvent::Plan(entries) => {
                    self.emit(self.converter().plan(entries));
                }
                BackendEvent::ToolCall { call, reply: tx } => {
                    let outcome = self.run_tool(&call, services, token).await;
                    if tx.send(outcome).is_err() {
                        tracing::debug!(tool_call_id = %call.id, "Backend stopped waiting for tool outcome");
                    }
                }
                BackendEvent::TurnEnd(stop) => break stop,
            }
        };

        if !reply.is_empty() {
            self.record(HistoryEntry::agent(reply));
        }
        Ok(if token.is_cancelled() {
            StopReason::Cancelled
        } else {
            stop
        })
    }

    /// Report, authorize and execute one tool call
    async fn run_tool(
        &self,
        call: &ToolCall,
        services: &TurnServices,
        token: &CancellationToken,
    ) -> ToolOutcome {
        let converter = self.converter();
        self.emit(converter.tool_call_started(call));

        let decision = tokio::select! {
            decision = services.permissions.decide(&self.session_id, &self.cwd, call, services.client.as_ref()) => decision,
            () = token.cancelled() => {
                self.emit(converter.tool_call_finished(&call.id, ToolCallStatus::Failed, "Cancelled", None));
                return ToolOutcome::new(ToolStatus::Cancelled, "Cancelled");
            }
        };

        if !decision.allowed {
            tracing::info!(tool_call_id = %call.id, cache_key = %decision.cache_key, "Tool call denied");
            self.emit(converter.tool_call_finished(
                &call.id,
                ToolCallStatus::Failed,
                "Permission denied",
                None,
            ));
            return ToolOutcome::new(ToolStatus::Denied, "Permission denied by user");
        }

        self.emit(converter.tool_call_in_progress(&call.id));
        let context = ToolContext {
            session_id: self.session_id.clone(),
            cwd: self.cwd.clone(),
            files: services.files.clone(),
        };
        let output = services.tools.execute(&context, call, token.clone()).await;

        if output.status == ToolStatus::Completed {
            if let ToolCallKind::FileEdit { path, .. } = &call.kind {
                services.resolver.invalidate_content(&self.cwd.join(path));
            }
        }

        let status = match output.status {
            ToolStatus::Completed => ToolCallStatus::Completed,
            _ => ToolCallStatus::Failed,
        };
        self.emit(converter.tool_call_finished(&call.id, status, &output.text, output.diff));
        ToolOutcome::new(output.status, output.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, EventStream};
    use crate::client::testing::{PermissionReply, RecordingClient};
    use crate::permissions::options::{ALLOW_COMMAND, ALLOW_ONCE};
    use crate::session::SessionManager;
    use crate::tools::WorkspaceTools;
    use crate::types::protocol::SessionUpdate;
    use crate::types::{PermissionConfig, ResolverConfig, SessionConfig};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;
    use tokio::sync::{Notify, oneshot};

    /// Plays back a fixed script and records what it was asked
    #[derive(Default)]
    struct ScriptedBackend {
        requests: Mutex<Vec<BackendRequest>>,
        outcomes: Arc<Mutex<Vec<ToolOutcome>>>,
        script: Mutex<Vec<Vec<Step>>>,
    }

    #[derive(Clone)]
    enum Step {
        Say(&'static str),
        Tool(ToolCall),
        Hang,
        Fail(BackendError),
        End,
    }

    impl ScriptedBackend {
        fn new(turns: Vec<Vec<Step>>) -> Self {
            Self {
                script: Mutex::new(turns),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl Backend for ScriptedBackend {
        async fn submit(
            &self,
            request: BackendRequest,
            cancel: CancellationToken,
        ) -> std::result::Result<EventStream, BackendError> {
            self.requests.lock().unwrap().push(request);
            let steps = {
                let mut script = self.script.lock().unwrap();
                if script.is_empty() {
                    vec![Step::End]
                } else {
                    script.remove(0)
                }
            };
            let outcomes = Arc::clone(&self.outcomes);
            let stream = async_stream::stream! {
                for step in steps {
                    match step {
                        Step::Say(text) => yield Ok(BackendEvent::MessageChunk(text.to_string())),
                        Step::Tool(call) => {
                            let (tx, rx) = oneshot::channel();
                            yield Ok(BackendEvent::ToolCall { call, reply: tx });
                            if let Ok(outcome) = rx.await {
                                outcomes.lock().unwrap().push(outcome);
                            }
                        }
                        Step::Hang => cancel.cancelled().await,
                        Step::Fail(e) => yield Err(e),
                        Step::End => yield Ok(BackendEvent::TurnEnd(StopReason::EndTurn)),
                    }
                }
            };
            Ok(Box::pin(stream))
        }
    }

    struct Fixture {
        _dir: TempDir,
        session: Arc<Session>,
        client: Arc<RecordingClient>,
        backend: Arc<ScriptedBackend>,
        services: TurnServices,
    }

    fn fixture(turns: Vec<Vec<Step>>, replies: Vec<PermissionReply>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let client = Arc::new(RecordingClient::with_replies(replies));
        let backend = Arc::new(ScriptedBackend::new(turns));
        let resolver = Arc::new(FileResolver::new(&ResolverConfig::default()));
        let services = TurnServices {
            backend: backend.clone(),
            permissions: Arc::new(PermissionEngine::new(&PermissionConfig::default())),
            tools: Arc::new(WorkspaceTools::new(resolver.ignores(), 10_000)),
            resolver,
            client: client.clone(),
            files: FileAccess::local(),
        };
        let config = SessionConfig {
            cancel_grace_ms: 1_000,
            ..SessionConfig::default()
        };
        let session = Arc::new(Session::new(
            "s1".into(),
            dir.path().to_path_buf(),
            &config,
            client.clone(),
        ));
        Fixture {
            _dir: dir,
            session,
            client,
            backend,
            services,
        }
    }

    fn statuses(client: &RecordingClient) -> Vec<ToolCallStatus> {
        client
            .updates()
            .into_iter()
            .filter_map(|n| match n.update {
                SessionUpdate::ToolCall(report) => Some(report.status),
                SessionUpdate::ToolCallUpdate(update) => update.status,
                _ => None,
            })
            .collect()
    }

    fn ls() -> ToolCall {
        ToolCall::new(
            "t1",
            "bash",
            ToolCallKind::Execute {
                command: "ls".into(),
                timeout_ms: None,
            },
        )
    }

    #[tokio::test]
    async fn test_prompt_streams_chunks_and_records_history() {
        let f = fixture(vec![vec![Step::Say("Hel"), Step::Say("lo"), Step::End]], vec![]);
        let stop = f
            .session
            .prompt(vec![ContentBlock::text("hi")], &f.services)
            .await
            .unwrap();
        assert_eq!(stop, StopReason::EndTurn);
        assert_eq!(f.client.updates().len(), 2);

        let history = f.session.history();
        assert_eq!(history, vec![HistoryEntry::user("hi"), HistoryEntry::agent("Hello")]);

        f.session
            .prompt(vec![ContentBlock::text("again")], &f.services)
            .await
            .unwrap();
        let requests = f.backend.requests.lock().unwrap();
        assert_eq!(requests[1].history.len(), 2);
        assert_eq!(requests[1].prompt, "again");
    }

    #[tokio::test]
    async fn test_denied_tool_reports_failed_and_turn_continues() {
        let f = fixture(
            vec![vec![Step::Tool(ls()), Step::Say("ok"), Step::End]],
            vec![PermissionReply::Cancel],
        );
        let stop = f
            .session
            .prompt(vec![ContentBlock::text("list")], &f.services)
            .await
            .unwrap();

        assert_eq!(stop, StopReason::EndTurn);
        assert_eq!(
            statuses(&f.client),
            vec![ToolCallStatus::Pending, ToolCallStatus::Failed]
        );
        let outcomes = f.backend.outcomes.lock().unwrap();
        assert_eq!(outcomes[0].status, ToolStatus::Denied);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_always_grant_skips_second_prompt() {
        let f = fixture(
            vec![
                vec![Step::Tool(ls()), Step::End],
                vec![Step::Tool(ls()), Step::End],
            ],
            vec![PermissionReply::Select(ALLOW_COMMAND)],
        );
        for _ in 0..2 {
            f.session
                .prompt(vec![ContentBlock::text("list")], &f.services)
                .await
                .unwrap();
        }
        assert_eq!(f.client.permission_count(), 1);
        let outcomes = f.backend.outcomes.lock().unwrap();
        assert!(outcomes.iter().all(|o| o.status == ToolStatus::Completed));
        assert_eq!(
            statuses(&f.client),
            vec![
                ToolCallStatus::Pending,
                ToolCallStatus::InProgress,
                ToolCallStatus::Completed,
                ToolCallStatus::Pending,
                ToolCallStatus::InProgress,
                ToolCallStatus::Completed,
            ]
        );
    }

    #[tokio::test]
    async fn test_session_waiting_on_permission_is_not_reaped() {
        let f = fixture(
            vec![vec![Step::Tool(ls()), Step::End]],
            vec![PermissionReply::Cancel],
        );
        let gate = Arc::new(Notify::new());
        *f.client.permission_gate.lock().unwrap() = Some(Arc::clone(&gate));
        let manager = SessionManager::new(
            SessionConfig {
                idle_timeout_secs: 1,
                ..SessionConfig::default()
            },
            f.client.clone(),
        );
        let session = manager.create(f.session.cwd.clone()).unwrap();

        let running = tokio::spawn({
            let session = Arc::clone(&session);
            let services = f.services.clone();
            async move { session.prompt(vec![ContentBlock::text("list")], &services).await }
        });
        tokio::time::timeout(Duration::from_secs(2), async {
            while f.client.permission_count() == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        // The editor has been silent far longer than the idle timeout
        let later = Instant::now() + Duration::from_secs(30);
        assert!(manager.reap_expired_at(later).is_empty());
        assert!(!session.is_destroyed());

        gate.notify_one();
        assert_eq!(running.await.unwrap().unwrap(), StopReason::EndTurn);
        assert_eq!(manager.reap_expired_at(later), vec![session.session_id.clone()]);
    }

    #[tokio::test]
    async fn test_edit_tool_writes_file() {
        let f = fixture(
            vec![vec![
                Step::Tool(ToolCall::new(
                    "t1",
                    "write",
                    ToolCallKind::FileEdit {
                        path: "out.txt".into(),
                        old_text: None,
                        new_text: "done".into(),
                    },
                )),
                Step::End,
            ]],
            vec![PermissionReply::Select(ALLOW_ONCE)],
        );
        f.session
            .prompt(vec![ContentBlock::text("write")], &f.services)
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(f.session.cwd.join("out.txt")).unwrap(),
            "done"
        );
    }

    #[tokio::test]
    async fn test_cancel_resolves_cancelled() {
        let f = fixture(vec![vec![Step::Say("thinking"), Step::Hang]], vec![]);
        let session = Arc::clone(&f.session);
        let services = f.services.clone();
        let running =
            tokio::spawn(async move { session.prompt(vec![ContentBlock::text("go")], &services).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(f.session.cancel());

        let stop = tokio::time::timeout(Duration::from_secs(2), running)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(stop, StopReason::Cancelled);
        assert_eq!(f.session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_new_prompt_supersedes_running_one() {
        let f = fixture(vec![vec![Step::Hang], vec![Step::Say("second"), Step::End]], vec![]);
        let session = Arc::clone(&f.session);
        let services = f.services.clone();
        let first =
            tokio::spawn(async move { session.prompt(vec![ContentBlock::text("one")], &services).await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = f
            .session
            .prompt(vec![ContentBlock::text("two")], &f.services)
            .await
            .unwrap();
        assert_eq!(second, StopReason::EndTurn);
        assert_eq!(first.await.unwrap().unwrap(), StopReason::Cancelled);
    }

    #[tokio::test]
    async fn test_backend_error_propagates() {
        let f = fixture(
            vec![vec![Step::Fail(BackendError::RateLimited {
                retry_after: Some(Duration::from_secs(3)),
            })]],
            vec![],
        );
        let err = f
            .session
            .prompt(vec![ContentBlock::text("x")], &f.services)
            .await
            .unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
        assert_eq!(f.session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_prompt_on_destroyed_session_fails() {
        let f = fixture(vec![], vec![]);
        f.session.destroy();
        let err = f
            .session
            .prompt(vec![ContentBlock::text("x")], &f.services)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::SessionNotFound(_)));
    }
}
