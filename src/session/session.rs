//! Per-conversation state
//!
//! A session owns its history, its cancellation tokens and the buffer that
//! carries its updates to the editor. Prompt turns live in `turn.rs`.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::client::EditorClient;
use crate::converter::NotificationConverter;
use crate::types::SessionConfig;
use crate::types::protocol::SessionNotification;

use super::history::{History, HistoryEntry, Role};
use super::update_buffer::UpdateBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Prompting,
    Destroyed,
}

/// Token of the turn currently running, tagged with its sequence number
#[derive(Debug)]
pub(super) struct ActiveTurn {
    pub(super) seq: u64,
    pub(super) token: CancellationToken,
}

pub struct Session {
    pub session_id: String,
    pub cwd: PathBuf,
    pub(super) history: Mutex<History>,
    pub(super) active_turn: Mutex<Option<ActiveTurn>>,
    pub(super) prompt_lock: tokio::sync::Mutex<()>,
    pub(super) cancel_grace: Duration,
    turn_seq: AtomicU64,
    shutdown: CancellationToken,
    last_activity: Mutex<Instant>,
    state: Mutex<SessionState>,
    updates: Arc<UpdateBuffer>,
    converter: NotificationConverter,
    pump: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Session {
    /// Create a session and start delivering its updates to `client`
    ///
    /// Must be called inside a Tokio runtime.
    pub fn new(
        session_id: String,
        cwd: PathBuf,
        config: &SessionConfig,
        client: Arc<dyn EditorClient>,
    ) -> Self {
        let updates = Arc::new(UpdateBuffer::new(config.update_buffer_capacity));
        let pump = tokio::spawn(pump_updates(Arc::clone(&updates), client));

        Self {
            converter: NotificationConverter::new(session_id.clone()),
            session_id,
            cwd,
            history: Mutex::new(History::new(config.history_capacity, config.history_retain)),
            active_turn: Mutex::new(None),
            prompt_lock: tokio::sync::Mutex::new(()),
            cancel_grace: config.cancel_grace(),
            turn_seq: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
            last_activity: Mutex::new(Instant::now()),
            state: Mutex::new(SessionState::Idle),
            updates,
            pump: Mutex::new(Some(pump)),
        }
    }

    pub fn converter(&self) -> &NotificationConverter {
        &self.converter
    }

    /// Queue an update for the editor
    pub fn emit(&self, update: SessionNotification) {
        self.updates.push(update);
    }

    /// Wait until every queued update reached the editor
    pub async fn flush_updates(&self) {
        self.updates.drained().await;
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    pub(super) fn set_state(&self, next: SessionState) {
        let mut state = lock(&self.state);
        if *state != SessionState::Destroyed {
            *state = next;
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.state() == SessionState::Destroyed
    }

    pub fn touch(&self) {
        self.touch_at(Instant::now());
    }

    pub fn touch_at(&self, now: Instant) {
        let mut last = lock(&self.last_activity);
        if now > *last {
            *last = now;
        }
    }

    pub fn last_activity(&self) -> Instant {
        *lock(&self.last_activity)
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity())
    }

    /// Start a new turn, cancelling the one in flight if any
    ///
    /// The returned token is a child of the session token, so destroying the
    /// session cancels it too.
    pub(super) fn begin_turn(&self) -> (u64, CancellationToken) {
        let seq = self.turn_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let token = self.shutdown.child_token();
        let previous = lock(&self.active_turn).replace(ActiveTurn {
            seq,
            token: token.clone(),
        });
        if let Some(previous) = previous {
            tracing::info!(
                session_id = %self.session_id,
                superseded = previous.seq,
                turn = seq,
                "Cancelling previous prompt"
            );
            previous.token.cancel();
        }
        (seq, token)
    }

    /// Clear the active turn if it is still `seq`
    pub(super) fn end_turn(&self, seq: u64) {
        let mut active = lock(&self.active_turn);
        if active.as_ref().is_some_and(|t| t.seq == seq) {
            *active = None;
        }
    }

    /// Whether a turn is reserved or running
    pub fn is_busy(&self) -> bool {
        lock(&self.active_turn).is_some()
    }

    /// Cancel the turn in flight; a no-op when idle
    pub fn cancel(&self) -> bool {
        match lock(&self.active_turn).as_ref() {
            Some(turn) => {
                tracing::info!(session_id = %self.session_id, turn = turn.seq, "Cancelling prompt");
                turn.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        lock(&self.history).snapshot()
    }

    pub(super) fn record(&self, entry: HistoryEntry) {
        lock(&self.history).push(entry);
    }

    /// Send the conversation so far back to the editor
    pub fn replay_history(&self) -> usize {
        let entries = self.history();
        for entry in &entries {
            let update = match entry.role {
                Role::User => self.converter.user_message(entry.text.clone()),
                Role::Agent => self.converter.agent_message(entry.text.clone()),
            };
            self.emit(update);
        }
        entries.len()
    }

    /// Cancel in-flight work and stop update delivery; idempotent
    pub fn destroy(&self) {
        {
            let mut state = lock(&self.state);
            if *state == SessionState::Destroyed {
                return;
            }
            *state = SessionState::Destroyed;
        }
        self.shutdown.cancel();
        self.updates.close();
        if let Some(pump) = lock(&self.pump).take() {
            pump.abort();
        }
        tracing::info!(session_id = %self.session_id, "Session destroyed");
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &self.session_id)
            .field("cwd", &self.cwd)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.destroy();
    }
}

async fn pump_updates(buffer: Arc<UpdateBuffer>, client: Arc<dyn EditorClient>) {
    while let Some(update) = buffer.next().await {
        if let Err(e) = client.session_update(update).await {
            tracing::debug!(error = %e, "Failed to deliver session update");
        }
        buffer.mark_delivered();
    }
}
