//! Bounded outbound update buffer
//!
//! Sits between a session and the transport. When full, the oldest update
//! is dropped. One warning is logged per overflow episode; the episode ends
//! once the buffer drains below capacity.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;

use crate::types::protocol::SessionNotification;

#[derive(Debug, Default)]
struct State {
    queue: VecDeque<SessionNotification>,
    overflowing: bool,
    dropped: u64,
    in_flight: bool,
    closed: bool,
}

#[derive(Debug)]
pub struct UpdateBuffer {
    state: Mutex<State>,
    capacity: usize,
    item_ready: Notify,
    idle: Notify,
}

impl UpdateBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State::default()),
            capacity: capacity.max(1),
            item_ready: Notify::new(),
            idle: Notify::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn push(&self, update: SessionNotification) {
        {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            if state.queue.len() >= self.capacity {
                state.queue.pop_front();
                state.dropped += 1;
                if !state.overflowing {
                    state.overflowing = true;
                    tracing::warn!(
                        session_id = %update.session_id,
                        capacity = self.capacity,
                        "Update buffer full, dropping oldest updates"
                    );
                }
            }
            state.queue.push_back(update);
        }
        self.item_ready.notify_one();
    }

    /// Wait for the next update; `None` once closed and empty
    pub async fn next(&self) -> Option<SessionNotification> {
        loop {
            let notified = self.item_ready.notified();
            {
                let mut state = self.lock();
                if let Some(update) = state.queue.pop_front() {
                    state.in_flight = true;
                    if state.queue.len() < self.capacity {
                        state.overflowing = false;
                    }
                    return Some(update);
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Mark the update returned by [`UpdateBuffer::next`] as delivered
    pub fn mark_delivered(&self) {
        let idle = {
            let mut state = self.lock();
            state.in_flight = false;
            state.queue.is_empty()
        };
        if idle {
            self.idle.notify_waiters();
        }
    }

    /// Resolve once every pushed update has been delivered or dropped
    pub async fn drained(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let state = self.lock();
                if (state.queue.is_empty() && !state.in_flight) || state.closed {
                    return;
                }
            }
            notified.await;
        }
    }

    /// Stop accepting updates and discard what is queued
    pub fn close(&self) {
        {
            let mut state = self.lock();
            state.closed = true;
            state.queue.clear();
        }
        self.item_ready.notify_waiters();
        self.item_ready.notify_one();
        self.idle.notify_waiters();
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.lock().dropped
    }

    pub fn is_overflowing(&self) -> bool {
        self.lock().overflowing
    }
}
