//! Inbound message queue shared between a receive thread and its consumers.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use pairwire_frame::Message;

use crate::error::{PeerError, Result};
use crate::sync::lock;

/// FIFO of decoded messages.
///
/// Once closed, no new messages are accepted, but those already queued can
/// still be taken. Blocked takers wake when the queue closes.
#[derive(Debug, Default)]
pub struct PacketQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<Message>,
    closed: bool,
}

impl PacketQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message. Returns `false` (and drops it) if the queue is closed.
    pub fn push(&self, message: Message) -> bool {
        let mut state = lock(&self.state);
        if state.closed {
            return false;
        }
        state.items.push_back(message);
        drop(state);
        self.available.notify_one();
        true
    }

    /// Stop accepting messages and wake every blocked taker.
    pub fn close(&self) {
        lock(&self.state).closed = true;
        self.available.notify_all();
    }

    /// Remove the head without waiting.
    pub fn try_take(&self) -> Option<Message> {
        lock(&self.state).items.pop_front()
    }

    /// Remove the head, waiting until one arrives.
    ///
    /// Fails with [`PeerError::Cancelled`] once the queue is closed and empty.
    pub fn take(&self) -> Result<Message> {
        let state = lock(&self.state);
        let mut state = self
            .available
            .wait_while(state, |s| s.items.is_empty() && !s.closed)
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        state.items.pop_front().ok_or(PeerError::Cancelled)
    }

    /// Remove the head, waiting at most `timeout`.
    pub fn take_timeout(&self, timeout: Duration) -> Result<Message> {
        let state = lock(&self.state);
        let (mut state, _) = self
            .available
            .wait_timeout_while(state, timeout, |s| s.items.is_empty() && !s.closed)
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        match state.items.pop_front() {
            Some(message) => Ok(message),
            None if state.closed => Err(PeerError::Cancelled),
            None => Err(PeerError::QueueEmpty(timeout)),
        }
    }

    /// Closed with nothing left to take.
    pub fn is_drained(&self) -> bool {
        let state = lock(&self.state);
        state.closed && state.items.is_empty()
    }

    pub fn len(&self) -> usize {
        lock(&self.state).items.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.state).items.is_empty()
    }

    /// `(closed, queued)` read under one lock.
    pub(crate) fn status(&self) -> (bool, usize) {
        let state = lock(&self.state);
        (state.closed, state.items.len())
    }
}
