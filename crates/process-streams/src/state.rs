//! Lifecycle state of a single process and its broadcast signal

use async_channel::{Receiver, Sender};
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tracing::debug;

/// Where a process is in its lifecycle
///
/// Transitions only move forward along
/// `NotRunning -> Running -> {Destroyed | Exited(code)}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessState {
    /// No process has been created yet
    NotRunning,
    /// The process was spawned and has not been released
    Running,
    /// The process was forcibly killed through its destroy channel
    Destroyed,
    /// The process exited and was reaped with the given code
    Exited(i32),
}

impl ProcessState {
    /// Returns true for `Destroyed` and `Exited`
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessState::Destroyed | ProcessState::Exited(_))
    }

    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: ProcessState) -> bool {
        match (self, next) {
            (ProcessState::NotRunning, ProcessState::Running) => true,
            (ProcessState::Running, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessState::NotRunning => write!(f, "not running"),
            ProcessState::Running => write!(f, "running"),
            ProcessState::Destroyed => write!(f, "destroyed"),
            ProcessState::Exited(code) => write!(f, "exited with code {code}"),
        }
    }
}

/// A published state together with when it was published
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateTransition {
    /// The state that became current
    pub state: ProcessState,
    /// When it became current
    pub at: DateTime<Utc>,
}

struct Inner {
    current: ProcessState,
    history: Vec<StateTransition>,
    subscribers: Vec<Sender<ProcessState>>,
    /// No further state will ever be published
    closed: bool,
}

/// Broadcast cell holding the latest [`ProcessState`]
///
/// Clones observe the same process. Subscribers are fed through their own
/// unbounded channel, so a slow observer never holds up a transition.
#[derive(Clone)]
pub struct StateSignal {
    inner: Arc<Mutex<Inner>>,
}

impl StateSignal {
    /// Create a signal in the `NotRunning` state
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                current: ProcessState::NotRunning,
                history: vec![StateTransition {
                    state: ProcessState::NotRunning,
                    at: Utc::now(),
                }],
                subscribers: Vec::new(),
                closed: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The current state
    pub fn get(&self) -> ProcessState {
        self.lock().current
    }

    /// Every state published so far, oldest first
    pub fn history(&self) -> Vec<StateTransition> {
        self.lock().history.clone()
    }

    /// Observe the current state immediately, then every later change
    ///
    /// The stream ends after a terminal state, or once the signal is closed.
    pub fn subscribe(&self) -> StateStream {
        self.register(true)
    }

    /// Observe only changes published after this call
    pub fn changes(&self) -> StateStream {
        self.register(false)
    }

    fn register(&self, replay_current: bool) -> StateStream {
        let (tx, rx) = async_channel::unbounded();
        let mut inner = self.lock();
        if replay_current {
            let _ = tx.try_send(inner.current);
        }
        if !inner.closed {
            inner.subscribers.push(tx);
        }
        StateStream::new(rx)
    }

    /// Wait until the process reaches a terminal state
    ///
    /// Returns `None` if the signal was closed without one, e.g. because the
    /// launch failed.
    pub async fn wait_terminal(&self) -> Option<ProcessState> {
        let mut states = self.subscribe();
        while let Some(state) = states.next().await {
            if state.is_terminal() {
                return Some(state);
            }
        }
        None
    }

    /// Publish a new state, returning false if the transition was rejected
    ///
    /// The first terminal state wins; anything published after it is ignored.
    pub(crate) fn publish(&self, next: ProcessState) -> bool {
        let mut inner = self.lock();
        let current = inner.current;
        if inner.closed || !current.can_transition_to(next) {
            debug!(%current, %next, "ignoring state transition");
            return false;
        }

        debug!(from = %current, to = %next, "process state transition");
        inner.current = next;
        inner.history.push(StateTransition {
            state: next,
            at: Utc::now(),
        });
        inner.subscribers.retain(|tx| tx.try_send(next).is_ok());

        if next.is_terminal() {
            inner.closed = true;
            inner.subscribers.clear();
        }
        true
    }

    /// Stop publishing, ending every subscription without a terminal state
    pub(crate) fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        inner.subscribers.clear();
    }
}

impl Default for StateSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StateSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateSignal")
            .field("current", &self.get())
            .finish()
    }
}

/// Stream of states produced by [`StateSignal::subscribe`] or
/// [`StateSignal::changes`]
pub struct StateStream {
    inner: BoxStream<'static, ProcessState>,
}

impl StateStream {
    fn new(rx: Receiver<ProcessState>) -> Self {
        Self { inner: rx.boxed() }
    }
}

impl Stream for StateStream {
    type Item = ProcessState;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}
