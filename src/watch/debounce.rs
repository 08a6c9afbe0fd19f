// src/watch/debounce.rs

//! Debounce state machine: `Idle → Collecting → Dispatching → Idle`.
//!
//! The first matching event opens a fixed window; events arriving while the
//! window is open join the same batch and do not extend it.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::watch::ChangeKind;

/// One changed path inside a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathChange {
    /// Most recent kind of change seen for the path.
    pub kind: ChangeKind,
    /// Indices of the watch bindings the path matched.
    pub bindings: BTreeSet<usize>,
    /// Path relative to the source root.
    pub relative: String,
}

/// Changes collected during one debounce window, keyed by absolute path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBatch {
    pub batch_id: u64,
    pub changes: BTreeMap<PathBuf, PathChange>,
}

impl EventBatch {
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Binding indices present in the batch, ascending.
    pub fn bindings(&self) -> BTreeSet<usize> {
        self.changes
            .values()
            .flat_map(|c| c.bindings.iter().copied())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceState {
    Idle,
    Collecting { deadline: Instant },
    Dispatching,
}

#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    state: DebounceState,
    pending: BTreeMap<PathBuf, PathChange>,
    next_batch_id: u64,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: DebounceState::Idle,
            pending: BTreeMap::new(),
            next_batch_id: 1,
        }
    }

    pub fn state(&self) -> DebounceState {
        self.state
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// When the current window closes, if one is open.
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            DebounceState::Collecting { deadline } => Some(deadline),
            _ => None,
        }
    }

    /// Record a matching event. Returns `true` if this event opened a new
    /// window.
    pub fn record(
        &mut self,
        path: PathBuf,
        relative: String,
        kind: ChangeKind,
        bindings: BTreeSet<usize>,
        now: Instant,
    ) -> bool {
        let opened = match self.state {
            DebounceState::Idle | DebounceState::Dispatching => {
                let deadline = now + self.window;
                self.state = DebounceState::Collecting { deadline };
                debug!(window_ms = self.window.as_millis() as u64, "debounce window opened");
                true
            }
            DebounceState::Collecting { .. } => false,
        };

        self.pending
            .entry(path)
            .and_modify(|c| {
                c.kind = kind;
                c.bindings.extend(bindings.iter().copied());
            })
            .or_insert(PathChange {
                kind,
                bindings,
                relative,
            });

        opened
    }

    /// Whether the open window has elapsed at `now`.
    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|d| now >= d)
    }

    /// Close the window and hand out the batch. Returns `None` when no
    /// window is open.
    pub fn take_batch(&mut self) -> Option<EventBatch> {
        if self.deadline().is_none() {
            return None;
        }

        self.state = DebounceState::Dispatching;
        let batch = EventBatch {
            batch_id: self.next_batch_id,
            changes: std::mem::take(&mut self.pending),
        };
        self.next_batch_id += 1;
        self.state = DebounceState::Idle;

        debug!(batch_id = batch.batch_id, paths = batch.len(), "debounce window closed");
        Some(batch)
    }
}
