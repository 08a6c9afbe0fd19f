// src/watch/mod.rs

//! Watch router: filesystem changes → debounced triggers.
//!
//! This module is responsible for:
//! - Compiling `[[watch]]` glob bindings (patterns → tasks + scope).
//! - Wiring up a cross-platform filesystem watcher (`notify`).
//! - Collapsing bursts of changes into one batch per debounce window.
//! - Turning each batch into a single [`Trigger`](crate::engine::Trigger).
//!
//! It does not know about dependencies; the resolver expands the goal.

use std::path::PathBuf;

pub mod debounce;
pub mod path_utils;
pub mod patterns;
pub mod router;
pub mod watcher;

/// Kind of filesystem change, after collapsing notify's richer event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
}

/// One changed path as reported by the watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub path: PathBuf,
    pub kind: ChangeKind,
}

impl RawEvent {
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

pub use debounce::{DebounceState, Debouncer, EventBatch, PathChange};
pub use patterns::{
    build_bindings_from_config, build_watch_bindings, WatchBinding, WatchDefaults,
};
pub use router::{run_router, WatchRouter};
pub use watcher::{spawn_watcher, WatcherHandle};
