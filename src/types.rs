use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How a task's own steps are composed.
///
/// - `Sequential`: steps run strictly in order; a failure aborts later steps.
/// - `Parallel`: steps run concurrently; the first failure is recorded but the
///   other steps are allowed to finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompositionMode {
    #[default]
    Sequential,
    Parallel,
}

/// How the top-level goal of a `build` is composed (`[build].mode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalMode {
    Series,
    #[default]
    Parallel,
}

/// What the runner does when a task fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Cancel every not-yet-started task on the first failure (full build).
    FailFast,
    /// Only the failed task's dependents are skipped (watch mode).
    ContinueOnFailure,
}

/// Class of artifact a watch binding regenerates. Reload signals are scoped
/// by it so the browser can e.g. swap stylesheets without a full reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactClass {
    Style,
    Script,
    Markup,
    Media,
}

impl ArtifactClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactClass::Style => "style",
            ArtifactClass::Script => "script",
            ArtifactClass::Markup => "markup",
            ArtifactClass::Media => "media",
        }
    }
}

impl fmt::Display for ArtifactClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "style" => Ok(ArtifactClass::Style),
            "script" => Ok(ArtifactClass::Script),
            "markup" => Ok(ArtifactClass::Markup),
            "media" => Ok(ArtifactClass::Media),
            other => Err(format!(
                "invalid scope: {other} (expected style, script, markup or media)"
            )),
        }
    }
}
