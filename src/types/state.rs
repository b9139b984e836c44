//! Pipeline lifecycle states

use serde::Serialize;
use std::fmt;

/// Lifecycle shared by the capture and transmission loops.
///
/// Transitions only move forward:
/// `Init -> Running -> Stopping -> Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum PipelineState {
    /// Device opened, stream not started yet
    Init,
    /// Stream active and both loops dispatched
    Running,
    /// Shutdown requested, loops draining
    Stopping,
    /// Both loops joined and the device released
    Stopped,
}

impl PipelineState {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Init, Running) | (Init, Stopped) | (Running, Stopping) | (Stopping, Stopped)
        )
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Init => "INIT",
            PipelineState::Running => "RUNNING",
            PipelineState::Stopping => "STOPPING",
            PipelineState::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}
