// This module tracks where a compilation job is in its life. Transitions are checked in
// debug builds and logged, which makes the state of a stuck or failed job visible in the
// driver's debug output. The driver owns the Job; nothing else mutates it.

//! Per-job lifecycle.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    ArgsBuilt,
    Executing,
    /// Compiler exited zero.
    Succeeded,
    /// Compiler exited nonzero; the diagnostics are the result.
    CompileFailed,
    PostProcessing,
    Done,
    /// Unrecoverable: a tool could not run or spoke the wrong protocol.
    Failed,
}

impl JobState {
    pub fn can_advance_to(self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Idle, ArgsBuilt)
                | (ArgsBuilt, Executing)
                | (Executing, Succeeded | CompileFailed)
                | (Succeeded, PostProcessing)
                | (PostProcessing, Done)
                | (CompileFailed, Done)
        ) || (next == Failed && !self.is_terminal())
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Done | JobState::Failed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Tracks one job through its states.
#[derive(Debug)]
pub struct Job {
    id: u64,
    compiler: String,
    state: JobState,
}

impl Job {
    pub fn new(id: u64, compiler: &str) -> Self {
        Self {
            id,
            compiler: compiler.to_string(),
            state: JobState::Idle,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn advance(&mut self, next: JobState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "job {}: invalid transition {} -> {}",
            self.id,
            self.state,
            next
        );
        log::debug!("job {} [{}]: {} -> {}", self.id, self.compiler, self.state, next);
        self.state = next;
    }
}
