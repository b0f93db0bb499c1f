use std::time::Duration;

use crate::result::IterationResult;
use crate::session::SessionEvent;

/// One verification run's outcome, kept alongside the iteration it gated.
#[derive(Debug, Clone)]
pub struct VerifyOutcome {
    pub passed: bool,
    pub output: String,
}

/// Why a completion signal was not honored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionBlock {
    MinIterations { done: u32, required: u32 },
    VerifyFailed,
}

/// Loop-level progress events for the frontend, interleaved with the
/// session events of the iteration currently running.
#[derive(Debug)]
pub enum ControllerEvent {
    Session(SessionEvent),
    IterationStarted {
        iteration: u32,
        /// Elapsed run time and running totals, zero on the first iteration.
        elapsed: Duration,
        total_cost: f64,
        total_input: u64,
        total_output: u64,
    },
    IterationFinished {
        iteration: u32,
        result: IterationResult,
        verify: Option<VerifyOutcome>,
        /// Preformatted trend like `(3/5 ↑)`, empty without verify data.
        verify_trend: String,
        /// Size of the progress file after this iteration's append.
        progress_bytes: u64,
    },
    CompletionBlocked(CompletionBlock),
    Completed,
    MaxIterationsReached { limit: u32 },
    ShutdownNoticed,
}
