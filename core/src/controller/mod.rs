//! The outer iteration loop: builds prompts, runs sessions through a
//! backend, gates completion, and records run artifacts.

mod events;
mod run;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use events::{CompletionBlock, ControllerEvent, VerifyOutcome};
pub use run::run_loop;

use crate::error::RunnerError;
use crate::result::{IterationResult, ModelUsage};
use crate::session::{run_session, RunMode, SessionEvent, SessionOpts};
use crate::stats::{IterationRow, RunSettings};

/// Everything the loop needs to run, resolved by the frontend before start.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// The operator's task statement, repeated to every iteration.
    pub prompt: String,
    /// Completion signal is ignored before this many iterations.
    pub min_iterations: u32,
    pub max_iterations: u32,
    pub mode: RunMode,
    pub hard_timeout: Duration,
    pub idle_timeout: Duration,
    /// Shell command gating completion; `None` disables verification.
    pub verify_cmd: Option<String>,
    pub verify_timeout: Duration,
    pub internet: bool,
    pub model: String,
    pub claude_bin: String,
    pub output_dir: PathBuf,
    pub progress_file: PathBuf,
    pub plan_file: Option<PathBuf>,
    /// Nonzero when resuming an existing run directory.
    pub start_iteration: u32,
    /// Wall-clock start, preformatted for stats.json.
    pub started: String,
    /// Save each iteration's full prompt as `prompt-NN.md`.
    pub debug: bool,
}

impl LoopConfig {
    pub(crate) fn session_opts(&self) -> SessionOpts {
        SessionOpts {
            claude_bin: self.claude_bin.clone(),
            model: self.model.clone(),
            mode: self.mode,
            internet: self.internet,
            hard_timeout: self.hard_timeout,
            idle_timeout: self.idle_timeout,
            output_dir: self.output_dir.clone(),
        }
    }

    pub(crate) fn settings(&self) -> RunSettings {
        RunSettings {
            min_iterations: self.min_iterations,
            max_iterations: self.max_iterations,
            mode: match self.mode {
                RunMode::Hitl => "hitl".to_string(),
                RunMode::Afk => "afk".to_string(),
            },
            timeout: self.hard_timeout.as_secs(),
            idle_timeout: self.idle_timeout.as_secs(),
            plan: self.plan_file.is_some(),
            verify: self.verify_cmd.clone(),
            internet: self.internet,
            model: self.model.clone(),
        }
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Completion signal accepted.
    Completed,
    MaxIterations,
    /// Ctrl+C style shutdown honored at an iteration boundary.
    Shutdown,
    /// Operator declined to continue at the hitl prompt.
    OperatorQuit,
}

/// Final accounting handed back to the frontend when the loop stops.
#[derive(Debug)]
pub struct RunReport {
    pub stop: StopReason,
    pub iterations_done: u32,
    pub total_duration: Duration,
    pub total_cost: f64,
    pub verify_history: Vec<Option<bool>>,
    pub model_usage_totals: BTreeMap<String, ModelUsage>,
    pub rows: Vec<IterationRow>,
}

/// How the loop runs one session. The only production implementation spawns
/// the real child process; tests substitute scripted results.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    async fn run(
        &self,
        prompt: &str,
        iteration: u32,
        opts: &SessionOpts,
        cumulative_cost: f64,
        events: Option<mpsc::UnboundedSender<SessionEvent>>,
    ) -> Result<IterationResult, RunnerError>;
}

/// Spawns the configured child binary for each iteration.
#[derive(Debug, Default)]
pub struct ClaudeBackend;

#[async_trait]
impl SessionBackend for ClaudeBackend {
    async fn run(
        &self,
        prompt: &str,
        iteration: u32,
        opts: &SessionOpts,
        cumulative_cost: f64,
        events: Option<mpsc::UnboundedSender<SessionEvent>>,
    ) -> Result<IterationResult, RunnerError> {
        run_session(prompt, iteration, opts, cumulative_cost, events).await
    }
}

/// Operator touchpoints the loop may hit between iterations.
#[async_trait]
pub trait LoopInteraction: Send + Sync {
    /// Called between iterations in hitl mode; `false` stops the run.
    async fn confirm_continue(&self) -> bool {
        true
    }
}

/// Never pauses. Used in afk mode and by tests.
#[derive(Debug, Default)]
pub struct AutoContinue;

#[async_trait]
impl LoopInteraction for AutoContinue {}
