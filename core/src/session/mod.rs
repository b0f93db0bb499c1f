mod activity;
mod run;

use std::path::PathBuf;
use std::time::Duration;

pub use activity::ActivityTracker;
pub use run::run_session;

/// Permission posture for spawned sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Human-in-the-loop: the child keeps its normal permission prompts and
    /// the operator confirms between iterations.
    Hitl,
    /// Autonomous: permissions bypassed, no operator confirmation.
    Afk,
}

/// Operational knobs for one iteration's child process.
#[derive(Debug, Clone)]
pub struct SessionOpts {
    /// Child binary to invoke. Overridable for tests and nonstandard installs.
    pub claude_bin: String,
    pub model: String,
    pub mode: RunMode,
    pub internet: bool,
    /// Wall-clock budget for the whole iteration.
    pub hard_timeout: Duration,
    /// Maximum time with no output before the watchdog kills the child.
    pub idle_timeout: Duration,
    /// Directory receiving `iter-{n}.jsonl` and `iter-{n}.txt`.
    pub output_dir: PathBuf,
}

/// Live progress events emitted by the supervisor.
///
/// Carried over an unbounded channel so the core stays UI-agnostic; the CLI
/// renders them, other frontends may ignore them entirely.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Ticker while waiting for the child's first output.
    Connecting {
        elapsed: Duration,
        cumulative_cost: f64,
    },
    /// First output arrived; `init` is how long startup took.
    Connected { init: Duration },
    AssistantText(String),
    ToolStarted {
        description: String,
        active: Vec<String>,
    },
    ToolFinished { active: Vec<String> },
    /// Last stderr lines, sent once when the child exits non-zero.
    StderrTail(Vec<String>),
}

/// Map an exit status to a single code: `128 + signal` for signal deaths on
/// unix, so a killed child never looks like a success.
pub fn normalize_exit(status: std::process::ExitStatus) -> i32 {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(code) = status.code() {
            code
        } else if let Some(sig) = status.signal() {
            128 + sig
        } else {
            1
        }
    }
    #[cfg(windows)]
    {
        status.code().unwrap_or(1)
    }
}
