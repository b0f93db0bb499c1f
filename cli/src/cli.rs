use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Human-in-the-loop: confirm between iterations, keep permission prompts.
    Hitl,
    /// Autonomous: bypass permissions, never pause.
    Afk,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Hitl => write!(f, "hitl"),
            Mode::Afk => write!(f, "afk"),
        }
    }
}

/// Outer-loop orchestrator that spawns iterative Claude Code sessions.
#[derive(Parser, Debug)]
#[command(name = "ralph-runner", version)]
pub struct Args {
    /// The task prompt
    #[arg(long)]
    pub prompt: String,

    /// Min iterations before completion accepted
    #[arg(long, default_value_t = 10)]
    pub iterations: u32,

    /// Hard stop after this many iterations
    #[arg(long, default_value_t = 50)]
    pub max_iterations: u32,

    /// Maintain a plan.md scratchpad across iterations (default)
    #[arg(long, overrides_with = "no_plan")]
    pub plan: bool,

    /// Disable the plan.md scratchpad
    #[arg(long, overrides_with = "plan")]
    pub no_plan: bool,

    /// Verification command to run after each iteration
    #[arg(long)]
    pub verify: Option<String>,

    /// hitl (human-in-the-loop) or afk (autonomous)
    #[arg(long, value_enum, default_value_t = Mode::Afk)]
    pub mode: Mode,

    /// Hard timeout per iteration in seconds
    #[arg(long, default_value_t = 900)]
    pub timeout: u64,

    /// Idle timeout per iteration in seconds
    #[arg(long, default_value_t = 120)]
    pub idle_timeout: u64,

    /// Claude model to use
    #[arg(long, default_value = "sonnet")]
    pub model: String,

    /// Enable internet access for Claude sessions
    #[arg(long)]
    pub internet: bool,

    /// Enable debug output
    #[arg(long)]
    pub debug: bool,

    /// Resume a previous run from its output directory
    #[arg(long, value_name = "DIR")]
    pub resume: Option<PathBuf>,

    /// Claude binary to invoke
    #[arg(long, default_value = "claude")]
    pub claude_bin: String,
}

impl Args {
    /// Plan scratchpad is on unless `--no-plan` was the last word.
    pub fn plan_enabled(&self) -> bool {
        self.plan || !self.no_plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["ralph-runner", "--prompt", "task"];
        argv.extend(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn defaults() {
        let args = parse(&[]);
        assert_eq!(args.iterations, 10);
        assert_eq!(args.max_iterations, 50);
        assert_eq!(args.mode, Mode::Afk);
        assert_eq!(args.timeout, 900);
        assert_eq!(args.idle_timeout, 120);
        assert_eq!(args.model, "sonnet");
        assert_eq!(args.claude_bin, "claude");
        assert!(args.plan_enabled());
        assert!(args.verify.is_none());
        assert!(!args.internet);
    }

    #[test]
    fn no_plan_wins() {
        assert!(!parse(&["--no-plan"]).plan_enabled());
        assert!(parse(&["--plan"]).plan_enabled());
    }

    #[test]
    fn mode_values() {
        assert_eq!(parse(&["--mode", "hitl"]).mode, Mode::Hitl);
    }
}
