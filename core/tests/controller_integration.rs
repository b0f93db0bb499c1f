//! Integration tests for the iteration controller.
//!
//! These drive the loop with a scripted backend so gating, resume, and
//! shutdown behavior can be verified without spawning real sessions.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use ralph_core::controller::{
    run_loop, AutoContinue, CompletionBlock, ControllerEvent, LoopConfig, LoopInteraction,
    SessionBackend, StopReason,
};
use ralph_core::prompt::COMPLETION_SIGNAL;
use ralph_core::session::{RunMode, SessionEvent, SessionOpts};
use ralph_core::{IterationResult, RunnerError};

/// Backend that replays scripted results and records the prompts it saw.
struct ScriptedBackend {
    results: Mutex<Vec<IterationResult>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    fn new(results: Vec<IterationResult>) -> Self {
        Self {
            results: Mutex::new(results),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionBackend for ScriptedBackend {
    async fn run(
        &self,
        prompt: &str,
        _iteration: u32,
        _opts: &SessionOpts,
        _cumulative_cost: f64,
        _events: Option<mpsc::UnboundedSender<SessionEvent>>,
    ) -> Result<IterationResult, RunnerError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let mut results = self.results.lock().unwrap();
        assert!(!results.is_empty(), "backend ran out of scripted results");
        Ok(results.remove(0))
    }
}

fn ok_result(text: &str) -> IterationResult {
    IterationResult {
        text: text.to_string(),
        duration: Duration::from_secs(1),
        exit_code: Some(0),
        cost_usd: 0.05,
        input_tokens: 100,
        output_tokens: 50,
        ..Default::default()
    }
}

fn config(dir: &std::path::Path) -> LoopConfig {
    LoopConfig {
        prompt: "build the widget".to_string(),
        min_iterations: 1,
        max_iterations: 10,
        mode: RunMode::Afk,
        hard_timeout: Duration::from_secs(60),
        idle_timeout: Duration::from_secs(30),
        verify_cmd: None,
        verify_timeout: Duration::from_secs(10),
        internet: false,
        model: "sonnet".to_string(),
        claude_bin: "claude".to_string(),
        output_dir: dir.to_path_buf(),
        progress_file: dir.join("progress.md"),
        plan_file: None,
        start_iteration: 0,
        started: "2026-08-29 10:00:00".to_string(),
        debug: false,
    }
}

fn no_shutdown() -> watch::Receiver<bool> {
    // The receiver keeps the last value even after the sender drops.
    let (_tx, rx) = watch::channel(false);
    rx
}

#[tokio::test]
async fn test_completes_on_signal() {
    let dir = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(vec![ok_result(&format!("done {COMPLETION_SIGNAL}"))]);

    let report = run_loop(&config(dir.path()), &backend, &AutoContinue, no_shutdown(), None)
        .await
        .unwrap();

    assert_eq!(report.stop, StopReason::Completed);
    assert_eq!(report.iterations_done, 1);
    assert!((report.total_cost - 0.05).abs() < 1e-9);
}

#[tokio::test]
async fn test_min_iterations_blocks_early_signal() {
    let dir = tempfile::tempdir().unwrap();
    let signal = format!("claiming done {COMPLETION_SIGNAL}");
    let backend = ScriptedBackend::new(vec![
        ok_result(&signal),
        ok_result(&signal),
        ok_result(&signal),
    ]);
    let mut cfg = config(dir.path());
    cfg.min_iterations = 3;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let report = run_loop(&cfg, &backend, &AutoContinue, no_shutdown(), Some(tx))
        .await
        .unwrap();

    assert_eq!(report.stop, StopReason::Completed);
    assert_eq!(report.iterations_done, 3);

    let mut blocked = Vec::new();
    while let Ok(ev) = rx.try_recv() {
        if let ControllerEvent::CompletionBlocked(reason) = ev {
            blocked.push(reason);
        }
    }
    assert_eq!(
        blocked,
        vec![
            CompletionBlock::MinIterations { done: 1, required: 3 },
            CompletionBlock::MinIterations { done: 2, required: 3 },
        ]
    );
}

#[tokio::test]
async fn test_verify_failure_blocks_completion() {
    let dir = tempfile::tempdir().unwrap();
    let signal = format!("done {COMPLETION_SIGNAL}");
    let backend = ScriptedBackend::new(vec![
        ok_result(&signal),
        ok_result(&signal),
        ok_result(&signal),
    ]);
    let mut cfg = config(dir.path());
    cfg.max_iterations = 3;
    cfg.verify_cmd = Some("false".to_string());

    let report = run_loop(&cfg, &backend, &AutoContinue, no_shutdown(), None)
        .await
        .unwrap();

    assert_eq!(report.stop, StopReason::MaxIterations);
    assert_eq!(report.verify_history, vec![Some(false); 3]);
}

#[tokio::test]
async fn test_verify_pass_allows_completion() {
    let dir = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(vec![ok_result(&format!("done {COMPLETION_SIGNAL}"))]);
    let mut cfg = config(dir.path());
    cfg.verify_cmd = Some("true".to_string());

    let report = run_loop(&cfg, &backend, &AutoContinue, no_shutdown(), None)
        .await
        .unwrap();

    assert_eq!(report.stop, StopReason::Completed);
    assert_eq!(report.verify_history, vec![Some(true)]);
}

#[tokio::test]
async fn test_verify_skipped_when_no_output() {
    let dir = tempfile::tempdir().unwrap();
    let silent_crash = IterationResult {
        exit_code: Some(1),
        ..Default::default()
    };
    let backend = ScriptedBackend::new(vec![
        silent_crash,
        ok_result(&format!("recovered {COMPLETION_SIGNAL}")),
    ]);
    let mut cfg = config(dir.path());
    cfg.verify_cmd = Some("true".to_string());

    let report = run_loop(&cfg, &backend, &AutoContinue, no_shutdown(), None)
        .await
        .unwrap();

    assert_eq!(report.stop, StopReason::Completed);
    assert_eq!(report.verify_history, vec![None, Some(true)]);
}

#[tokio::test]
async fn test_failure_context_carries_into_next_prompt() {
    let dir = tempfile::tempdir().unwrap();
    let idle_kill = IterationResult {
        idle_timed_out: true,
        exit_code: Some(137),
        ..Default::default()
    };
    let backend = ScriptedBackend::new(vec![
        idle_kill,
        ok_result(&format!("done {COMPLETION_SIGNAL}")),
    ]);

    let report = run_loop(&config(dir.path()), &backend, &AutoContinue, no_shutdown(), None)
        .await
        .unwrap();

    assert_eq!(report.stop, StopReason::Completed);
    let prompts = backend.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(!prompts[0].contains("timed out due to inactivity"));
    assert!(prompts[1].contains("timed out due to inactivity"));
}

#[tokio::test]
async fn test_resume_continues_numbering() {
    let dir = tempfile::tempdir().unwrap();
    for n in [1, 3, 7] {
        std::fs::write(dir.path().join(format!("iter-{n}.jsonl")), "{}").unwrap();
    }
    let backend = ScriptedBackend::new(vec![ok_result(&format!("done {COMPLETION_SIGNAL}"))]);
    let mut cfg = config(dir.path());
    cfg.start_iteration = ralph_core::stats::find_last_iteration(dir.path());
    cfg.max_iterations = 20;

    let report = run_loop(&cfg, &backend, &AutoContinue, no_shutdown(), None)
        .await
        .unwrap();

    assert_eq!(report.stop, StopReason::Completed);
    assert_eq!(report.rows.len(), 1);
    assert_eq!(report.rows[0].iteration, 8);
}

#[tokio::test]
async fn test_max_iterations_stops_loop() {
    let dir = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(vec![
        ok_result("still going"),
        ok_result("still going"),
    ]);
    let mut cfg = config(dir.path());
    cfg.max_iterations = 2;

    let report = run_loop(&cfg, &backend, &AutoContinue, no_shutdown(), None)
        .await
        .unwrap();

    assert_eq!(report.stop, StopReason::MaxIterations);
    assert_eq!(report.iterations_done, 2);
}

#[tokio::test]
async fn test_shutdown_before_first_iteration() {
    let dir = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(vec![]);
    let (tx, rx) = watch::channel(true);

    let report = run_loop(&config(dir.path()), &backend, &AutoContinue, rx, None)
        .await
        .unwrap();
    drop(tx);

    assert_eq!(report.stop, StopReason::Shutdown);
    assert_eq!(report.iterations_done, 0);
}

#[tokio::test]
async fn test_hitl_quit_stops_after_iteration() {
    struct QuitImmediately;
    #[async_trait]
    impl LoopInteraction for QuitImmediately {
        async fn confirm_continue(&self) -> bool {
            false
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(vec![ok_result("no signal yet")]);
    let mut cfg = config(dir.path());
    cfg.mode = RunMode::Hitl;

    let report = run_loop(&cfg, &backend, &QuitImmediately, no_shutdown(), None)
        .await
        .unwrap();

    assert_eq!(report.stop, StopReason::OperatorQuit);
    assert_eq!(report.iterations_done, 1);
}

#[tokio::test]
async fn test_artifacts_written_each_iteration() {
    let dir = tempfile::tempdir().unwrap();
    let backend = ScriptedBackend::new(vec![ok_result(&format!("done {COMPLETION_SIGNAL}"))]);

    run_loop(&config(dir.path()), &backend, &AutoContinue, no_shutdown(), None)
        .await
        .unwrap();

    let progress = std::fs::read_to_string(dir.path().join("progress.md")).unwrap();
    assert!(progress.contains("Iteration 1 Summary"));

    let stats: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dir.path().join("stats.json")).unwrap())
            .unwrap();
    assert_eq!(stats["totals"]["iterations"], 1);
    assert_eq!(stats["iterations"][0]["status"], "ok");
}
