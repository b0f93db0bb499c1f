//! Session supervisor: spawns one Claude Code process, feeds it a prompt,
//! decodes its stream-json output under dual timeout policies, and always
//! hands back an [`IterationResult`] with the child reaped.

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::error::RunnerError;
use crate::protocol::{parse_record, ContentBlock, LineDecoder, ResultRecord, StreamRecord};
use crate::result::IterationResult;
use crate::tools::{tool_description, ActiveToolSet};

use super::{normalize_exit, ActivityTracker, RunMode, SessionEvent, SessionOpts};

const WATCHDOG_POLL: Duration = Duration::from_secs(5);
/// Slack added to the idle window when bounding a single read, so the read
/// loop wakes in time to honor whichever deadline expires first.
const READ_GRACE: Duration = Duration::from_secs(10);
/// How long to wait for the child to exit on its own after the read loop
/// ends, before force-killing it.
const REAP_GRACE: Duration = Duration::from_secs(10);
const TICKER_INTERVAL: Duration = Duration::from_millis(120);
const READ_CHUNK: usize = 64 * 1024;
const STDERR_KEEP: usize = 50;
const STDERR_TAIL: usize = 10;

fn emit(events: &Option<mpsc::UnboundedSender<SessionEvent>>, ev: SessionEvent) {
    if let Some(tx) = events {
        let _ = tx.send(ev);
    }
}

/// If the child is still running, ask the OS to kill it. Never signals an
/// already-reaped process.
async fn kill_child(child: &Mutex<Child>) {
    let mut guard = child.lock().await;
    if matches!(guard.try_wait(), Ok(None)) {
        let _ = guard.start_kill();
    }
}

/// Per-line protocol handling: raw-log persistence, record dispatch, and the
/// running text / tool-set state for one iteration.
struct LineSink<'a> {
    events: &'a Option<mpsc::UnboundedSender<SessionEvent>>,
    raw_log: Option<File>,
    text_parts: Vec<String>,
    active: ActiveToolSet,
    result_record: Option<ResultRecord>,
    first_output: bool,
    start: Instant,
    stop_ticker: &'a watch::Sender<bool>,
}

impl LineSink<'_> {
    async fn handle_line(&mut self, line: String) {
        if self.first_output {
            self.first_output = false;
            let _ = self.stop_ticker.send(true);
            emit(
                self.events,
                SessionEvent::Connected {
                    init: self.start.elapsed(),
                },
            );
        }

        if let Some(log) = self.raw_log.as_mut() {
            let write = async {
                log.write_all(line.as_bytes()).await?;
                log.write_all(b"\n").await?;
                log.flush().await
            };
            if let Err(e) = write.await {
                tracing::warn!(error = %e, "raw log write failed; disabling");
                self.raw_log = None;
            }
        }

        let Some(record) = parse_record(&line) else {
            tracing::debug!(line = %truncate_for_log(&line), "non-protocol line");
            return;
        };

        match record {
            StreamRecord::Assistant(blocks) => {
                for block in blocks {
                    match block {
                        ContentBlock::Text(text) => {
                            self.text_parts.push(text.clone());
                            emit(self.events, SessionEvent::AssistantText(text));
                        }
                        ContentBlock::ToolUse { id, name, input } => {
                            let desc = tool_description(&name, &input);
                            self.active.insert(&id, desc.clone());
                            emit(
                                self.events,
                                SessionEvent::ToolStarted {
                                    description: desc,
                                    active: self.active.descriptions(),
                                },
                            );
                        }
                        ContentBlock::ToolResult { tool_use_id } => {
                            self.active.remove(&tool_use_id);
                            emit(
                                self.events,
                                SessionEvent::ToolFinished {
                                    active: self.active.descriptions(),
                                },
                            );
                        }
                    }
                }
            }
            StreamRecord::Result(rec) => {
                self.result_record = Some(rec);
            }
        }
    }
}

fn truncate_for_log(line: &str) -> &str {
    match line.char_indices().nth(100) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}

/// Run a single Claude Code iteration and return the result.
///
/// Every exit path (clean end, hard timeout, idle timeout, crash, prompt
/// write failure) reaps the child and joins every background task before
/// returning. Only a spawn failure (or an artifact-persistence failure)
/// propagates as an error.
pub async fn run_session(
    prompt: &str,
    iteration: u32,
    opts: &SessionOpts,
    cumulative_cost: f64,
    events: Option<mpsc::UnboundedSender<SessionEvent>>,
) -> Result<IterationResult, RunnerError> {
    let start = Instant::now();
    let mut result = IterationResult::default();

    let mut cmd = Command::new(&opts.claude_bin);
    cmd.arg("-p")
        .arg("--verbose")
        .args(["--model", &opts.model])
        .args(["--output-format", "stream-json"]);
    if opts.mode == RunMode::Afk {
        cmd.args(["--permission-mode", "bypassPermissions"]);
    }
    if opts.internet {
        cmd.arg("--internet");
    }
    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    tracing::debug!(program = %opts.claude_bin, iteration, "spawning session");

    let mut child = cmd.spawn().map_err(|source| RunnerError::Spawn {
        program: opts.claude_bin.clone(),
        source,
    })?;

    let (Some(mut stdin), Some(mut stdout), Some(stderr)) =
        (child.stdin.take(), child.stdout.take(), child.stderr.take())
    else {
        return Err(RunnerError::Spawn {
            program: opts.claude_bin.clone(),
            source: std::io::Error::other("stdio pipes were not captured"),
        });
    };

    let child = Arc::new(Mutex::new(child));
    let (done_tx, done_rx) = watch::channel(false);
    let (ticker_tx, ticker_rx) = watch::channel(false);

    // (a) Prompt writer. A broken pipe here is non-fatal to the run: the
    // child is killed and the iteration yields a partial result.
    let prompt_bytes = prompt.as_bytes().to_vec();
    let writer: JoinHandle<std::io::Result<()>> = tokio::spawn(async move {
        stdin.write_all(&prompt_bytes).await?;
        stdin.shutdown().await?;
        Ok(())
    });

    // (b) Stderr drainer: bounded buffer, kept only for failure reporting.
    let stderr_task: JoinHandle<Vec<String>> = tokio::spawn(async move {
        let mut lines = Vec::new();
        let mut reader = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = reader.next_line().await {
            if line.is_empty() {
                continue;
            }
            tracing::debug!(stderr = %line, "child stderr");
            if lines.len() == STDERR_KEEP {
                lines.remove(0);
            }
            lines.push(line);
        }
        lines
    });

    // (c) Idle watchdog: polls the activity tracker, kills the child after
    // the configured inactivity window, stops as soon as the child is gone.
    let activity = Arc::new(ActivityTracker::new(start));
    let idle_timeout = opts.idle_timeout;
    let watchdog: JoinHandle<bool> = {
        let activity = Arc::clone(&activity);
        let child = Arc::clone(&child);
        let mut done = done_rx.clone();
        let poll = WATCHDOG_POLL.min(idle_timeout);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(poll) => {}
                    _ = done.changed() => return false,
                }
                if !matches!(child.lock().await.try_wait(), Ok(None)) {
                    return false;
                }
                if activity.idle_for() > idle_timeout {
                    tracing::warn!(idle = ?idle_timeout, "idle timeout; killing child");
                    kill_child(&child).await;
                    return true;
                }
            }
        })
    };

    // Status ticker, alive only until the child's first output.
    let ticker: Option<JoinHandle<()>> = events.clone().map(|tx| {
        let mut stop = ticker_rx;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(TICKER_INTERVAL) => {}
                    _ = stop.changed() => return,
                }
                let _ = tx.send(SessionEvent::Connecting {
                    elapsed: start.elapsed(),
                    cumulative_cost,
                });
            }
        })
    });

    let raw_path = opts.output_dir.join(format!("iter-{iteration}.jsonl"));
    let raw_log = match File::create(&raw_path).await {
        Ok(f) => Some(f),
        Err(e) => {
            tracing::warn!(path = %raw_path.display(), error = %e, "cannot create raw log");
            None
        }
    };

    let mut sink = LineSink {
        events: &events,
        raw_log,
        text_parts: Vec::new(),
        active: ActiveToolSet::new(),
        result_record: None,
        first_output: true,
        start,
        stop_ticker: &ticker_tx,
    };

    // (d) Main read loop. The hard-deadline check runs before every read and
    // each read's wait is bounded so neither deadline can be overshot.
    let mut decoder = LineDecoder::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    let mut hard_killed = false;
    loop {
        let elapsed = start.elapsed();
        if elapsed >= opts.hard_timeout {
            tracing::warn!(elapsed = ?elapsed, "hard timeout; killing child");
            hard_killed = true;
            kill_child(&child).await;
            break;
        }
        let bound = (opts.hard_timeout - elapsed).min(idle_timeout + READ_GRACE);

        let n = match tokio::time::timeout(bound, stdout.read(&mut chunk)).await {
            // Wait bound expired; loop around and re-check both budgets.
            Err(_) => continue,
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => n,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "stdout read failed");
                break;
            }
        };

        activity.touch();
        for line in decoder.push(&chunk[..n]) {
            sink.handle_line(line).await;
        }
    }
    if let Some(line) = decoder.finish() {
        sink.handle_line(line).await;
    }

    // Unwind the task group: signal intent, reap, then join. A child that
    // closed stdout can still hold stderr or its stdin pipe open, so the
    // bounded reap must run before the pipe tasks are joined; killing the
    // child closes its pipe ends and lets the drainer and writer unwind.
    let _ = done_tx.send(true);
    let _ = ticker_tx.send(true);
    watchdog_join(&mut result, watchdog, hard_killed).await?;
    if let Some(handle) = ticker {
        handle
            .await
            .map_err(|_| RunnerError::TaskJoin { task: "ticker" })?;
    }

    // Reap, with a bounded grace period; the process is never leaked.
    let status = {
        let mut guard = child.lock().await;
        match tokio::time::timeout(REAP_GRACE, guard.wait()).await {
            Ok(Ok(status)) => Some(status),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "wait for child failed");
                None
            }
            Err(_) => {
                let _ = guard.start_kill();
                match guard.wait().await {
                    Ok(status) => Some(status),
                    Err(e) => {
                        tracing::warn!(error = %e, "wait after kill failed");
                        None
                    }
                }
            }
        }
    };

    let stderr_lines = stderr_task
        .await
        .map_err(|_| RunnerError::TaskJoin { task: "stderr" })?;
    match writer.await {
        Ok(Ok(())) => {}
        // The child is already reaped at this point; a broken pipe just
        // means the prompt was never fully consumed.
        Ok(Err(e)) => tracing::warn!(error = %e, "prompt write failed"),
        Err(_) => return Err(RunnerError::TaskJoin { task: "stdin" }),
    }

    result.exit_code = status.map(normalize_exit);
    result.hard_timed_out = hard_killed;
    result.text = if sink.text_parts.is_empty() {
        sink.result_record
            .as_ref()
            .map(|r| r.result.clone())
            .unwrap_or_default()
    } else {
        sink.text_parts.concat()
    };
    if let Some(rec) = &sink.result_record {
        result.absorb_result_record(rec);
    }
    result.duration = start.elapsed();

    if result.exit_code != Some(0) && !stderr_lines.is_empty() {
        let tail = stderr_lines
            .iter()
            .rev()
            .take(STDERR_TAIL)
            .rev()
            .cloned()
            .collect();
        emit(&events, SessionEvent::StderrTail(tail));
    }

    let txt_path = opts.output_dir.join(format!("iter-{iteration}.txt"));
    tokio::fs::write(&txt_path, &result.text)
        .await
        .map_err(|source| RunnerError::Artifact {
            path: txt_path.display().to_string(),
            source,
        })?;

    tracing::debug!(
        iteration,
        duration = ?result.duration,
        exit = ?result.exit_code,
        hard = result.hard_timed_out,
        idle = result.idle_timed_out,
        "session finished"
    );
    Ok(result)
}

/// Join the watchdog and fold its verdict into the result. Idle and hard
/// timeouts are mutually exclusive by construction; the hard deadline wins
/// when both raced to kill the same child.
async fn watchdog_join(
    result: &mut IterationResult,
    watchdog: JoinHandle<bool>,
    hard_killed: bool,
) -> Result<(), RunnerError> {
    let idle_killed = watchdog
        .await
        .map_err(|_| RunnerError::TaskJoin { task: "watchdog" })?;
    result.idle_timed_out = idle_killed && !hard_killed;
    Ok(())
}
