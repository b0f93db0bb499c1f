//! Run artifacts: the progress file, `stats.json`, resume scanning, and the
//! end-of-run summary.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::RunnerError;
use crate::fmt::{fmt_duration, fmt_tokens};
use crate::result::IterationResult;

const SUMMARY_TIMEOUT: Duration = Duration::from_secs(60);
const SUMMARY_INPUT_LIMIT: usize = 30_000;
const PREVIEW_CHARS: usize = 500;

/// Highest iteration number recorded in a run directory, judged by
/// `iter-N.jsonl` artifacts. Zero for a fresh directory.
pub fn find_last_iteration(output_dir: &Path) -> u32 {
    let Ok(entries) = std::fs::read_dir(output_dir) else {
        return 0;
    };
    let mut last = 0;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(n) = name
            .strip_prefix("iter-")
            .and_then(|rest| rest.strip_suffix(".jsonl"))
            .and_then(|num| num.parse::<u32>().ok())
        else {
            continue;
        };
        last = last.max(n);
    }
    last
}

/// Write the progress file header for a fresh run.
pub fn seed_progress(progress_file: &Path, task: &str, started: &str) -> Result<(), RunnerError> {
    let header = format!("# Ralph Runner Progress\n\nTask: {task}\nStarted: {started}\n\n");
    std::fs::write(progress_file, header).map_err(|source| RunnerError::Artifact {
        path: progress_file.display().to_string(),
        source,
    })
}

/// Append one iteration's orchestrator-side summary to the progress file.
pub fn append_orchestrator_progress(
    progress_file: &Path,
    iteration: u32,
    result: &IterationResult,
    verify_passed: Option<bool>,
    verify_cmd: Option<&str>,
) -> Result<(), RunnerError> {
    let status = if result.hard_timed_out {
        "TIMED OUT (hard)".to_string()
    } else if result.idle_timed_out {
        "TIMED OUT (idle)".to_string()
    } else if result.exit_code != Some(0) {
        match result.exit_code {
            Some(code) => format!("FAILED (exit {code})"),
            None => "FAILED (no exit status)".to_string(),
        }
    } else {
        "OK".to_string()
    };

    let mut lines = vec![
        format!("\n---\n## [Orchestrator] Iteration {iteration} Summary"),
        format!("- **Status:** {status}"),
        format!("- **Duration:** {}", fmt_duration(result.duration)),
        format!("- **Cost:** ${:.4}", result.cost_usd),
        format!(
            "- **Tokens:** {} in / {} out",
            fmt_tokens(result.input_tokens),
            fmt_tokens(result.output_tokens)
        ),
    ];

    if verify_cmd.is_some() {
        if let Some(passed) = verify_passed {
            lines.push(format!(
                "- **Verify:** {}",
                if passed { "PASS" } else { "FAIL" }
            ));
        }
    }

    if !result.text.is_empty() {
        let mut preview = truncate_chars(&result.text, PREVIEW_CHARS)
            .trim()
            .to_string();
        if result.text.chars().count() > PREVIEW_CHARS {
            preview.push_str("...");
        }
        lines.push(format!(
            "\n<details><summary>Output preview</summary>\n\n{preview}\n\n</details>"
        ));
    }

    lines.push(String::new());

    let body = lines.join("\n");
    append_to_file(progress_file, &body)
}

fn append_to_file(path: &Path, body: &str) -> Result<(), RunnerError> {
    use std::io::Write;
    let map_err = |source| RunnerError::Artifact {
        path: path.display().to_string(),
        source,
    };
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(map_err)?;
    file.write_all(body.as_bytes()).map_err(map_err)
}

/// Run settings recorded verbatim in `stats.json`.
#[derive(Debug, Clone, Serialize)]
pub struct RunSettings {
    pub min_iterations: u32,
    pub max_iterations: u32,
    pub mode: String,
    pub timeout: u64,
    pub idle_timeout: u64,
    pub plan: bool,
    pub verify: Option<String>,
    pub internet: bool,
    pub model: String,
}

/// One row of the `stats.json` iterations table.
#[derive(Debug, Clone, Serialize)]
pub struct IterationRow {
    pub iteration: u32,
    pub status: String,
    pub duration_s: f64,
    pub cost_usd: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub num_turns: u64,
    pub verify: Option<bool>,
}

impl IterationRow {
    pub fn from_result(iteration: u32, result: &IterationResult, verify: Option<bool>) -> Self {
        let status = if result.hard_timed_out {
            "timeout_hard".to_string()
        } else if result.idle_timed_out {
            "timeout_idle".to_string()
        } else if result.exit_code != Some(0) {
            match result.exit_code {
                Some(code) => format!("exit_{code}"),
                None => "no_exit_status".to_string(),
            }
        } else {
            "ok".to_string()
        };
        Self {
            iteration,
            status,
            duration_s: (result.duration.as_secs_f64() * 10.0).round() / 10.0,
            cost_usd: (result.cost_usd * 10_000.0).round() / 10_000.0,
            input_tokens: result.input_tokens,
            output_tokens: result.output_tokens,
            cache_read_tokens: result.cache_read_tokens,
            cache_write_tokens: result.cache_write_tokens,
            num_turns: result.num_turns,
            verify,
        }
    }
}

#[derive(Debug, Serialize)]
struct RunTotals {
    iterations: usize,
    duration_s: f64,
    cost_usd: f64,
    input_tokens: u64,
    output_tokens: u64,
    cache_read_tokens: u64,
    cache_write_tokens: u64,
    verify_passes: usize,
    verify_fails: usize,
}

#[derive(Debug, Serialize)]
struct RunStats<'a> {
    task: &'a str,
    started: &'a str,
    settings: &'a RunSettings,
    iterations: &'a [IterationRow],
    totals: RunTotals,
}

/// Rewrite `stats.json` with cumulative run data. Called after every
/// iteration so a killed run still leaves usable stats behind.
pub fn write_stats(
    output_dir: &Path,
    task: &str,
    started: &str,
    settings: &RunSettings,
    iterations: &[IterationRow],
) -> Result<(), RunnerError> {
    let totals = RunTotals {
        iterations: iterations.len(),
        duration_s: iterations.iter().map(|r| r.duration_s).sum(),
        cost_usd: iterations.iter().map(|r| r.cost_usd).sum(),
        input_tokens: iterations.iter().map(|r| r.input_tokens).sum(),
        output_tokens: iterations.iter().map(|r| r.output_tokens).sum(),
        cache_read_tokens: iterations.iter().map(|r| r.cache_read_tokens).sum(),
        cache_write_tokens: iterations.iter().map(|r| r.cache_write_tokens).sum(),
        verify_passes: iterations.iter().filter(|r| r.verify == Some(true)).count(),
        verify_fails: iterations
            .iter()
            .filter(|r| r.verify == Some(false))
            .count(),
    };
    let stats = RunStats {
        task,
        started,
        settings,
        iterations,
        totals,
    };
    let path = output_dir.join("stats.json");
    let json = serde_json::to_string_pretty(&stats).unwrap_or_default();
    std::fs::write(&path, json).map_err(|source| RunnerError::Artifact {
        path: path.display().to_string(),
        source,
    })
}

/// Ask a cheap model to summarize the progress file. Best effort: returns an
/// empty string when there is nothing to summarize or the child cannot run.
pub async fn generate_summary(claude_bin: &str, progress_file: &Path) -> String {
    let progress_text = match std::fs::read_to_string(progress_file) {
        Ok(text) => text,
        Err(e) => {
            debug!(error = %e, "no progress file to summarize");
            return String::new();
        }
    };
    if progress_text.trim().is_empty() {
        return String::new();
    }
    let truncated = progress_text.chars().count() > SUMMARY_INPUT_LIMIT;
    let mut progress_text = truncate_chars(&progress_text, SUMMARY_INPUT_LIMIT).to_string();
    if truncated {
        progress_text.push_str("\n\n[truncated]");
    }

    let prompt = format!(
        "Summarize what was accomplished across all iterations of this task. \
         Be concise — 5-10 bullet points max. Focus on concrete outcomes, \
         not process details.\n\nProgress file:\n\n{progress_text}"
    );

    let child = Command::new(claude_bin)
        .args(["-p", "--model", "haiku", "--output-format", "text"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();
    let mut child = match child {
        Ok(child) => child,
        Err(e) => {
            warn!(error = %e, "summary generation unavailable");
            return String::new();
        }
    };

    let output = async {
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                debug!(error = %e, "failed to feed summary prompt");
            }
        }
        child.wait_with_output().await
    };

    match tokio::time::timeout(SUMMARY_TIMEOUT, output).await {
        Ok(Ok(output)) => String::from_utf8_lossy(&output.stdout).trim().to_string(),
        Ok(Err(e)) => {
            warn!(error = %e, "summary generation failed");
            String::new()
        }
        Err(_) => "(Summary generation timed out)".to_string(),
    }
}

/// Truncate to at most `max` characters without splitting a code point.
fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_result() -> IterationResult {
        IterationResult {
            text: "did some work".to_string(),
            duration: Duration::from_secs(42),
            exit_code: Some(0),
            cost_usd: 0.1234,
            input_tokens: 1_000,
            output_tokens: 500,
            ..Default::default()
        }
    }

    #[test]
    fn last_iteration_scans_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        for n in [1, 3, 7] {
            std::fs::write(dir.path().join(format!("iter-{n}.jsonl")), "{}").unwrap();
        }
        std::fs::write(dir.path().join("iter-4.txt"), "text only").unwrap();
        std::fs::write(dir.path().join("iter-nope.jsonl"), "junk").unwrap();
        std::fs::write(dir.path().join("progress.md"), "").unwrap();
        assert_eq!(find_last_iteration(dir.path()), 7);
    }

    #[test]
    fn last_iteration_empty_dir_is_zero() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(find_last_iteration(dir.path()), 0);
        assert_eq!(find_last_iteration(&dir.path().join("missing")), 0);
    }

    #[test]
    fn progress_append_records_status_and_preview() {
        let dir = tempfile::tempdir().unwrap();
        let progress = dir.path().join("progress.md");
        seed_progress(&progress, "build a thing", "2026-08-29 10:00:00").unwrap();

        append_orchestrator_progress(&progress, 1, &ok_result(), Some(true), Some("make test"))
            .unwrap();
        let body = std::fs::read_to_string(&progress).unwrap();
        assert!(body.starts_with("# Ralph Runner Progress"));
        assert!(body.contains("## [Orchestrator] Iteration 1 Summary"));
        assert!(body.contains("**Status:** OK"));
        assert!(body.contains("**Verify:** PASS"));
        assert!(body.contains("did some work"));
    }

    #[test]
    fn progress_append_failure_statuses() {
        let dir = tempfile::tempdir().unwrap();
        let progress = dir.path().join("progress.md");

        let hard = IterationResult {
            hard_timed_out: true,
            exit_code: Some(137),
            ..Default::default()
        };
        append_orchestrator_progress(&progress, 2, &hard, None, None).unwrap();

        let crash = IterationResult {
            exit_code: Some(3),
            ..Default::default()
        };
        append_orchestrator_progress(&progress, 3, &crash, None, None).unwrap();

        let body = std::fs::read_to_string(&progress).unwrap();
        assert!(body.contains("**Status:** TIMED OUT (hard)"));
        assert!(body.contains("**Status:** FAILED (exit 3)"));
        assert!(!body.contains("**Verify:**"));
    }

    #[test]
    fn stats_json_totals() {
        let dir = tempfile::tempdir().unwrap();
        let settings = RunSettings {
            min_iterations: 2,
            max_iterations: 10,
            mode: "afk".to_string(),
            timeout: 900,
            idle_timeout: 120,
            plan: true,
            verify: Some("make test".to_string()),
            internet: false,
            model: "sonnet".to_string(),
        };
        let rows = vec![
            IterationRow::from_result(1, &ok_result(), Some(false)),
            IterationRow::from_result(2, &ok_result(), Some(true)),
        ];
        write_stats(dir.path(), "build a thing", "2026-08-29 10:00:00", &settings, &rows).unwrap();

        let raw = std::fs::read_to_string(dir.path().join("stats.json")).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["task"], "build a thing");
        assert_eq!(parsed["settings"]["min_iterations"], 2);
        assert_eq!(parsed["iterations"][0]["status"], "ok");
        assert_eq!(parsed["iterations"][0]["verify"], false);
        assert_eq!(parsed["totals"]["iterations"], 2);
        assert_eq!(parsed["totals"]["input_tokens"], 2_000);
        assert_eq!(parsed["totals"]["verify_passes"], 1);
        assert_eq!(parsed["totals"]["verify_fails"], 1);
    }

    #[test]
    fn row_status_strings() {
        let idle = IterationResult {
            idle_timed_out: true,
            exit_code: None,
            ..Default::default()
        };
        assert_eq!(IterationRow::from_result(1, &idle, None).status, "timeout_idle");

        let unknown = IterationResult {
            exit_code: None,
            ..Default::default()
        };
        assert_eq!(
            IterationRow::from_result(1, &unknown, None).status,
            "no_exit_status"
        );
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("hi", 10), "hi");
    }
}
