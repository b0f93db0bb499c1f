//! Verification helpers: run external pass/fail commands and summarize
//! their history.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

/// Default budget for one verification run.
pub const DEFAULT_VERIFY_TIMEOUT: Duration = Duration::from_secs(300);

/// Run a verification command through the shell and return
/// `(passed, combined_output)`.
///
/// Exit code 0 means pass; any other exit code, a timeout, or a failure to
/// run the command at all counts as a failure. Never returns an error: a
/// broken verify step gates completion but must not abort the run.
pub async fn run_verify(cmd: &str, timeout: Duration) -> (bool, String) {
    let child = Command::new("sh")
        .args(["-c", cmd])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let child = match child {
        Ok(child) => child,
        Err(e) => return (false, format!("Failed to run verify command: {e}")),
    };

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.trim().is_empty() {
                if !text.is_empty() && !text.ends_with('\n') {
                    text.push('\n');
                }
                text.push_str(&stderr);
            }
            (output.status.success(), text)
        }
        Ok(Err(e)) => (false, format!("Failed to run verify command: {e}")),
        // Dropping the future drops the child handle; kill_on_drop reaps it.
        Err(_) => (
            false,
            format!("Verify command timed out after {}s", timeout.as_secs()),
        ),
    }
}

/// Compact trend string like `(3/5 ↑)` over the recorded outcomes.
/// `None` entries (verification not run) are skipped.
pub fn verify_trend_str(history: &[Option<bool>]) -> String {
    let results: Vec<bool> = history.iter().filter_map(|r| *r).collect();
    if results.is_empty() {
        return String::new();
    }
    let passes = results.iter().filter(|&&r| r).count();
    let total = results.len();

    let mut arrow = "";
    if results.len() >= 4 {
        let recent = &results[results.len() - 3..];
        let prior = if results.len() >= 6 {
            &results[results.len() - 6..results.len() - 3]
        } else {
            &results[..results.len() - 3]
        };
        let recent_rate = rate(recent);
        let prior_rate = rate(prior);
        arrow = if recent_rate > prior_rate {
            " ↑"
        } else if recent_rate < prior_rate {
            " ↓"
        } else {
            " →"
        };
    }
    format!("({passes}/{total}{arrow})")
}

/// Glyph sequence like `✓✓✗✓  (3/4 passed, converging)`.
pub fn verify_sequence_str(history: &[Option<bool>]) -> String {
    let results: Vec<bool> = history.iter().filter_map(|r| *r).collect();
    if results.is_empty() {
        return String::new();
    }
    let seq: String = history
        .iter()
        .map(|r| match r {
            None => '·',
            Some(true) => '✓',
            Some(false) => '✗',
        })
        .collect();
    let passes = results.iter().filter(|&&r| r).count();
    let total = results.len();

    let mut trend = "";
    if results.len() >= 3 {
        let last3 = &results[results.len() - 3..];
        if last3.iter().all(|&r| r) {
            trend = ", converging";
        } else if !last3.iter().any(|&r| r) {
            trend = ", diverging";
        }
    }
    format!("{seq}  ({passes}/{total} passed{trend})")
}

fn rate(results: &[bool]) -> f64 {
    if results.is_empty() {
        return 0.0;
    }
    results.iter().filter(|&&r| r).count() as f64 / results.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passing_command() {
        let (passed, output) = run_verify("echo ok", Duration::from_secs(10)).await;
        assert!(passed);
        assert_eq!(output.trim(), "ok");
    }

    #[tokio::test]
    async fn failing_command_captures_stderr() {
        let (passed, output) = run_verify("echo boom >&2; exit 3", Duration::from_secs(10)).await;
        assert!(!passed);
        assert!(output.contains("boom"));
    }

    #[tokio::test]
    async fn timeout_counts_as_failure() {
        let (passed, output) = run_verify("sleep 5", Duration::from_millis(200)).await;
        assert!(!passed);
        assert!(output.contains("timed out"));
    }

    #[test]
    fn trend_str_shapes() {
        assert_eq!(verify_trend_str(&[]), "");
        assert_eq!(verify_trend_str(&[None, None]), "");
        assert_eq!(verify_trend_str(&[Some(true), Some(true)]), "(2/2)");
        let improving = [
            Some(false),
            Some(false),
            Some(false),
            Some(true),
            Some(true),
            Some(true),
        ];
        assert!(verify_trend_str(&improving).contains('↑'));
        let declining = [
            Some(true),
            Some(true),
            Some(true),
            Some(false),
            Some(false),
            Some(false),
        ];
        assert!(verify_trend_str(&declining).contains('↓'));
    }

    #[test]
    fn sequence_str_classifies_trend() {
        assert_eq!(verify_sequence_str(&[]), "");

        let converging = [Some(true), Some(true), Some(true)];
        assert!(verify_sequence_str(&converging).contains("converging"));

        let diverging = [Some(false), Some(false), Some(false)];
        assert!(verify_sequence_str(&diverging).contains("diverging"));

        let mixed = verify_sequence_str(&[Some(true), Some(false), Some(true)]);
        assert!(mixed.contains('✓'));
        assert!(mixed.contains('✗'));
        assert!(mixed.contains("2/3"));
        assert!(!mixed.contains("converging"));

        let skipped = verify_sequence_str(&[Some(true), None, Some(true)]);
        assert!(skipped.contains('·'));
        assert!(skipped.contains("2/2 passed"));
    }
}
