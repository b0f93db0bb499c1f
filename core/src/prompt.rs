//! Prompt construction for each iteration.

use std::path::Path;

use crate::result::IterationResult;

/// Literal the child outputs to claim the task is finished.
pub const COMPLETION_SIGNAL: &str = "###RALPH_COMPLETE###";

const MAX_PROGRESS_SIZE: usize = 50_000;
const PROGRESS_TAIL_SIZE: usize = 20_000;
const PLAN_HEAD_LINES: usize = 80;

/// Derive a filesystem-friendly prefix from the task prompt, for naming the
/// run directory.
pub fn sanitize_prefix(prompt: &str) -> String {
    let head: String = prompt.chars().take(40).collect::<String>().to_lowercase();
    let re = regex::Regex::new(r"[^a-z0-9]+").unwrap();
    let prefix = re.replace_all(&head, "-");
    let prefix = prefix.trim_matches('-');
    if prefix.is_empty() {
        "ralph".to_string()
    } else {
        prefix.to_string()
    }
}

/// Guidance note injected when the previous iteration failed, keyed by the
/// failure kind. `None` when the previous iteration was clean.
pub fn failure_context(prev: &IterationResult) -> Option<String> {
    if prev.hard_timed_out {
        return Some(
            "The previous iteration hit the hard timeout. \
             It may have been stuck in a long-running operation. \
             Try breaking work into smaller steps."
                .to_string(),
        );
    }
    if prev.idle_timed_out {
        return Some(
            "The previous iteration timed out due to inactivity. \
             It likely got stuck waiting for a tool call or response. \
             Try smaller, faster operations and avoid long-running commands."
                .to_string(),
        );
    }
    match prev.exit_code {
        Some(code) if code != 0 => Some(format!(
            "The previous iteration crashed with exit code {code}. \
             Check the progress file for what was completed before the crash \
             and continue from there."
        )),
        _ => None,
    }
}

/// Everything the prompt builder needs for one iteration.
pub struct PromptContext<'a> {
    pub user_prompt: &'a str,
    pub iteration: u32,
    pub min_iterations: u32,
    pub progress_file: &'a Path,
    pub plan_file: Option<&'a Path>,
    pub verify_cmd: &'a str,
    pub prev_result: Option<&'a IterationResult>,
}

pub fn build_prompt(ctx: &PromptContext<'_>) -> String {
    let mut parts: Vec<String> = Vec::new();

    parts.push(ctx.user_prompt.to_string());
    parts.push(String::new());
    parts.push("---".to_string());
    parts.push(format!("## Outer Loop (Iteration {})", ctx.iteration));
    parts.push(String::new());
    parts.push(
        "You're in an outer loop. Each iteration is a fresh Claude session \
         with no memory of previous sessions."
            .to_string(),
    );
    parts.push(String::new());

    if ctx.iteration == 1 {
        parts.push(
            "This is the first iteration. Start by reading any existing files \
             in the output directory, then begin work."
                .to_string(),
        );
    } else {
        parts.push("### Iteration Discipline".to_string());
        parts.push(
            "- **Read progress first.** Check the progress file before doing anything."
                .to_string(),
        );
        parts.push(
            "- **Never redo completed work.** If a phase or step is marked done, skip it."
                .to_string(),
        );
        parts.push(
            "- **Build incrementally.** Each iteration should advance beyond where the last one stopped."
                .to_string(),
        );
        parts.push(
            "- **Go deeper, not wider.** Improve existing work rather than starting fresh."
                .to_string(),
        );
        parts.push(
            "- **If stuck, try a different approach** rather than repeating what failed."
                .to_string(),
        );
    }
    parts.push(String::new());

    if let Some(ctx_note) = ctx.prev_result.and_then(failure_context) {
        parts.push("### Previous Iteration Status".to_string());
        parts.push(ctx_note);
        parts.push(String::new());
    }

    if let Some(plan_file) = ctx.plan_file {
        if ctx.iteration == 1 {
            parts.push("### Planning (First Iteration)".to_string());
            parts.push(format!(
                "Before starting work, create a plan file at `{}`:",
                plan_file.display()
            ));
            parts.push("- Break the task into 3-7 phases with checkboxes".to_string());
            parts.push("- Include key questions to answer".to_string());
            parts.push("- Then start Phase 1".to_string());
            parts.push(String::new());
        } else {
            match std::fs::read_to_string(plan_file) {
                Ok(plan_text) => {
                    let all_lines: Vec<&str> = plan_text.lines().collect();
                    let head = &all_lines[..all_lines.len().min(PLAN_HEAD_LINES)];
                    if !head.is_empty() {
                        parts.push("### Current Plan".to_string());
                        parts.push("```markdown".to_string());
                        parts.push(head.join("\n"));
                        parts.push("```".to_string());
                        if all_lines.len() > PLAN_HEAD_LINES {
                            parts.push(format!("(truncated, {} total lines)", all_lines.len()));
                        }
                        parts.push(String::new());
                        parts.push(format!(
                            "Read `{}` before major decisions. \
                             Update phase status as you progress.",
                            plan_file.display()
                        ));
                        parts.push(String::new());
                    }
                }
                Err(_) => {
                    parts.push("### Planning".to_string());
                    parts.push(format!(
                        "Create a plan file at `{}` with 3-7 phases \
                         and checkboxes. Then continue work.",
                        plan_file.display()
                    ));
                    parts.push(String::new());
                }
            }
        }
    }

    let progress_text = std::fs::read_to_string(ctx.progress_file).unwrap_or_default();
    if !progress_text.trim().is_empty() {
        let progress_text = if progress_text.len() > MAX_PROGRESS_SIZE {
            format!(
                "[Earlier iterations summarized - showing last {}K chars]\n\n{}",
                PROGRESS_TAIL_SIZE / 1000,
                tail_chars(&progress_text, PROGRESS_TAIL_SIZE)
            )
        } else {
            progress_text
        };
        parts.push("### Progress from Previous Iterations".to_string());
        parts.push("```".to_string());
        parts.push(progress_text);
        parts.push("```".to_string());
        parts.push(String::new());
    }

    parts.push(format!(
        "Before ending, update `{}` with what you accomplished this iteration.",
        ctx.progress_file.display()
    ));
    parts.push(String::new());

    if !ctx.verify_cmd.is_empty() {
        parts.push("### Verification".to_string());
        parts.push("This command will be run after your iteration:".to_string());
        parts.push(format!("```\n{}\n```", ctx.verify_cmd));
        parts.push(String::new());
    }

    parts.push(format!(
        "To signal completion: output {COMPLETION_SIGNAL} \
         (only accepted after iteration {})",
        ctx.min_iterations
    ));

    parts.join("\n")
}

/// Last `n` bytes of `s`, nudged forward to a char boundary.
fn tail_chars(s: &str, n: usize) -> &str {
    if s.len() <= n {
        return s;
    }
    let mut cut = s.len() - n;
    while !s.is_char_boundary(cut) {
        cut += 1;
    }
    &s[cut..]
}
