//! Run orchestration: directory setup, signal handling, event rendering,
//! and the end-of-run summary panels.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::warn;

use ralph_core::controller::{
    run_loop, AutoContinue, ClaudeBackend, CompletionBlock, ControllerEvent, LoopConfig,
    LoopInteraction, RunReport, VerifyOutcome,
};
use ralph_core::prompt::sanitize_prefix;
use ralph_core::session::{RunMode, SessionEvent};
use ralph_core::stats::{find_last_iteration, generate_summary, seed_progress};
use ralph_core::verify::verify_sequence_str;
use ralph_core::IterationResult;

use crate::cli::{Args, Mode};
use crate::display::{
    box_line, fmt_duration, fmt_tokens, log, short_model, BLUE, BOLD, CLEAR_LINE, CYAN, DIM,
    GREEN, PANEL_WIDTH, RED, RESET, SPINNER_FRAMES, WHITE, YELLOW,
};

pub async fn run(args: Args) -> anyhow::Result<i32> {
    let started = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();

    let (output_dir, start_iteration) = resolve_run_dir(&args)?;
    let progress_file = output_dir.join("progress.md");
    let plan_file = args.plan_enabled().then(|| output_dir.join("plan.md"));
    if args.resume.is_none() {
        seed_progress(&progress_file, &args.prompt, &started)
            .context("cannot seed progress file")?;
    }

    banner(&args, &output_dir, start_iteration);

    // First Ctrl+C stops at the iteration boundary, second forces out.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log(&format!(
                "{YELLOW}Shutting down after current iteration... \
                 (Ctrl+C again to force){RESET}"
            ));
            let _ = shutdown_tx.send(true);
        }
        if tokio::signal::ctrl_c().await.is_ok() {
            log(&format!("{RED}Force quit.{RESET}"));
            std::process::exit(130);
        }
    });

    let config = LoopConfig {
        prompt: args.prompt.clone(),
        min_iterations: args.iterations,
        max_iterations: args.max_iterations,
        mode: match args.mode {
            Mode::Hitl => RunMode::Hitl,
            Mode::Afk => RunMode::Afk,
        },
        hard_timeout: Duration::from_secs(args.timeout),
        idle_timeout: Duration::from_secs(args.idle_timeout),
        verify_cmd: args.verify.clone(),
        verify_timeout: ralph_core::verify::DEFAULT_VERIFY_TIMEOUT,
        internet: args.internet,
        model: args.model.clone(),
        claude_bin: args.claude_bin.clone(),
        output_dir: output_dir.clone(),
        progress_file: progress_file.clone(),
        plan_file,
        start_iteration,
        started,
        debug: args.debug,
    };

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let render = tokio::spawn(render_events(events_rx, start_iteration));

    let backend = ClaudeBackend;
    let stdin_prompt = StdinPrompt;
    let auto = AutoContinue;
    let interaction: &dyn LoopInteraction = match args.mode {
        Mode::Hitl => &stdin_prompt,
        Mode::Afk => &auto,
    };

    let report = run_loop(&config, &backend, interaction, shutdown_rx, Some(events_tx)).await?;
    let _ = render.await;

    final_summary(&args, &report);

    log(&format!("{DIM}Generating summary...{RESET}"));
    let summary_text = generate_summary(&args.claude_bin, &progress_file).await;
    if !summary_text.is_empty() {
        println!("\n  {BOLD}{WHITE}What Was Accomplished{RESET}");
        println!("  {DIM}{}{RESET}", "─".repeat(PANEL_WIDTH));
        for line in summary_text.lines() {
            println!("  {line}");
        }
        if let Err(e) = std::fs::write(output_dir.join("summary.md"), &summary_text) {
            warn!(error = %e, "failed to write summary.md");
        }
    }

    println!("\n  {DIM}Output:{RESET}      {}", output_dir.display());
    println!(
        "  {DIM}Resume:{RESET}      ralph-runner --resume {} --prompt '...'",
        output_dir.display()
    );
    println!("  {DIM}{}{RESET}", "━".repeat(PANEL_WIDTH));
    println!();

    Ok(0)
}

fn resolve_run_dir(args: &Args) -> anyhow::Result<(PathBuf, u32)> {
    if let Some(resume) = &args.resume {
        if !resume.is_dir() {
            bail!("Resume directory does not exist: {}", resume.display());
        }
        let last = find_last_iteration(resume);
        log(&format!("Resuming from iteration {last}"));
        return Ok((resume.clone(), last));
    }
    let home = dirs::home_dir().context("cannot determine home directory")?;
    let ts = chrono::Local::now().format("%Y%m%d-%H%M%S");
    let prefix = sanitize_prefix(&args.prompt);
    let dir = home
        .join(".ralph-runner")
        .join("runs")
        .join(format!("{ts}-{prefix}"));
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("cannot create run directory {}", dir.display()))?;
    Ok((dir, 0))
}

fn banner(args: &Args, output_dir: &Path, start_iteration: u32) {
    println!();
    println!("  {BOLD}{CYAN}◉ RALPH RUNNER{RESET}");
    println!("  {DIM}{}{RESET}", "─".repeat(PANEL_WIDTH));
    let col1 = format!(
        "{DIM}Iterations:{RESET} {WHITE}{}–{}{RESET}",
        args.iterations, args.max_iterations
    );
    let col2 = format!("{DIM}Mode:{RESET} {WHITE}{}{RESET}", args.mode);
    let col3 = format!(
        "{DIM}Timeout:{RESET} {WHITE}{}{RESET}",
        fmt_duration(Duration::from_secs(args.timeout))
    );
    println!("  {col1}  {DIM}│{RESET}  {col2}  {DIM}│{RESET}  {col3}");
    let col4 = format!(
        "{DIM}Plan:{RESET} {WHITE}{}{RESET}",
        if args.plan_enabled() { "ON" } else { "OFF" }
    );
    let col5 = format!(
        "{DIM}Idle:{RESET} {WHITE}{}{RESET}",
        fmt_duration(Duration::from_secs(args.idle_timeout))
    );
    let col6 = format!(
        "{DIM}Internet:{RESET} {WHITE}{}{RESET}",
        if args.internet { "ON" } else { "OFF" }
    );
    println!("  {col4}        {DIM}│{RESET}  {col5}  {DIM}│{RESET}  {col6}");
    println!("  {DIM}Model:{RESET} {WHITE}{}{RESET}", args.model);
    if let Some(verify) = &args.verify {
        println!("  {DIM}Verify:{RESET}  {WHITE}{verify}{RESET}");
    }
    if args.resume.is_some() {
        println!("  {DIM}Resume:{RESET}  from iteration {start_iteration}");
    }
    println!("  {DIM}Output:{RESET}  {}", output_dir.display());
    println!("  {DIM}{}{RESET}", "─".repeat(PANEL_WIDTH));
    println!();
}

/// Between-iteration prompt for hitl mode.
struct StdinPrompt;

#[async_trait]
impl LoopInteraction for StdinPrompt {
    async fn confirm_continue(&self) -> bool {
        print!("\n  {DIM}Press Enter to continue, 'q' to quit:{RESET} ");
        let _ = std::io::stdout().flush();
        let mut line = String::new();
        let mut reader = BufReader::new(tokio::io::stdin());
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => {
                log("Stopped.");
                false
            }
            Ok(_) => {
                if matches!(line.trim().to_lowercase().as_str(), "q" | "quit") {
                    log("Stopped by user.");
                    false
                } else {
                    true
                }
            }
        }
    }
}

async fn render_events(mut rx: mpsc::UnboundedReceiver<ControllerEvent>, start_iteration: u32) {
    let mut r = Renderer::new(start_iteration);
    let mut ticker = tokio::time::interval(Duration::from_millis(100));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            ev = rx.recv() => match ev {
                Some(ev) => r.handle(ev),
                None => break,
            },
            _ = ticker.tick() => r.tick(),
        }
    }
    r.clear_status();
}

/// Terminal state machine for one run: a transient status line at the
/// bottom, permanent lines logged above it.
struct Renderer {
    first_iteration: u32,
    running: bool,
    connecting: bool,
    iter_start: Instant,
    active_tools: Vec<String>,
    cumulative_cost: f64,
    spinner: usize,
    status_shown: bool,
}

impl Renderer {
    fn new(start_iteration: u32) -> Self {
        Self {
            first_iteration: start_iteration + 1,
            running: false,
            connecting: false,
            iter_start: Instant::now(),
            active_tools: Vec::new(),
            cumulative_cost: 0.0,
            spinner: 0,
            status_shown: false,
        }
    }

    fn clear_status(&mut self) {
        if self.status_shown {
            print!("{CLEAR_LINE}");
            let _ = std::io::stdout().flush();
            self.status_shown = false;
        }
    }

    fn tick(&mut self) {
        if !self.running {
            return;
        }
        let char = SPINNER_FRAMES[self.spinner % SPINNER_FRAMES.len()];
        self.spinner += 1;
        let elapsed = fmt_duration(self.iter_start.elapsed());
        let status = if self.connecting {
            format!(
                "  {CYAN}{char}{RESET}  {DIM}Connecting to Claude...{RESET} \
                 {DIM}{elapsed}{RESET}  {DIM}(${:.2} spent){RESET}",
                self.cumulative_cost
            )
        } else if self.active_tools.is_empty() {
            format!("  {CYAN}{char}{RESET}  {DIM}{elapsed}{RESET}  {DIM}processing...{RESET}")
        } else {
            let shown: Vec<&str> = self.active_tools.iter().take(2).map(String::as_str).collect();
            let mut tool_str = shown.join(", ");
            if self.active_tools.len() > 2 {
                tool_str.push_str(&format!(" +{} more", self.active_tools.len() - 2));
            }
            format!(
                "  {CYAN}{char}{RESET}  {DIM}{elapsed}{RESET}  {BLUE}▶{RESET} {DIM}{tool_str}{RESET}"
            )
        };
        print!("{CLEAR_LINE}{status}");
        let _ = std::io::stdout().flush();
        self.status_shown = true;
    }

    fn handle(&mut self, ev: ControllerEvent) {
        match ev {
            ControllerEvent::IterationStarted {
                iteration,
                elapsed,
                total_cost,
                total_input,
                total_output,
            } => {
                self.clear_status();
                if iteration == self.first_iteration {
                    println!("\n  {BOLD}{BLUE}━━━ Iteration {iteration} ━━━{RESET}");
                } else {
                    println!(
                        "\n  {BOLD}{BLUE}━━━ Iteration {iteration} ━━━{RESET}  \
                         {DIM}elapsed: {} | ${total_cost:.2} | {} in / {} out{RESET}",
                        fmt_duration(elapsed),
                        fmt_tokens(total_input),
                        fmt_tokens(total_output),
                    );
                }
                self.running = true;
                self.connecting = true;
                self.iter_start = Instant::now();
                self.active_tools.clear();
                self.cumulative_cost = total_cost;
            }
            ControllerEvent::Session(ev) => self.handle_session(ev),
            ControllerEvent::IterationFinished {
                result,
                verify,
                verify_trend,
                progress_bytes,
                ..
            } => {
                self.running = false;
                self.clear_status();
                self.iteration_status(&result, progress_bytes);
                if let Some(v) = &verify {
                    self.verify_status(v, &verify_trend);
                }
                self.text_excerpt(&result.text);
            }
            ControllerEvent::CompletionBlocked(block) => match block {
                CompletionBlock::MinIterations { done, required } => {
                    println!(
                        "  {YELLOW}⏳{RESET}  {DIM}completion blocked: \
                         {done}/{required} iterations{RESET}"
                    );
                }
                CompletionBlock::VerifyFailed => {
                    println!("  {YELLOW}⏳{RESET}  {DIM}completion blocked: verify failed{RESET}");
                }
            },
            ControllerEvent::Completed => {
                println!("\n  {BOLD}{GREEN}◉ Task completed!{RESET}");
            }
            ControllerEvent::MaxIterationsReached { limit } => {
                log(&format!(
                    "{YELLOW}Max iterations reached ({limit}). Stopping.{RESET}"
                ));
            }
            ControllerEvent::ShutdownNoticed => {
                log(&format!("{YELLOW}Shutdown requested.{RESET}"));
            }
        }
    }

    fn handle_session(&mut self, ev: SessionEvent) {
        match ev {
            // The renderer's own ticker draws the connecting line.
            SessionEvent::Connecting { .. } => {}
            SessionEvent::Connected { init } => {
                self.clear_status();
                println!(
                    "  {GREEN}●{RESET}  {DIM}Connected{RESET} {DIM}({} init){RESET}",
                    fmt_duration(init)
                );
                self.connecting = false;
            }
            SessionEvent::AssistantText(text) => {
                self.clear_status();
                for line in text.split('\n') {
                    println!("{}", box_line(line));
                }
            }
            SessionEvent::ToolStarted {
                description,
                active,
            } => {
                self.clear_status();
                let ts = chrono::Local::now().format("%H:%M:%S");
                println!("  {DIM}{ts}{RESET}  {CYAN}→{RESET} {DIM}{description}{RESET}");
                self.active_tools = active;
            }
            SessionEvent::ToolFinished { active } => {
                self.active_tools = active;
            }
            SessionEvent::StderrTail(lines) => {
                self.clear_status();
                log(&format!("{RED}stderr:{RESET}"));
                for line in &lines {
                    log(&format!("  {DIM}{line}{RESET}"));
                }
            }
        }
    }

    fn iteration_status(&self, result: &IterationResult, progress_bytes: u64) {
        let (icon, status_text) = if result.hard_timed_out {
            (format!("{RED}✗{RESET}"), format!("{RED}timeout{RESET} (hard)"))
        } else if result.idle_timed_out {
            (
                format!("{YELLOW}✗{RESET}"),
                format!("{YELLOW}timeout{RESET} (idle)"),
            )
        } else if result.exit_code != Some(0) {
            let detail = match result.exit_code {
                Some(code) => format!("{RED}exit {code}{RESET}"),
                None => format!("{RED}no exit status{RESET}"),
            };
            (format!("{RED}✗{RESET}"), detail)
        } else if result.text.is_empty() {
            (format!("{YELLOW}○{RESET}"), format!("{YELLOW}no output{RESET}"))
        } else {
            (format!("{GREEN}✓{RESET}"), format!("{GREEN}done{RESET}"))
        };

        let cost_str = if result.cost_usd > 0.0 {
            format!("${:.2}", result.cost_usd)
        } else {
            "$-".to_string()
        };
        let token_str = format!(
            "{} in / {} out",
            fmt_tokens(result.input_tokens),
            fmt_tokens(result.output_tokens)
        );
        let psize_str = if progress_bytes > 1024 {
            format!("{:.1}KB", progress_bytes as f64 / 1024.0)
        } else {
            format!("{progress_bytes}B")
        };

        println!(
            "\n  {icon}  {status_text}  {DIM}│{RESET}  {}  {DIM}│{RESET}  {cost_str}  \
             {DIM}│{RESET}  {token_str}  {DIM}│{RESET}  {DIM}progress: {psize_str}{RESET}",
            fmt_duration(result.duration)
        );
    }

    fn verify_status(&self, verify: &VerifyOutcome, trend: &str) {
        if verify.passed {
            println!("  {GREEN}✓{RESET}  {DIM}verify passed{RESET}  {DIM}{trend}{RESET}");
            return;
        }
        println!("  {RED}✗{RESET}  {RED}verify failed{RESET}  {DIM}{trend}{RESET}");
        let output = verify.output.trim();
        if !output.is_empty() {
            let lines: Vec<&str> = output.lines().collect();
            for line in lines.iter().rev().take(5).rev() {
                println!("     {DIM}{line}{RESET}");
            }
        }
    }

    fn text_excerpt(&self, text: &str) {
        let lines: Vec<&str> = text
            .trim()
            .split('\n')
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        if lines.is_empty() {
            return;
        }
        println!("  {DIM}{}{RESET}", "─".repeat(40));
        for line in lines.iter().rev().take(3).rev() {
            let shown: String = line.chars().take(100).collect();
            println!("  {DIM}{shown}{RESET}");
        }
        println!("  {DIM}{}{RESET}", "─".repeat(40));
    }
}

fn final_summary(args: &Args, report: &RunReport) {
    println!();
    println!("  {DIM}{}{RESET}", "━".repeat(PANEL_WIDTH));
    println!("  {BOLD}{WHITE}Summary{RESET}");
    println!("  {DIM}{}{RESET}", "─".repeat(PANEL_WIDTH));

    let total_in: u64 = report.rows.iter().map(|r| r.input_tokens).sum();
    let total_out: u64 = report.rows.iter().map(|r| r.output_tokens).sum();
    println!(
        "  {DIM}Iterations:{RESET}   {WHITE}{}{RESET}  {DIM}│{RESET}  {DIM}Time:{RESET} {WHITE}{}{RESET}  {DIM}│{RESET}  {DIM}Cost:{RESET} {BOLD}${:.2}{RESET}  {DIM}│{RESET}  {DIM}Tokens:{RESET} {WHITE}{} in / {} out{RESET}",
        report.iterations_done,
        fmt_duration(report.total_duration),
        report.total_cost,
        fmt_tokens(total_in),
        fmt_tokens(total_out),
    );

    if args.verify.is_some() {
        let seq = verify_sequence_str(&report.verify_history);
        if !seq.is_empty() {
            println!("  {DIM}Verify:{RESET}      {seq}");
        }
    }

    if report.model_usage_totals.is_empty() {
        return;
    }
    println!("\n  {BOLD}{WHITE}Token Usage{RESET}");
    println!("  {DIM}{}{RESET}", "─".repeat(PANEL_WIDTH));
    println!(
        "  {DIM}{:<25} {:>8} {:>8} {:>10} {:>10} {:>8}{RESET}",
        "Model", "Input", "Output", "Cache Rd", "Cache Wr", "Cost"
    );
    let mut total_crd = 0_u64;
    let mut total_cwr = 0_u64;
    for (model, usage) in &report.model_usage_totals {
        total_crd += usage.cache_read_input_tokens;
        total_cwr += usage.cache_creation_input_tokens;
        println!(
            "  {:<25} {:>8} {:>8} {:>10} {:>10} {:>8}",
            short_model(model),
            fmt_tokens(usage.input_tokens),
            fmt_tokens(usage.output_tokens),
            fmt_tokens(usage.cache_read_input_tokens),
            fmt_tokens(usage.cache_creation_input_tokens),
            format!("${:.2}", usage.cost_usd),
        );
    }
    println!("  {DIM}{}{RESET}", "─".repeat(PANEL_WIDTH));
    println!(
        "  {BOLD}{:<25} {:>8} {:>8} {:>10} {:>10} {:>8}{RESET}",
        "Total",
        fmt_tokens(total_in),
        fmt_tokens(total_out),
        fmt_tokens(total_crd),
        fmt_tokens(total_cwr),
        format!("${:.2}", report.total_cost),
    );
}
