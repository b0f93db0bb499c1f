use std::collections::BTreeMap;
use std::time::Instant;

use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::error::RunnerError;
use crate::prompt::{build_prompt, PromptContext, COMPLETION_SIGNAL};
use crate::result::{accumulate_model_usage, IterationResult};
use crate::session::{RunMode, SessionEvent};
use crate::stats::{append_orchestrator_progress, write_stats, IterationRow};
use crate::verify::{run_verify, verify_trend_str};

use super::events::{CompletionBlock, ControllerEvent, VerifyOutcome};
use super::{LoopConfig, LoopInteraction, RunReport, SessionBackend, StopReason};

fn emit(events: &Option<mpsc::UnboundedSender<ControllerEvent>>, ev: ControllerEvent) {
    if let Some(tx) = events {
        let _ = tx.send(ev);
    }
}

/// Drive iterations until the task completes, a limit is hit, or the
/// operator stops the run.
///
/// Shutdown is cooperative: the flag is honored at iteration boundaries,
/// never mid-session. Per-iteration artifact failures are logged and the
/// loop keeps going; only a failure to run the session at all aborts.
pub async fn run_loop(
    config: &LoopConfig,
    backend: &dyn SessionBackend,
    interaction: &dyn LoopInteraction,
    shutdown: watch::Receiver<bool>,
    events: Option<mpsc::UnboundedSender<ControllerEvent>>,
) -> Result<RunReport, RunnerError> {
    let run_start = Instant::now();
    let opts = config.session_opts();
    let settings = config.settings();

    let mut total_cost = 0.0_f64;
    let mut total_input = 0_u64;
    let mut total_output = 0_u64;
    let mut verify_history: Vec<Option<bool>> = Vec::new();
    let mut model_usage_totals = BTreeMap::new();
    let mut rows: Vec<IterationRow> = Vec::new();
    let mut prev_result: Option<IterationResult> = None;

    let mut iteration = config.start_iteration;
    let stop = loop {
        iteration += 1;

        if *shutdown.borrow() {
            emit(&events, ControllerEvent::ShutdownNoticed);
            break StopReason::Shutdown;
        }
        if iteration > config.max_iterations {
            emit(
                &events,
                ControllerEvent::MaxIterationsReached {
                    limit: config.max_iterations,
                },
            );
            break StopReason::MaxIterations;
        }

        emit(
            &events,
            ControllerEvent::IterationStarted {
                iteration,
                elapsed: run_start.elapsed(),
                total_cost,
                total_input,
                total_output,
            },
        );

        let prompt = build_prompt(&PromptContext {
            user_prompt: &config.prompt,
            iteration,
            min_iterations: config.min_iterations,
            progress_file: &config.progress_file,
            plan_file: config.plan_file.as_deref(),
            verify_cmd: config.verify_cmd.as_deref().unwrap_or(""),
            prev_result: prev_result.as_ref(),
        });

        if config.debug {
            let path = config.output_dir.join(format!("prompt-{iteration:02}.md"));
            match std::fs::write(&path, &prompt) {
                Ok(()) => debug!(path = %path.display(), "saved iteration prompt"),
                Err(e) => warn!(error = %e, "failed to save iteration prompt"),
            }
        }

        let (session_tx, forward) = match &events {
            Some(tx) => {
                let (stx, mut srx) = mpsc::unbounded_channel::<SessionEvent>();
                let tx = tx.clone();
                let handle = tokio::spawn(async move {
                    while let Some(ev) = srx.recv().await {
                        if tx.send(ControllerEvent::Session(ev)).is_err() {
                            break;
                        }
                    }
                });
                (Some(stx), Some(handle))
            }
            None => (None, None),
        };

        let result = backend
            .run(&prompt, iteration, &opts, total_cost, session_tx)
            .await;
        if let Some(handle) = forward {
            let _ = handle.await;
        }
        let result = result?;

        total_cost += result.cost_usd;
        total_input += result.input_tokens;
        total_output += result.output_tokens;
        accumulate_model_usage(&mut model_usage_totals, &result.model_usage);

        let mut verify_outcome: Option<VerifyOutcome> = None;
        if let Some(cmd) = &config.verify_cmd {
            if !result.text.is_empty() {
                let (passed, output) = run_verify(cmd, config.verify_timeout).await;
                verify_outcome = Some(VerifyOutcome { passed, output });
            }
        }
        let verify_passed = verify_outcome.as_ref().map(|v| v.passed);
        verify_history.push(verify_passed);

        if let Err(e) = append_orchestrator_progress(
            &config.progress_file,
            iteration,
            &result,
            verify_passed,
            config.verify_cmd.as_deref(),
        ) {
            warn!(error = %e, "failed to append progress");
        }

        rows.push(IterationRow::from_result(iteration, &result, verify_passed));
        if let Err(e) = write_stats(
            &config.output_dir,
            &config.prompt,
            &config.started,
            &settings,
            &rows,
        ) {
            warn!(error = %e, "failed to write stats");
        }

        let progress_bytes = std::fs::metadata(&config.progress_file)
            .map(|m| m.len())
            .unwrap_or(0);
        emit(
            &events,
            ControllerEvent::IterationFinished {
                iteration,
                result: result.clone(),
                verify: verify_outcome,
                verify_trend: verify_trend_str(&verify_history),
                progress_bytes,
            },
        );

        // A failed iteration with no output has nothing to gate on; carry
        // its failure context into the next prompt and move on.
        if result.text.is_empty() && result.failed() {
            prev_result = Some(result);
            continue;
        }

        if result.text.contains(COMPLETION_SIGNAL) {
            if iteration >= config.min_iterations && verify_passed != Some(false) {
                emit(&events, ControllerEvent::Completed);
                break StopReason::Completed;
            }
            if iteration < config.min_iterations {
                emit(
                    &events,
                    ControllerEvent::CompletionBlocked(CompletionBlock::MinIterations {
                        done: iteration,
                        required: config.min_iterations,
                    }),
                );
            } else {
                emit(
                    &events,
                    ControllerEvent::CompletionBlocked(CompletionBlock::VerifyFailed),
                );
            }
        }

        prev_result = Some(result);

        if *shutdown.borrow() {
            emit(&events, ControllerEvent::ShutdownNoticed);
            break StopReason::Shutdown;
        }

        if config.mode == RunMode::Hitl && !interaction.confirm_continue().await {
            break StopReason::OperatorQuit;
        }
    };

    Ok(RunReport {
        stop,
        iterations_done: rows.len() as u32,
        total_duration: run_start.elapsed(),
        total_cost,
        verify_history,
        model_usage_totals,
        rows,
    })
}
