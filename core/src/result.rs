use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

/// Token and cost sub-totals for a single model, as reported in the child's
/// `modelUsage` breakdown. Field names mirror the wire format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ModelUsage {
    #[serde(rename = "inputTokens")]
    pub input_tokens: u64,
    #[serde(rename = "outputTokens")]
    pub output_tokens: u64,
    #[serde(rename = "cacheReadInputTokens")]
    pub cache_read_input_tokens: u64,
    #[serde(rename = "cacheCreationInputTokens")]
    pub cache_creation_input_tokens: u64,
    #[serde(rename = "costUSD")]
    pub cost_usd: f64,
}

impl ModelUsage {
    pub fn from_json(data: &Value) -> Self {
        let get_u64 = |key: &str| data.get(key).and_then(|x| x.as_u64()).unwrap_or(0);
        Self {
            input_tokens: get_u64("inputTokens"),
            output_tokens: get_u64("outputTokens"),
            cache_read_input_tokens: get_u64("cacheReadInputTokens"),
            cache_creation_input_tokens: get_u64("cacheCreationInputTokens"),
            cost_usd: data.get("costUSD").and_then(|x| x.as_f64()).unwrap_or(0.0),
        }
    }

    pub fn add(&mut self, other: &ModelUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_read_input_tokens += other.cache_read_input_tokens;
        self.cache_creation_input_tokens += other.cache_creation_input_tokens;
        self.cost_usd += other.cost_usd;
    }
}

/// Merge one iteration's per-model usage into running totals.
pub fn accumulate_model_usage(
    totals: &mut BTreeMap<String, ModelUsage>,
    iteration_usage: &BTreeMap<String, ModelUsage>,
) {
    for (model, usage) in iteration_usage {
        totals.entry(model.clone()).or_default().add(usage);
    }
}

/// Result of a single Claude Code iteration. Immutable once the supervisor
/// returns it.
///
/// Invariant: at most one of `hard_timed_out` / `idle_timed_out` is true,
/// and if either is, `exit_code` reflects a killed process (never a success
/// code).
#[derive(Debug, Clone, Default)]
pub struct IterationResult {
    /// Concatenated streamed text segments, or the `result` record's final
    /// text when nothing was streamed.
    pub text: String,
    pub duration: Duration,
    pub hard_timed_out: bool,
    pub idle_timed_out: bool,
    /// `None` when the process was killed before producing a status.
    pub exit_code: Option<i32>,
    pub cost_usd: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_write_tokens: u64,
    pub num_turns: u64,
    pub model_usage: BTreeMap<String, ModelUsage>,
}

impl IterationResult {
    /// Whether this iteration ended in any failure mode the controller
    /// should carry context forward for. An unknown exit status counts as a
    /// failure: it means the process was killed before reporting one.
    pub fn failed(&self) -> bool {
        self.hard_timed_out || self.idle_timed_out || self.exit_code != Some(0)
    }

    /// Fold a `result` record's aggregates into this result.
    pub fn absorb_result_record(&mut self, rec: &crate::protocol::ResultRecord) {
        self.cost_usd = rec.total_cost_usd;
        self.num_turns = rec.num_turns;
        self.model_usage = rec.model_usage.clone();
        for usage in rec.model_usage.values() {
            self.input_tokens += usage.input_tokens;
            self.output_tokens += usage.output_tokens;
            self.cache_read_tokens += usage.cache_read_input_tokens;
            self.cache_write_tokens += usage.cache_creation_input_tokens;
        }
    }
}
