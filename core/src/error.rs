use thiserror::Error;

/// Failures surfaced by the session supervisor and the outer loop.
///
/// Only `Spawn` is fatal to a run. Everything else degrades to "this
/// iteration did not succeed" and is folded into the next prompt by the
/// controller.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("failed to spawn process: {program}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write artifact: {path}")]
    Artifact {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("background task panicked: {task}")]
    TaskJoin { task: &'static str },
}
