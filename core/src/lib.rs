//! Core logic for ralph-runner: the session supervisor that drives one
//! Claude Code process at a time, and the outer iteration controller that
//! decides whether to keep going.
//!
//! This crate is UI-agnostic: it reports progress through [`session::SessionEvent`]
//! and [`controller::ControllerEvent`] channels and never prints. The `cli`
//! crate owns all terminal rendering.

pub mod controller;
pub mod error;
pub mod fmt;
pub mod prompt;
pub mod protocol;
pub mod result;
pub mod session;
pub mod stats;
pub mod tools;
pub mod verify;

pub use error::RunnerError;
pub use result::IterationResult;
