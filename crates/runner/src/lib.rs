//! Journey orchestration: wires the active-steps engine, the session
//! service, and the host's navigator together, guards deep links, and keeps
//! the remote session fresh through a debounced background saver.

pub mod runner;
pub mod saver;

pub use runner::{JourneyRunner, NextOptions, RunnerConfig, SaveStepOptions, SessionHook};
pub use saver::SessionSaver;
