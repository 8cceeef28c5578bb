//! Phased workflow orchestration.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `engine` | Phase loop, gate retries, resume, terminal state |
//! | `prompts` | Prompt construction per phase and for retries |
//! | `postprocess` | Epic extraction, verdict checks, fallback summaries |
//! | `tracker` | `bd` / `ao` collaborators behind [`WorkTracker`] |
//! | `log` | Append-only orchestration log |

pub mod engine;
pub mod log;
pub mod postprocess;
pub mod prompts;
pub mod tracker;

pub use engine::PhaseEngine;
pub use log::OrchestrationLog;
pub use tracker::{CliTracker, WorkTracker};
