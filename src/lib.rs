//! Phased workflow engine and autonomous supervisor.
//!
//! The engine drives an agent runtime through discovery, implementation and
//! validation sessions, gating each phase on council verdicts and retrying or
//! escalating on failure. The supervisor wraps the engine in a queue-driven loop
//! with quality gates, a single-flight lease and ownership-scoped landing.

pub mod config;
pub mod errors;
pub mod executor;
pub mod gates;
pub mod landing;
pub mod lease;
pub mod orchestrator;
pub mod phase;
pub mod process;
pub mod rpi_config;
pub mod state;
pub mod supervisor;
pub mod ui;
pub mod util;
