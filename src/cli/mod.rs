//! Command Line Interface (CLI) layer for satmosaic.
//!
//! This module defines argument parsing (`args`), error types (`errors`),
//! and the wiring (`runner`) from a run file plus flags to the pipeline
//! orchestrator exposed via `satmosaic::api`.
//!
//! If you are embedding satmosaic into another application, prefer using
//! `satmosaic::api::PipelineOrchestrator` with your own `ImageSource` and
//! `RawFetcher` adapters instead of calling the CLI code.
pub mod args;
pub mod errors;
pub mod runner;

pub use args::CliArgs;
pub use runner::run;
