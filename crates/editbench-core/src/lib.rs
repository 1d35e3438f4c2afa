//! Benchmark engine comparing code-editing strategies for LLMs: morph
//! intelligent merge against full-file regeneration (single-turn) or
//! search-and-replace edits (multi-turn), across a matrix of models,
//! corpus files and edit queries.
//!
//! The crate is layered bottom-up: providers and the rate limiter at the
//! base, edit methods and verification above them, then the per-trial
//! executor and the scheduler that fans trials out over a bounded worker
//! pool. Results stream into a collector and land as CSV, JSON and
//! summary artifacts.

pub mod config;
pub mod errors;
pub mod executor;
pub mod harness;
pub mod limiter;
pub mod merge;
pub mod methods;
pub mod model;
pub mod multi_turn;
pub mod prompts;
pub mod providers;
pub mod report;
pub mod scheduler;
pub mod tokens;
pub mod verify;
