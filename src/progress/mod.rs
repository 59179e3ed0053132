//! # Progress Checkpointing
//!
//! Durable record of which files have already been fully processed and the
//! last completed page, enabling safe resume after a crash.

pub mod store;

pub use store::{JsonProgressStore, ProgressState, ProgressStore};
