//! # Orchestration
//!
//! The batching, fan-out, and checkpointing core of the pipeline.
//!
//! ## Architecture
//!
//! Work fans out at two levels: the pipeline dispatches one unit per page,
//! and each page dispatches one unit per batch. Both levels reuse the same
//! [`dispatcher`] primitive — dispatch a group, await it with a bounded
//! wait, merge the outcomes — with retry pacing owned entirely by the
//! dispatcher so the business components stay pure.
//!
//! Results merge upward by sums, unions, and concatenations, all
//! commutative, so arrival order never affects a run's totals. Idempotency
//! rests on the processed-key checkpoint: keys recorded there are skipped
//! during aggregation, and whatever duplicates concurrent batches still
//! emit are collapsed when the manifest is written.
//!
//! ## Components
//!
//! - [`Dispatcher`] — retryable unit groups over the task runtime
//! - [`BatchRunner`] — aggregate, download, convert; per-file isolation
//! - [`PageOrchestrator`] — one page: fetch, split, fan out, merge
//! - [`EtlPipeline`] — Init → Extract → Transform → Load → Complete

pub mod batch_runner;
pub mod dispatcher;
pub mod page_orchestrator;
pub mod pipeline;

pub use batch_runner::BatchRunner;
pub use dispatcher::{DispatchGroup, Dispatcher, DispatcherConfig, RetryConfig, UnitOutcome};
pub use page_orchestrator::{split_into_batches, PageOrchestrator};
pub use pipeline::{EtlPipeline, OutputLayout, CHECKPOINT_FILE, MANIFEST_FILE};
