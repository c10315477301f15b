// src/lib.rs
// Public library surface shared by the binaries and integration tests.

pub mod config;
pub mod dedup;
pub mod digest;
pub mod error;
pub mod ingest;
pub mod lock;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod publish;
pub mod retry;
pub mod store;
pub mod summarize;

// ---- Re-exports for stable public API ----
pub use crate::error::{ExternalError, RunError, StoreError};
pub use crate::pipeline::{Pipeline, PipelineSettings, RunReport};
