//! # docqa Core
//!
//! Runtime-free logic for docqa: data models, the error taxonomy, chunking,
//! boilerplate page detection, the index and history abstractions, the
//! retrieval algorithms, conversation windowing, and response metrics.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O. The `docqa`
//! app crate supplies the async runtime, the SQLite adapters, the HTTP
//! providers, the job queue, and the ingestion pipeline.

pub mod boilerplate;
pub mod chunk;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod history;
pub mod index;
pub mod metrics;
pub mod models;
pub mod retrieval;

pub use error::{QaError, QaResult};
