//! # docqa
//!
//! Document question answering over a growing, locally ingested corpus.
//!
//! Uploaded documents are split into chunks, embedded, and appended to a
//! SQLite-backed index. Chat requests go through a fixed pool of workers
//! that serialize access to a small number of text-generation backends;
//! each answer is grounded on chunks retrieved for the question and on the
//! session's windowed history.
//!
//! ## Architecture
//!
//! ```text
//!  upload ─▶ ┌──────────────┐ append  ┌──────────┐
//!            │ IngestPipeline│───────▶│  SQLite   │
//!            └──────────────┘         │  chunks   │
//!                                     └────┬─────┘
//!  chat ─▶ ┌───────────┐ job ┌────────┐   │ select
//!          │ ChatQueue │────▶│ worker │◀──┘
//!          └───────────┘     └───┬────┘
//!                                ▼
//!                     GenerationSerializer ─▶ backend
//! ```
//!
//! The storage-agnostic logic (retrieval, history windowing, chunking,
//! prompt assembly, and the collaborator traits) lives in `docqa-core`.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`app`] | Wiring from config to running components |
//! | [`queue`] | Chat job queue and worker pool |
//! | [`chat`] | One chat exchange end to end |
//! | [`generation`] | Generation backends and serializer |
//! | [`embedding`] | HTTP embedding providers |
//! | [`ingest`] | Upload ingestion pipeline |
//! | [`extract`] | PDF / DOCX / PPTX / text extraction |
//! | [`sqlite_index`] | SQLite chunk index |
//! | [`sqlite_history`] | SQLite chat history |
//! | [`sqlite_metrics`] | SQLite per-day response metrics |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`logging`] | `tracing` subscriber setup |

pub mod app;
pub mod chat;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod generation;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod queue;
pub mod server;
pub mod sqlite_history;
pub mod sqlite_index;
pub mod sqlite_metrics;

pub use docqa_core as core;
