//! docsight - document ingestion and asynchronous VLM OCR service.
//!
//! Clients upload a file, a background worker rasterizes it and runs
//! vision-language-model inference against it, and the structured result
//! is retrieved later through the HTTP API.

pub mod cli;
pub mod config;
pub mod error;
pub mod inference;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod queue;
pub mod repository;
pub mod server;
pub mod storage;
pub mod worker;
