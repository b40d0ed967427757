//! Quarry - hybrid retrieval over indexed folders
//!
//! Fuses vector similarity and BM25 keyword search with Reciprocal Rank
//! Fusion, optionally reranks the fused candidates with a cross-encoder or an
//! LLM scorer, and keeps a crash-safe registry of which chunks each indexed
//! folder owns so folders can be removed without touching anything else.

pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod folders;
pub mod jobs;
pub mod retrieval;
pub mod storage;

pub use error::{QuarryError, Result};
