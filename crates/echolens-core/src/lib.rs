//! # echolens-core
//!
//! Core types, traits, and abstractions for the EchoLens episode pipeline.
//!
//! This crate holds the job and artifact models, the repository and adapter
//! traits the pipeline is written against, the shared error type, and the
//! token-bounded chunker. It has no I/O of its own.

pub mod chunking;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod tokenizer;
pub mod traits;

// Re-export commonly used types at crate root
pub use chunking::{Chunk, ChunkerConfig, TokenChunker};
pub use error::{Error, Result};
pub use models::*;
pub use tokenizer::{TiktokenTokenizer, Tokenizer, WordTokenizer};
pub use traits::*;
