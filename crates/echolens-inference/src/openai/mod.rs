//! OpenAI-compatible adapters.
//!
//! Works with any endpoint that speaks the OpenAI REST dialect: the OpenAI
//! cloud API, Azure OpenAI, vLLM, LocalAI or a local proxy.
//!
//! # Example
//!
//! ```rust,no_run
//! use echolens_core::{ChatBackend, ChatOptions};
//! use echolens_inference::config::InferenceConfig;
//! use echolens_inference::openai::OpenAIBackend;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = InferenceConfig::from_env();
//!     let backend = OpenAIBackend::from_config(&config).unwrap();
//!
//!     let reply = backend
//!         .complete("Summarise: ...", &ChatOptions::with_temperature(0.5))
//!         .await
//!         .unwrap();
//!     println!("{}", reply);
//! }
//! ```

mod backend;
mod error;
mod types;

pub use backend::OpenAIBackend;
pub(crate) use backend::{build_request, http_client};
pub use error::{error_from_response, to_core_error, OpenAIErrorCode};
pub use types::*;
