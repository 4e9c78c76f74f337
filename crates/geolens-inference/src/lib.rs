//! # geolens-inference
//!
//! Text-generation provider backends for geolens.
//!
//! This crate provides:
//! - An OpenAI-compatible backend serving every probe engine the audit
//!   fans out to (each provider gets its own base URL, key, and model)
//! - The provider registry: the closed set of configured probe providers
//!   plus the designated analysis backend, built once at startup
//! - A scripted mock backend for deterministic tests
//!
//! # Example
//!
//! ```rust,no_run
//! use geolens_inference::{OpenAiCompatBackend, OpenAiCompatConfig};
//! use geolens_core::GenerationBackend;
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = OpenAiCompatBackend::new(OpenAiCompatConfig::default()).unwrap();
//!     let text = backend.generate("What CRMs do you recommend?").await.unwrap();
//!     println!("{text}");
//! }
//! ```

pub mod backend;
pub mod provider;

// Mock backend for deterministic testing.
// Note: always compiled so dependent crates' tests can use it.
pub mod mock;

// Re-export core types
pub use geolens_core::*;

pub use backend::{OpenAiCompatBackend, OpenAiCompatConfig};
pub use mock::{MockBackend, MockFailure, RecordedCall};
pub use provider::{ProviderRegistry, RegisteredProvider};
