//! # promptlift-inference
//!
//! Upstream language-model provider client for promptlift.
//!
//! This crate provides:
//! - An OpenAI-compatible chat-completions backend (the production
//!   `GenerationBackend`)
//! - SSE token-stream parsing for the interactive enhancement path
//! - A deterministic mock backend (feature `mock`) for tests
//!
//! The backend performs exactly one round-trip per call and maps every
//! failure mode (network, timeout, bad status, rate limiting, malformed or
//! empty payload) to `Error::Inference`; recovery by offline fallback is the
//! enhancement service's job, not this crate's.

pub mod backend;
pub mod streaming;
pub mod types;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

// Re-export core types
pub use promptlift_core::{Error, GenerationBackend, Result};

pub use backend::{OpenAIBackend, OpenAIConfig};
pub use streaming::{parse_sse_stream, StreamingGeneration, TokenStream};

#[cfg(any(test, feature = "mock"))]
pub use mock::MockGenerationBackend;
