//! # promptlift-core
//!
//! Core types, traits, and abstractions for the promptlift prompt-enhancement
//! backend.
//!
//! This crate provides the foundational data structures, the `Error` type,
//! and the pure (no-I/O) pipeline stages (platform detection, instruction
//! selection, the offline fallback enhancer) that the other promptlift
//! crates depend on.

pub mod defaults;
pub mod error;
pub mod fallback;
pub mod instructions;
pub mod models;
pub mod platform;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use fallback::enhance_offline;
pub use instructions::{system_instruction, DEFAULT_INSTRUCTION};
pub use models::*;
pub use platform::Platform;
pub use traits::*;
