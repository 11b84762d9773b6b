//! Centralized default constants for the promptlift system.
//!
//! **This module is the single source of truth** for all shared default
//! values. All crates should reference these constants instead of defining
//! their own magic numbers.

// =============================================================================
// QUOTA
// =============================================================================

/// Daily enhancement limit for free-tier users. Pro tier is unlimited.
pub const FREE_DAILY_LIMIT: i64 = 10;

// =============================================================================
// INFERENCE
// =============================================================================

/// Default OpenAI-compatible API endpoint.
pub const OPENAI_URL: &str = "https://api.openai.com/v1";

/// Default generation model for prompt enhancement.
pub const GEN_MODEL: &str = "gpt-4o-mini";

/// Upper bound on a single generation round-trip (seconds). Generations that
/// hit this ceiling fall back to the offline enhancer.
pub const GEN_TIMEOUT_SECS: u64 = 45;

/// Generation calls slower than this are logged with `slow = true`.
pub const SLOW_GENERATION_MS: u64 = 20_000;

// =============================================================================
// SERVER
// =============================================================================

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 3000;

/// Default rate limit: max requests per period.
pub const RATE_LIMIT_REQUESTS: u64 = 100;

/// Default rate limit: period in seconds.
pub const RATE_LIMIT_PERIOD_SECS: u64 = 60;

/// Maximum accepted request body size in bytes.
pub const MAX_BODY_BYTES: usize = 64 * 1024;
