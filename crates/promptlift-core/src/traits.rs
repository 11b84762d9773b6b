//! Core traits for promptlift abstractions.
//!
//! These traits define the interfaces that concrete implementations must
//! satisfy, enabling pluggable backends and testability: the upstream
//! generation backend lives in `promptlift-inference`, the PostgreSQL quota
//! ledger in `promptlift-db`.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::QuotaSnapshot;
use crate::platform::Platform;

// =============================================================================
// GENERATION BACKEND
// =============================================================================

/// Backend capable of text generation against an upstream language model.
///
/// Implementations perform exactly one round-trip per call: no retries, no
/// fallback. Recovery policy belongs to the caller.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Generate text from a system instruction and a user prompt.
    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String>;

    /// Get the model name used for generation.
    fn model_name(&self) -> &str;
}

// =============================================================================
// QUOTA LEDGER
// =============================================================================

/// Outcome of a pre-flight quota check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaCheck {
    /// False when a free-tier user has exhausted today's allowance. The
    /// caller must then skip the upstream call entirely.
    pub allowed: bool,
    pub snapshot: QuotaSnapshot,
}

/// Per-user, per-day usage accounting.
///
/// The ledger row is the only shared mutable state in the system; every
/// mutation goes through this trait. Implementations must make the
/// day-rollover reset, the limit check, and the increment a single atomic
/// step relative to concurrent requests for the same user.
#[async_trait]
pub trait QuotaLedger: Send + Sync {
    /// Idempotent create-if-absent. New users start at tier free with zeroed
    /// counters.
    async fn ensure_user(&self, email: &str, display_name: Option<&str>) -> Result<()>;

    /// Check the daily allowance without consuming it, applying the
    /// day-rollover reset first so the check never sees a stale count.
    /// Mutates nothing besides the rollover.
    async fn check_quota(&self, email: &str) -> Result<QuotaCheck>;

    /// Idempotent usage commit keyed by a client-supplied event id.
    ///
    /// First commit for an id increments the lifetime counter, the daily
    /// counter (free tier), and the per-platform counter, atomically with
    /// the day rollover and a write-time re-check of the limit. A repeat
    /// commit with the same id is a no-op returning the current snapshot
    /// unchanged.
    async fn commit_usage(
        &self,
        event_id: &str,
        email: &str,
        platform: Platform,
    ) -> Result<QuotaSnapshot>;

    /// Legacy commit path for callers that cannot supply an idempotency key:
    /// same atomic rollover-check-increment, but without an event row, so
    /// retried calls double-count.
    async fn record_usage(&self, email: &str, platform: Platform) -> Result<QuotaCheck>;

    /// Read-only snapshot with the day rollover applied in the read.
    /// Returns `None` for unknown users.
    async fn get_user(&self, email: &str) -> Result<Option<QuotaSnapshot>>;
}
