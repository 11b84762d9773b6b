//! Core data models for promptlift.
//!
//! These types are shared across all promptlift crates and represent the
//! domain entities of the enhancement pipeline.

use serde::{Deserialize, Serialize};

use crate::platform::Platform;

// =============================================================================
// USERS & QUOTA
// =============================================================================

/// Subscription tier. Free tier is subject to the daily quota, pro is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Pro,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
        }
    }

    /// Parse the stored tier column. Unknown values fall back to free, the
    /// most restrictive tier.
    pub fn from_db(value: &str) -> Tier {
        match value {
            "pro" => Tier::Pro,
            _ => Tier::Free,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user's current quota state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    /// Total enhancements committed over the account lifetime.
    pub lifetime_count: i64,
    /// Enhancements committed today (resets at day rollover; only tracked
    /// against the limit for free tier).
    pub daily_count: i64,
    pub tier: Tier,
    /// The daily limit the snapshot was evaluated against.
    pub daily_limit: i64,
    /// True when a free-tier user has consumed today's allowance.
    pub limit_reached: bool,
}

impl QuotaSnapshot {
    /// Build a snapshot, computing `limit_reached` from the other fields.
    pub fn new(lifetime_count: i64, daily_count: i64, tier: Tier, daily_limit: i64) -> Self {
        Self {
            lifetime_count,
            daily_count,
            tier,
            daily_limit,
            limit_reached: tier == Tier::Free && daily_count >= daily_limit,
        }
    }
}

// =============================================================================
// ENHANCEMENT REQUEST / RESULT (ephemeral, never persisted)
// =============================================================================

/// One logical enhancement attempt.
#[derive(Debug, Clone)]
pub struct EnhanceRequest {
    /// Raw user-written prompt.
    pub prompt: String,
    /// Target model name/alias or source URL, used for platform detection.
    pub target_hint: String,
    /// Explicit platform override; wins over detection when present.
    pub platform_override: Option<Platform>,
    pub user_email: String,
    /// Client-supplied idempotency key; makes usage commit safe under
    /// retries.
    pub idempotency_key: String,
}

/// Which path produced the enhanced text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnhancementPath {
    /// Upstream language model.
    Model,
    /// Offline template fallback.
    Fallback,
}

/// Result of one enhancement attempt.
#[derive(Debug, Clone)]
pub struct Enhancement {
    /// Enhanced prompt text. Empty when `snapshot.limit_reached` rejected
    /// the request before any enhancement was attempted.
    pub text: String,
    pub path: EnhancementPath,
    pub platform: Platform,
    pub snapshot: QuotaSnapshot,
}
