//! Destination platform identification.
//!
//! Maps a caller-supplied target hint (an explicit model name/alias or a
//! full page URL) to one of the supported AI chat platforms. Detection is
//! total: unmatched input resolves to the default platform instead of
//! failing.

use serde::{Deserialize, Serialize};

/// A destination AI chat platform for an enhanced prompt.
///
/// `Chatgpt` doubles as the generic/default platform for hints that match
/// nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Chatgpt,
    Claude,
    Gemini,
    Perplexity,
    Meta,
}

impl Platform {
    /// All supported platforms, in stable order.
    pub const ALL: [Platform; 5] = [
        Platform::Chatgpt,
        Platform::Claude,
        Platform::Gemini,
        Platform::Perplexity,
        Platform::Meta,
    ];

    /// Stable lowercase identifier, used for serialization and as the
    /// per-platform counter key in the quota ledger.
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Chatgpt => "chatgpt",
            Platform::Claude => "claude",
            Platform::Gemini => "gemini",
            Platform::Perplexity => "perplexity",
            Platform::Meta => "meta",
        }
    }

    /// Detect the platform from a model name, alias, or URL.
    ///
    /// Case-insensitive substring matching against a fixed keyword table.
    /// Never fails: hints matching nothing (including anything containing
    /// "gpt") resolve to [`Platform::Chatgpt`]. Deterministic by
    /// construction.
    pub fn detect(hint: &str) -> Platform {
        let hint = hint.to_lowercase();

        if hint.contains("claude") {
            Platform::Claude
        } else if hint.contains("gemini") || hint.contains("bard") {
            Platform::Gemini
        } else if hint.contains("perplexity") {
            Platform::Perplexity
        } else if hint.contains("meta") || hint.contains("llama") {
            Platform::Meta
        } else {
            Platform::Chatgpt
        }
    }

    /// Parse a stable identifier back into a platform. Used for explicit
    /// platform overrides supplied by clients.
    pub fn from_id(id: &str) -> Option<Platform> {
        match id.trim().to_lowercase().as_str() {
            "chatgpt" => Some(Platform::Chatgpt),
            "claude" => Some(Platform::Claude),
            "gemini" => Some(Platform::Gemini),
            "perplexity" => Some(Platform::Perplexity),
            "meta" => Some(Platform::Meta),
            _ => None,
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
