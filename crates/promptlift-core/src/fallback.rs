//! Offline fallback enhancement.
//!
//! When the upstream model is unreachable or fails, the pipeline still has to
//! produce enhanced text. This module wraps the raw prompt in a
//! platform-flavored template: pure, deterministic, infallible, and free of
//! any external dependency so it works as the last line of defense.

use crate::platform::Platform;

/// Deterministically enhance a prompt without calling the upstream model.
///
/// The raw prompt is embedded verbatim inside a template matching the target
/// platform's idiom. Identical inputs always produce identical output, and
/// the function never panics regardless of input (empty, very long, or
/// non-ASCII prompts included).
pub fn enhance_offline(prompt: &str, platform: Platform) -> String {
    match platform {
        Platform::Claude => format!(
            "I need a thorough, well-structured analysis of the following.\n\n\
             Task: {prompt}\n\n\
             Please organize your response with clear sections, state any \
             assumptions explicitly, and walk through your reasoning step by \
             step before giving your conclusion."
        ),
        Platform::Gemini => format!(
            "Help me explore the following from multiple angles.\n\n\
             Topic: {prompt}\n\n\
             Please consider different perspectives and approaches, compare \
             their trade-offs, and illustrate each with a concrete example."
        ),
        Platform::Perplexity => format!(
            "I am researching the following and need sourced information.\n\n\
             Question: {prompt}\n\n\
             Please cite your sources, prefer recent information, and \
             distinguish well-established facts from open questions."
        ),
        Platform::Meta => format!(
            "Answer the following directly and concisely.\n\n\
             Request: {prompt}\n\n\
             Give the most useful answer first, then any essential caveats. \
             Skip filler and restatements."
        ),
        Platform::Chatgpt => format!(
            "Please provide a comprehensive and detailed response to the \
             following.\n\n\
             Request: {prompt}\n\n\
             Include relevant context and examples, and structure the answer \
             so it is easy to follow."
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_contains_the_raw_prompt() {
        for platform in Platform::ALL {
            let out = enhance_offline("summarize this", platform);
            assert!(out.contains("summarize this"), "missing prompt for {platform}");
        }
    }

    #[test]
    fn test_is_pure() {
        for platform in Platform::ALL {
            let a = enhance_offline("explain async rust", platform);
            let b = enhance_offline("explain async rust", platform);
            assert_eq!(a, b);
        }
    }

    #[test]
    fn test_templates_are_distinct_per_platform() {
        let mut seen = std::collections::HashSet::new();
        for platform in Platform::ALL {
            assert!(seen.insert(enhance_offline("x", platform)));
        }
    }

    #[test]
    fn test_empty_prompt_is_handled() {
        for platform in Platform::ALL {
            let out = enhance_offline("", platform);
            assert!(!out.is_empty());
        }
    }

    #[test]
    fn test_very_long_prompt_is_handled() {
        let long = "a".repeat(100_000);
        let out = enhance_offline(&long, Platform::Claude);
        assert!(out.contains(&long));
    }

    #[test]
    fn test_non_ascii_prompt_is_handled() {
        let prompt = "日本語で要約してください 🚀 — naïve façade";
        let out = enhance_offline(prompt, Platform::Gemini);
        assert!(out.contains(prompt));
    }

    #[test]
    fn test_claude_template_is_analytical() {
        let out = enhance_offline("q", Platform::Claude);
        assert!(out.contains("step by"));
        assert!(out.contains("sections"));
    }

    #[test]
    fn test_perplexity_template_is_citation_oriented() {
        let out = enhance_offline("q", Platform::Perplexity);
        assert!(out.contains("cite"));
    }
}
