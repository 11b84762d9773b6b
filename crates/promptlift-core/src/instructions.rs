//! Per-platform system instructions for the upstream enhancement model.
//!
//! Each supported platform gets a system instruction tuned to the prompt
//! idioms that platform responds best to. Selection is a pure lookup over a
//! static table and never fails.

use crate::platform::Platform;

/// Generic enhancement instruction for platforms without a bespoke entry.
pub const DEFAULT_INSTRUCTION: &str = "You are a prompt enhancement assistant. Rewrite the \
    user's prompt so it elicits a comprehensive and detailed response from an AI assistant. \
    Preserve the user's intent and language, add the missing context an assistant would need, \
    and specify the desired depth, structure, and format of the answer. Return only the \
    rewritten prompt, with no preamble or commentary.";

/// Instruction tuned for Claude: explicit structure and reasoning.
pub const CLAUDE_INSTRUCTION: &str = "You are a prompt enhancement assistant targeting Claude. \
    Rewrite the user's prompt to favor careful, well-organized analysis: state the task \
    plainly, enumerate any constraints, and ask for a structured response with clear sections \
    and explicit step-by-step reasoning where it helps. Preserve the user's intent. Return \
    only the rewritten prompt.";

/// Instruction tuned for Gemini: exploration and alternatives.
pub const GEMINI_INSTRUCTION: &str = "You are a prompt enhancement assistant targeting Gemini. \
    Rewrite the user's prompt to invite a creative, exploratory answer: encourage multiple \
    perspectives, comparisons, and concrete examples while keeping the original intent intact. \
    Return only the rewritten prompt.";

/// Instruction tuned for Perplexity: sources and currency.
pub const PERPLEXITY_INSTRUCTION: &str = "You are a prompt enhancement assistant targeting \
    Perplexity. Rewrite the user's prompt as a research question: ask for up-to-date \
    information, cited sources, and a summary that distinguishes established facts from open \
    questions. Preserve the user's intent. Return only the rewritten prompt.";

/// Instruction tuned for Meta AI: brevity and directness.
pub const META_INSTRUCTION: &str = "You are a prompt enhancement assistant targeting Meta AI. \
    Rewrite the user's prompt to be direct and unambiguous: a clear ask, the essential \
    context, and the expected answer format, without filler. Preserve the user's intent. \
    Return only the rewritten prompt.";

/// Select the system instruction for a platform.
///
/// Pure and total: every platform resolves to an instruction, with
/// [`DEFAULT_INSTRUCTION`] covering the generic/default platform.
pub fn system_instruction(platform: Platform) -> &'static str {
    match platform {
        Platform::Claude => CLAUDE_INSTRUCTION,
        Platform::Gemini => GEMINI_INSTRUCTION,
        Platform::Perplexity => PERPLEXITY_INSTRUCTION,
        Platform::Meta => META_INSTRUCTION,
        Platform::Chatgpt => DEFAULT_INSTRUCTION,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_platform_has_an_instruction() {
        for platform in Platform::ALL {
            assert!(!system_instruction(platform).is_empty());
        }
    }

    #[test]
    fn test_default_platform_gets_generic_instruction() {
        assert_eq!(system_instruction(Platform::Chatgpt), DEFAULT_INSTRUCTION);
        assert!(DEFAULT_INSTRUCTION.contains("comprehensive and detailed"));
    }

    #[test]
    fn test_bespoke_instructions_are_distinct() {
        let mut seen = std::collections::HashSet::new();
        for platform in Platform::ALL {
            assert!(seen.insert(system_instruction(platform)));
        }
    }

    #[test]
    fn test_selection_is_pure() {
        assert_eq!(
            system_instruction(Platform::Claude),
            system_instruction(Platform::Claude)
        );
    }
}
