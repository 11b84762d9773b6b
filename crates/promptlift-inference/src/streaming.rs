//! SSE stream parsing for OpenAI-compatible streaming responses.

use futures::{Stream, StreamExt};
use std::pin::Pin;

use promptlift_core::{Error, Result};

use crate::types::ChatCompletionChunk;

/// Stream of generation tokens.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Streaming generation trait extension.
#[async_trait::async_trait]
pub trait StreamingGeneration: Send + Sync {
    /// Generate text with a system instruction, yielding tokens as they
    /// arrive from the provider.
    async fn generate_with_system_stream(&self, system: &str, prompt: &str)
        -> Result<TokenStream>;
}

/// Parse an SSE byte stream from an OpenAI-compatible endpoint into tokens.
///
/// Network chunks may split SSE lines at arbitrary byte boundaries, so a
/// line buffer carries the unterminated tail from one chunk into the next.
pub fn parse_sse_stream(
    stream: impl Stream<Item = std::result::Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
) -> TokenStream {
    let token_stream = stream
        .scan(String::new(), |buffer, chunk_result| {
            let items: Vec<Result<String>> = match chunk_result {
                Ok(bytes) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    drain_complete_lines(buffer)
                }
                Err(e) => vec![Err(Error::Inference(format!("Stream error: {}", e)))],
            };
            futures::future::ready(Some(futures::stream::iter(items)))
        })
        .flatten();

    Box::pin(token_stream)
}

/// Pull every newline-terminated SSE line out of the buffer and parse each.
fn drain_complete_lines(buffer: &mut String) -> Vec<Result<String>> {
    let mut items = Vec::new();
    while let Some(pos) = buffer.find('\n') {
        let line: String = buffer.drain(..=pos).collect();
        if let Some(item) = parse_sse_line(line.trim()) {
            items.push(item);
        }
    }
    items
}

/// Parse a single SSE line and extract token content.
///
/// Returns `None` for empty lines, comments, the `[DONE]` marker, and deltas
/// carrying no content (role-only frames).
fn parse_sse_line(line: &str) -> Option<Result<String>> {
    if line.is_empty() || line.starts_with(':') {
        return None;
    }

    if line == "data: [DONE]" {
        return None;
    }

    let data = line.strip_prefix("data: ")?;

    match serde_json::from_str::<ChatCompletionChunk>(data) {
        Ok(chunk) => {
            let mut content = String::new();
            for choice in chunk.choices {
                if let Some(c) = choice.delta.content {
                    content.push_str(&c);
                }
            }
            if content.is_empty() {
                None
            } else {
                Some(Ok(content))
            }
        }
        Err(e) => Some(Err(Error::Inference(format!(
            "Failed to parse SSE chunk: {}",
            e
        )))),
    }
}
