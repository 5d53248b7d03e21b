//! Generation backend trait and prompt assembly.
//!
//! A [`GenerationBackend`] turns a system context plus a windowed history
//! into one reply. Backends are slow and not safe for concurrent calls; the
//! app crate wraps each instance in a serializer that admits one call at a
//! time.

use async_trait::async_trait;

use crate::error::QaResult;
use crate::models::{Chunk, Role, Turn};

/// Instruction placed ahead of retrieved context.
pub const CONTEXT_INSTRUCTION: &str = "Answer the user's questions based on the below context. \
If the context doesn't contain relevant information, just say \"I don't know\".";

/// Single-shot text generation.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Short identifier used in logs (e.g. `"openai-compatible"`).
    fn name(&self) -> &str;

    /// Generate the assistant reply for `history`.
    ///
    /// `history` is already windowed and ends on a user turn. The system
    /// turn, if any, is its first element; `system_context` is the prompt
    /// text the backend should send in its place.
    async fn complete(&self, system_context: &str, history: &[Turn]) -> QaResult<String>;
}

/// Combine the stored system prompt with the retrieved chunks.
///
/// ```rust
/// use docqa_core::generation::build_system_context;
///
/// let ctx = build_system_context("Be brief.", &[]);
/// assert!(ctx.starts_with("Be brief."));
/// assert!(ctx.ends_with("<context>\n</context>"));
/// ```
pub fn build_system_context(system_prompt: &str, chunks: &[Chunk]) -> String {
    let mut out = String::new();
    if !system_prompt.trim().is_empty() {
        out.push_str(system_prompt.trim_end());
        out.push_str("\n\n");
    }
    out.push_str(CONTEXT_INSTRUCTION);
    out.push_str("\n\n<context>\n");
    for chunk in chunks {
        out.push_str(chunk.content.trim_end());
        out.push_str("\n\n");
    }
    if !chunks.is_empty() {
        out.truncate(out.len() - 1);
    }
    out.push_str("</context>");
    out
}

/// The history's system prompt, or `""` when there is none.
pub fn system_prompt_of(history: &[Turn]) -> &str {
    history
        .iter()
        .find(|t| t.role == Role::System)
        .map(|t| t.content.as_str())
        .unwrap_or("")
}
