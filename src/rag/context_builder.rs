//! Prompt assembly from retrieved chunks.

use serde::{Deserialize, Serialize};

use super::store::DocumentChunk;

/// Configuration for context building.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBuilderConfig {
    /// Maximum total context length in characters
    pub max_context_length: usize,
    /// Whether to prefix chunks with their `metadata.source`
    pub include_citations: bool,
}

impl Default for ContextBuilderConfig {
    fn default() -> Self {
        Self {
            max_context_length: 8000,
            include_citations: true,
        }
    }
}

pub struct ContextBuilder {
    config: ContextBuilderConfig,
}

impl ContextBuilder {
    pub fn new(config: ContextBuilderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ContextBuilderConfig {
        &self.config
    }

    /// Joins chunks with blank lines, in retrieval order, within the character budget.
    ///
    /// A chunk that would overflow the budget ends the context; the first chunk
    /// is truncated rather than dropped.
    pub fn format_context(&self, chunks: &[DocumentChunk]) -> String {
        let max_length = self.config.max_context_length;
        let mut sections: Vec<String> = Vec::with_capacity(chunks.len());
        let mut current_length = 0;

        for chunk in chunks {
            let text = chunk.content.trim();
            if text.is_empty() {
                continue;
            }

            let section = match self.citation(chunk) {
                Some(source) => format!("[{}]\n{}", source, text),
                None => text.to_string(),
            };

            let separator = if sections.is_empty() { 0 } else { 2 };
            let section_length = section.chars().count();
            if current_length + separator + section_length > max_length {
                if sections.is_empty() {
                    sections.push(section.chars().take(max_length).collect());
                }
                break;
            }

            current_length += separator + section_length;
            sections.push(section);
        }

        sections.join("\n\n")
    }

    /// Renders the answer prompt for the generation model.
    pub fn format_prompt(&self, context: &str, question: &str) -> String {
        format!(
            "Please answer the question based on the following context:\n\n{}\n\nQuestion: {}\n",
            context.trim(),
            question.trim()
        )
    }

    fn citation<'a>(&self, chunk: &'a DocumentChunk) -> Option<&'a str> {
        if !self.config.include_citations {
            return None;
        }
        chunk
            .metadata
            .get("source")
            .and_then(|value| value.as_str())
            .filter(|source| !source.is_empty())
    }
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new(ContextBuilderConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_chunks_with_citations() {
        let builder = ContextBuilder::default();
        let chunks = vec![
            DocumentChunk::new("Paris is the capital of France").with_metadata("source", "geo"),
            DocumentChunk::new("No source here"),
        ];

        let context = builder.format_context(&chunks);
        assert_eq!(context, "[geo]\nParis is the capital of France\n\nNo source here");
    }

    #[test]
    fn respects_character_budget() {
        let builder = ContextBuilder::new(ContextBuilderConfig {
            max_context_length: 10,
            include_citations: false,
        });
        let chunks = vec![
            DocumentChunk::new("0123456789abcdef"),
            DocumentChunk::new("dropped"),
        ];

        assert_eq!(builder.format_context(&chunks), "0123456789");
    }

    #[test]
    fn empty_input_gives_empty_context() {
        let builder = ContextBuilder::default();
        assert!(builder.format_context(&[]).is_empty());
    }

    #[test]
    fn prompt_contains_context_and_question() {
        let builder = ContextBuilder::default();
        let prompt = builder.format_prompt("some facts", " What is it? ");

        assert!(prompt.contains("some facts"));
        assert!(prompt.ends_with("Question: What is it?\n"));
    }
}
