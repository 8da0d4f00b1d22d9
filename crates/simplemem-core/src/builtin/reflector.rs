//! Retrieval reflection.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::error::SimpleMemResult;
use crate::traits::{GenerationOptions, Llm, Reflector};
use crate::types::Message;

const REFLECTION_PROMPT: &str = "You check whether retrieved memory answers a question. \
You are given the question and the retrieved entries, one per line. \
If the entries are enough to answer, reply with NONE. \
Otherwise reply with up to three short search queries for the missing facts, one per line, \
using names and absolute dates rather than pronouns or relative time words.";

const SUFFICIENT: &str = "NONE";

/// Asks an LLM for follow-up queries when the context falls short.
pub struct LlmReflector {
    llm: Arc<dyn Llm>,
    options: GenerationOptions,
    max_queries: usize,
}

impl LlmReflector {
    pub fn new(llm: Arc<dyn Llm>) -> Self {
        Self {
            llm,
            options: GenerationOptions {
                temperature: Some(0.0),
                max_tokens: Some(128),
            },
            max_queries: 3,
        }
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_max_queries(mut self, max_queries: usize) -> Self {
        self.max_queries = max_queries;
        self
    }

    /// Follow-up queries in a reply, without list markers.
    fn parse(&self, reply: &str) -> Vec<String> {
        let mut queries: Vec<String> = Vec::new();
        for line in reply.lines() {
            let line = line
                .trim()
                .trim_start_matches(|c: char| c.is_ascii_digit() || matches!(c, '-' | '*' | '.' | ')'))
                .trim();
            if line.is_empty() || line.eq_ignore_ascii_case(SUFFICIENT) {
                continue;
            }
            if !queries.iter().any(|q| q == line) {
                queries.push(line.to_string());
            }
        }
        queries.truncate(self.max_queries);
        queries
    }
}

#[async_trait]
impl Reflector for LlmReflector {
    async fn reflect(&self, query: &str, context: &[String]) -> SimpleMemResult<Vec<String>> {
        let entries = if context.is_empty() {
            "(no entries)".to_string()
        } else {
            context.join("\n")
        };
        let messages = vec![
            Message::system(REFLECTION_PROMPT),
            Message::user(format!("Question: {}\n\nEntries:\n{}", query, entries)),
        ];

        let response = self
            .llm
            .generate(&messages, Some(self.options.clone()))
            .await?;
        let queries = self.parse(response.content_or_empty());
        debug!(
            model = self.llm.model_name(),
            follow_ups = queries.len(),
            "LLM reflection complete"
        );
        Ok(queries)
    }
}
