//! Molecule synthesizers.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::error::{SimpleMemError, SimpleMemResult};
use crate::traits::{GenerationOptions, Llm, Synthesizer};
use crate::types::{MemoryAtom, Message};
use crate::vector::cosine_similarity;

/// Picks the medoid atom (highest total similarity to the rest of the
/// cluster) and annotates it with the cluster size and date range.
#[derive(Debug, Clone, Default)]
pub struct ExtractiveSynthesizer;

impl ExtractiveSynthesizer {
    pub fn new() -> Self {
        Self
    }

    fn medoid(atoms: &[MemoryAtom]) -> Option<&MemoryAtom> {
        let mut best: Option<(usize, f32)> = None;
        for (i, atom) in atoms.iter().enumerate() {
            let total: f32 = atoms
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, other)| cosine_similarity(&atom.embedding, &other.embedding))
                .sum();
            if best.map_or(true, |(_, b)| total > b) {
                best = Some((i, total));
            }
        }
        best.map(|(i, _)| &atoms[i])
    }
}

#[async_trait]
impl Synthesizer for ExtractiveSynthesizer {
    async fn synthesize(&self, atoms: &[MemoryAtom]) -> SimpleMemResult<String> {
        let medoid = Self::medoid(atoms)
            .ok_or_else(|| SimpleMemError::consolidation_skipped("cannot synthesize an empty cluster"))?;

        let first = atoms.iter().map(|a| a.timestamp).min().unwrap_or(medoid.timestamp);
        let last = atoms.iter().map(|a| a.timestamp).max().unwrap_or(medoid.timestamp);
        let content = medoid.content.trim_end_matches(['.', '!', '?']);

        let range = if first.date_naive() == last.date_naive() {
            format!("on {}", first.format("%Y-%m-%d"))
        } else {
            format!(
                "from {} to {}",
                first.format("%Y-%m-%d"),
                last.format("%Y-%m-%d")
            )
        };
        Ok(format!(
            "{} (recurring, {} memories {})",
            content,
            atoms.len(),
            range
        ))
    }
}

const SYNTHESIS_PROMPT: &str = "You consolidate long-term conversational memory. \
You are given related memory entries, one per line, each prefixed with its date. \
Write ONE self-contained statement that generalizes them: keep every person's name, \
state recurring patterns explicitly, and mention the covered time span with absolute dates. \
Use no pronouns without antecedents and no relative time words. \
Reply with the statement only.";

/// Asks an LLM to write the generalized statement.
pub struct LlmSynthesizer {
    llm: Arc<dyn Llm>,
    options: GenerationOptions,
}

impl LlmSynthesizer {
    pub fn new(llm: Arc<dyn Llm>) -> Self {
        Self {
            llm,
            options: GenerationOptions {
                temperature: Some(0.1),
                max_tokens: Some(256),
            },
        }
    }

    pub fn with_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }
}

#[async_trait]
impl Synthesizer for LlmSynthesizer {
    async fn synthesize(&self, atoms: &[MemoryAtom]) -> SimpleMemResult<String> {
        let entries = atoms
            .iter()
            .map(|a| format!("[{}] {}", a.timestamp.format("%Y-%m-%d"), a.content))
            .collect::<Vec<_>>()
            .join("\n");
        let messages = vec![Message::system(SYNTHESIS_PROMPT), Message::user(entries)];

        let response = self
            .llm
            .generate(&messages, Some(self.options.clone()))
            .await?;
        let content = response.content_or_empty().trim();
        debug!(
            model = self.llm.model_name(),
            atoms = atoms.len(),
            chars = content.len(),
            "LLM synthesis complete"
        );

        if content.is_empty() {
            return Err(SimpleMemError::llm("LLM returned an empty synthesis"));
        }
        Ok(content.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::LlmResponse;
    use crate::types::{EntryStatus, Metadata};
    use chrono::{Duration, TimeZone, Utc};

    fn atom(content: &str, embedding: Vec<f32>, day: i64) -> MemoryAtom {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap() + Duration::days(day);
        MemoryAtom {
            id: format!("atom-{}", day),
            content: content.to_string(),
            timestamp: ts,
            created_at: ts,
            embedding,
            lexical_signature: Default::default(),
            metadata: Metadata::new(),
            status: EntryStatus::Active,
            molecule_id: None,
        }
    }

    #[tokio::test]
    async fn test_extractive_picks_medoid() {
        let atoms = vec![
            atom("Alice orders a latte.", vec![1.0, 0.1], 0),
            atom("Alice orders an oat latte.", vec![1.0, 0.0], 1),
            atom("Alice orders tea.", vec![0.6, 0.8], 2),
        ];
        let content = ExtractiveSynthesizer::new().synthesize(&atoms).await.unwrap();
        assert_eq!(
            content,
            "Alice orders a latte (recurring, 3 memories from 2024-05-01 to 2024-05-03)"
        );
    }

    #[tokio::test]
    async fn test_extractive_rejects_empty() {
        assert!(ExtractiveSynthesizer::new().synthesize(&[]).await.is_err());
    }

    struct CannedLlm(&'static str);

    #[async_trait]
    impl Llm for CannedLlm {
        async fn generate(
            &self,
            messages: &[Message],
            _options: Option<GenerationOptions>,
        ) -> SimpleMemResult<LlmResponse> {
            assert!(messages[1].content.contains("[2024-05-01] Alice orders a latte."));
            Ok(LlmResponse {
                content: Some(self.0.to_string()),
                usage: None,
            })
        }

        fn model_name(&self) -> &str {
            "canned"
        }
    }

    #[tokio::test]
    async fn test_llm_synthesizer() {
        let atoms = vec![atom("Alice orders a latte.", vec![1.0], 0)];
        let synth = LlmSynthesizer::new(Arc::new(CannedLlm(" Alice drinks lattes. ")));
        assert_eq!(synth.synthesize(&atoms).await.unwrap(), "Alice drinks lattes.");

        let synth = LlmSynthesizer::new(Arc::new(CannedLlm("  ")));
        assert!(synth.synthesize(&atoms).await.is_err());
    }
}
