//! Atomizer: turns an accepted window into self-contained atom candidates.
//!
//! Per utterance the pipeline is strictly ordered: claim extraction, then
//! pronoun resolution, then temporal anchoring. A claim that fails to resolve
//! is dropped on its own; the rest of the window continues.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::ingestion::coreference::{resolve_pronouns, Referents};
use crate::ingestion::history::RecentHistory;
use crate::ingestion::types::{AtomizeOutput, DroppedClaim};
use crate::text::{content_terms, extract_entities, resolve_temporal, TimeAnchor};
use crate::types::{AtomCandidate, DialogueWindow, Utterance, DEFAULT_SPEAKER};

/// Atomizer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AtomizerConfig {
    /// Claims with fewer content terms are treated as filler.
    pub min_content_terms: usize,
}

impl Default for AtomizerConfig {
    fn default() -> Self {
        Self {
            min_content_terms: 2,
        }
    }
}

impl AtomizerConfig {
    /// Validate configuration values are in valid ranges.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.min_content_terms == 0 {
            return Err("min_content_terms must be at least 1");
        }
        Ok(())
    }
}

// Leading acknowledgements and greetings, stripped before a claim is judged.
static ACKNOWLEDGEMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:(?:ok|okay|sure|yes|yeah|yep|no|nope|great|cool|thanks|thank you|sounds good|sounds great|got it|alright|all right|right|hi|hello|hey|bye|goodbye|oh|well|hmm|wow|awesome|perfect|nice)\b[\s,.!]*)+",
    )
    .unwrap()
});

static CLAUSE_JOIN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i),\s+(?:and|but|so)\s+").unwrap());

static THIRD_PERSON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(he|she|him|her|his|hers|they|them|their|theirs|himself|herself|themselves)\b")
        .unwrap()
});

const SUBJECT_PRONOUNS: &[&str] = &["i", "i'll", "i'm", "i've", "i'd", "you", "we", "he", "she", "they"];

const ABBREVIATIONS: &[&str] = &["dr.", "mr.", "mrs.", "ms.", "st.", "e.g.", "i.e.", "vs."];

/// Decomposes windows into atom candidates.
#[derive(Debug, Clone, Default)]
pub struct Atomizer {
    config: AtomizerConfig,
}

impl Atomizer {
    pub fn new(config: AtomizerConfig) -> Self {
        Self { config }
    }

    /// Atomize the window's utterances. Context turns inform resolution
    /// but produce no candidates.
    pub fn atomize(&self, window: &DialogueWindow, history: &RecentHistory) -> AtomizeOutput {
        let known = window_known_names(window, history);
        let window_speakers = window.speakers();

        // Entity mentions, oldest first.
        let mut mentions: Vec<String> = history.recent_entities_except("").map(str::to_string).collect();
        mentions.reverse();
        let mut spoken: Vec<&str> = Vec::new();
        for u in &window.context {
            mentions.extend(extract_entities(&u.text, &known));
            spoken.push(&u.speaker);
        }

        let mut output = AtomizeOutput::default();
        let mut window_anchor: Option<TimeAnchor> = None;

        for utterance in &window.utterances {
            let speaker = (utterance.speaker != DEFAULT_SPEAKER).then_some(utterance.speaker.as_str());
            let addressee = addressee_for(utterance, &window_speakers, &spoken, history);
            let reference = utterance.timestamp.unwrap_or(window.created_at);

            for claim in extract_claims(&utterance.text) {
                let dropped = |reason: String| DroppedClaim {
                    speaker: utterance.speaker.clone(),
                    text: claim.clone(),
                    reason,
                };

                if let Some(reason) = self.filler_reason(&claim) {
                    debug!(speaker = %utterance.speaker, claim = %claim, reason, "Claim skipped");
                    output.dropped.push(dropped(reason.to_string()));
                    continue;
                }
                let claim = strip_acknowledgement(&claim);

                let third_person = third_person_antecedent(&claim, &mentions, &known, speaker);
                let referents = Referents {
                    speaker,
                    addressee: addressee.as_deref(),
                    third_person: third_person.as_deref(),
                };

                let previous = window_anchor.or_else(|| history.last_anchor());
                let resolved = match resolve_pronouns(&claim, &referents)
                    .and_then(|r| resolve_temporal(&r.text, reference, previous).map(|t| (r.referents, t)))
                {
                    Ok(parts) => parts,
                    Err(e) => {
                        warn!(
                            window_id = %window.id,
                            speaker = %utterance.speaker,
                            claim = %claim,
                            error = %e,
                            "Claim dropped"
                        );
                        output.dropped.push(dropped(e.to_string()));
                        continue;
                    }
                };
                let (referent_names, temporal) = resolved;

                if let Some(anchor) = temporal.last_anchor() {
                    window_anchor = Some(anchor);
                }
                let content = finish_sentence(&temporal.content);

                let mut names = known.clone();
                names.extend(referent_names.iter().cloned());
                let mut entities = extract_entities(&content, &names);
                for referent in referent_names {
                    if !entities.contains(&referent) {
                        entities.push(referent);
                    }
                }
                mentions.extend(entities.iter().cloned());

                output.candidates.push(AtomCandidate {
                    content,
                    timestamp: temporal.timestamp().unwrap_or(reference),
                    created_at: window.created_at,
                    speaker: utterance.speaker.clone(),
                    entities,
                    window_id: window.id.clone(),
                });
            }
            spoken.push(&utterance.speaker);
        }

        output.last_anchor = window_anchor;
        debug!(
            window_id = %window.id,
            candidates = output.candidates.len(),
            dropped = output.dropped.len(),
            "Window atomized"
        );
        output
    }

    fn filler_reason(&self, claim: &str) -> Option<&'static str> {
        if claim.trim_end().ends_with('?') {
            return Some("question");
        }
        let rest = strip_acknowledgement(claim);
        if rest.is_empty() {
            return Some("acknowledgement");
        }
        if content_terms(&rest).len() < self.config.min_content_terms {
            return Some("too few content terms");
        }
        None
    }
}

/// Names that count as entities even when they open a sentence: speakers,
/// names from history, and proper nouns seen mid-sentence anywhere in the window.
pub(crate) fn window_known_names(window: &DialogueWindow, history: &RecentHistory) -> HashSet<String> {
    let mut known = history.known_names();
    known.extend(window.speakers());
    let empty = HashSet::new();
    for u in window.context.iter().chain(window.utterances.iter()) {
        known.extend(extract_entities(&u.text, &empty));
    }
    known
}

/// The single other speaker in the window, else the most recent other
/// speaker before this turn, else the most recent one in history.
fn addressee_for(
    utterance: &Utterance,
    window_speakers: &[String],
    spoken: &[&str],
    history: &RecentHistory,
) -> Option<String> {
    let others: Vec<&String> = window_speakers
        .iter()
        .filter(|s| **s != utterance.speaker)
        .collect();
    if others.len() == 1 {
        return Some(others[0].clone());
    }
    spoken
        .iter()
        .rev()
        .find(|s| **s != utterance.speaker && **s != DEFAULT_SPEAKER)
        .map(|s| s.to_string())
        .or_else(|| {
            history
                .last_other_speaker(&utterance.speaker)
                .map(str::to_string)
        })
}

/// Most recent entity other than the speaker mentioned before the claim's
/// first third-person pronoun.
fn third_person_antecedent(
    claim: &str,
    mentions: &[String],
    known: &HashSet<String>,
    speaker: Option<&str>,
) -> Option<String> {
    let pronoun_at = THIRD_PERSON.find(claim)?.start();
    let in_claim = extract_entities(claim, known)
        .into_iter()
        .filter(|e| claim.find(e.as_str()).is_some_and(|pos| pos < pronoun_at));
    mentions
        .iter()
        .cloned()
        .chain(in_claim)
        .filter(|e| Some(e.as_str()) != speaker)
        .last()
}

/// Split an utterance into sentences, then split sentences joined by
/// ", and" / ", but" / ", so" when a new subject follows.
pub fn extract_claims(text: &str) -> Vec<String> {
    split_sentences(text)
        .into_iter()
        .flat_map(|sentence| split_clauses(&sentence))
        .filter(|c| !c.is_empty())
        .collect()
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        let at_boundary = chars.peek().map_or(true, |n| n.is_whitespace());
        if matches!(c, '.' | '!' | '?' | ';') && at_boundary {
            let last_word = current
                .split_whitespace()
                .last()
                .unwrap_or("")
                .to_lowercase();
            if c == '.' && ABBREVIATIONS.contains(&last_word.as_str()) {
                continue;
            }
            let sentence = current.trim().trim_end_matches(';').trim().to_string();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            current.clear();
        }
    }
    let rest = current.trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }
    sentences
}

fn split_clauses(sentence: &str) -> Vec<String> {
    let mut clauses = Vec::new();
    let mut start = 0;
    for m in CLAUSE_JOIN.find_iter(sentence) {
        let next_word = sentence[m.end()..]
            .split(|c: char| c.is_whitespace() || c == ',')
            .next()
            .unwrap_or("");
        let new_subject = SUBJECT_PRONOUNS.contains(&next_word.to_lowercase().as_str())
            || next_word.chars().next().is_some_and(char::is_uppercase);
        if new_subject {
            clauses.push(sentence[start..m.start()].trim().to_string());
            start = m.end();
        }
    }
    clauses.push(sentence[start..].trim().to_string());
    clauses
}

fn strip_acknowledgement(claim: &str) -> String {
    ACKNOWLEDGEMENT.replace(claim.trim(), "").trim().to_string()
}

/// Capitalize and drop trailing sentence punctuation.
fn finish_sentence(text: &str) -> String {
    let text = text.trim().trim_end_matches(['.', '!', ',', ';']).trim_end();
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::history::HistoryFrame;
    use crate::text::extract_timestamp;
    use chrono::{DateTime, TimeZone, Utc};

    fn created_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 13, 9, 0, 0).unwrap()
    }

    fn window(turns: &[(&str, &str)]) -> DialogueWindow {
        DialogueWindow::new(
            turns.iter().map(|(s, t)| Utterance::new(*s, *t)).collect(),
            created_at(),
        )
    }

    #[test]
    fn test_scenario_atom() {
        let output = Atomizer::default().atomize(
            &window(&[("Alice", "I'll meet Bob for coffee next Monday")]),
            &RecentHistory::new(4),
        );
        assert_eq!(output.candidates.len(), 1);
        let atom = &output.candidates[0];
        assert_eq!(atom.content, "Alice will meet Bob for coffee on 2024-05-20");
        assert_eq!(atom.timestamp, Utc.with_ymd_and_hms(2024, 5, 20, 0, 0, 0).unwrap());
        assert_eq!(atom.entities, vec!["Alice", "Bob"]);
        assert_eq!(atom.created_at, created_at());
        assert_eq!(extract_timestamp(&atom.content), Some(atom.timestamp));
        assert!(output.last_anchor.is_some());
    }

    #[test]
    fn test_filler_is_dropped() {
        let output = Atomizer::default().atomize(
            &window(&[("Bob", "Sounds good, see you then"), ("Alice", "Thanks!")]),
            &RecentHistory::new(4),
        );
        assert!(output.candidates.is_empty());
        assert_eq!(output.dropped.len(), 2);
    }

    #[test]
    fn test_no_time_expression_uses_created_at() {
        let output = Atomizer::default().atomize(
            &window(&[("Alice", "I love hiking in the Alps")]),
            &RecentHistory::new(4),
        );
        assert_eq!(output.candidates[0].timestamp, created_at());
        assert_eq!(output.candidates[0].content, "Alice love hiking in the Alps");
    }

    #[test]
    fn test_unresolvable_claim_dropped_rest_continues() {
        let output = Atomizer::default().atomize(
            &window(&[(
                "Context",
                "She moved to Berlin last year. The office in Berlin opened in 2019.",
            )]),
            &RecentHistory::new(4),
        );
        assert_eq!(output.dropped.len(), 1);
        assert_eq!(output.candidates.len(), 1);
        assert_eq!(
            output.candidates[0].content,
            "The office in Berlin opened in 2019"
        );
    }

    #[test]
    fn test_addressee_and_third_person() {
        let output = Atomizer::default().atomize(
            &window(&[
                ("Alice", "I talked to Carol this morning about the trip."),
                ("Bob", "You should tell her the flight leaves Friday."),
            ]),
            &RecentHistory::new(4),
        );
        let contents: Vec<&str> = output.candidates.iter().map(|c| c.content.as_str()).collect();
        assert!(contents.contains(&"Alice talked to Carol on 2024-05-13 about the trip"));
        assert!(contents.contains(&"Alice should tell Carol the flight leaves on 2024-05-17"));
    }

    #[test]
    fn test_then_resolves_from_history() {
        let mut history = RecentHistory::new(4);
        let anchor = crate::text::resolve_temporal("next Monday", created_at(), None)
            .unwrap()
            .last_anchor();
        history.push(HistoryFrame {
            window_id: "w0".to_string(),
            entities: vec!["Bob".to_string()],
            embedding: vec![1.0],
            speakers: vec!["Alice".to_string(), "Bob".to_string()],
            last_anchor: anchor,
        });

        let output = Atomizer::default().atomize(
            &window(&[("Bob", "I will bring the tickets then")]),
            &history,
        );
        assert_eq!(
            output.candidates[0].content,
            "Bob will bring the tickets on 2024-05-20"
        );
        assert_eq!(output.last_anchor, anchor);
    }

    #[test]
    fn test_extract_claims() {
        assert_eq!(
            extract_claims("I met Dr. Smith today. He was nice; we talked, and I left."),
            vec!["I met Dr. Smith today.", "He was nice", "we talked", "I left."]
        );
        assert_eq!(
            extract_claims("I bought coffee, and cake"),
            vec!["I bought coffee, and cake"]
        );
    }
}
