//! Dialogue input types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Speaker assigned to transcript lines that carry no `Speaker:` prefix.
pub const DEFAULT_SPEAKER: &str = "Context";

/// A single turn of dialogue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    /// Who said it.
    pub speaker: String,
    /// What was said.
    pub text: String,
    /// When it was said, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Utterance {
    /// Create a new utterance without a timestamp.
    pub fn new(speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
            text: text.into(),
            timestamp: None,
        }
    }

    /// Set the timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// A sliding span of dialogue handed to the entropy gate and the atomizer.
///
/// `utterances` are the turns to atomize. `context` holds the overlap carried
/// over from the previous window; it feeds coreference and entity context but
/// is never atomized a second time.
#[derive(Debug, Clone)]
pub struct DialogueWindow {
    /// Window identifier recorded in atom metadata.
    pub id: String,
    /// Reference clock for temporal anchoring.
    pub created_at: DateTime<Utc>,
    /// Turns to atomize.
    pub utterances: Vec<Utterance>,
    /// Overlap turns from the previous window.
    pub context: Vec<Utterance>,
}

impl DialogueWindow {
    /// Create a window with a fresh id.
    pub fn new(utterances: Vec<Utterance>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at,
            utterances,
            context: Vec::new(),
        }
    }

    /// Attach overlap context.
    pub fn with_context(mut self, context: Vec<Utterance>) -> Self {
        self.context = context;
        self
    }

    /// Number of turns to atomize.
    pub fn len(&self) -> usize {
        self.utterances.len()
    }

    /// Whether the window has nothing to atomize.
    pub fn is_empty(&self) -> bool {
        self.utterances.iter().all(|u| u.text.trim().is_empty())
    }

    /// Concatenated text of the atomizable turns, one `speaker: text` per line.
    pub fn text(&self) -> String {
        self.utterances
            .iter()
            .map(|u| format!("{}: {}", u.speaker, u.text))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Distinct speakers across context and utterances, in order of appearance.
    pub fn speakers(&self) -> Vec<String> {
        let mut speakers: Vec<String> = Vec::new();
        for u in self.context.iter().chain(self.utterances.iter()) {
            if u.speaker != DEFAULT_SPEAKER && !speakers.contains(&u.speaker) {
                speakers.push(u.speaker.clone());
            }
        }
        speakers
    }
}

/// Input accepted by `Memory::ingest`.
#[derive(Debug, Clone)]
pub enum IngestInput {
    /// Raw transcript text, one `Speaker: content` turn per line.
    Text(String),
    /// Already structured turns.
    Turns(Vec<Utterance>),
}

impl IngestInput {
    /// Normalize any input format to a list of utterances.
    pub fn into_utterances(self) -> Vec<Utterance> {
        match self {
            IngestInput::Text(text) => parse_transcript(&text),
            IngestInput::Turns(turns) => turns,
        }
    }
}

impl From<&str> for IngestInput {
    fn from(s: &str) -> Self {
        IngestInput::Text(s.to_string())
    }
}

impl From<String> for IngestInput {
    fn from(s: String) -> Self {
        IngestInput::Text(s)
    }
}

impl From<Utterance> for IngestInput {
    fn from(u: Utterance) -> Self {
        IngestInput::Turns(vec![u])
    }
}

impl From<Vec<Utterance>> for IngestInput {
    fn from(turns: Vec<Utterance>) -> Self {
        IngestInput::Turns(turns)
    }
}

/// Parse transcript text into utterances.
///
/// Each non-blank line is `Speaker: content`; a line without a colon becomes
/// an utterance of the [`DEFAULT_SPEAKER`].
pub fn parse_transcript(text: &str) -> Vec<Utterance> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| match line.split_once(':') {
            Some((speaker, content)) if is_speaker_label(speaker) => {
                Utterance::new(speaker.trim(), content.trim())
            }
            _ => Utterance::new(DEFAULT_SPEAKER, line),
        })
        .filter(|u| !u.text.is_empty())
        .collect()
}

/// Single-word labels are always speakers; multi-word labels ("Dr Smith") only
/// when every word is capitalized.
fn is_speaker_label(label: &str) -> bool {
    let label = label.trim();
    if label.is_empty() {
        return false;
    }
    let words: Vec<&str> = label.split_whitespace().collect();
    words.len() == 1
        || (words.len() <= 3
            && words
                .iter()
                .all(|w| w.chars().next().is_some_and(char::is_uppercase)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_transcript_speakers() {
        let turns = parse_transcript("Alice: I'll meet Bob\n\nBob: Sounds good\n");
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].speaker, "Alice");
        assert_eq!(turns[0].text, "I'll meet Bob");
        assert_eq!(turns[1].speaker, "Bob");
    }

    #[test]
    fn test_parse_transcript_without_speaker() {
        let turns = parse_transcript("the meeting moved to Friday");
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].speaker, DEFAULT_SPEAKER);
        assert_eq!(turns[0].text, "the meeting moved to Friday");
    }

    #[test]
    fn test_parse_transcript_colon_inside_sentence() {
        let turns = parse_transcript("note that the time is 10:30 tomorrow");
        assert_eq!(turns[0].speaker, DEFAULT_SPEAKER);
        assert_eq!(turns[0].text, "note that the time is 10:30 tomorrow");
    }

    #[test]
    fn test_window_speakers_include_context() {
        let window = DialogueWindow::new(vec![Utterance::new("Bob", "ok")], Utc::now())
            .with_context(vec![Utterance::new("Alice", "hi")]);
        assert_eq!(window.speakers(), vec!["Alice".to_string(), "Bob".to_string()]);
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn test_empty_window() {
        let window = DialogueWindow::new(vec![Utterance::new("Bob", "   ")], Utc::now());
        assert!(window.is_empty());
    }
}
