//! Bounded recent-history buffer owned by one memory space.

use std::collections::{HashSet, VecDeque};

use crate::text::TimeAnchor;
use crate::types::{MemoryAtom, DEFAULT_SPEAKER, META_WINDOW_ID};
use crate::vector::mean_vector;

/// What the gate and the atomizer remember about one accepted window.
#[derive(Debug, Clone)]
pub struct HistoryFrame {
    pub window_id: String,
    /// Entities in order of appearance.
    pub entities: Vec<String>,
    /// Window embedding.
    pub embedding: Vec<f32>,
    /// Speakers in order of appearance.
    pub speakers: Vec<String>,
    /// Latest time anchor resolved in the window.
    pub last_anchor: Option<TimeAnchor>,
}

/// Ring buffer of the last `capacity` accepted windows.
#[derive(Debug, Clone)]
pub struct RecentHistory {
    frames: VecDeque<HistoryFrame>,
    capacity: usize,
}

impl RecentHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Rebuild the buffer from stored atoms, newest first.
    ///
    /// Atoms are grouped by the window that produced them; the newest
    /// `capacity` windows become frames, oldest first. A frame's embedding
    /// is the mean of its atom embeddings and carries no time anchor.
    /// Atoms without a window id, and accepted windows that stored no
    /// atoms, leave no frame.
    pub fn from_atoms(capacity: usize, newest_first: &[MemoryAtom]) -> Self {
        let mut windows: Vec<(&str, Vec<&MemoryAtom>)> = Vec::new();
        for atom in newest_first {
            let Some(window_id) = atom.metadata.get(META_WINDOW_ID).and_then(|v| v.as_str()) else {
                continue;
            };
            match windows.iter_mut().find(|(id, _)| *id == window_id) {
                Some((_, atoms)) => atoms.push(atom),
                None => windows.push((window_id, vec![atom])),
            }
        }

        let mut history = Self::new(capacity);
        let keep = history.capacity;
        for (window_id, mut atoms) in windows.into_iter().take(keep).rev() {
            atoms.reverse();
            let Some(embedding) = mean_vector(atoms.iter().map(|a| a.embedding.as_slice())) else {
                continue;
            };
            let mut entities: Vec<String> = Vec::new();
            let mut speakers: Vec<String> = Vec::new();
            for atom in &atoms {
                if let Some(speaker) = atom.speaker().filter(|s| *s != DEFAULT_SPEAKER) {
                    if !speakers.iter().any(|s| s == speaker) {
                        speakers.push(speaker.to_string());
                    }
                }
                for entity in atom.entities() {
                    if !entities.contains(&entity) {
                        entities.push(entity);
                    }
                }
            }
            history.push(HistoryFrame {
                window_id: window_id.to_string(),
                entities,
                embedding,
                speakers,
                last_anchor: None,
            });
        }
        history
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Append a frame, evicting the oldest when full.
    pub fn push(&mut self, frame: HistoryFrame) {
        while self.frames.len() >= self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    /// Lowercased entities (speakers included) seen in the buffer.
    pub fn seen_entities(&self) -> HashSet<String> {
        self.frames
            .iter()
            .flat_map(|f| f.entities.iter().chain(f.speakers.iter()))
            .map(|e| e.to_lowercase())
            .collect()
    }

    /// Entities and speakers as written, for case-sensitive lookups.
    pub fn known_names(&self) -> HashSet<String> {
        self.frames
            .iter()
            .flat_map(|f| f.entities.iter().chain(f.speakers.iter()))
            .cloned()
            .collect()
    }

    /// Mean of the buffered window embeddings.
    pub fn mean_embedding(&self) -> Option<Vec<f32>> {
        mean_vector(self.frames.iter().map(|f| f.embedding.as_slice()))
    }

    /// Most recent speaker other than `exclude`.
    pub fn last_other_speaker(&self, exclude: &str) -> Option<&str> {
        self.frames
            .iter()
            .rev()
            .flat_map(|f| f.speakers.iter().rev())
            .find(|s| s.as_str() != exclude)
            .map(String::as_str)
    }

    /// Entities newest first, excluding `exclude`.
    pub fn recent_entities_except<'a>(
        &'a self,
        exclude: &'a str,
    ) -> impl Iterator<Item = &'a str> + 'a {
        self.frames
            .iter()
            .rev()
            .flat_map(|f| f.entities.iter().rev())
            .map(String::as_str)
            .filter(move |e| *e != exclude)
    }

    /// Latest anchor resolved in any buffered window.
    pub fn last_anchor(&self) -> Option<TimeAnchor> {
        self.frames.iter().rev().find_map(|f| f.last_anchor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(id: &str, entities: &[&str], speakers: &[&str]) -> HistoryFrame {
        HistoryFrame {
            window_id: id.to_string(),
            entities: entities.iter().map(|s| s.to_string()).collect(),
            embedding: vec![1.0, 0.0],
            speakers: speakers.iter().map(|s| s.to_string()).collect(),
            last_anchor: None,
        }
    }

    #[test]
    fn test_ring_buffer_evicts_oldest() {
        let mut history = RecentHistory::new(2);
        history.push(frame("w1", &["Carol"], &["Alice"]));
        history.push(frame("w2", &["Bob"], &["Alice"]));
        history.push(frame("w3", &["Dave"], &["Erin"]));
        assert_eq!(history.len(), 2);
        let seen = history.seen_entities();
        assert!(!seen.contains("carol"));
        assert!(seen.contains("bob"));
        assert!(seen.contains("erin"));
    }

    #[test]
    fn test_lookups_prefer_recent() {
        let mut history = RecentHistory::new(4);
        history.push(frame("w1", &["Carol", "Dave"], &["Alice", "Bob"]));
        assert_eq!(history.last_other_speaker("Bob"), Some("Alice"));
        assert_eq!(history.last_other_speaker("Alice"), Some("Bob"));
        assert_eq!(history.recent_entities_except("Dave").next(), Some("Carol"));
        assert_eq!(history.mean_embedding(), Some(vec![1.0, 0.0]));
    }

    fn stored(id: &str, window_id: Option<&str>, speaker: &str, entities: &[&str], embedding: Vec<f32>) -> MemoryAtom {
        let mut atom = crate::index::testing::sample_atom(id, 0);
        atom.metadata.insert(crate::types::META_SPEAKER.to_string(), speaker.into());
        atom.metadata.insert(
            crate::types::META_ENTITIES.to_string(),
            serde_json::json!(entities),
        );
        match window_id {
            Some(w) => atom.metadata.insert(META_WINDOW_ID.to_string(), w.into()),
            None => atom.metadata.remove(META_WINDOW_ID),
        };
        atom.embedding = embedding;
        atom
    }

    #[test]
    fn test_rebuilt_from_stored_windows() {
        // Newest first: w3 has two atoms, w1 falls outside the capacity.
        let atoms = vec![
            stored("a5", Some("w3"), "Bob", &["Bob", "Carol"], vec![0.0, 1.0]),
            stored("a4", Some("w3"), "Alice", &["Alice", "Bob"], vec![1.0, 0.0]),
            stored("a3", None, "Dave", &["Dave"], vec![1.0, 1.0]),
            stored("a2", Some("w2"), DEFAULT_SPEAKER, &["Erin"], vec![1.0, 0.0]),
            stored("a1", Some("w1"), "Frank", &["Frank"], vec![1.0, 0.0]),
        ];
        let history = RecentHistory::from_atoms(2, &atoms);

        assert_eq!(history.len(), 2);
        assert_eq!(history.frames[0].window_id, "w2");
        assert!(history.frames[0].speakers.is_empty());
        let newest = &history.frames[1];
        assert_eq!(newest.window_id, "w3");
        assert_eq!(newest.speakers, vec!["Alice", "Bob"]);
        assert_eq!(newest.entities, vec!["Alice", "Bob", "Carol"]);
        assert_eq!(newest.embedding, vec![0.5, 0.5]);
        assert!(newest.last_anchor.is_none());

        let seen = history.seen_entities();
        assert!(seen.contains("erin"));
        assert!(!seen.contains("frank"));
        assert!(!seen.contains("dave"));
        assert_eq!(history.last_other_speaker("Bob"), Some("Alice"));
    }

    #[test]
    fn test_rebuilt_from_nothing() {
        assert!(RecentHistory::from_atoms(4, &[]).is_empty());
    }
}
