//! Proper-noun entity extraction.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[A-Za-z][A-Za-z0-9'-]*").unwrap());

// Capitalized words that never name an entity.
static NON_ENTITY: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "i", "monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday",
        "january", "february", "march", "april", "may", "june", "july", "august",
        "september", "october", "november", "december", "today", "tomorrow", "yesterday",
        "tonight", "ok", "okay", "yes", "yeah", "no", "hi", "hello", "hey", "thanks", "bye",
        "context",
    ]
    .into_iter()
    .collect()
});

/// Extract proper-noun entities from `text`, in order of first appearance.
///
/// Runs of capitalized words form one entity ("New York"). A capitalized
/// word opening a sentence is only taken when it is already `known`, since
/// sentence case says nothing about it otherwise.
pub fn extract_entities(text: &str, known: &HashSet<String>) -> Vec<String> {
    let mut entities: Vec<String> = Vec::new();
    let mut run: Vec<&str> = Vec::new();
    let mut run_initial = false;
    let mut sentence_start = true;
    let mut last_end = 0;

    for m in WORD.find_iter(text) {
        let gap = &text[last_end..m.start()];
        let breaks_sentence = gap.chars().any(|c| matches!(c, '.' | '!' | '?' | ':' | '\n'));
        let breaks_run = breaks_sentence || gap.chars().any(|c| !c.is_whitespace());
        if breaks_sentence {
            sentence_start = true;
        }
        if breaks_run {
            flush(&mut run, run_initial, known, &mut entities);
        }

        let word = base_word(m.as_str());
        let capitalized = word.chars().next().is_some_and(char::is_uppercase);
        let excluded = NON_ENTITY.contains(word.to_lowercase().as_str());

        if capitalized && !excluded {
            if run.is_empty() {
                run_initial = sentence_start;
            }
            run.push(word);
        } else {
            flush(&mut run, run_initial, known, &mut entities);
        }

        sentence_start = false;
        last_end = m.end();
    }
    flush(&mut run, run_initial, known, &mut entities);
    entities
}

fn flush(run: &mut Vec<&str>, initial: bool, known: &HashSet<String>, out: &mut Vec<String>) {
    if run.is_empty() {
        return;
    }
    let phrase = run.join(" ");
    let candidate = if !initial || known.contains(&phrase) {
        Some(phrase)
    } else if known.contains(run[0]) {
        Some(run[0].to_string())
    } else if run.len() > 1 {
        Some(run[1..].join(" "))
    } else {
        None
    };
    if let Some(entity) = candidate {
        if !out.contains(&entity) {
            out.push(entity);
        }
    }
    run.clear();
}

/// Drop possessive and contraction suffixes ("Bob's" → "Bob").
fn base_word(word: &str) -> &str {
    word.split('\'').next().unwrap_or(word)
}
