//! Pronoun resolution for single claims.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{SimpleMemError, SimpleMemResult};

static PRONOUN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(i am|i'm|i'll|i've|i'd|i|me|my|mine|myself|you are|you're|you'll|you've|you'd|yourselves|yourself|yours|your|you|we are|we're|we'll|we've|we'd|we|us|ours|our|ourselves|he's|she's|he|she|him|himself|herself|hers|her|his|they're|they|them|themselves|theirs|their)\b",
    )
    .unwrap()
});

// Words after "her" that mark it as an object pronoun rather than a possessive.
const AFTER_OBJECT_HER: &[&str] = &[
    "a", "an", "the", "to", "for", "with", "about", "and", "or", "but", "at", "in", "on",
    "from", "that", "this", "if", "when", "again", "too", "yesterday", "today", "tomorrow",
    "next", "last", "then",
];

/// Who each class of pronoun refers to in one claim.
#[derive(Debug, Clone, Default)]
pub struct Referents<'a> {
    /// First person singular.
    pub speaker: Option<&'a str>,
    /// Second person.
    pub addressee: Option<&'a str>,
    /// Third person: the most recent non-speaker entity.
    pub third_person: Option<&'a str>,
}

#[derive(Clone, Copy)]
enum Person {
    First,
    Second,
    FirstPlural,
    Third,
}

/// Resolved claim text and the names substituted into it.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub text: String,
    pub referents: Vec<String>,
}

/// Replace personal pronouns in `claim` with the names they refer to.
///
/// Contractions are expanded with the verb agreeing with the name
/// ("I'm" becomes "Alice is"). "it" is left alone. Any pronoun whose
/// referent is unknown fails the whole claim.
pub fn resolve_pronouns(claim: &str, referents: &Referents<'_>) -> SimpleMemResult<Resolved> {
    let claim = claim.replace('\u{2019}', "'");
    let mut text = String::with_capacity(claim.len() + 16);
    let mut used: Vec<String> = Vec::new();
    let mut cursor = 0;

    for m in PRONOUN.find_iter(&claim) {
        let raw = m.as_str();
        // "US" and similar all-caps words are not pronouns.
        if raw.len() > 1 && raw.chars().all(|c| c.is_ascii_uppercase()) {
            continue;
        }
        let pronoun = raw.to_lowercase();
        let (person, template) = expansion(&pronoun, &claim[m.end()..]);

        let name = |who: Option<&str>| {
            who.map(str::to_string)
                .ok_or_else(|| SimpleMemError::unresolved_pronoun(raw))
        };
        let replacement = match person {
            Person::First => {
                let speaker = name(referents.speaker)?;
                remember(&mut used, &speaker);
                template.replace("{}", &speaker)
            }
            Person::Second => {
                let addressee = name(referents.addressee)?;
                remember(&mut used, &addressee);
                template.replace("{}", &addressee)
            }
            Person::FirstPlural => {
                let speaker = name(referents.speaker)?;
                let addressee = name(referents.addressee)?;
                remember(&mut used, &speaker);
                remember(&mut used, &addressee);
                template.replace("{}", &format!("{} and {}", speaker, addressee))
            }
            Person::Third => {
                let entity = name(referents.third_person)?;
                remember(&mut used, &entity);
                template.replace("{}", &entity)
            }
        };

        text.push_str(&claim[cursor..m.start()]);
        text.push_str(&replacement);
        cursor = m.end();
    }
    text.push_str(&claim[cursor..]);

    Ok(Resolved {
        text,
        referents: used,
    })
}

fn remember(used: &mut Vec<String>, name: &str) {
    if !used.iter().any(|u| u == name) {
        used.push(name.to_string());
    }
}

/// Person and replacement template (`{}` is the name) for a lowercased pronoun.
fn expansion(pronoun: &str, rest: &str) -> (Person, &'static str) {
    match pronoun {
        "i am" | "i'm" => (Person::First, "{} is"),
        "i'll" => (Person::First, "{} will"),
        "i've" => (Person::First, "{} has"),
        "i'd" => (Person::First, "{} would"),
        "my" | "mine" => (Person::First, "{}'s"),
        "i" | "me" | "myself" => (Person::First, "{}"),

        "you are" | "you're" => (Person::Second, "{} is"),
        "you'll" => (Person::Second, "{} will"),
        "you've" => (Person::Second, "{} has"),
        "you'd" => (Person::Second, "{} would"),
        "your" | "yours" => (Person::Second, "{}'s"),
        "you" | "yourself" | "yourselves" => (Person::Second, "{}"),

        "we are" | "we're" => (Person::FirstPlural, "{} are"),
        "we'll" => (Person::FirstPlural, "{} will"),
        "we've" => (Person::FirstPlural, "{} have"),
        "we'd" => (Person::FirstPlural, "{} would"),
        "our" | "ours" => (Person::FirstPlural, "{}'s"),
        "we" | "us" | "ourselves" => (Person::FirstPlural, "{}"),

        "he's" | "she's" => (Person::Third, "{} is"),
        "they're" => (Person::Third, "{} are"),
        "his" | "hers" | "their" | "theirs" => (Person::Third, "{}'s"),
        "her" if is_possessive_her(rest) => (Person::Third, "{}'s"),
        _ => (Person::Third, "{}"),
    }
}

fn is_possessive_her(rest: &str) -> bool {
    let next = rest
        .trim_start()
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .next()
        .unwrap_or("");
    !next.is_empty()
        && rest.starts_with(' ')
        && !AFTER_OBJECT_HER.contains(&next.to_lowercase().as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn referents<'a>() -> Referents<'a> {
        Referents {
            speaker: Some("Alice"),
            addressee: Some("Bob"),
            third_person: Some("Carol"),
        }
    }

    #[test]
    fn test_first_person_contraction() {
        let r = resolve_pronouns("I'll meet Bob for coffee", &referents()).unwrap();
        assert_eq!(r.text, "Alice will meet Bob for coffee");
        assert_eq!(r.referents, vec!["Alice"]);

        let r = resolve_pronouns("I'm at my desk", &referents()).unwrap();
        assert_eq!(r.text, "Alice is at Alice's desk");
    }

    #[test]
    fn test_second_person_and_plural() {
        let r = resolve_pronouns("you're invited, we should go", &referents()).unwrap();
        assert_eq!(r.text, "Bob is invited, Alice and Bob should go");
    }

    #[test]
    fn test_third_person_and_her() {
        let r = resolve_pronouns("she lent her bike to him", &referents()).unwrap();
        assert_eq!(r.text, "Carol lent Carol's bike to Carol");
        let r = resolve_pronouns("I called her yesterday", &referents()).unwrap();
        assert_eq!(r.text, "Alice called Carol yesterday");
    }

    #[test]
    fn test_it_is_not_resolved() {
        let r = resolve_pronouns("it was great", &referents()).unwrap();
        assert_eq!(r.text, "it was great");
        assert!(r.referents.is_empty());
    }

    #[test]
    fn test_missing_referent_fails() {
        let no_addressee = Referents {
            speaker: Some("Alice"),
            ..Default::default()
        };
        let err = resolve_pronouns("see you soon", &no_addressee).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ResUnresolvedPronoun);
    }

    #[test]
    fn test_all_caps_us_is_kept() {
        let r = resolve_pronouns("I moved to the US", &referents()).unwrap();
        assert_eq!(r.text, "Alice moved to the US");
    }
}
