//! Tokenization shared by the lexical layer, the atomizer and retrieval.

use once_cell::sync::Lazy;
use std::collections::HashSet;

use crate::types::LexicalSignature;

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "about", "above", "after", "again", "against", "all", "also", "am", "an", "and",
        "any", "are", "as", "at", "be", "because", "been", "before", "being", "below",
        "between", "both", "but", "by", "can", "could", "d", "did", "do", "does", "doing",
        "don", "down", "during", "each", "even", "few", "for", "from", "further", "get",
        "got", "had", "has", "have", "having", "he", "her", "here", "hers", "herself", "him",
        "himself", "his", "how", "i", "if", "in", "into", "is", "it", "its", "itself", "just",
        "let", "ll", "m", "me", "might", "more", "most", "must", "my", "myself", "no", "nor",
        "not", "now", "of", "off", "on", "once", "only", "or", "other", "our", "ours",
        "ourselves", "out", "over", "own", "re", "s", "same", "see", "shall", "she", "should",
        "so", "some", "such", "t", "than", "that", "the", "their", "theirs", "them",
        "themselves", "then", "there", "these", "they", "this", "those", "through", "to",
        "too", "under", "until", "up", "us", "ve", "very", "was", "we", "were", "what", "when",
        "where", "which", "while", "who", "whom", "why", "will", "with", "would", "you",
        "your", "yours", "yourself", "yourselves",
    ]
    .into_iter()
    .collect()
});

/// Lowercase alphanumeric tokens, in order.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Whether a lowercase token carries no content.
pub fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(token)
}

/// Tokens minus stopwords, in order (duplicates kept).
pub fn content_terms(text: &str) -> Vec<String> {
    tokenize(text)
        .into_iter()
        .filter(|t| !is_stopword(t))
        .collect()
}

/// Term-frequency signature over the content terms of `text`.
pub fn lexical_signature(text: &str) -> LexicalSignature {
    let mut signature = LexicalSignature::new();
    for term in content_terms(text) {
        *signature.entry(term).or_insert(0.0) += 1.0;
    }
    signature
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_splits_on_punctuation() {
        assert_eq!(
            tokenize("I'll meet Bob on 2024-05-20."),
            vec!["i", "ll", "meet", "bob", "on", "2024", "05", "20"]
        );
    }

    #[test]
    fn test_signature_counts_content_terms() {
        let sig = lexical_signature("Alice orders a latte, and Bob orders tea");
        assert_eq!(sig.get("orders"), Some(&2.0));
        assert_eq!(sig.get("latte"), Some(&1.0));
        assert!(!sig.contains_key("and"));
        assert!(!sig.contains_key("a"));
    }

    #[test]
    fn test_stopword_only_text_has_empty_signature() {
        assert!(lexical_signature("and then we would").is_empty());
    }
}
