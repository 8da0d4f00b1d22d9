//! Context assembly under a token budget.

use chrono::{DateTime, SecondsFormat, Utc};

/// Rough token count: one token per four characters, rounded up.
pub fn estimate_tokens(line: &str) -> usize {
    line.chars().count().div_ceil(4)
}

/// `[timestamp]: content`
pub fn format_line(timestamp: &DateTime<Utc>, content: &str) -> String {
    format!(
        "[{}]: {}",
        timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        content
    )
}

/// Lines that fit in the budget.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssembledContext {
    pub text: String,
    pub tokens_used: usize,
    /// How many leading lines were kept.
    pub kept: usize,
}

/// Join lines in order, dropping from the end until the total estimate
/// fits in `budget`.
pub fn assemble(lines: &[String], budget: usize) -> AssembledContext {
    let costs: Vec<usize> = lines.iter().map(|l| estimate_tokens(l)).collect();
    let mut kept = lines.len();
    let mut tokens_used: usize = costs.iter().sum();
    while kept > 0 && tokens_used > budget {
        kept -= 1;
        tokens_used -= costs[kept];
    }
    AssembledContext {
        text: lines[..kept].join("\n"),
        tokens_used,
        kept,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_line() {
        let t = Utc.with_ymd_and_hms(2024, 5, 20, 9, 0, 0).unwrap();
        assert_eq!(
            format_line(&t, "Alice will meet Bob for coffee"),
            "[2024-05-20T09:00:00Z]: Alice will meet Bob for coffee"
        );
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn test_lowest_ranked_lines_dropped_first() {
        let lines = vec!["a".repeat(40), "b".repeat(40), "c".repeat(40)];
        let ctx = assemble(&lines, 25);
        assert_eq!(ctx.kept, 2);
        assert_eq!(ctx.tokens_used, 20);
        assert!(ctx.text.starts_with('a'));
        assert!(!ctx.text.contains('c'));

        let none = assemble(&lines, 5);
        assert_eq!(none.kept, 0);
        assert!(none.text.is_empty());
    }
}
