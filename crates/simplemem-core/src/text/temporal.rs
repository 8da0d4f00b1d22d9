//! Temporal expression recognition and anchoring.
//!
//! Relative expressions ("next Monday", "in 3 days", "then") are resolved
//! against a reference clock and rewritten in ISO form, so that extracting
//! the time from rewritten text yields the same instant:
//!
//! | granularity | rendered as              | instant              |
//! |-------------|--------------------------|----------------------|
//! | day         | `2024-05-20`             | 2024-05-20T00:00:00Z |
//! | week        | `the week of 2024-05-20` | Monday of that week  |
//! | month       | `2024-06`                | first of the month   |
//! | year        | `2025`                   | January 1st          |

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::error::{SimpleMemError, SimpleMemResult};

/// Precision of a resolved anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Day,
    Week,
    Month,
    Year,
}

/// An absolute point in time recovered from text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeAnchor {
    pub instant: DateTime<Utc>,
    pub granularity: Granularity,
}

impl TimeAnchor {
    fn at(date: NaiveDate, granularity: Granularity) -> Self {
        Self {
            instant: Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN)),
            granularity,
        }
    }

    fn date(&self) -> NaiveDate {
        self.instant.date_naive()
    }

    /// ISO rendering that re-extracts to `instant`.
    pub fn render(&self) -> String {
        let date = self.date();
        match self.granularity {
            Granularity::Day => date.format("%Y-%m-%d").to_string(),
            Granularity::Week => format!("the week of {}", date.format("%Y-%m-%d")),
            Granularity::Month => date.format("%Y-%m").to_string(),
            Granularity::Year => date.format("%Y").to_string(),
        }
    }

    fn default_preposition(&self) -> &'static str {
        match self.granularity {
            Granularity::Day => "on",
            _ => "in",
        }
    }
}

/// Text with every temporal expression rewritten, plus the anchors found.
#[derive(Debug, Clone, PartialEq)]
pub struct TemporalResolution {
    pub content: String,
    /// Anchors in textual order.
    pub anchors: Vec<TimeAnchor>,
}

impl TemporalResolution {
    /// The instant the text pertains to: its first anchor.
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.anchors.first().map(|a| a.instant)
    }

    /// The anchor a following `then` would refer to.
    pub fn last_anchor(&self) -> Option<TimeAnchor> {
        self.anchors.last().copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rule {
    Fixed,
    Weekday,
    RelativeUnit,
    InCount,
    AgoCount,
    Then,
    IsoDate,
    UsDate,
    Written,
    IsoMonth,
    Year,
}

impl Rule {
    fn is_relative(self) -> bool {
        matches!(
            self,
            Rule::Fixed
                | Rule::Weekday
                | Rule::RelativeUnit
                | Rule::InCount
                | Rule::AgoCount
                | Rule::Then
        )
    }
}

struct Pattern {
    regex: Regex,
    rule: Rule,
}

// Group 1 is always the optional leading preposition.
const PREP: &str = r"(?:\b(on|by|until|till|before|after|since|from|in|during)\s+)?";
const WEEKDAY: &str = "monday|tuesday|wednesday|thursday|friday|saturday|sunday";
const COUNT: &str = r"\d+|a|an|one|two|three|four|five|six|seven|eight|nine|ten|eleven|twelve";
const MONTH: &str = "january|february|march|april|may|june|july|august|september|october|\
                     november|december|jan|feb|mar|apr|jun|jul|aug|sept|sep|oct|nov|dec";

fn pattern(rule: Rule, body: &str) -> Pattern {
    Pattern {
        regex: Regex::new(&format!("(?i){}{}", PREP, body)).unwrap(),
        rule,
    }
}

// Ordered by priority: earlier patterns win overlapping spans.
static PATTERNS: Lazy<Vec<Pattern>> = Lazy::new(|| {
    vec![
        pattern(
            Rule::Fixed,
            r"\b(the day after tomorrow|the day before yesterday|today|tonight|this morning|this afternoon|this evening|tomorrow|yesterday)\b",
        ),
        pattern(
            Rule::Weekday,
            &format!(r"\b(?:(next|last|this|coming|past)\s+)?({})\b", WEEKDAY),
        ),
        pattern(
            Rule::RelativeUnit,
            r"\b(next|last|this|coming|past)\s+(week|month|year)\b",
        ),
        pattern(
            Rule::InCount,
            &format!(r"\bin\s+({})\s+(day|week|month|year)s?\b", COUNT),
        ),
        pattern(
            Rule::AgoCount,
            &format!(r"\b({})\s+(day|week|month|year)s?\s+ago\b", COUNT),
        ),
        pattern(Rule::IsoDate, r"\b(\d{4})-(\d{2})-(\d{2})\b"),
        pattern(Rule::UsDate, r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b"),
        pattern(
            Rule::Written,
            &format!(
                r"\b({})\.?\s+(\d{{1,2}})(?:st|nd|rd|th)?\b(?:,?\s+(\d{{4}})\b)?",
                MONTH
            ),
        ),
        pattern(Rule::IsoMonth, r"\b(\d{4})-(\d{2})\b"),
        Pattern {
            regex: Regex::new(
                r"(?i)\b(in|since|from|during|by|until|till|before|after)\s+(\d{4})\b",
            )
            .unwrap(),
            rule: Rule::Year,
        },
        pattern(Rule::Then, r"\bthen\b"),
    ]
});

// Words before `then` that make it a sequence marker rather than a time.
const SEQUENCE_WORDS: &[&str] = &["and", "but", "just", "back", "even", "now", "right", "only"];

struct Found {
    start: usize,
    end: usize,
    preposition: Option<String>,
    rule: Rule,
    /// `None` for `then`, which depends on the preceding anchor, and for
    /// relative expressions whose date falls outside the calendar.
    anchor: Option<TimeAnchor>,
}

impl Found {
    fn render(&self, anchor: &TimeAnchor) -> String {
        match (&self.preposition, self.rule.is_relative()) {
            (Some(prep), _) => format!("{} {}", prep, anchor.render()),
            (None, true) => format!("{} {}", anchor.default_preposition(), anchor.render()),
            (None, false) => anchor.render(),
        }
    }
}

/// Find temporal expressions in textual order. Without a reference date only
/// absolute expressions are recognized.
fn scan(text: &str, reference: Option<NaiveDate>) -> Vec<Found> {
    let mut found: Vec<Found> = Vec::new();

    for pattern in PATTERNS.iter() {
        if reference.is_none() && pattern.rule.is_relative() {
            continue;
        }
        for caps in pattern.regex.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            let (start, end) = (whole.start(), whole.end());
            if found.iter().any(|f| start < f.end && f.start < end) {
                continue;
            }
            if matches!(pattern.rule, Rule::IsoMonth | Rule::Year) && text[end..].starts_with('-') {
                continue;
            }
            let preposition = caps.get(1).map(|m| m.as_str().to_string());
            if pattern.rule == Rule::Then && preposition.is_none() && !is_anaphoric_then(text, start)
            {
                continue;
            }

            let anchor = match pattern.rule {
                Rule::Then => None,
                rule => match evaluate(rule, &caps, reference) {
                    Some(anchor) => Some(anchor),
                    None if rule.is_relative() => None,
                    None => continue,
                },
            };
            found.push(Found {
                start,
                end,
                preposition,
                rule: pattern.rule,
                anchor,
            });
        }
    }

    found.sort_by_key(|f| f.start);
    found
}

fn is_anaphoric_then(text: &str, start: usize) -> bool {
    let before = text[..start].trim_end();
    if before.is_empty() || before.ends_with(',') {
        return false;
    }
    let last_word = before
        .rsplit(|c: char| !c.is_alphanumeric())
        .next()
        .unwrap_or("")
        .to_lowercase();
    !SEQUENCE_WORDS.contains(&last_word.as_str())
}

fn evaluate(rule: Rule, caps: &Captures<'_>, reference: Option<NaiveDate>) -> Option<TimeAnchor> {
    let group = |i: usize| caps.get(i).map(|m| m.as_str().to_lowercase());
    let number = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<i64>().ok());

    match rule {
        Rule::Fixed => {
            let today = reference?;
            let offset = match group(2)?.as_str() {
                "the day after tomorrow" => 2,
                "the day before yesterday" => -2,
                "tomorrow" => 1,
                "yesterday" => -1,
                _ => 0,
            };
            Some(TimeAnchor::at(shift_days(today, offset)?, Granularity::Day))
        }
        Rule::Weekday => {
            let today = reference?;
            let target = parse_weekday(&group(3)?)?.num_days_from_monday() as i64;
            let current = today.weekday().num_days_from_monday() as i64;
            let offset = match group(2).as_deref() {
                Some("last") | Some("past") => {
                    let back = (current - target).rem_euclid(7);
                    -(if back == 0 { 7 } else { back })
                }
                Some("this") => (target - current).rem_euclid(7),
                _ => {
                    let ahead = (target - current).rem_euclid(7);
                    if ahead == 0 {
                        7
                    } else {
                        ahead
                    }
                }
            };
            Some(TimeAnchor::at(shift_days(today, offset)?, Granularity::Day))
        }
        Rule::RelativeUnit => {
            let today = reference?;
            let delta: i32 = match group(2)?.as_str() {
                "next" | "coming" => 1,
                "last" | "past" => -1,
                _ => 0,
            };
            match group(3)?.as_str() {
                "week" => {
                    let monday =
                        shift_days(today, -(today.weekday().num_days_from_monday() as i64))?;
                    Some(TimeAnchor::at(
                        shift_days(monday, 7 * delta as i64)?,
                        Granularity::Week,
                    ))
                }
                "month" => {
                    let first = NaiveDate::from_ymd_opt(today.year(), today.month(), 1)?;
                    Some(TimeAnchor::at(shift_months(first, delta)?, Granularity::Month))
                }
                _ => Some(TimeAnchor::at(
                    NaiveDate::from_ymd_opt(today.year().checked_add(delta)?, 1, 1)?,
                    Granularity::Year,
                )),
            }
        }
        Rule::InCount | Rule::AgoCount => {
            let today = reference?;
            let count = parse_count(&group(2)?)?;
            let signed = if rule == Rule::AgoCount { count.checked_neg()? } else { count };
            let date = match group(3)?.as_str() {
                "day" => shift_days(today, signed)?,
                "week" => shift_days(today, signed.checked_mul(7)?)?,
                "month" => shift_months(today, i32::try_from(signed).ok()?)?,
                _ => shift_months(today, i32::try_from(signed.checked_mul(12)?).ok()?)?,
            };
            Some(TimeAnchor::at(date, Granularity::Day))
        }
        Rule::IsoDate => {
            let date = NaiveDate::from_ymd_opt(number(2)? as i32, number(3)? as u32, number(4)? as u32)?;
            Some(TimeAnchor::at(date, Granularity::Day))
        }
        Rule::UsDate => {
            let date = NaiveDate::from_ymd_opt(number(4)? as i32, number(2)? as u32, number(3)? as u32)?;
            Some(TimeAnchor::at(date, Granularity::Day))
        }
        Rule::Written => {
            let month = parse_month(&group(2)?)?;
            let year = match number(4) {
                Some(year) => year as i32,
                None => reference?.year(),
            };
            let date = NaiveDate::from_ymd_opt(year, month, number(3)? as u32)?;
            Some(TimeAnchor::at(date, Granularity::Day))
        }
        Rule::IsoMonth => {
            let date = NaiveDate::from_ymd_opt(number(2)? as i32, number(3)? as u32, 1)?;
            Some(TimeAnchor::at(date, Granularity::Month))
        }
        Rule::Year => {
            let date = NaiveDate::from_ymd_opt(number(2)? as i32, 1, 1)?;
            Some(TimeAnchor::at(date, Granularity::Year))
        }
        Rule::Then => None,
    }
}

fn shift_days(date: NaiveDate, days: i64) -> Option<NaiveDate> {
    let magnitude = Days::new(days.unsigned_abs());
    if days >= 0 {
        date.checked_add_days(magnitude)
    } else {
        date.checked_sub_days(magnitude)
    }
}

fn shift_months(date: NaiveDate, months: i32) -> Option<NaiveDate> {
    if months >= 0 {
        date.checked_add_months(Months::new(months as u32))
    } else {
        date.checked_sub_months(Months::new(months.unsigned_abs()))
    }
}

fn parse_count(word: &str) -> Option<i64> {
    let n = match word {
        "a" | "an" | "one" => 1,
        "two" => 2,
        "three" => 3,
        "four" => 4,
        "five" => 5,
        "six" => 6,
        "seven" => 7,
        "eight" => 8,
        "nine" => 9,
        "ten" => 10,
        "eleven" => 11,
        "twelve" => 12,
        digits => digits.parse().ok()?,
    };
    Some(n)
}

fn parse_weekday(word: &str) -> Option<Weekday> {
    word.parse::<Weekday>().ok()
}

fn parse_month(word: &str) -> Option<u32> {
    let month = match &word[..word.len().min(3)] {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

/// Rewrite every temporal expression in `text` as an absolute ISO form.
///
/// `reference` is the clock relative expressions are measured from;
/// `previous` is the anchor an anaphoric `then` falls back to when the text
/// itself has none before it.
pub fn resolve_temporal(
    text: &str,
    reference: DateTime<Utc>,
    previous: Option<TimeAnchor>,
) -> SimpleMemResult<TemporalResolution> {
    let found = scan(text, Some(reference.date_naive()));
    let mut content = String::with_capacity(text.len() + 16);
    let mut anchors = Vec::with_capacity(found.len());
    let mut last = previous;
    let mut cursor = 0;

    for f in &found {
        let expression = &text[f.start..f.end];
        let anchor = match (f.anchor, f.rule) {
            (Some(anchor), _) => anchor,
            (None, Rule::Then) => last.ok_or_else(|| SimpleMemError::unresolved_time(expression))?,
            (None, _) => return Err(SimpleMemError::unresolved_time(expression)),
        };
        content.push_str(&text[cursor..f.start]);
        content.push_str(&f.render(&anchor));
        cursor = f.end;
        anchors.push(anchor);
        last = Some(anchor);
    }
    content.push_str(&text[cursor..]);

    Ok(TemporalResolution { content, anchors })
}

/// Extract the first absolute time mentioned in `text`.
pub fn extract_timestamp(text: &str) -> Option<DateTime<Utc>> {
    scan(text, None)
        .into_iter()
        .find_map(|f| f.anchor)
        .map(|a| a.instant)
}

/// Whether `text` still contains a relative time expression.
pub fn contains_relative_expression(text: &str) -> bool {
    scan(text, Some(NaiveDate::default()))
        .iter()
        .any(|f| f.rule.is_relative())
}

#[cfg(test)]
mod tests {
    use super::*;

    // A Monday.
    fn reference() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 13, 15, 30, 0).unwrap()
    }

    fn day(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn resolve(text: &str) -> TemporalResolution {
        resolve_temporal(text, reference(), None).unwrap()
    }

    #[test]
    fn test_next_weekday_is_strictly_after() {
        let r = resolve("Alice will meet Bob for coffee next Monday");
        assert_eq!(r.content, "Alice will meet Bob for coffee on 2024-05-20");
        assert_eq!(r.timestamp(), Some(day(2024, 5, 20)));
    }

    #[test]
    fn test_weekday_modifiers() {
        assert_eq!(resolve("this Monday").timestamp(), Some(day(2024, 5, 13)));
        assert_eq!(resolve("last Monday").timestamp(), Some(day(2024, 5, 6)));
        assert_eq!(resolve("on Wednesday").timestamp(), Some(day(2024, 5, 15)));
        assert_eq!(resolve("last Friday").timestamp(), Some(day(2024, 5, 10)));
        assert_eq!(resolve("on Wednesday").content, "on 2024-05-15");
    }

    #[test]
    fn test_fixed_offsets() {
        assert_eq!(resolve("tomorrow").timestamp(), Some(day(2024, 5, 14)));
        assert_eq!(resolve("yesterday").timestamp(), Some(day(2024, 5, 12)));
        assert_eq!(
            resolve("the day after tomorrow").timestamp(),
            Some(day(2024, 5, 15))
        );
        assert_eq!(resolve("by tonight").content, "by 2024-05-13");
    }

    #[test]
    fn test_counts_and_units() {
        assert_eq!(resolve("in 3 days").timestamp(), Some(day(2024, 5, 16)));
        assert_eq!(resolve("two weeks ago").timestamp(), Some(day(2024, 4, 29)));
        assert_eq!(resolve("in a month").timestamp(), Some(day(2024, 6, 13)));
        let r = resolve("next month");
        assert_eq!(r.content, "in 2024-06");
        assert_eq!(r.timestamp(), Some(day(2024, 6, 1)));
        let r = resolve("next week");
        assert_eq!(r.content, "in the week of 2024-05-20");
        assert_eq!(resolve("last year").content, "in 2023");
    }

    #[test]
    fn test_absolute_dates() {
        assert_eq!(resolve("on May 20, 2024").content, "on 2024-05-20");
        assert_eq!(resolve("June 3").timestamp(), Some(day(2024, 6, 3)));
        assert_eq!(resolve("due 12/25/2024").timestamp(), Some(day(2024, 12, 25)));
        assert_eq!(resolve("since 2019").timestamp(), Some(day(2019, 1, 1)));
    }

    #[test]
    fn test_then_uses_previous_anchor() {
        let previous = resolve("next Monday").last_anchor();
        let r = resolve_temporal("see you then", reference(), previous).unwrap();
        assert_eq!(r.content, "see you on 2024-05-20");

        let err = resolve_temporal("see you then", reference(), None).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::ResUnresolvedTime);
    }

    #[test]
    fn test_sequence_then_is_left_alone() {
        let r = resolve("we ate and then we left");
        assert_eq!(r.content, "we ate and then we left");
        assert!(r.anchors.is_empty());
    }

    #[test]
    fn test_rewritten_text_reextracts_to_same_instant() {
        for text in [
            "next Monday",
            "in 3 days",
            "next week",
            "last month",
            "next year",
            "the day before yesterday",
            "May 2",
        ] {
            let r = resolve(text);
            assert_eq!(extract_timestamp(&r.content), r.timestamp(), "{}", text);
            assert!(!contains_relative_expression(&r.content), "{}", text);
        }
    }

    #[test]
    fn test_out_of_range_offsets_are_unresolved() {
        for text in [
            "in 100000000 days",
            "in 4294967297 months",
            "9223372036854775807 weeks ago",
            "in 99999999999 years",
        ] {
            let err = resolve_temporal(text, reference(), None).unwrap_err();
            assert_eq!(err.code(), crate::error::ErrorCode::ResUnresolvedTime, "{}", text);
            assert!(contains_relative_expression(text), "{}", text);
        }
        assert_eq!(resolve("in 1200 months").timestamp(), Some(day(2124, 5, 13)));
    }

    #[test]
    fn test_no_expression() {
        let r = resolve("Alice likes coffee");
        assert_eq!(r.content, "Alice likes coffee");
        assert!(r.timestamp().is_none());
        assert!(extract_timestamp("Alice likes coffee").is_none());
    }
}
