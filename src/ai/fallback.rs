//! Deterministic regex fallback parser + keyword category matcher
//! (spec.md §4.3).
//!
//! Used whenever the remote AI call fails — timeout, non-2xx, malformed
//! JSON. Each candidate line is tried against Pattern A, then Pattern B;
//! Pattern C (the permissive last resort) only runs over lines that neither
//! A nor B matched anywhere in the input, to avoid duplicate candidates.

use std::sync::OnceLock;

use regex::Regex;

use crate::domain::ParsedExpense;

fn pattern_a() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?P<desc>[^\n$]+?)\s*\$\s*(?P<amount>\d+(?:\.\d{1,2})?)").unwrap())
}

fn pattern_b() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?P<desc>[^\n]+?)\s+(?P<amount>\d+(?:\.\d{1,2})?)\s*元").unwrap())
}

fn pattern_c() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?P<desc>\S[^\n\d]*?)\s+(?P<amount>\d+(?:\.\d{1,2})?)\b").unwrap())
}

fn capture_to_expense(caps: &regex::Captures) -> Option<ParsedExpense> {
    let desc = caps.name("desc")?.as_str().trim();
    if desc.is_empty() {
        return None;
    }
    let amount_str = caps.name("amount")?.as_str();
    let amount: f64 = amount_str.parse().ok()?;
    Some(ParsedExpense {
        description: desc.to_string(),
        amount: crate::domain::Money::from_major(amount),
        suggested_category: "Other".to_string(),
        date: None,
    })
}

/// Every non-overlapping match of `re` on `line`, in order — a single line
/// may carry several `<desc><amount>` pairs back to back with no
/// separator (e.g. "早餐$20午餐$30"). Amount parse failures drop that one
/// candidate silently rather than aborting the rest of the line.
fn extract_all(re: &Regex, line: &str) -> Vec<ParsedExpense> {
    re.captures_iter(line)
        .filter_map(|caps| capture_to_expense(&caps))
        .collect()
}

/// Runs Patterns A and B over every line, falling back to Pattern C only if
/// neither produced anything anywhere in the input.
pub fn parse_expenses(text: &str) -> Vec<ParsedExpense> {
    let mut found = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut from_a = extract_all(pattern_a(), line);
        if !from_a.is_empty() {
            found.append(&mut from_a);
        } else {
            found.append(&mut extract_all(pattern_b(), line));
        }
    }

    if !found.is_empty() {
        return found;
    }

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        found.append(&mut extract_all(pattern_c(), line));
    }
    found
}

const TAXONOMY: &[(&str, &[&str])] = &[
    ("Food", &["coffee", "lunch", "dinner", "breakfast", "restaurant", "grocery", "groceries", "snack", "food"]),
    ("Transport", &["taxi", "uber", "lyft", "bus", "train", "subway", "gas", "fuel", "parking", "flight"]),
    ("Shopping", &["clothes", "clothing", "amazon", "shoes", "mall", "store", "shopping"]),
    ("Entertainment", &["movie", "cinema", "concert", "game", "netflix", "spotify", "theater"]),
];

fn keyword_matcher() -> &'static (aho_corasick::AhoCorasick, Vec<&'static str>) {
    static MATCHER: OnceLock<(aho_corasick::AhoCorasick, Vec<&'static str>)> = OnceLock::new();
    MATCHER.get_or_init(|| {
        let mut patterns = Vec::new();
        let mut categories = Vec::new();
        for (category, keywords) in TAXONOMY {
            for keyword in *keywords {
                patterns.push(*keyword);
                categories.push(*category);
            }
        }
        let automaton = aho_corasick::AhoCorasickBuilder::new()
            .ascii_case_insensitive(true)
            .build(&patterns)
            .expect("valid keyword automaton");
        (automaton, categories)
    })
}

/// Deterministic keyword match against the built-in taxonomy. The
/// earliest-starting match in `description` wins; ties break by the
/// pattern's declaration order (which doubles as priority). Falls back to
/// `"Other"`.
pub fn suggest_category(description: &str) -> String {
    let (automaton, categories) = keyword_matcher();
    automaton
        .find_iter(description)
        .min_by_key(|m| (m.start(), m.pattern().as_usize()))
        .map(|m| categories[m.pattern().as_usize()].to_string())
        .unwrap_or_else(|| "Other".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_a_extracts_dollar_amount() {
        let parsed = parse_expenses("breakfast $20");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].description, "breakfast");
        assert_eq!(parsed[0].amount.cents(), 2000);
        assert_eq!(parsed[0].suggested_category, "Other");
    }

    #[test]
    fn pattern_b_extracts_yuan_amount() {
        let parsed = parse_expenses("lunch 45元");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].description, "lunch");
        assert_eq!(parsed[0].amount.cents(), 4500);
    }

    #[test]
    fn pattern_c_only_used_when_a_and_b_yield_nothing() {
        let parsed = parse_expenses("taxi 15");
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].description, "taxi");
        assert_eq!(parsed[0].amount.cents(), 1500);
    }

    #[test]
    fn multiple_lines_each_produce_a_candidate() {
        let parsed = parse_expenses("coffee $5\ntaxi $12");
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn multiple_dollar_items_on_one_line_both_parse() {
        let parsed = parse_expenses("早餐$20午餐$30");
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].description, "早餐");
        assert_eq!(parsed[0].amount.cents(), 2000);
        assert_eq!(parsed[1].description, "午餐");
        assert_eq!(parsed[1].amount.cents(), 3000);
    }

    #[test]
    fn malformed_amount_is_dropped_silently() {
        let parsed = parse_expenses("just chatting, no numbers here");
        assert!(parsed.is_empty());
    }

    #[test]
    fn keyword_match_prefers_first_hit() {
        assert_eq!(suggest_category("morning coffee run"), "Food");
        assert_eq!(suggest_category("uber to the airport"), "Transport");
    }

    #[test]
    fn unknown_description_falls_back_to_other() {
        assert_eq!(suggest_category("miscellaneous thing"), "Other");
    }
}
