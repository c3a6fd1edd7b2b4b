//! Natural-language query translation
//!
//! Turns free text ("show me recent activities", "docs about rust tagged
//! #research, top 5") into the structured [`Query`] the store executes.
//! Translation is two stages:
//!
//! 1. **intent** — each intent carries a table of weighted phrases; the
//!    summed weight of the phrases found in the text is its score, and the
//!    best score above the confidence floor wins (below it, plain Search)
//! 2. **criteria extractors** — independent passes for time ranges, type
//!    keywords, tags, relevance threshold, result limit and sort order.
//!    Words an extractor recognizes are consumed; whatever survives, minus
//!    stop words, becomes semantic constraint terms (surface form plus
//!    stem, since store matching is prefix-aware)
//!
//! Translation never fails. Text nothing matches falls through to a
//! recency query carrying the original string in `context.source_text`.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use serde_json::Value;
use std::collections::HashSet;

use crate::constants::{
    DEFAULT_QUERY_LIMIT, DEFAULT_RECENT_DAYS, INTENT_CONFIDENCE_FLOOR, MAX_TRANSLATED_LIMIT,
};
use crate::graph::query::{
    Constraint, Filter, FilterOp, Query, QueryContext, QueryTarget, SortSpec,
};
use crate::graph::types::NodeType;

/// What the user is broadly asking for; shapes defaults, never restricts
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryIntent {
    /// Find things matching criteria (the fallback)
    Search,
    /// Catch up on the latest activity
    Recent,
    /// Things connected to something
    Related,
    /// A relevance-ranked digest over a period
    Summarize,
}

// Weighted intent phrases. Weights sum per intent; a single strong phrase
// clears the confidence floor on its own. Single words only where a longer
// phrase would double-count ("show" vs "show me").
const SEARCH_PHRASES: &[(&str, f32)] = &[
    ("find", 0.4),
    ("search", 0.5),
    ("look for", 0.5),
    ("look up", 0.5),
    ("show", 0.3),
    ("give", 0.2),
    ("list", 0.3),
    ("get", 0.15),
    ("about", 0.15),
];

const RECENT_PHRASES: &[(&str, f32)] = &[
    ("recent", 0.5),
    ("recently", 0.5),
    ("lately", 0.5),
    ("latest", 0.4),
    ("what did i do", 0.6),
    ("what have i been", 0.6),
    ("catch me up", 0.6),
    ("today", 0.3),
    ("yesterday", 0.3),
    ("this week", 0.3),
];

const RELATED_PHRASES: &[(&str, f32)] = &[
    ("related to", 0.6),
    ("connected to", 0.6),
    ("linked to", 0.5),
    ("associated with", 0.5),
    ("around", 0.2),
];

const SUMMARIZE_PHRASES: &[(&str, f32)] = &[
    ("summarize", 0.6),
    ("summary", 0.6),
    ("recap", 0.6),
    ("overview", 0.5),
    ("digest", 0.4),
    ("what happened", 0.5),
];

// Category nouns that pin a node type filter
const TYPE_KEYWORDS: &[(&str, NodeType)] = &[
    ("project", NodeType::Project),
    ("projects", NodeType::Project),
    ("person", NodeType::Person),
    ("people", NodeType::Person),
    ("contact", NodeType::Person),
    ("contacts", NodeType::Person),
    ("resource", NodeType::Resource),
    ("resources", NodeType::Resource),
    ("document", NodeType::Resource),
    ("documents", NodeType::Resource),
    ("doc", NodeType::Resource),
    ("docs", NodeType::Resource),
    ("file", NodeType::Resource),
    ("files", NodeType::Resource),
    ("page", NodeType::Resource),
    ("pages", NodeType::Resource),
    ("article", NodeType::Resource),
    ("articles", NodeType::Resource),
    ("concept", NodeType::Concept),
    ("concepts", NodeType::Concept),
    ("topic", NodeType::Concept),
    ("topics", NodeType::Concept),
    ("idea", NodeType::Concept),
    ("ideas", NodeType::Concept),
    ("pattern", NodeType::Pattern),
    ("patterns", NodeType::Pattern),
    ("habit", NodeType::Pattern),
    ("habits", NodeType::Pattern),
];

// Category nouns that mean "everything" — consumed without pinning a type,
// so "show me recent activities" stays unfiltered
const GENERIC_CATEGORY_WORDS: &[&str] = &[
    "activity",
    "activities",
    "event",
    "events",
    "memories",
    "memory",
    "items",
    "entries",
    "everything",
    "anything",
    "stuff",
    "things",
];

// Nouns that retarget the query at edges instead of nodes
const EDGE_TARGET_WORDS: &[&str] = &["connections", "relationships", "links", "edges"];

// Sort phrases, longest first so "oldest first" wins over "oldest"
const SORT_KEYWORDS: &[(&str, &str, bool)] = &[
    ("most recent first", "timestamp", true),
    ("newest first", "timestamp", true),
    ("oldest first", "timestamp", false),
    ("chronological", "timestamp", false),
    ("chronologically", "timestamp", false),
    ("most relevant", "relevance", true),
    ("by relevance", "relevance", true),
    ("most accessed", "access_count", true),
    ("most used", "access_count", true),
    ("strongest", "strength", true),
    ("alphabetical", "content", false),
    ("alphabetically", "content", false),
];

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "this", "that", "these", "those", "at", "in", "on", "to", "for", "of",
    "from", "by", "with", "into", "through", "during", "before", "after", "between", "under",
    "over", "and", "or", "but", "nor", "so", "yet", "both", "either", "neither", "i", "you",
    "he", "she", "it", "we", "they", "me", "him", "her", "us", "them", "my", "your", "his",
    "its", "our", "their", "mine", "yours", "theirs", "who", "whom", "whose", "which", "what",
    "how", "when", "where", "why", "just", "only", "even", "also", "too", "very", "really",
    "quite", "rather", "as", "if", "then", "than", "because", "although", "though", "unless",
    "until", "while", "whether", "since", "some", "any", "all", "each", "every", "many",
    "much", "more", "most", "few", "less", "other", "another", "such", "same", "different",
    "own", "several", "was", "were", "is", "are", "be", "been", "have", "has", "had", "do",
    "did", "does", "not", "no",
];

lazy_static! {
    static ref RE_PAST_N: Regex =
        Regex::new(r"\b(?:past|last|previous)\s+(\d+)\s+(minute|hour|day|week|month)s?\b").unwrap();
    static ref RE_AGO: Regex =
        Regex::new(r"\b(\d+)\s+(minute|hour|day|week|month)s?\s+ago\b").unwrap();
    static ref RE_ISO_DATE: Regex = Regex::new(r"\b(\d{4}-\d{2}-\d{2})\b").unwrap();
    static ref RE_TEXT_DATE: Regex = Regex::new(
        r"\b((?:january|february|march|april|may|june|july|august|september|october|november|december)\s+\d{1,2}(?:\s+\d{4})?)\b"
    )
    .unwrap();
    static ref RE_HASHTAG: Regex = Regex::new(r"#([A-Za-z0-9][A-Za-z0-9_-]*)").unwrap();
    static ref RE_TAGGED: Regex =
        Regex::new(r"\btagged(?:\s+with)?\s+([a-z0-9][a-z0-9_-]*)").unwrap();
    static ref RE_THRESHOLD: Regex = Regex::new(
        r"\b(?:relevance|score)\s+(?:above|over|of at least|at least|of)\s+(\d*\.?\d+)\b"
    )
    .unwrap();
    static ref RE_LIMIT: Regex =
        Regex::new(r"\b(?:top|first|limit)\s+(\d+)\b|\b(\d+)\s+(?:results|items|entries)\b")
            .unwrap();
}

pub struct TranslationEngine {
    stemmer: Stemmer,
}

impl TranslationEngine {
    pub fn new() -> Self {
        Self {
            stemmer: Stemmer::create(Algorithm::English),
        }
    }

    /// Translate free text into a structured query. Never errors: text that
    /// matches nothing becomes a default recency query.
    pub fn translate(&self, text: &str, context: QueryContext) -> Query {
        let now = Utc::now();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            let mut query = Query::recent_default();
            query.context = context;
            return query;
        }

        let normalized = normalize(trimmed);
        let padded = format!(" {normalized} ");
        // Words recognized by the intent table or an extractor; whatever
        // survives becomes keyword terms
        let mut consumed: HashSet<String> = HashSet::new();

        let (intent, confidence) = detect_intent_into(&padded, &mut consumed);
        tracing::debug!(?intent, confidence, text = trimmed, "translated query intent");

        let time_range = extract_time_range(&padded, now, &mut consumed);
        let node_types = extract_node_types(&padded, &mut consumed);
        let target = extract_target(&padded, &mut consumed);
        let tags = extract_tags(trimmed, &normalized, &mut consumed);
        let threshold = extract_threshold(&normalized, &mut consumed);
        let limit = extract_limit(&normalized, &mut consumed);
        let sort = extract_sort(&padded, &mut consumed);
        let terms = self.keyword_terms(&normalized, &consumed);

        let mut query = Query {
            target,
            ..Default::default()
        };

        match node_types.len() {
            0 => {}
            1 => query.filters.push(Filter::new(
                "type",
                FilterOp::Eq,
                Value::String(node_types[0].as_str().to_string()),
            )),
            _ => query.filters.push(Filter::new(
                "type",
                FilterOp::In,
                Value::Array(
                    node_types
                        .iter()
                        .map(|t| Value::String(t.as_str().to_string()))
                        .collect(),
                ),
            )),
        }
        for tag in tags {
            query.filters.push(Filter::new(
                "tags",
                FilterOp::Contains,
                Value::String(tag),
            ));
        }

        // Recent and Summarize always get a window; Summarize ranks by score
        let time_range = time_range.or_else(|| {
            matches!(intent, QueryIntent::Recent | QueryIntent::Summarize)
                .then(|| (now - Duration::days(DEFAULT_RECENT_DAYS), now))
        });
        if let Some((start, end)) = time_range {
            query.constraints.push(Constraint::Temporal {
                start: Some(start),
                end: Some(end),
            });
        }
        if !terms.is_empty() {
            query.constraints.push(Constraint::Semantic { terms });
        }

        query.sort = match sort {
            Some(spec) => vec![spec],
            None if intent == QueryIntent::Summarize => vec![SortSpec::desc("relevance")],
            None => vec![SortSpec::desc("timestamp")],
        };
        query.limit = limit.unwrap_or(DEFAULT_QUERY_LIMIT);

        query.context = context;
        query.context.source_text = Some(trimmed.to_string());
        if threshold.is_some() {
            // A threshold typed in the text wins over the ambient one
            query.context.relevance_threshold = threshold;
        }

        query
    }

    /// Best intent and its confidence, without building a query
    pub fn detect_intent(&self, text: &str) -> (QueryIntent, f32) {
        let padded = format!(" {} ", normalize(text));
        detect_intent_into(&padded, &mut HashSet::new())
    }

    /// Ranked autocomplete hints for a partial query. Nothing is executed.
    pub fn suggest(&self, partial: &str, limit: usize) -> Vec<String> {
        const CANNED: &[&str] = &[
            "show me recent activities",
            "what did i do today",
            "what did i do this week",
            "find documents about",
            "find notes tagged",
            "summarize this week",
            "summarize last month",
            "projects from last month",
            "people related to",
            "most relevant concepts",
            "oldest first",
            "top 10 most accessed",
        ];

        let partial = normalize(partial);
        if partial.is_empty() {
            return CANNED.iter().take(limit).map(|s| s.to_string()).collect();
        }
        let last_word = partial.split_whitespace().last().unwrap_or(&partial);

        let mut scored: Vec<(i32, &str)> = CANNED
            .iter()
            .filter_map(|candidate| {
                let score = if candidate.starts_with(&partial) {
                    3
                } else if candidate
                    .split_whitespace()
                    .any(|w| w.starts_with(last_word))
                {
                    2
                } else if candidate.contains(&partial) {
                    1
                } else {
                    return None;
                };
                Some((score, *candidate))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(b.1)));
        scored
            .into_iter()
            .take(limit)
            .map(|(_, s)| s.to_string())
            .collect()
    }

    /// Leftover words as semantic terms: surface form plus stem when they
    /// differ, order preserved, no duplicates
    fn keyword_terms(&self, normalized: &str, consumed: &HashSet<String>) -> Vec<String> {
        let mut terms = Vec::new();
        let mut seen = HashSet::new();
        for token in normalized.split_whitespace() {
            let word: String = token
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_string();
            if word.len() < 2
                || word.parse::<f64>().is_ok()
                || consumed.contains(&word)
                || STOP_WORDS.contains(&word.as_str())
            {
                continue;
            }
            let stem = self.stemmer.stem(&word).to_string();
            if seen.insert(word.clone()) {
                terms.push(word.clone());
            }
            if stem != word && seen.insert(stem.clone()) {
                terms.push(stem);
            }
        }
        terms
    }
}

impl Default for TranslationEngine {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// NORMALIZATION & INTENT
// =============================================================================

/// Lowercase and collapse punctuation to spaces, keeping characters dates,
/// decimals and hashtags need
fn normalize(text: &str) -> String {
    let kept: String = text
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() || matches!(c, '#' | '-' | '.' | '/') {
                c
            } else {
                ' '
            }
        })
        .collect();
    kept.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Word-bounded phrase search; `padded` carries leading/trailing spaces
fn phrase_hit(padded: &str, phrase: &str) -> bool {
    padded.contains(&format!(" {phrase} "))
}

fn consume_phrase(consumed: &mut HashSet<String>, phrase: &str) {
    for word in phrase.split_whitespace() {
        consumed.insert(word.to_string());
    }
}

fn detect_intent_into(padded: &str, consumed: &mut HashSet<String>) -> (QueryIntent, f32) {
    let tables = [
        (QueryIntent::Search, SEARCH_PHRASES),
        (QueryIntent::Recent, RECENT_PHRASES),
        (QueryIntent::Related, RELATED_PHRASES),
        (QueryIntent::Summarize, SUMMARIZE_PHRASES),
    ];

    // Every matched phrase is consumed, winner or not: "show" and "related
    // to" are query machinery, never content keywords
    let mut best = (QueryIntent::Search, 0.0f32);
    for (intent, phrases) in tables {
        let mut score = 0.0f32;
        for (phrase, weight) in phrases {
            if phrase_hit(padded, phrase) {
                consume_phrase(consumed, phrase);
                score += weight;
            }
        }
        if score > best.1 {
            best = (intent, score.min(1.0));
        }
    }

    if best.1 >= INTENT_CONFIDENCE_FLOOR {
        best
    } else {
        (QueryIntent::Search, best.1)
    }
}

// =============================================================================
// CRITERIA EXTRACTORS
// =============================================================================

fn day_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}

fn week_start(now: DateTime<Utc>) -> DateTime<Utc> {
    day_start(now) - Duration::days(now.weekday().num_days_from_monday() as i64)
}

fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let first = now.date_naive().with_day(1).unwrap_or(now.date_naive());
    first.and_time(NaiveTime::MIN).and_utc()
}

fn extract_time_range(
    padded: &str,
    now: DateTime<Utc>,
    consumed: &mut HashSet<String>,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    // Named ranges, longest phrase first so "last week" beats "week"
    let this_month = month_start(now);
    let named: &[(&str, (DateTime<Utc>, DateTime<Utc>))] = &[
        ("last week", (week_start(now) - Duration::days(7), week_start(now))),
        ("this week", (week_start(now), now)),
        ("last month", (month_start(this_month - Duration::days(1)), this_month)),
        ("this month", (this_month, now)),
        ("yesterday", (day_start(now) - Duration::days(1), day_start(now))),
        ("today", (day_start(now), now)),
        ("recently", (now - Duration::days(DEFAULT_RECENT_DAYS), now)),
        ("recent", (now - Duration::days(DEFAULT_RECENT_DAYS), now)),
        ("lately", (now - Duration::days(DEFAULT_RECENT_DAYS), now)),
    ];
    for (phrase, range) in named {
        if phrase_hit(padded, phrase) {
            consume_phrase(consumed, phrase);
            return Some(*range);
        }
    }

    // "past 3 days", "last 2 weeks"
    if let Some(caps) = RE_PAST_N.captures(padded) {
        if let Ok(n) = caps[1].parse::<i64>() {
            let span = unit_duration(&caps[2], n);
            consume_phrase(consumed, &caps[0]);
            return Some((now - span, now));
        }
    }

    // "3 days ago" means that day, not the span since
    if let Some(caps) = RE_AGO.captures(padded) {
        if let Ok(n) = caps[1].parse::<i64>() {
            let then = now - unit_duration(&caps[2], n);
            consume_phrase(consumed, &caps[0]);
            return Some((day_start(then), day_start(then) + Duration::days(1)));
        }
    }

    // Explicit ISO date: that whole day
    if let Some(caps) = RE_ISO_DATE.captures(padded) {
        if let Ok(date) = NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d") {
            if (1900..=2100).contains(&date.year()) {
                consume_phrase(consumed, &caps[1]);
                let start = date.and_time(NaiveTime::MIN).and_utc();
                return Some((start, start + Duration::days(1)));
            }
        }
    }

    // Month-name dates ("march 10 2026"); dateparser handles the variants,
    // anchored to UTC so the result does not depend on the host timezone
    if let Some(caps) = RE_TEXT_DATE.captures(padded) {
        if let Ok(parsed) = dateparser::parse_with_timezone(&caps[1], &Utc) {
            if (1900..=2100).contains(&parsed.year()) {
                consume_phrase(consumed, &caps[1]);
                let start = day_start(parsed);
                return Some((start, start + Duration::days(1)));
            }
        }
    }

    None
}

fn unit_duration(unit: &str, n: i64) -> Duration {
    match unit {
        "minute" => Duration::minutes(n),
        "hour" => Duration::hours(n),
        "day" => Duration::days(n),
        "week" => Duration::weeks(n),
        _ => Duration::days(n * 30),
    }
}

/// Distinct node types named in the text, in first-mention order
fn extract_node_types(padded: &str, consumed: &mut HashSet<String>) -> Vec<NodeType> {
    let mut types = Vec::new();
    for (keyword, node_type) in TYPE_KEYWORDS {
        if phrase_hit(padded, keyword) {
            consumed.insert((*keyword).to_string());
            if !types.contains(node_type) {
                types.push(*node_type);
            }
        }
    }
    for word in GENERIC_CATEGORY_WORDS {
        if phrase_hit(padded, word) {
            consumed.insert((*word).to_string());
        }
    }
    types
}

fn extract_target(padded: &str, consumed: &mut HashSet<String>) -> QueryTarget {
    for word in EDGE_TARGET_WORDS {
        if phrase_hit(padded, word) {
            consumed.insert((*word).to_string());
            return QueryTarget::Edges;
        }
    }
    QueryTarget::Nodes
}

/// Tags from `#hashtag` mentions (raw text, case preserved in the source)
/// and "tagged [with] X" phrases
fn extract_tags(raw: &str, normalized: &str, consumed: &mut HashSet<String>) -> Vec<String> {
    let mut tags = Vec::new();
    for caps in RE_HASHTAG.captures_iter(raw) {
        let tag = caps[1].to_lowercase();
        consumed.insert(tag.clone());
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    for caps in RE_TAGGED.captures_iter(normalized) {
        let tag = caps[1].to_string();
        consumed.insert("tagged".to_string());
        consumed.insert(tag.clone());
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }
    tags
}

fn extract_threshold(normalized: &str, consumed: &mut HashSet<String>) -> Option<f32> {
    let caps = RE_THRESHOLD.captures(normalized)?;
    let value: f32 = caps[1].parse().ok()?;
    consume_phrase(consumed, &caps[0]);
    Some(value.clamp(0.0, 1.0))
}

fn extract_limit(normalized: &str, consumed: &mut HashSet<String>) -> Option<usize> {
    let caps = RE_LIMIT.captures(normalized)?;
    let digits = caps.get(1).or_else(|| caps.get(2))?;
    let value: usize = digits.as_str().parse().ok()?;
    consume_phrase(consumed, &caps[0]);
    Some(value.clamp(1, MAX_TRANSLATED_LIMIT))
}

fn extract_sort(padded: &str, consumed: &mut HashSet<String>) -> Option<SortSpec> {
    for (phrase, field, descending) in SORT_KEYWORDS {
        if phrase_hit(padded, phrase) {
            consume_phrase(consumed, phrase);
            return Some(if *descending {
                SortSpec::desc(*field)
            } else {
                SortSpec::asc(*field)
            });
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> TranslationEngine {
        TranslationEngine::new()
    }

    fn translate(text: &str) -> Query {
        engine().translate(text, QueryContext::default())
    }

    #[test]
    fn test_recent_activities_is_a_plain_recency_query() {
        let query = translate("show me recent activities");
        let now = Utc::now();

        let (start, end) = query.time_range().expect("temporal constraint");
        let start = start.expect("bounded start");
        let end = end.expect("bounded end");
        let span_days = (end - start).num_days();
        assert!((6..=7).contains(&span_days), "expected ~7 days, got {span_days}");
        assert!((now - end).num_seconds().abs() < 5);

        assert!(query.filters.is_empty(), "no type filter: {:?}", query.filters);
        assert!(query.semantic_terms().is_none(), "no leftover keywords");
        assert_eq!(query.sort, vec![SortSpec::desc("timestamp")]);
        assert_eq!(query.limit, DEFAULT_QUERY_LIMIT);
        assert_eq!(
            query.context.source_text.as_deref(),
            Some("show me recent activities")
        );
    }

    #[test]
    fn test_type_keyword_pins_filter() {
        let query = translate("find my projects");
        assert_eq!(query.pinned_node_type(), Some(NodeType::Project));
    }

    #[test]
    fn test_multiple_types_become_in_filter() {
        let query = translate("projects and people from last week");
        let filter = query
            .filters
            .iter()
            .find(|f| f.field == "type")
            .expect("type filter");
        assert_eq!(filter.op, FilterOp::In);
        let list = filter.value.as_array().unwrap();
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_keywords_are_stemmed_with_surface_form() {
        let query = translate("find notes about meetings");
        let terms = query.semantic_terms().expect("semantic terms");
        assert!(terms.contains(&"meetings".to_string()));
        assert!(terms.contains(&"meet".to_string()), "stem present: {terms:?}");
        // Intent and stop words never leak into terms
        assert!(!terms.contains(&"find".to_string()));
        assert!(!terms.contains(&"about".to_string()));
    }

    #[test]
    fn test_hashtag_and_tagged_phrases() {
        let query = translate("docs tagged with research #Planning");
        let tags: Vec<&str> = query
            .filters
            .iter()
            .filter(|f| f.field == "tags")
            .filter_map(|f| f.value.as_str())
            .collect();
        assert!(tags.contains(&"research"));
        assert!(tags.contains(&"planning"), "hashtags lowercase: {tags:?}");
    }

    #[test]
    fn test_threshold_and_limit() {
        let query = translate("top 5 concepts with relevance above 0.7");
        assert_eq!(query.limit, 5);
        assert_eq!(query.context.relevance_threshold, Some(0.7));
        assert_eq!(query.pinned_node_type(), Some(NodeType::Concept));
    }

    #[test]
    fn test_yesterday_window() {
        let query = translate("what did i do yesterday");
        let (start, end) = query.time_range().unwrap();
        let start = start.unwrap();
        let end = end.unwrap();
        assert_eq!((end - start).num_hours(), 24);
        assert!(end <= Utc::now());
    }

    #[test]
    fn test_past_n_days_window() {
        let query = translate("activities from the past 3 days");
        let (start, end) = query.time_range().unwrap();
        let span = end.unwrap() - start.unwrap();
        assert_eq!(span.num_days(), 3);
    }

    #[test]
    fn test_days_ago_is_a_single_day() {
        let query = translate("what happened 3 days ago");
        let (start, end) = query.time_range().unwrap();
        let span = end.unwrap() - start.unwrap();
        assert_eq!(span.num_hours(), 24);
    }

    #[test]
    fn test_iso_date_is_that_day() {
        let query = translate("notes from 2026-03-10");
        let (start, end) = query.time_range().unwrap();
        let start = start.unwrap();
        assert_eq!(start.date_naive().to_string(), "2026-03-10");
        assert_eq!((end.unwrap() - start).num_hours(), 24);
    }

    #[test]
    fn test_sort_keywords() {
        let query = translate("show documents oldest first");
        assert_eq!(query.sort, vec![SortSpec::asc("timestamp")]);

        let query = translate("most relevant ideas");
        assert_eq!(query.sort, vec![SortSpec::desc("relevance")]);
    }

    #[test]
    fn test_edge_target_words() {
        let query = translate("strongest connections");
        assert_eq!(query.target, QueryTarget::Edges);
        assert_eq!(query.sort, vec![SortSpec::desc("strength")]);
    }

    #[test]
    fn test_summarize_gets_window_and_relevance_sort() {
        let query = translate("summarize my activities");
        assert!(query.time_range().is_some(), "summaries always get a window");
        assert_eq!(query.sort, vec![SortSpec::desc("relevance")]);
    }

    #[test]
    fn test_unparseable_text_never_errors() {
        for text in ["", "   ", "zzzgw qqqq", "!!!???", "42"] {
            let query = translate(text);
            assert_eq!(query.limit, DEFAULT_QUERY_LIMIT);
            // Still a well-formed query aimed at nodes
            assert_eq!(query.target, QueryTarget::Nodes);
        }
        // Gibberish keeps the original text for downstream context
        let query = translate("zzzgw qqqq");
        assert_eq!(query.context.source_text.as_deref(), Some("zzzgw qqqq"));
    }

    #[test]
    fn test_caller_context_preserved() {
        let context = QueryContext {
            session_id: Some("session-7".to_string()),
            relevance_threshold: Some(0.4),
            source_text: None,
        };
        let query = engine().translate("recent projects", context);
        assert_eq!(query.context.session_id.as_deref(), Some("session-7"));
        // No threshold in the text, so the ambient one survives
        assert_eq!(query.context.relevance_threshold, Some(0.4));
    }

    #[test]
    fn test_intent_detection() {
        let engine = engine();
        let (intent, confidence) = engine.detect_intent("what did i do lately");
        assert_eq!(intent, QueryIntent::Recent);
        assert!(confidence >= INTENT_CONFIDENCE_FLOOR);

        let (intent, _) = engine.detect_intent("summarize last week");
        assert_eq!(intent, QueryIntent::Summarize);

        let (intent, confidence) = engine.detect_intent("xyzzy");
        assert_eq!(intent, QueryIntent::Search, "floor falls back to search");
        assert!(confidence < INTENT_CONFIDENCE_FLOOR);
    }

    #[test]
    fn test_suggest_ranks_prefix_matches_first() {
        let engine = engine();
        let hints = engine.suggest("show", 5);
        assert!(!hints.is_empty());
        assert!(hints[0].starts_with("show"), "prefix first: {hints:?}");

        let hints = engine.suggest("summ", 5);
        assert!(hints.iter().all(|h| h.contains("summarize")));

        // Empty partial returns the canned top suggestions
        assert_eq!(engine.suggest("", 3).len(), 3);
    }

    #[test]
    fn test_related_intent() {
        let query = translate("concepts related to databases");
        let terms = query.semantic_terms().expect("keyword terms");
        assert!(terms.iter().any(|t| t.starts_with("databas")));
        assert_eq!(query.pinned_node_type(), Some(NodeType::Concept));
        // "related" and "to" are intent words, not keywords
        assert!(!terms.contains(&"related".to_string()));
    }

    #[test]
    fn test_semantic_constraint_carries_into_matching() {
        let query = translate("find meetings");
        let node = crate::graph::types::Node::new(
            NodeType::Activity,
            "weekly meeting with ana",
            Utc::now(),
            crate::graph::types::SourceType::Api,
        );
        assert!(query.matches_node(&node), "stem 'meet' should prefix-match 'meeting'");
    }
}
