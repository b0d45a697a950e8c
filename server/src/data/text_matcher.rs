//! C8 TextMatcher: build the phrase query sent to the search index for a
//! given match precision (§4.8).

use serde_json::{Value, json};

use crate::domain::model::MatchLevel;

const MATCH_FIELDS: &[&str] = &["traceback_text", "raw_traceback_text"];

/// Drop the final whitespace-delimited token (§4.8 SIMILAR).
fn drop_last_token(text: &str) -> &str {
    match text.trim_end().rfind(char::is_whitespace) {
        Some(idx) => &text[..idx],
        None => "",
    }
}

/// Build the search-index query body for a phrase match at the given
/// precision (§4.8, §4.7 `get_matching_tracebacks`/`get_matching_tickets`).
pub fn build_query(text: &str, level: MatchLevel, limit: usize) -> Value {
    let phrase = match level {
        MatchLevel::Exact => text.to_string(),
        MatchLevel::Similar => drop_last_token(text).to_string(),
    };

    json!({
        "size": limit,
        "query": {
            "multi_match": {
                "query": phrase,
                "fields": MATCH_FIELDS,
                "type": "phrase",
            }
        }
    })
}

const TICKET_MATCH_FIELDS: &[&str] = &["description_filtered", "comments_filtered"];

/// Build the phrase-match query body for `get_matching_tickets` (§4.7),
/// matching against the filtered description/comments text rather than
/// `MATCH_FIELDS` (which is the traceback-side field set).
pub fn build_ticket_match_query(text: &str, level: MatchLevel, limit: usize) -> Value {
    let phrase = match level {
        MatchLevel::Exact => text.to_string(),
        MatchLevel::Similar => drop_last_token(text).to_string(),
    };

    json!({
        "size": limit,
        "query": {
            "multi_match": {
                "query": phrase,
                "fields": TICKET_MATCH_FIELDS,
                "type": "phrase",
            }
        }
    })
}

/// Build a relevance-ranked query boosting `key`/`summary` (§4.7
/// `search_tickets`).
pub fn build_ticket_search_query(phrase: &str, limit: usize) -> Value {
    json!({
        "size": limit,
        "query": {
            "multi_match": {
                "query": phrase,
                "fields": ["key^3", "summary^2", "description", "comments"],
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drop_last_token() {
        assert_eq!(drop_last_token("a b c"), "a b");
        assert_eq!(drop_last_token("single"), "");
        assert_eq!(drop_last_token(""), "");
    }

    // Scenario S6: EXACT vs SIMILAR phrase construction.
    #[test]
    fn test_s6_exact_uses_full_text_similar_drops_last_token() {
        let text = "Traceback (most recent call last):\nKeyError: foo";
        let exact = build_query(text, MatchLevel::Exact, 10);
        let similar = build_query(text, MatchLevel::Similar, 10);
        assert_eq!(exact["query"]["multi_match"]["query"], text);
        assert_eq!(similar["query"]["multi_match"]["query"], "Traceback (most recent call last):\nKeyError:");
    }

    #[test]
    fn test_ticket_search_boosts_key_and_summary() {
        let query = build_ticket_search_query("connection reset", 30);
        let fields = query["query"]["multi_match"]["fields"].as_array().unwrap();
        assert!(fields.iter().any(|f| f == "key^3"));
        assert!(fields.iter().any(|f| f == "summary^2"));
    }

    #[test]
    fn test_ticket_match_query_targets_filtered_fields() {
        let query = build_ticket_match_query("connection reset", MatchLevel::Exact, 10);
        let fields = query["query"]["multi_match"]["fields"].as_array().unwrap();
        assert!(fields.iter().any(|f| f == "description_filtered"));
        assert!(fields.iter().any(|f| f == "comments_filtered"));
    }
}
