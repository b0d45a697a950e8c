//! Type-safe cache key builder with versioning (§4.13 regions: `traceback:*`,
//! `jira:*`).

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::core::constants::CACHE_KEY_VERSION;
use crate::domain::model::MatchLevel;

/// Short, collision-resistant digest of arbitrary text for use inside a
/// cache key (full traceback text can run to several KB). Plain
/// `DefaultHasher` is enough here: keys only need to be stable and unlikely
/// to collide within one process, not cryptographically secure.
fn hash_text(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

fn match_level_str(level: MatchLevel) -> &'static str {
    match level {
        MatchLevel::Exact => "exact",
        MatchLevel::Similar => "similar",
    }
}

/// Type-safe cache key builder
pub struct CacheKey;

impl CacheKey {
    // =========================================================================
    // traceback:* region
    // =========================================================================

    /// Cache key for a single traceback by origin id.
    pub fn traceback_by_id(origin_id: &str) -> String {
        format!("{CACHE_KEY_VERSION}:traceback:id:{origin_id}")
    }

    /// Cache key for a day/range listing, keyed by its exact argument tuple
    /// (§4.7 `get_tracebacks`).
    pub fn traceback_range(start: Option<&str>, end: Option<&str>, limit: usize) -> String {
        format!(
            "{CACHE_KEY_VERSION}:traceback:range:{}:{}:{}",
            start.unwrap_or("-"),
            end.unwrap_or("-"),
            limit
        )
    }

    /// Cache key for a text-match query over tracebacks (§4.7
    /// `get_matching_tracebacks`).
    pub fn traceback_match(text: &str, level: MatchLevel, limit: usize) -> String {
        format!(
            "{CACHE_KEY_VERSION}:traceback:match:{}:{:x}:{}",
            match_level_str(level),
            hash_text(text),
            limit
        )
    }

    // =========================================================================
    // jira:* region
    // =========================================================================

    /// Cache key for a text-match query over tickets (§4.7
    /// `get_matching_tickets`).
    pub fn jira_match(text: &str, level: MatchLevel, limit: usize) -> String {
        format!(
            "{CACHE_KEY_VERSION}:jira:match:{}:{:x}:{}",
            match_level_str(level),
            hash_text(text),
            limit
        )
    }

    /// Cache key for a relevance-ranked phrase search (§4.7 `search_tickets`).
    pub fn jira_search(phrase: &str, limit: usize) -> String {
        format!("{CACHE_KEY_VERSION}:jira:search:{:x}:{}", hash_text(phrase), limit)
    }

    // =========================================================================
    // Session/TTL flags (not part of either invalidation region)
    // =========================================================================

    /// `SeenTracebackFlag` key (§3): true once a traceback has been posted to
    /// chat, TTL 2 days.
    pub fn seen_traceback(origin_id: &str) -> String {
        format!("{CACHE_KEY_VERSION}:seen:{origin_id}")
    }

    /// `HiddenTracebackSet` key (§3): the set of origin ids a triage operator
    /// has dismissed from the day's view, reset by `restore_all`.
    pub fn hidden_tracebacks() -> String {
        format!("{CACHE_KEY_VERSION}:hidden:tracebacks")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_traceback_by_id() {
        assert_eq!(CacheKey::traceback_by_id("abc"), "v1:traceback:id:abc");
    }

    #[test]
    fn test_traceback_range_key_is_stable_for_same_args() {
        let a = CacheKey::traceback_range(Some("2016-08-12"), None, 100);
        let b = CacheKey::traceback_range(Some("2016-08-12"), None, 100);
        assert_eq!(a, b);
        assert!(a.starts_with("v1:traceback:range:"));
    }

    #[test]
    fn test_traceback_match_key_distinguishes_levels() {
        let exact = CacheKey::traceback_match("some traceback text", MatchLevel::Exact, 10);
        let similar = CacheKey::traceback_match("some traceback text", MatchLevel::Similar, 10);
        assert_ne!(exact, similar);
    }

    #[test]
    fn test_hidden_tracebacks_is_a_fixed_key() {
        assert_eq!(CacheKey::hidden_tracebacks(), "v1:hidden:tracebacks");
    }

    #[test]
    fn test_seen_traceback_key() {
        assert_eq!(CacheKey::seen_traceback("700594297938165774"), "v1:seen:700594297938165774");
    }
}
