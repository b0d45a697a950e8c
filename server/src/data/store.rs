//! C7 Store: the search-index-backed repository of Tracebacks, Tickets, and
//! ApiCalls (§4.7). `Store` is the trait domain code depends on; `SearchIndexStore`
//! is the production adapter over a reqwest-driven HTTP search index, following
//! the cache-aside repository pattern used throughout the teacher's
//! `data/postgres/repositories` (try cache, on miss query backend, populate cache).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::domain::cache_coordinator::CacheCoordinator;
use crate::domain::model::{ApiCall, MatchLevel, Ticket, Traceback};
use crate::utils::retry::{DEFAULT_MAX_ATTEMPTS, retry_with_backoff_async};

use super::cache::CacheKey;
use super::error::StoreError;
use super::text_matcher;

const TRACEBACK_INDEX: &str = "traceback-index";
const TRACEBACK_TYPE: &str = "traceback";
const JIRA_INDEX: &str = "jira-issue-index";
const JIRA_TYPE: &str = "jira-issue";
const API_CALL_TYPE: &str = "api-call";

const DEFAULT_RANGE_LIMIT: usize = 100;
const MAX_RANGE_LIMIT: usize = 10_000;

fn api_call_index(partition_key: &str) -> String {
    format!("api-call-{partition_key}")
}

/// §4.7: `limit=0` means "use the documented default," not "return nothing."
fn resolve_range_limit(limit: usize) -> usize {
    if limit == 0 { DEFAULT_RANGE_LIMIT } else { limit.clamp(1, MAX_RANGE_LIMIT) }
}

/// The repository surface consumed by the Correlator, TicketSync, and the
/// ingestors. Exists as a trait so those callers can be exercised against an
/// in-memory fake without a live search index.
#[async_trait]
pub trait Store: Send + Sync {
    async fn save_traceback(&self, traceback: &Traceback) -> Result<(), StoreError>;
    async fn get_traceback(&self, origin_id: &str) -> Result<Option<Traceback>, StoreError>;
    async fn get_tracebacks(
        &self,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
        limit: usize,
    ) -> Result<Vec<Traceback>, StoreError>;
    async fn get_matching_tracebacks(
        &self,
        text: &str,
        level: MatchLevel,
        limit: usize,
    ) -> Result<Vec<Traceback>, StoreError>;
    async fn bulk_save_api_calls(&self, calls: &[ApiCall]) -> Result<(), StoreError>;
    async fn save_ticket(&self, ticket: &Ticket) -> Result<(), StoreError>;
    async fn remove_ticket(&self, key: &str) -> Result<(), StoreError>;
    async fn get_matching_tickets(&self, text: &str, level: MatchLevel) -> Result<Vec<Ticket>, StoreError>;
    async fn search_tickets(&self, phrase: &str, limit: usize) -> Result<Vec<Ticket>, StoreError>;
}

/// HTTP-backed search index adapter. Speaks a minimal subset of the
/// Elasticsearch-style REST contract named in SPEC_FULL §6 (point get/put/
/// delete, `_search`, `_bulk`).
pub struct SearchIndexStore {
    client: reqwest::Client,
    base_url: String,
    cache: CacheCoordinator,
    warned_missing_indices: Mutex<std::collections::HashSet<String>>,
}

impl SearchIndexStore {
    pub fn new(es_address: impl Into<String>, cache: CacheCoordinator) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: es_address.into().trim_end_matches('/').to_string(),
            cache,
            warned_missing_indices: Mutex::new(std::collections::HashSet::new()),
        }
    }

    fn doc_url(&self, index: &str, doc_type: &str, id: &str) -> String {
        format!("{}/{}/{}/{}", self.base_url, index, doc_type, id)
    }

    fn search_url(&self, index: &str, doc_type: &str) -> String {
        format!("{}/{}/{}/_search", self.base_url, index, doc_type)
    }

    /// Warn exactly once per index per process (§4.7 "log a warning once").
    fn warn_index_missing_once(&self, index: &str) {
        if self.warned_missing_indices.lock().insert(index.to_string()) {
            tracing::warn!(index = %index, "Search index does not exist yet; returning empty result");
        }
    }

    async fn put_doc(&self, index: &str, doc_type: &str, id: &str, body: &Value) -> Result<(), StoreError> {
        let response = self.client.put(self.doc_url(index, doc_type, id)).json(body).send().await?;
        if !response.status().is_success() {
            return Err(StoreError::Malformed(format!(
                "unexpected status {} saving {index}/{doc_type}/{id}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn get_doc<T: DeserializeOwned>(&self, index: &str, doc_type: &str, id: &str) -> Result<Option<T>, StoreError> {
        let response = self.client.get(self.doc_url(index, doc_type, id)).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(StoreError::IndexMissing(index.to_string()));
        }
        let envelope: Value = response.json().await.map_err(|e| StoreError::Malformed(e.to_string()))?;
        match envelope.get("_source").cloned() {
            Some(source) if !source.is_null() => {
                serde_json::from_value(source).map(Some).map_err(|e| StoreError::Malformed(e.to_string()))
            }
            _ => Ok(None),
        }
    }

    async fn delete_doc(&self, index: &str, doc_type: &str, id: &str) -> Result<(), StoreError> {
        let response = self.client.delete(self.doc_url(index, doc_type, id)).send().await?;
        // Delete-not-found silently succeeds (§4.7).
        if !response.status().is_success() && response.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(StoreError::Malformed(format!(
                "unexpected status {} deleting {index}/{doc_type}/{id}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn search<T: DeserializeOwned>(&self, index: &str, doc_type: &str, query: &Value) -> Result<Vec<T>, StoreError> {
        let response = self.client.post(self.search_url(index, doc_type)).json(query).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StoreError::IndexMissing(index.to_string()));
        }
        if !response.status().is_success() {
            return Err(StoreError::Malformed(format!(
                "search on {index}/{doc_type} returned {}",
                response.status()
            )));
        }
        let envelope: Value = response.json().await.map_err(|e| StoreError::Malformed(e.to_string()))?;
        let hits = envelope.pointer("/hits/hits").and_then(Value::as_array).cloned().unwrap_or_default();
        let mut out = Vec::with_capacity(hits.len());
        for hit in hits {
            let source = hit.get("_source").cloned().unwrap_or(Value::Null);
            out.push(serde_json::from_value(source).map_err(|e| StoreError::Malformed(e.to_string()))?);
        }
        Ok(out)
    }

    /// Run `search`, turning a missing index into an empty result (§4.7
    /// "All reads return an empty list when the index does not exist yet").
    async fn search_or_empty<T: DeserializeOwned>(&self, index: &str, doc_type: &str, query: &Value) -> Result<Vec<T>, StoreError> {
        match self.search(index, doc_type, query).await {
            Ok(results) => Ok(results),
            Err(StoreError::IndexMissing(idx)) => {
                self.warn_index_missing_once(&idx);
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }
}

fn build_range_query(start_date: Option<NaiveDate>, end_date: Option<NaiveDate>, limit: usize) -> Value {
    let mut range = serde_json::Map::new();
    if let Some(s) = start_date {
        range.insert("gte".to_string(), Value::String(format!("{}T00:00:00", s.format("%Y-%m-%d"))));
    }
    if let Some(e) = end_date {
        range.insert("lte".to_string(), Value::String(format!("{}T23:59:59", e.format("%Y-%m-%d"))));
    }
    serde_json::json!({
        "size": limit,
        "sort": [{"origin_timestamp": {"order": "desc"}}],
        "query": {"range": {"origin_timestamp": Value::Object(range)}},
    })
}

#[async_trait]
impl Store for SearchIndexStore {
    async fn save_traceback(&self, traceback: &Traceback) -> Result<(), StoreError> {
        let body = serde_json::to_value(traceback).map_err(|e| StoreError::Malformed(e.to_string()))?;
        retry_with_backoff_async(DEFAULT_MAX_ATTEMPTS, StoreError::is_transient, || {
            let body = body.clone();
            async move { self.put_doc(TRACEBACK_INDEX, TRACEBACK_TYPE, &traceback.origin_id, &body).await }
        })
        .await
        .map(|(_value, _attempts)| ())
        .map_err(|(e, _attempts)| e)?;

        self.cache.invalidate_traceback().await.ok();
        Ok(())
    }

    async fn get_traceback(&self, origin_id: &str) -> Result<Option<Traceback>, StoreError> {
        let key = CacheKey::traceback_by_id(origin_id);
        self.cache
            .get(&key, || self.get_doc::<Traceback>(TRACEBACK_INDEX, TRACEBACK_TYPE, origin_id))
            .await
    }

    async fn get_tracebacks(
        &self,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
        limit: usize,
    ) -> Result<Vec<Traceback>, StoreError> {
        let limit = resolve_range_limit(limit);
        let start_str = start_date.map(|d| d.format("%Y-%m-%d").to_string());
        let end_str = end_date.map(|d| d.format("%Y-%m-%d").to_string());
        let key = CacheKey::traceback_range(start_str.as_deref(), end_str.as_deref(), limit);

        self.cache
            .get(&key, || async {
                let query = build_range_query(start_date, end_date, limit);
                self.search_or_empty(TRACEBACK_INDEX, TRACEBACK_TYPE, &query).await
            })
            .await
    }

    async fn get_matching_tracebacks(&self, text: &str, level: MatchLevel, limit: usize) -> Result<Vec<Traceback>, StoreError> {
        let key = CacheKey::traceback_match(text, level, limit);
        self.cache
            .get(&key, || async {
                let query = text_matcher::build_query(text, level, limit);
                self.search_or_empty(TRACEBACK_INDEX, TRACEBACK_TYPE, &query).await
            })
            .await
    }

    async fn bulk_save_api_calls(&self, calls: &[ApiCall]) -> Result<(), StoreError> {
        let mut by_partition: HashMap<String, Vec<&ApiCall>> = HashMap::new();
        for call in calls {
            by_partition.entry(call.partition_key()).or_default().push(call);
        }

        for (partition, batch) in by_partition {
            let index = api_call_index(&partition);
            retry_with_backoff_async(DEFAULT_MAX_ATTEMPTS, StoreError::is_transient, || {
                let index = index.clone();
                let batch = &batch;
                async move {
                    for call in batch {
                        let body = serde_json::to_value(*call).map_err(|e| StoreError::Malformed(e.to_string()))?;
                        self.put_doc(&index, API_CALL_TYPE, &call.papertrail_id, &body).await?;
                    }
                    Ok(())
                }
            })
            .await
            .map(|(_value, _attempts)| ())
            .map_err(|(e, _attempts)| e)?;
        }

        Ok(())
    }

    async fn save_ticket(&self, ticket: &Ticket) -> Result<(), StoreError> {
        let body = serde_json::to_value(ticket).map_err(|e| StoreError::Malformed(e.to_string()))?;
        self.put_doc(JIRA_INDEX, JIRA_TYPE, &ticket.key, &body).await?;
        self.cache.invalidate_jira().await.ok();
        Ok(())
    }

    async fn remove_ticket(&self, key: &str) -> Result<(), StoreError> {
        self.delete_doc(JIRA_INDEX, JIRA_TYPE, key).await?;
        self.cache.invalidate_jira().await.ok();
        Ok(())
    }

    async fn get_matching_tickets(&self, text: &str, level: MatchLevel) -> Result<Vec<Ticket>, StoreError> {
        const LIMIT: usize = 100;
        let key = CacheKey::jira_match(text, level, LIMIT);
        self.cache
            .get(&key, || async {
                let query = text_matcher::build_ticket_match_query(text, level, LIMIT);
                self.search_or_empty(JIRA_INDEX, JIRA_TYPE, &query).await
            })
            .await
    }

    async fn search_tickets(&self, phrase: &str, limit: usize) -> Result<Vec<Ticket>, StoreError> {
        let key = CacheKey::jira_search(phrase, limit);
        self.cache
            .get(&key, || async {
                let query = text_matcher::build_ticket_search_query(phrase, limit);
                self.search_or_empty(JIRA_INDEX, JIRA_TYPE, &query).await
            })
            .await
    }
}

/// In-memory `Store` fake used by domain-layer tests (Correlator, TicketSync,
/// NotificationDispatcher) so they never need a live search index.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    inner: Arc<Mutex<InMemoryStoreState>>,
}

#[derive(Default)]
struct InMemoryStoreState {
    tracebacks: HashMap<String, Traceback>,
    tickets: HashMap<String, Ticket>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn save_traceback(&self, traceback: &Traceback) -> Result<(), StoreError> {
        self.inner.lock().tracebacks.insert(traceback.origin_id.clone(), traceback.clone());
        Ok(())
    }

    async fn get_traceback(&self, origin_id: &str) -> Result<Option<Traceback>, StoreError> {
        Ok(self.inner.lock().tracebacks.get(origin_id).cloned())
    }

    async fn get_tracebacks(
        &self,
        start_date: Option<NaiveDate>,
        end_date: Option<NaiveDate>,
        limit: usize,
    ) -> Result<Vec<Traceback>, StoreError> {
        let mut results: Vec<Traceback> = self
            .inner
            .lock()
            .tracebacks
            .values()
            .filter(|t| {
                let day = t.origin_timestamp.date_naive();
                start_date.is_none_or(|s| day >= s) && end_date.is_none_or(|e| day <= e)
            })
            .cloned()
            .collect();
        results.sort_by(|a, b| b.origin_timestamp.cmp(&a.origin_timestamp));
        results.truncate(resolve_range_limit(limit));
        Ok(results)
    }

    async fn get_matching_tracebacks(&self, text: &str, level: MatchLevel, limit: usize) -> Result<Vec<Traceback>, StoreError> {
        let phrase = match level {
            MatchLevel::Exact => text.to_string(),
            MatchLevel::Similar => text
                .trim_end()
                .rfind(char::is_whitespace)
                .map(|idx| text[..idx].to_string())
                .unwrap_or_default(),
        };
        let mut results: Vec<Traceback> = self
            .inner
            .lock()
            .tracebacks
            .values()
            .filter(|t| t.traceback_text.starts_with(&phrase))
            .cloned()
            .collect();
        results.sort_by(|a, b| b.origin_timestamp.cmp(&a.origin_timestamp));
        results.truncate(limit);
        Ok(results)
    }

    async fn bulk_save_api_calls(&self, _calls: &[ApiCall]) -> Result<(), StoreError> {
        Ok(())
    }

    async fn save_ticket(&self, ticket: &Ticket) -> Result<(), StoreError> {
        self.inner.lock().tickets.insert(ticket.key.clone(), ticket.clone());
        Ok(())
    }

    async fn remove_ticket(&self, key: &str) -> Result<(), StoreError> {
        self.inner.lock().tickets.remove(key);
        Ok(())
    }

    async fn get_matching_tickets(&self, text: &str, level: MatchLevel) -> Result<Vec<Ticket>, StoreError> {
        let phrase = match level {
            MatchLevel::Exact => text.to_string(),
            MatchLevel::Similar => text
                .trim_end()
                .rfind(char::is_whitespace)
                .map(|idx| text[..idx].to_string())
                .unwrap_or_default(),
        };
        Ok(self
            .inner
            .lock()
            .tickets
            .values()
            .filter(|t| t.description_filtered.contains(&phrase) || t.comments_filtered.contains(&phrase))
            .cloned()
            .collect())
    }

    async fn search_tickets(&self, phrase: &str, limit: usize) -> Result<Vec<Ticket>, StoreError> {
        let mut results: Vec<Ticket> = self
            .inner
            .lock()
            .tickets
            .values()
            .filter(|t| {
                t.key.contains(phrase) || t.summary.contains(phrase) || t.description.contains(phrase) || t.comments.contains(phrase)
            })
            .cloned()
            .collect();
        results.truncate(limit);
        Ok(results)
    }
}
