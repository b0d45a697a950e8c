//! C9 Correlator: links a traceback to matching/related tickets and
//! occurrences, and answers the day-filtered triage view (§4.9).

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, TimeZone};
use chrono_tz::Tz;

use crate::data::{Store, error::StoreError};

use super::model::{CorrelationFilter, CorrelationResult, MatchLevel, Ticket, Traceback};

/// Tickets not touched in this many days no longer count as "recent"
/// (§4.9 "No Recent Ticket").
const RECENT_TICKET_WINDOW_DAYS: i64 = 14;
/// `correlate_day` fetches more than the final cap so that filtering still
/// leaves up to 100 results (§4.9 step 1).
const DAY_FETCH_LIMIT: usize = 10_000;
const DAY_RESULT_CAP: usize = 100;
const SIMILAR_TRACEBACK_CAP: usize = 100;

#[derive(Clone)]
pub struct Correlator {
    store: Arc<dyn Store>,
}

impl Correlator {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// §4.9 `correlate`.
    pub async fn correlate(&self, traceback: &Traceback) -> Result<CorrelationResult, StoreError> {
        let jira_issues = self.store.get_matching_tickets(&traceback.traceback_text, MatchLevel::Exact).await?;
        let similar_jira_issues = self.similar_tickets_excluding(&traceback.traceback_text, &jira_issues).await?;
        let similar_tracebacks = self
            .store
            .get_matching_tracebacks(&traceback.traceback_text, MatchLevel::Exact, SIMILAR_TRACEBACK_CAP)
            .await?;

        Ok(CorrelationResult {
            traceback: traceback.clone(),
            jira_issues,
            similar_jira_issues,
            similar_tracebacks,
        })
    }

    /// §4.9 `correlate_day`. `now` is threaded in rather than read from the
    /// clock so the "No Recent Ticket" filter is deterministic in tests.
    pub async fn correlate_day(
        &self,
        date: NaiveDate,
        filter: CorrelationFilter,
        hidden_ids: &HashSet<String>,
        now: DateTime<Tz>,
    ) -> Result<Vec<CorrelationResult>, StoreError> {
        let tracebacks = self.store.get_tracebacks(Some(date), Some(date), DAY_FETCH_LIMIT).await?;

        let mut filtered = Vec::new();
        for traceback in tracebacks {
            if hidden_ids.contains(&traceback.origin_id) {
                continue;
            }
            let jira_issues = self.store.get_matching_tickets(&traceback.traceback_text, MatchLevel::Exact).await?;
            if !passes_filter(filter, &jira_issues, now) {
                continue;
            }
            let similar_jira_issues = self.similar_tickets_excluding(&traceback.traceback_text, &jira_issues).await?;
            filtered.push((traceback, jira_issues, similar_jira_issues));
            if filtered.len() >= DAY_RESULT_CAP {
                break;
            }
        }

        let mut results = Vec::with_capacity(filtered.len());
        for (traceback, jira_issues, similar_jira_issues) in filtered {
            let similar_tracebacks = self
                .store
                .get_matching_tracebacks(&traceback.traceback_text, MatchLevel::Exact, SIMILAR_TRACEBACK_CAP)
                .await?;
            results.push(CorrelationResult { traceback, jira_issues, similar_jira_issues, similar_tracebacks });
        }
        Ok(results)
    }

    async fn similar_tickets_excluding(&self, text: &str, exact: &[Ticket]) -> Result<Vec<Ticket>, StoreError> {
        let exact_keys: HashSet<&str> = exact.iter().map(|t| t.key.as_str()).collect();
        let similar = self.store.get_matching_tickets(text, MatchLevel::Similar).await?;
        Ok(similar.into_iter().filter(|t| !exact_keys.contains(t.key.as_str())).collect())
    }
}

fn passes_filter(filter: CorrelationFilter, jira_issues: &[Ticket], now: DateTime<Tz>) -> bool {
    match filter {
        CorrelationFilter::AllTracebacks => true,
        CorrelationFilter::HasTicket => !jira_issues.is_empty(),
        CorrelationFilter::NoTicket => jira_issues.is_empty(),
        CorrelationFilter::NoRecentTicket => {
            let cutoff = now - chrono::Duration::days(RECENT_TICKET_WINDOW_DAYS);
            !jira_issues.iter().any(|t| t.updated > cutoff)
        }
        CorrelationFilter::HasOpenTicket => jira_issues.iter().any(|t| t.status != "Closed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constants::DISPLAY_ZONE;
    use crate::data::store::InMemoryStore;

    fn traceback(origin_id: &str, date: chrono::NaiveDate, text: &str) -> Traceback {
        Traceback {
            origin_id: origin_id.to_string(),
            origin_timestamp: DISPLAY_ZONE.from_local_datetime(&date.and_hms_opt(10, 0, 0).unwrap()).unwrap(),
            instance_id: "i-A".to_string(),
            program_name: "manager.debug".to_string(),
            traceback_text: text.to_string(),
            traceback_plus_context_text: text.to_string(),
            raw_traceback_text: text.to_string(),
            raw_full_text: text.to_string(),
            profile_name: None,
            username: None,
        }
    }

    fn ticket(key: &str, matching_text: &str, updated: DateTime<Tz>, status: &str) -> Ticket {
        Ticket {
            key: key.to_string(),
            url: format!("https://jira.example.com/browse/{key}"),
            summary: "s".to_string(),
            description: matching_text.to_string(),
            description_filtered: matching_text.to_string(),
            comments: String::new(),
            comments_filtered: String::new(),
            issue_type: "Bug".to_string(),
            status: status.to_string(),
            assignee: None,
            created: updated,
            updated,
        }
    }

    // Scenario S3: correlator filter.
    #[tokio::test]
    async fn test_s3_no_recent_ticket_returns_all_three_tracebacks() {
        let store = InMemoryStore::new();
        let day = chrono::NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let now = DISPLAY_ZONE.from_local_datetime(&day.and_hms_opt(12, 0, 0).unwrap()).unwrap();
        let old_update = now - chrono::Duration::days(30);

        let a = traceback("1", day, "KeyError: a");
        let b = traceback("2", day, "KeyError: a");
        let c = traceback("3", day, "ValueError: c");
        store.save_traceback(&a).await.unwrap();
        store.save_traceback(&b).await.unwrap();
        store.save_traceback(&c).await.unwrap();
        store.save_ticket(&ticket("PPC-1", "unrelated text", old_update, "Open")).await.unwrap();

        let correlator = Correlator::new(Arc::new(store));
        let results = correlator
            .correlate_day(day, CorrelationFilter::NoRecentTicket, &HashSet::new(), now)
            .await
            .unwrap();

        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn test_has_ticket_and_no_ticket_partition_all_tracebacks() {
        let store = InMemoryStore::new();
        let day = chrono::NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let now = DISPLAY_ZONE.from_local_datetime(&day.and_hms_opt(12, 0, 0).unwrap()).unwrap();

        let a = traceback("1", day, "KeyError: ticketed");
        let b = traceback("2", day, "ValueError: not ticketed");
        store.save_traceback(&a).await.unwrap();
        store.save_traceback(&b).await.unwrap();
        store.save_ticket(&ticket("PPC-1", "KeyError: ticketed", now, "Open")).await.unwrap();

        let correlator = Correlator::new(Arc::new(store));
        let all = correlator.correlate_day(day, CorrelationFilter::AllTracebacks, &HashSet::new(), now).await.unwrap();
        let has_ticket = correlator.correlate_day(day, CorrelationFilter::HasTicket, &HashSet::new(), now).await.unwrap();
        let no_ticket = correlator.correlate_day(day, CorrelationFilter::NoTicket, &HashSet::new(), now).await.unwrap();

        assert_eq!(has_ticket.len() + no_ticket.len(), all.len());
    }

    #[tokio::test]
    async fn test_hidden_ids_excluded() {
        let store = InMemoryStore::new();
        let day = chrono::NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let now = DISPLAY_ZONE.from_local_datetime(&day.and_hms_opt(12, 0, 0).unwrap()).unwrap();
        let a = traceback("1", day, "KeyError: a");
        store.save_traceback(&a).await.unwrap();

        let correlator = Correlator::new(Arc::new(store));
        let hidden: HashSet<String> = ["1".to_string()].into_iter().collect();
        let results = correlator.correlate_day(day, CorrelationFilter::AllTracebacks, &hidden, now).await.unwrap();
        assert!(results.is_empty());
    }
}
