//! C10 ticket sync: keeps the search index's copy of each ticket in step
//! with the tracker (§4.10 `update_ticket`/`update_all_tickets`). Grounded on
//! `jira_issue_aservice.py`'s `update_jira_issue`/`get_all_issues` pair in the
//! original implementation.

use std::sync::Arc;

use crate::data::{Store, TrackerClient};
use crate::utils::retry::BACKOFF_SCHEDULE_SECS;

use super::CacheCoordinator;
use super::scheduler::{Scheduler, TaskPayload};

/// A freshly created or edited issue can briefly 404 before the tracker's
/// read replica catches up; this many consecutive `None`s before it's
/// treated as actually deleted.
const MAX_NULL_RETRIES: u32 = 5;

/// Jira project search uses `project=<KEY>` (mirrors
/// `jira_issue_aservice.get_all_issues`).
const BATCH_SIZE: usize = 50;

pub struct TicketSync {
    tracker: Arc<dyn TrackerClient>,
    store: Arc<dyn Store>,
    cache: CacheCoordinator,
    project_key: String,
}

impl TicketSync {
    pub fn new(tracker: Arc<dyn TrackerClient>, store: Arc<dyn Store>, cache: CacheCoordinator, project_key: String) -> Self {
        Self { tracker, store, cache, project_key }
    }

    /// Refetch `key` from the tracker and reconcile the index with it. If
    /// the tracker still returns nothing after retrying through transient
    /// nulls, the ticket is assumed deleted and removed from the index.
    pub async fn update_ticket(&self, key: &str, invalidate: bool) -> anyhow::Result<()> {
        let mut ticket = None;
        for attempt in 1..=MAX_NULL_RETRIES {
            ticket = self.tracker.issue(key).await?;
            if ticket.is_some() || attempt == MAX_NULL_RETRIES {
                break;
            }
            let idx = (attempt as usize - 1).min(BACKOFF_SCHEDULE_SECS.len() - 1);
            tokio::time::sleep(std::time::Duration::from_secs_f64(BACKOFF_SCHEDULE_SECS[idx])).await;
        }

        match ticket {
            Some(t) => self.store.save_ticket(&t).await?,
            None => {
                tracing::info!(key = %key, "removing {key} - issue not found");
                self.store.remove_ticket(key).await?;
            }
        }

        if invalidate {
            self.cache.invalidate_jira().await.ok();
        }
        Ok(())
    }

    /// Scan every issue in the configured project and enqueue an
    /// `update_ticket` task per key, then invalidate the jira cache region
    /// once at the end rather than per ticket (§4.10).
    pub async fn update_all_tickets(&self, scheduler: &Scheduler) -> anyhow::Result<()> {
        let jql = format!("project={}", self.project_key);
        let mut start_at = 0usize;
        loop {
            let keys = self.tracker.search_issue_keys(&jql, start_at, BATCH_SIZE).await?;
            if keys.is_empty() {
                break;
            }
            let fetched = keys.len();
            for key in keys {
                scheduler
                    .enqueue(TaskPayload::UpdateTicket { key, invalidate_cache: false }, None)
                    .await
                    .ok();
            }
            if fetched < BATCH_SIZE {
                break;
            }
            start_at += BATCH_SIZE;
        }

        self.cache.invalidate_jira().await.ok();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constants::DISPLAY_ZONE;
    use crate::core::shutdown::ShutdownService;
    use crate::data::error::TrackerError;
    use crate::data::store::InMemoryStore;
    use crate::domain::model::Ticket;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex as StdMutex;

    struct FakeTracker {
        /// Queue of responses returned on successive `issue()` calls, in order.
        responses: StdMutex<Vec<Option<Ticket>>>,
        issue_keys: Vec<String>,
    }

    #[async_trait]
    impl TrackerClient for FakeTracker {
        async fn issue(&self, _key: &str) -> Result<Option<Ticket>, TrackerError> {
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Ok(None);
            }
            Ok(responses.remove(0))
        }

        async fn create_issue(&self, _fields: crate::data::tracker::NewIssueFields) -> Result<String, TrackerError> {
            unimplemented!("not exercised by ticket sync tests")
        }

        async fn add_comment(&self, _key: &str, _body: &str) -> Result<(), TrackerError> {
            Ok(())
        }

        async fn search_issue_keys(&self, _jql: &str, start_at: usize, max_results: usize) -> Result<Vec<String>, TrackerError> {
            let end = (start_at + max_results).min(self.issue_keys.len());
            if start_at >= self.issue_keys.len() {
                return Ok(vec![]);
            }
            Ok(self.issue_keys[start_at..end].to_vec())
        }
    }

    fn ticket(key: &str) -> Ticket {
        let now = DISPLAY_ZONE.timestamp_opt(1_700_000_000, 0).unwrap();
        Ticket {
            key: key.to_string(),
            url: format!("https://jira.example.com/browse/{key}"),
            summary: "s".to_string(),
            description: "d".to_string(),
            description_filtered: "d".to_string(),
            comments: String::new(),
            comments_filtered: String::new(),
            issue_type: "Bug".to_string(),
            status: "Open".to_string(),
            assignee: None,
            created: now,
            updated: now,
        }
    }

    async fn coordinator() -> CacheCoordinator {
        use crate::core::config::{CacheBackendType, CacheConfig, EvictionPolicy};
        use crate::data::cache::CacheService;
        let cache = CacheService::new(&CacheConfig {
            backend: CacheBackendType::Memory,
            max_entries: 1000,
            eviction_policy: EvictionPolicy::TinyLfu,
            redis_url: None,
        })
        .await
        .unwrap();
        CacheCoordinator::new(Arc::new(cache))
    }

    #[tokio::test]
    async fn test_update_ticket_saves_when_found() {
        let tracker = Arc::new(FakeTracker { responses: StdMutex::new(vec![Some(ticket("PPC-1"))]), issue_keys: vec![] });
        let store = Arc::new(InMemoryStore::new());
        let sync = TicketSync::new(tracker, store.clone(), coordinator().await, "PPC".to_string());

        sync.update_ticket("PPC-1", false).await.unwrap();

        let found = store.get_matching_tickets("d", crate::domain::model::MatchLevel::Exact).await.unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_update_ticket_removes_when_still_missing_after_retries() {
        let tracker = Arc::new(FakeTracker { responses: StdMutex::new(vec![None, None, None, None, None]), issue_keys: vec![] });
        let store = Arc::new(InMemoryStore::new());
        store.save_ticket(&ticket("PPC-1")).await.unwrap();
        let sync = TicketSync::new(tracker, store.clone(), coordinator().await, "PPC".to_string());

        sync.update_ticket("PPC-1", false).await.unwrap();

        let found = store.get_matching_tickets("d", crate::domain::model::MatchLevel::Exact).await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_update_all_tickets_paginates_and_enqueues() {
        let keys: Vec<String> = (0..5).map(|i| format!("PPC-{i}")).collect();
        let tracker = Arc::new(FakeTracker { responses: StdMutex::new(vec![]), issue_keys: keys.clone() });
        let store = Arc::new(InMemoryStore::new());
        let sync = TicketSync::new(tracker, store, coordinator().await, "PPC".to_string());

        let scheduler = Scheduler::new(ShutdownService::new(5));
        let count = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let count2 = count.clone();
        scheduler
            .register(
                "update_ticket",
                Arc::new(move |_payload| {
                    let count2 = count2.clone();
                    Box::pin(async move {
                        count2.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        Ok(())
                    })
                }),
            )
            .await;

        sync.update_all_tickets(&scheduler).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 5);
    }
}
