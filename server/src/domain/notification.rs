//! C12 NotificationDispatcher: posts unticketed tracebacks to chat at most
//! once per day (§4.12), and handles the two interactive callbacks a chat
//! message can trigger. Description/comment templates are grounded on
//! `jira_issue_aservice.py`'s `create_description`/`create_comment_with_hits_list`
//! in the original implementation.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate};
use chrono_tz::Tz;
use serde::Serialize;

use crate::core::config::JiraConfig;
use crate::data::tracker::NewIssueFields;
use crate::data::{ChatClient, Store, TrackerClient};
use crate::data::error::TrackerError;

use super::cache_coordinator::CacheCoordinator;
use super::correlator::Correlator;
use super::model::{CorrelationFilter, MatchLevel, Traceback};

/// Raised by `create_ticket` when a ticket for this traceback already
/// exists; the caller posts the real-user conflict notice and stops.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("a ticket for this traceback already exists: {0}")]
    TicketAlreadyExists(String),
    #[error("traceback {0} not found")]
    TracebackNotFound(String),
    #[error(transparent)]
    Store(#[from] crate::data::error::StoreError),
    #[error(transparent)]
    Tracker(#[from] TrackerError),
    #[error(transparent)]
    Chat(#[from] crate::data::error::ChatError),
}

/// A `{text, value}` option for the "Add to existing ticket" type-ahead
/// (§4.12 "Type-ahead data source").
#[derive(Debug, Serialize)]
pub struct TicketOption {
    pub text: String,
    pub value: String,
}

pub struct NotificationDispatcher {
    store: Arc<dyn Store>,
    chat: Arc<dyn ChatClient>,
    tracker: Arc<dyn TrackerClient>,
    correlator: Correlator,
    cache: CacheCoordinator,
    jira: JiraConfig,
}

impl NotificationDispatcher {
    pub fn new(
        store: Arc<dyn Store>,
        chat: Arc<dyn ChatClient>,
        tracker: Arc<dyn TrackerClient>,
        correlator: Correlator,
        cache: CacheCoordinator,
        jira: JiraConfig,
    ) -> Self {
        Self { store, chat, tracker, correlator, cache, jira }
    }

    /// Scheduled task `post_unticketed_tracebacks_to_chat` (§4.12). `today`
    /// and `now` are passed in rather than read from the clock so tests are
    /// deterministic.
    pub async fn post_unticketed_tracebacks_to_chat(&self, today: NaiveDate, now: DateTime<Tz>) -> anyhow::Result<usize> {
        let hidden = HashSet::new();
        let mut entries = self
            .correlator
            .correlate_day(today, CorrelationFilter::NoRecentTicket, &hidden, now)
            .await?;
        entries.reverse();

        let mut posted = 0;
        for entry in entries {
            if self.cache.mark_seen_once(&entry.traceback.origin_id).await.unwrap_or(true) {
                self.chat
                    .post_notification(&entry.traceback, &entry.similar_tracebacks, &entry.jira_issues)
                    .await?;
                posted += 1;
            }
        }
        Ok(posted)
    }

    /// `/chat-callback` action `create_ticket` (§4.12). Rejects if an exact
    /// match already exists, posting the conflict notice as a real user
    /// rather than returning it through the callback response.
    pub async fn create_ticket(&self, origin_id: &str, assign_to: &str) -> Result<String, NotifyError> {
        let traceback = self
            .store
            .get_traceback(origin_id)
            .await?
            .ok_or_else(|| NotifyError::TracebackNotFound(origin_id.to_string()))?;
        let reply_channel = crate::data::chat::channel_for_text(&traceback.traceback_text);

        let existing = self.store.get_matching_tickets(&traceback.traceback_text, MatchLevel::Exact).await?;
        if let Some(ticket) = existing.first() {
            let message = format!("A ticket for this traceback already exists: <{}|{}>", ticket.url, ticket.key);
            self.chat.post_as_real_user(reply_channel, &message).await.ok();
            return Err(NotifyError::TicketAlreadyExists(ticket.key.clone()));
        }

        let similar = self
            .store
            .get_matching_tracebacks(&traceback.traceback_text, MatchLevel::Exact, 100)
            .await?;
        let fields = NewIssueFields {
            project_key: self.jira.project_key.clone(),
            summary: create_title(&traceback.traceback_text),
            description: create_description(&traceback, &similar),
            assignee: assignee_for(&self.jira, assign_to),
            component: None,
        };

        let key = self.tracker.create_issue(fields).await?;
        tracing::info!(key = %key, origin_id, "created ticket from chat callback");
        self.chat.post_as_real_user(reply_channel, &format!("{key} created!")).await.ok();
        Ok(key)
    }

    /// `/chat-callback` action `add_to_existing_ticket` (§4.12).
    pub async fn create_comment_on_existing_ticket(&self, key: &str, origin_id: &str) -> Result<(), NotifyError> {
        let traceback = self
            .store
            .get_traceback(origin_id)
            .await?
            .ok_or_else(|| NotifyError::TracebackNotFound(origin_id.to_string()))?;
        let reply_channel = crate::data::chat::channel_for_text(&traceback.traceback_text);

        let similar = self
            .store
            .get_matching_tracebacks(&traceback.traceback_text, MatchLevel::Exact, 100)
            .await?;
        self.tracker.add_comment(key, &create_comment(&similar)).await?;
        self.chat.post_as_real_user(reply_channel, &format!("added to {key}")).await.ok();
        Ok(())
    }

    /// Type-ahead data source behind "Add to existing ticket" (§4.12).
    pub async fn search_ticket_options(&self, query: &str) -> Result<Vec<TicketOption>, NotifyError> {
        let tickets = self.store.search_tickets(query, 30).await?;
        Ok(tickets.into_iter().map(|t| TicketOption { text: format!("{} {}", t.key, t.summary), value: t.key }).collect())
    }
}

fn assignee_for(jira: &JiraConfig, team: &str) -> Option<String> {
    match team {
        "ADWORDS" => jira.assignee_adwords.clone(),
        "BING" => jira.assignee_bing.clone(),
        "SOCIAL" => jira.assignee_social.clone(),
        "GRADER" => jira.assignee_grader.clone(),
        _ => None,
    }
}

/// §4.12 / original `create_title`: the final line of the traceback text.
fn create_title(traceback_text: &str) -> String {
    traceback_text.lines().next_back().unwrap_or(traceback_text).to_string()
}

pub(crate) fn render_similar_link(t: &Traceback) -> String {
    format!(
        " - [{}|https://papertrailapp.com/systems/{}/events?focus={}]",
        t.origin_timestamp.format("%Y-%m-%d %H:%M:%S"),
        t.instance_id,
        t.origin_id,
    )
}

/// §4.12 / original `create_description`: full context of the master
/// traceback plus a hits list of every similar occurrence.
fn create_description(master: &Traceback, similar: &[Traceback]) -> String {
    let hits = similar.iter().map(render_similar_link).collect::<Vec<_>>().join("\n");
    format!(
        "Error observed in production.\n\n{{noformat}}\n{}\n{{noformat}}\n\nHits on this error:\n{}\n",
        master.traceback_plus_context_text.trim_end(),
        hits,
    )
}

/// §4.12 / original `create_comment_with_hits_list`: newest hit first.
fn create_comment(similar: &[Traceback]) -> String {
    let mut sorted: Vec<&Traceback> = similar.iter().collect();
    sorted.sort_by(|a, b| b.origin_id.cmp(&a.origin_id));
    let hits = sorted.into_iter().map(render_similar_link).collect::<Vec<_>>().join("\n");
    format!("Errors observed in production:\n{hits}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constants::DISPLAY_ZONE;
    use crate::data::cache::CacheService;
    use crate::data::error::ChatError;
    use crate::data::store::InMemoryStore;
    use crate::domain::model::Ticket;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn traceback(origin_id: &str, day: NaiveDate, text: &str) -> Traceback {
        Traceback {
            origin_id: origin_id.to_string(),
            origin_timestamp: DISPLAY_ZONE.from_local_datetime(&day.and_hms_opt(9, 0, 0).unwrap()).unwrap(),
            instance_id: "i-A".to_string(),
            program_name: "manager.debug".to_string(),
            traceback_text: text.to_string(),
            traceback_plus_context_text: format!("context\n{text}"),
            raw_traceback_text: text.to_string(),
            raw_full_text: text.to_string(),
            profile_name: None,
            username: None,
        }
    }

    fn jira_config() -> JiraConfig {
        JiraConfig {
            server: "https://jira.example.com".to_string(),
            basic_auth_username: "bot".to_string(),
            basic_auth_password: "token".to_string(),
            project_key: "PPC".to_string(),
            assignee_adwords: Some("joe".to_string()),
            assignee_bing: Some("peter".to_string()),
            assignee_social: Some("sam".to_string()),
            assignee_grader: Some("gary".to_string()),
        }
    }

    struct CountingChat {
        notifications: AtomicU32,
        real_user_messages: StdMutex<Vec<String>>,
    }

    impl CountingChat {
        fn new() -> Self {
            Self { notifications: AtomicU32::new(0), real_user_messages: StdMutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl ChatClient for CountingChat {
        async fn post_notification(&self, _traceback: &Traceback, _similar: &[Traceback], _tickets: &[Ticket]) -> Result<(), ChatError> {
            self.notifications.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn post_as_real_user(&self, _channel: &str, message: &str) -> Result<(), ChatError> {
            self.real_user_messages.lock().unwrap().push(message.to_string());
            Ok(())
        }
    }

    struct FakeTracker {
        next_key: StdMutex<Option<String>>,
    }

    #[async_trait]
    impl TrackerClient for FakeTracker {
        async fn issue(&self, _key: &str) -> Result<Option<Ticket>, TrackerError> {
            Ok(None)
        }

        async fn create_issue(&self, _fields: NewIssueFields) -> Result<String, TrackerError> {
            Ok(self.next_key.lock().unwrap().clone().unwrap_or_else(|| "PPC-99".to_string()))
        }

        async fn add_comment(&self, _key: &str, _body: &str) -> Result<(), TrackerError> {
            Ok(())
        }

        async fn search_issue_keys(&self, _jql: &str, _start_at: usize, _max_results: usize) -> Result<Vec<String>, TrackerError> {
            Ok(vec![])
        }
    }

    async fn coordinator() -> CacheCoordinator {
        use crate::core::config::{CacheBackendType, CacheConfig, EvictionPolicy};
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

    #[test]
    fn test_create_title_takes_final_line() {
        assert_eq!(create_title("line one\nline two\nKeyError: boom"), "KeyError: boom");
    }

    #[test]
    fn test_create_description_embeds_context_and_hits() {
        let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let master = traceback("1", day, "KeyError: a");
        let similar = vec![traceback("2", day, "KeyError: a")];
        let description = create_description(&master, &similar);
        assert!(description.contains("context\nKeyError: a"));
        assert!(description.contains("papertrailapp.com/systems/i-A/events?focus=2"));
    }

    #[test]
    fn test_create_comment_sorts_newest_first() {
        let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let older = traceback("100", day, "x");
        let newer = traceback("200", day, "x");
        let comment = create_comment(&[older, newer]);
        let newer_pos = comment.find("focus=200").unwrap();
        let older_pos = comment.find("focus=100").unwrap();
        assert!(newer_pos < older_pos);
    }

    #[test]
    fn test_assignee_for_maps_team_to_configured_name() {
        let jira = jira_config();
        assert_eq!(assignee_for(&jira, "ADWORDS").as_deref(), Some("joe"));
        assert_eq!(assignee_for(&jira, "UNASSIGNED"), None);
    }

    // Testable Property 3 / Scenario S4: posting is at-most-once per origin_id.
    #[tokio::test]
    async fn test_post_unticketed_tracebacks_posts_each_origin_id_once() {
        let store = Arc::new(InMemoryStore::new());
        let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let now = DISPLAY_ZONE.from_local_datetime(&day.and_hms_opt(12, 0, 0).unwrap()).unwrap();
        store.save_traceback(&traceback("1", day, "KeyError: a")).await.unwrap();

        let chat = Arc::new(CountingChat::new());
        let tracker = Arc::new(FakeTracker { next_key: StdMutex::new(None) });
        let cache = coordinator().await;
        let correlator = Correlator::new(store.clone());
        let dispatcher = NotificationDispatcher::new(store.clone(), chat.clone(), tracker, correlator, cache, jira_config());

        let first = dispatcher.post_unticketed_tracebacks_to_chat(day, now).await.unwrap();
        let second = dispatcher.post_unticketed_tracebacks_to_chat(day, now).await.unwrap();

        assert_eq!(first, 1);
        assert_eq!(second, 0);
        assert_eq!(chat.notifications.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_create_ticket_rejects_when_matching_ticket_exists() {
        let store = Arc::new(InMemoryStore::new());
        let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let now = DISPLAY_ZONE.from_local_datetime(&day.and_hms_opt(12, 0, 0).unwrap()).unwrap();
        let tb = traceback("1", day, "KeyError: a");
        store.save_traceback(&tb).await.unwrap();
        store
            .save_ticket(&Ticket {
                key: "PPC-1".to_string(),
                url: "https://jira.example.com/browse/PPC-1".to_string(),
                summary: "s".to_string(),
                description: "KeyError: a".to_string(),
                description_filtered: "KeyError: a".to_string(),
                comments: String::new(),
                comments_filtered: String::new(),
                issue_type: "Bug".to_string(),
                status: "Open".to_string(),
                assignee: None,
                created: now,
                updated: now,
            })
            .await
            .unwrap();

        let chat = Arc::new(CountingChat::new());
        let tracker = Arc::new(FakeTracker { next_key: StdMutex::new(None) });
        let cache = coordinator().await;
        let correlator = Correlator::new(store.clone());
        let dispatcher = NotificationDispatcher::new(store.clone(), chat.clone(), tracker, correlator, cache, jira_config());

        let result = dispatcher.create_ticket("1", "ADWORDS").await;
        assert!(matches!(result, Err(NotifyError::TicketAlreadyExists(_))));
        assert_eq!(chat.real_user_messages.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_ticket_succeeds_and_acks_when_no_ticket_exists() {
        let store = Arc::new(InMemoryStore::new());
        let day = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        store.save_traceback(&traceback("1", day, "KeyError: a")).await.unwrap();

        let chat = Arc::new(CountingChat::new());
        let tracker = Arc::new(FakeTracker { next_key: StdMutex::new(Some("PPC-42".to_string())) });
        let cache = coordinator().await;
        let correlator = Correlator::new(store.clone());
        let dispatcher = NotificationDispatcher::new(store.clone(), chat.clone(), tracker, correlator, cache, jira_config());

        let key = dispatcher.create_ticket("1", "ADWORDS").await.unwrap();
        assert_eq!(key, "PPC-42");
        let messages = chat.real_user_messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("PPC-42 created!"));
    }

    #[tokio::test]
    async fn test_search_ticket_options_maps_to_text_value_pairs() {
        let store = Arc::new(InMemoryStore::new());
        let now = DISPLAY_ZONE.timestamp_opt(1_700_000_000, 0).unwrap();
        store
            .save_ticket(&Ticket {
                key: "PPC-7".to_string(),
                url: "https://jira.example.com/browse/PPC-7".to_string(),
                summary: "timeout in worker".to_string(),
                description: "TimeoutError".to_string(),
                description_filtered: "TimeoutError".to_string(),
                comments: String::new(),
                comments_filtered: String::new(),
                issue_type: "Bug".to_string(),
                status: "Open".to_string(),
                assignee: None,
                created: now,
                updated: now,
            })
            .await
            .unwrap();

        let chat = Arc::new(CountingChat::new());
        let tracker = Arc::new(FakeTracker { next_key: StdMutex::new(None) });
        let cache = coordinator().await;
        let correlator = Correlator::new(store.clone());
        let dispatcher = NotificationDispatcher::new(store.clone(), chat, tracker, correlator, cache, jira_config());

        let options = dispatcher.search_ticket_options("timeout").await.unwrap();
        assert_eq!(options.len(), 1);
        assert_eq!(options[0].value, "PPC-7");
    }
}
