//! C11 Scheduler: named in-process task queue (§4.11, §5). A pool of
//! `tokio::spawn` worker loops over per-task-name `mpsc` queues stands in for
//! the original Celery/Redis broker (§5 "legitimate scope simplification") —
//! FIFO-per-name delivery, TTL expiration at dequeue, and delayed dispatch
//! are preserved without an external broker dependency.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::DateTime;
use chrono_tz::Tz;
use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::core::ShutdownService;
use crate::data::error::SchedulerError;

pub type TaskFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
pub type TaskHandler = Arc<dyn Fn(TaskPayload) -> TaskFuture + Send + Sync>;

/// Task catalog (§4.11 "Task catalog"). One variant per named task; payloads
/// match the enumerated signatures.
#[derive(Debug, Clone)]
pub enum TaskPayload {
    ParseLogFile { bucket: String, key: String },
    UpdateTicket { key: String, invalidate_cache: bool },
    UpdateAllTickets,
    RealtimeUpdate { start: DateTime<Tz>, end: DateTime<Tz> },
    HydrateCache,
    PostUnticketedTracebacksToChat,
    CreateTicket { origin_id: String, assign_to: String },
    CreateCommentOnExistingTicket { key: String, origin_id: String },
    /// Posted as a real user, not a bot (§4.11, §9).
    TellChatAboutTicket { channel: String, message: String },
}

impl TaskPayload {
    pub fn name(&self) -> &'static str {
        match self {
            TaskPayload::ParseLogFile { .. } => "parse_log_file",
            TaskPayload::UpdateTicket { .. } => "update_ticket",
            TaskPayload::UpdateAllTickets => "update_all_tickets",
            TaskPayload::RealtimeUpdate { .. } => "realtime_update",
            TaskPayload::HydrateCache => "hydrate_cache",
            TaskPayload::PostUnticketedTracebacksToChat => "post_unticketed_tracebacks_to_chat",
            TaskPayload::CreateTicket { .. } => "create_ticket",
            TaskPayload::CreateCommentOnExistingTicket { .. } => "create_comment_on_existing_ticket",
            TaskPayload::TellChatAboutTicket { .. } => "tell_chat_about_ticket",
        }
    }
}

struct Enqueued {
    payload: TaskPayload,
    enqueued_at: Instant,
    expires_in: Option<Duration>,
    epoch: u64,
}

/// Named task queue. `register` wires a handler and spawns its worker loop;
/// `enqueue`/`apply_delay` are the producer side.
#[derive(Clone)]
pub struct Scheduler {
    queues: Arc<DashMap<&'static str, mpsc::Sender<Enqueued>>>,
    shutdown: ShutdownService,
    /// Bumped by `purge_all` (`PUT /api/purge_queue`); a worker drops any
    /// task stamped with an epoch older than the current one, so an
    /// in-flight backlog can be discarded without racing newly enqueued work.
    epoch: Arc<AtomicU64>,
}

impl Scheduler {
    pub fn new(shutdown: ShutdownService) -> Self {
        Self { queues: Arc::new(DashMap::new()), shutdown, epoch: Arc::new(AtomicU64::new(0)) }
    }

    /// Start a worker loop for `name`, draining its queue one task at a time
    /// until shutdown (§5 "Within a worker, execution is sequential").
    pub async fn register(&self, name: &'static str, handler: TaskHandler) {
        let (tx, mut rx) = mpsc::channel::<Enqueued>(1024);
        self.queues.insert(name, tx);

        let epoch = self.epoch.clone();
        let mut shutdown_rx = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    received = rx.recv() => {
                        let Some(task) = received else { break };
                        if task.epoch < epoch.load(Ordering::SeqCst) {
                            tracing::info!(task = name, "dropping task purged before dequeue");
                            continue;
                        }
                        if let Some(expires_in) = task.expires_in {
                            if task.enqueued_at.elapsed() > expires_in {
                                tracing::warn!(task = name, "dropping expired task");
                                continue;
                            }
                        }
                        if let Err(e) = (handler)(task.payload).await {
                            tracing::error!(task = name, error = %e, "task failed");
                        }
                    }
                }
            }
        });
        self.shutdown.register(handle).await;
    }

    /// Enqueue `payload` for immediate pickup, optionally dropped if not
    /// dequeued within `expires_in` (§4.11).
    pub async fn enqueue(&self, payload: TaskPayload, expires_in: Option<Duration>) -> Result<(), SchedulerError> {
        if self.shutdown.is_triggered() {
            return Err(SchedulerError::ShuttingDown);
        }
        let name = payload.name();
        let tx = self
            .queues
            .get(name)
            .map(|entry| entry.clone())
            .ok_or_else(|| SchedulerError::UnknownTask(name.to_string()))?;

        tx.send(Enqueued { payload, enqueued_at: Instant::now(), expires_in, epoch: self.epoch.load(Ordering::SeqCst) })
            .await
            .map_err(|_| SchedulerError::ShuttingDown)
    }

    /// `PUT /api/purge_queue`: discard every task currently sitting in a
    /// queue, without disturbing anything enqueued afterward.
    pub fn purge_all(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// Dispatch after `delay` (§4.11 `apply_delay`), used for cache-warming
    /// coordination (hydrate_cache after an invalidate, §4.13).
    pub fn apply_delay(&self, payload: TaskPayload, expires_in: Option<Duration>, delay: Duration) {
        let scheduler = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = scheduler.enqueue(payload, expires_in).await {
                tracing::warn!(error = %e, "delayed task dispatch failed");
            }
        });
    }
}
