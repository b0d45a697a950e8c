//! Core application: wires every component (C1–C14) together and drives the
//! startup/shutdown sequence. Grounded on the teacher's `app.rs::CoreApp`
//! (`run()` → `init()` → `start_server()`, `init_logging()`,
//! `start_background_tasks()`).

use std::sync::Arc;

use anyhow::Result;

use crate::api::ApiServer;
use crate::core::cli::{self, CliConfig};
use crate::core::config::AppConfig;
use crate::core::constants::{APP_NAME_LOWER, DISPLAY_ZONE, ENV_LOG};
use crate::core::shutdown::ShutdownService;
use crate::data::cache::CacheService;
use crate::data::chat::{AssigneeLabels, SlackChatClient};
use crate::data::objectstore::ObjectStoreClient;
use crate::data::store::SearchIndexStore;
use crate::data::tracker::JiraTrackerClient;
use crate::data::{ChatClient, Store, TrackerClient};
use crate::domain::{ArchiveIngestor, CacheCoordinator, Correlator, NotificationDispatcher, RealtimeIngestor, Scheduler, TaskPayload, TicketSync};

pub struct CoreApp {
    pub shutdown: ShutdownService,
    pub config: AppConfig,
    pub store: Arc<dyn Store>,
    pub cache: CacheCoordinator,
    pub correlator: Correlator,
    pub scheduler: Scheduler,
    pub notifier: Arc<NotificationDispatcher>,
    pub realtime: Arc<RealtimeIngestor>,
    pub archive: Arc<ArchiveIngestor>,
    pub ticket_sync: Arc<TicketSync>,
}

/// How often `post_unticketed_tracebacks_to_chat` is enqueued. The original
/// ran this off an external Celery beat schedule; a single binary owns its
/// own clock instead (§5 "legitimate scope simplification").
const POST_UNTICKETED_INTERVAL_SECS: u64 = 300;

impl CoreApp {
    /// Run the application with CLI argument parsing.
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        Self::init_logging();

        tracing::debug!("Application starting");

        let cli_config = cli::parse();
        let app = Self::init(&cli_config).await?;
        Self::start_server(app).await
    }

    async fn init(cli: &CliConfig) -> Result<Self> {
        let config = AppConfig::load(cli)?;
        let shutdown = ShutdownService::new(config.shutdown_timeout_secs);

        let cache_service = Arc::new(
            CacheService::new(&config.cache)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to initialize cache service: {e}"))?,
        );
        let cache = CacheCoordinator::new(cache_service);

        let store: Arc<dyn Store> = Arc::new(SearchIndexStore::new(config.es_address.clone(), cache.clone()));

        let object_store = ObjectStoreClient::new(config.s3.region.clone()).await;
        let archive = Arc::new(ArchiveIngestor::new(object_store, store.clone(), cache.clone()));
        let realtime = Arc::new(RealtimeIngestor::new(
            store.clone(),
            cache.clone(),
            config.papertrail_api_token.clone().unwrap_or_default(),
        ));

        let tracker: Arc<dyn TrackerClient> = Arc::new(JiraTrackerClient::new(config.jira.clone()));
        let assignees = AssigneeLabels {
            adwords: config.jira.assignee_adwords.clone(),
            bing: config.jira.assignee_bing.clone(),
            social: config.jira.assignee_social.clone(),
            grader: config.jira.assignee_grader.clone(),
        };
        let chat: Arc<dyn ChatClient> = Arc::new(SlackChatClient::new(config.slack.clone(), assignees));

        let correlator = Correlator::new(store.clone());
        let notifier = Arc::new(NotificationDispatcher::new(
            store.clone(),
            chat.clone(),
            tracker.clone(),
            correlator.clone(),
            cache.clone(),
            config.jira.clone(),
        ));
        let ticket_sync = Arc::new(TicketSync::new(tracker, store.clone(), cache.clone(), config.jira.project_key.clone()));

        let scheduler = Scheduler::new(shutdown.clone());
        Self::register_task_handlers(&scheduler, &archive, &ticket_sync, &realtime, &notifier, &chat, &store).await;

        Ok(Self { shutdown, config, store, cache, correlator, scheduler, notifier, realtime, archive, ticket_sync })
    }

    /// Wire every named task in the Scheduler's catalog (§4.11) to the
    /// component that actually performs it.
    #[allow(clippy::too_many_arguments)]
    async fn register_task_handlers(
        scheduler: &Scheduler,
        archive: &Arc<ArchiveIngestor>,
        ticket_sync: &Arc<TicketSync>,
        realtime: &Arc<RealtimeIngestor>,
        notifier: &Arc<NotificationDispatcher>,
        chat: &Arc<dyn ChatClient>,
        store: &Arc<dyn Store>,
    ) {
        {
            let archive = archive.clone();
            scheduler
                .register(
                    "parse_log_file",
                    Arc::new(move |payload| {
                        let archive = archive.clone();
                        Box::pin(async move {
                            if let TaskPayload::ParseLogFile { bucket, key } = payload {
                                archive.ingest_archive(&bucket, &key).await?;
                            }
                            Ok(())
                        })
                    }),
                )
                .await;
        }

        {
            let ticket_sync = ticket_sync.clone();
            scheduler
                .register(
                    "update_ticket",
                    Arc::new(move |payload| {
                        let ticket_sync = ticket_sync.clone();
                        Box::pin(async move {
                            if let TaskPayload::UpdateTicket { key, invalidate_cache } = payload {
                                ticket_sync.update_ticket(&key, invalidate_cache).await?;
                            }
                            Ok(())
                        })
                    }),
                )
                .await;
        }

        {
            let ticket_sync = ticket_sync.clone();
            let scheduler_for_fanout = scheduler.clone();
            scheduler
                .register(
                    "update_all_tickets",
                    Arc::new(move |payload| {
                        let ticket_sync = ticket_sync.clone();
                        let scheduler_for_fanout = scheduler_for_fanout.clone();
                        Box::pin(async move {
                            if let TaskPayload::UpdateAllTickets = payload {
                                ticket_sync.update_all_tickets(&scheduler_for_fanout).await?;
                            }
                            Ok(())
                        })
                    }),
                )
                .await;
        }

        {
            let realtime = realtime.clone();
            scheduler
                .register(
                    "realtime_update",
                    Arc::new(move |payload| {
                        let realtime = realtime.clone();
                        Box::pin(async move {
                            if let TaskPayload::RealtimeUpdate { start, end } = payload {
                                realtime.run(start, end).await?;
                            }
                            Ok(())
                        })
                    }),
                )
                .await;
        }

        {
            let correlator = Correlator::new(store.clone());
            scheduler
                .register(
                    "hydrate_cache",
                    Arc::new(move |_payload| {
                        let correlator = correlator.clone();
                        Box::pin(async move {
                            let now = chrono::Utc::now().with_timezone(&DISPLAY_ZONE);
                            let today = now.date_naive();
                            correlator
                                .correlate_day(today, crate::domain::CorrelationFilter::HasTicket, &Default::default(), now)
                                .await?;
                            Ok(())
                        })
                    }),
                )
                .await;
        }

        {
            let notifier = notifier.clone();
            scheduler
                .register(
                    "post_unticketed_tracebacks_to_chat",
                    Arc::new(move |_payload| {
                        let notifier = notifier.clone();
                        Box::pin(async move {
                            let now = chrono::Utc::now().with_timezone(&DISPLAY_ZONE);
                            let today = now.date_naive();
                            notifier.post_unticketed_tracebacks_to_chat(today, now).await?;
                            Ok(())
                        })
                    }),
                )
                .await;
        }

        {
            let notifier = notifier.clone();
            scheduler
                .register(
                    "create_ticket",
                    Arc::new(move |payload| {
                        let notifier = notifier.clone();
                        Box::pin(async move {
                            if let TaskPayload::CreateTicket { origin_id, assign_to } = payload {
                                notifier.create_ticket(&origin_id, &assign_to).await?;
                            }
                            Ok(())
                        })
                    }),
                )
                .await;
        }

        {
            let notifier = notifier.clone();
            scheduler
                .register(
                    "create_comment_on_existing_ticket",
                    Arc::new(move |payload| {
                        let notifier = notifier.clone();
                        Box::pin(async move {
                            if let TaskPayload::CreateCommentOnExistingTicket { key, origin_id } = payload {
                                notifier.create_comment_on_existing_ticket(&key, &origin_id).await?;
                            }
                            Ok(())
                        })
                    }),
                )
                .await;
        }

        {
            let chat = chat.clone();
            scheduler
                .register(
                    "tell_chat_about_ticket",
                    Arc::new(move |payload| {
                        let chat = chat.clone();
                        Box::pin(async move {
                            if let TaskPayload::TellChatAboutTicket { channel, message } = payload {
                                chat.post_as_real_user(&channel, &message).await?;
                            }
                            Ok(())
                        })
                    }),
                )
                .await;
        }
    }

    fn init_logging() {
        let default_filter = format!("info,{APP_NAME_LOWER}=info");

        let filter = std::env::var(ENV_LOG).or_else(|_| std::env::var("RUST_LOG")).unwrap_or(default_filter);

        tracing_subscriber::fmt()
            .with_target(false)
            .with_thread_ids(false)
            .with_level(true)
            .with_ansi(true)
            .compact()
            .with_env_filter(filter)
            .init();
    }

    async fn start_server(app: Self) -> Result<()> {
        app.shutdown.install_signal_handlers();
        app.start_background_tasks().await;

        tracing::info!(bind_address = %app.config.server.bind_address, "tracewatch starting");

        let server = ApiServer::new(app);
        let app = server.start().await?;
        app.shutdown.shutdown().await;

        Ok(())
    }

    /// Spawn the loop that periodically drives `post_unticketed_tracebacks_to_chat`
    /// (§4.12) — everything else in the task catalog is triggered by an HTTP
    /// call or another task, not the clock.
    pub async fn start_background_tasks(&self) {
        let scheduler = self.scheduler.clone();
        let mut shutdown_rx = self.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(POST_UNTICKETED_INTERVAL_SECS));
            loop {
                tokio::select! {
                    biased;
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        if let Err(e) = scheduler.enqueue(TaskPayload::PostUnticketedTracebacksToChat, None).await {
                            tracing::warn!(error = %e, "failed to enqueue post_unticketed_tracebacks_to_chat");
                        }
                    }
                }
            }
        });
        self.shutdown.register(handle).await;
    }
}
