//! C5 ArchiveIngestor and C6 RealtimeIngestor (§4.5, §4.6): both funnel raw
//! tab-delimited log records through the same C1→C4 scan and differ only in
//! where the bytes come from. Grounded on
//! `src/lib/papertrail/realtime_updater.py` (subprocess + backoff) and
//! `src/lib/papertrail/json_parser.py` (JSON-to-tab-delimited projection) in
//! the original implementation.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Timelike};
use chrono_tz::Tz;
use serde_json::Value;
use tokio::process::Command;

use crate::core::constants::RING_CAPACITY;
use crate::data::error::{ObjectStoreError, SchedulerError};
use crate::data::{ObjectStoreClient, Store, objectstore};
use crate::utils::retry::{DEFAULT_MAX_ATTEMPTS, retry_with_backoff_async};

use super::apicall::extract_api_call;
use super::cache_coordinator::CacheCoordinator;
use super::enrich::{EnrichmentLine, enrich};
use super::model::{ApiCall, Traceback};
use super::parser::parse_line;
use super::scheduler::{Scheduler, TaskPayload};
use super::traceback::TracebackAssembler;

/// Counts from one ingestion pass, logged by the caller (§4.5, §4.6).
#[derive(Debug, Default, Clone, Copy)]
pub struct IngestStats {
    pub tracebacks: usize,
    pub api_calls: usize,
    pub malformed_lines: u64,
    /// `false` when the pass bailed out early on a permanent storage error
    /// (403/404) without scanning or writing anything (§4.5, §8 S5).
    pub ok: bool,
}

/// The shared C1→C4 scan used by both ingestors: parse, assemble (C2),
/// extract (C3), enrich (C4). Keeps its own line buffer for enrichment's
/// backward ERROR-line scan since `TracebackAssembler`'s ring is private.
struct IngestScanner {
    assembler: TracebackAssembler,
    enrichment_ring: VecDeque<String>,
}

impl IngestScanner {
    fn new() -> Self {
        Self { assembler: TracebackAssembler::new(), enrichment_ring: VecDeque::with_capacity(RING_CAPACITY) }
    }

    /// Feed one raw tab-delimited record, producing whichever of a
    /// `Traceback` / `ApiCall` it yields.
    fn scan_line(&mut self, raw: &str) -> (Option<Traceback>, Option<ApiCall>) {
        let parsed = match parse_line(raw) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed log line");
                self.assembler.ingest(raw);
                return (None, None);
            }
        };

        let api_call = extract_api_call(&parsed);
        let mut traceback = self.assembler.ingest(raw);

        if let Some(tb) = traceback.as_mut() {
            let lines: Vec<EnrichmentLine> =
                self.enrichment_ring.iter().map(|l| EnrichmentLine { formatted_line: l }).collect();
            enrich(tb, &lines);
        }

        if self.enrichment_ring.len() >= RING_CAPACITY {
            self.enrichment_ring.pop_front();
        }
        self.enrichment_ring.push_back(parsed.formatted_line);

        (traceback, api_call)
    }

    fn malformed_count(&self) -> u64 {
        self.assembler.malformed_count()
    }
}

/// C5: pulls one gzip-compressed archive out of object storage and ingests
/// every line in it (§4.5).
pub struct ArchiveIngestor {
    object_store: ObjectStoreClient,
    store: Arc<dyn Store>,
    cache: CacheCoordinator,
}

impl ArchiveIngestor {
    pub fn new(object_store: ObjectStoreClient, store: Arc<dyn Store>, cache: CacheCoordinator) -> Self {
        Self { object_store, store, cache }
    }

    /// §4.5: download, decompress, scan every line, persist. A download
    /// failure retries on the named backoff schedule, but only when
    /// `ObjectStoreError::is_transient` says so: a 403 or 404 is terminal for
    /// that key and returns `(ok=false)` after exactly one warning, with the
    /// 403 case calling out that a skewed system clock is a frequent cause
    /// (§8 S5).
    pub async fn ingest_archive(&self, bucket: &str, key: &str) -> anyhow::Result<IngestStats> {
        let download = retry_with_backoff_async(DEFAULT_MAX_ATTEMPTS, ObjectStoreError::is_transient, || {
            self.object_store.download(bucket, key)
        })
        .await;

        let raw = match download {
            Ok((bytes, _attempts)) => bytes,
            Err((e, _attempts)) => {
                return match stats_for_permanent_download_error(&e) {
                    Some(stats) => Ok(stats),
                    None => Err(e.into()),
                };
            }
        };
        let text = objectstore::decompress(&raw)?;

        let mut scanner = IngestScanner::new();
        let mut tracebacks = Vec::new();
        let mut api_calls = Vec::new();

        for line in text.lines() {
            if line.is_empty() {
                continue;
            }
            let (traceback, api_call) = scanner.scan_line(line);
            tracebacks.extend(traceback);
            api_calls.extend(api_call);
        }

        for tb in &tracebacks {
            self.store.save_traceback(tb).await?;
        }
        if !api_calls.is_empty() {
            self.store.bulk_save_api_calls(&api_calls).await?;
        }
        if !tracebacks.is_empty() {
            self.cache.invalidate_traceback().await.ok();
        }

        let stats =
            IngestStats { tracebacks: tracebacks.len(), api_calls: api_calls.len(), malformed_lines: scanner.malformed_count(), ok: true };
        tracing::info!(bucket, key, tracebacks = stats.tracebacks, api_calls = stats.api_calls, "archive ingested");
        Ok(stats)
    }
}

/// §8 S5: a 403 or 404 ends the pass immediately. Logs the single required
/// warning (with clock-skew guidance baked into `Forbidden`'s `Display`) and
/// returns the `(ok=false)` stats the caller should hand back as-is; any
/// other error is the caller's to propagate.
fn stats_for_permanent_download_error(e: &ObjectStoreError) -> Option<IngestStats> {
    match e {
        ObjectStoreError::Forbidden { .. } | ObjectStoreError::NotFound { .. } => {
            tracing::warn!(error = %e, "archive download failed permanently");
            Some(IngestStats { ok: false, ..Default::default() })
        }
        _ => None,
    }
}

/// C6: tails a short window of recent logs via the papertrail CLI and feeds
/// them through the same scan (§4.6).
pub struct RealtimeIngestor {
    store: Arc<dyn Store>,
    cache: CacheCoordinator,
    papertrail_api_token: String,
}

/// Subprocess retries use the original's plain exponential scheme
/// (`2^attempt` seconds), distinct from the network-call backoff table used
/// everywhere else in this service.
const MAX_SUBPROCESS_ATTEMPTS: u32 = 10;
const PAPERTRAIL_BIN: &str = "papertrail";

impl RealtimeIngestor {
    pub fn new(store: Arc<dyn Store>, cache: CacheCoordinator, papertrail_api_token: String) -> Self {
        Self { store, cache, papertrail_api_token }
    }

    /// §4.6 `enqueue(end_time?)`: compute the trailing one-minute window and
    /// hand it to the Scheduler with a 60s expiration, so a slow consumer
    /// drops stale windows rather than piling them up.
    pub async fn enqueue(&self, scheduler: &Scheduler, end_time: Option<DateTime<Tz>>, now: DateTime<Tz>) -> Result<(), SchedulerError> {
        let (start, end) = realtime_window(end_time, now);
        scheduler.enqueue(TaskPayload::RealtimeUpdate { start, end }, Some(std::time::Duration::from_secs(60))).await
    }

    /// §4.6 `run(start_time, end_time)`: invoke the papertrail CLI, retrying
    /// on failure with increasing backoff, then scan its JSON-lines output.
    pub async fn run(&self, start_time: DateTime<Tz>, end_time: DateTime<Tz>) -> anyhow::Result<IngestStats> {
        let output = self.call_papertrail_cli(&start_time, &end_time).await;
        let Some(stdout) = output else {
            tracing::warn!(%start_time, %end_time, "papertrail cli failed after all retries");
            return Ok(IngestStats { ok: false, ..Default::default() });
        };

        let mut scanner = IngestScanner::new();
        let mut tracebacks = Vec::new();
        let mut api_calls = Vec::new();

        for json_line in stdout.lines() {
            if json_line.is_empty() {
                continue;
            }
            let Some(projected) = project_event(json_line) else {
                tracing::warn!(line = %json_line, "skipping unparsable papertrail event");
                continue;
            };
            let (traceback, api_call) = scanner.scan_line(&projected);
            tracebacks.extend(traceback);
            api_calls.extend(api_call);
        }

        let saved = tracebacks.len();
        for tb in &tracebacks {
            self.store.save_traceback(tb).await?;
        }
        if saved > 0 {
            tracing::info!(count = saved, "saved tracebacks");
            self.cache.invalidate_traceback().await.ok();
        }

        if !api_calls.is_empty() {
            tracing::info!(count = api_calls.len(), "saving api calls");
            self.store.bulk_save_api_calls(&api_calls).await?;
        } else {
            tracing::info!(%start_time, %end_time, "no api calls found");
        }

        tracing::info!(%start_time, %end_time, "done with realtime window");
        Ok(IngestStats { tracebacks: saved, api_calls: api_calls.len(), malformed_lines: scanner.malformed_count(), ok: true })
    }

    async fn call_papertrail_cli(&self, start_time: &DateTime<Tz>, end_time: &DateTime<Tz>) -> Option<String> {
        for attempt in 0..MAX_SUBPROCESS_ATTEMPTS {
            match self.spawn_papertrail(start_time, end_time).await {
                Ok(stdout) => return Some(stdout),
                Err(e) => {
                    tracing::info!(error = %e, attempt, "subprocess failed");
                    tokio::time::sleep(subprocess_backoff(attempt)).await;
                }
            }
        }
        None
    }

    async fn spawn_papertrail(&self, start_time: &DateTime<Tz>, end_time: &DateTime<Tz>) -> anyhow::Result<String> {
        let output = Command::new(PAPERTRAIL_BIN)
            .arg("--min-time")
            .arg(start_time.to_rfc3339())
            .arg("--max-time")
            .arg(end_time.to_rfc3339())
            .arg("-j")
            .env("PAPERTRAIL_API_TOKEN", &self.papertrail_api_token)
            .output()
            .await?;

        if !output.stderr.is_empty() {
            anyhow::bail!("papertrail cli stderr: {}", String::from_utf8_lossy(&output.stderr));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

fn subprocess_backoff(attempt: u32) -> std::time::Duration {
    std::time::Duration::from_secs_f64(2f64.powi(attempt as i32))
}

/// §4.6 window math: `[end_time-1m, end_time-1s]`, defaulting `end_time` to
/// `now - 1 minute` rounded down to the minute.
fn realtime_window(end_time: Option<DateTime<Tz>>, now: DateTime<Tz>) -> (DateTime<Tz>, DateTime<Tz>) {
    let end_time = end_time.unwrap_or_else(|| round_down_to_minute(now) - chrono::Duration::minutes(1));
    (end_time - chrono::Duration::minutes(1), end_time - chrono::Duration::seconds(1))
}

fn round_down_to_minute(t: DateTime<Tz>) -> DateTime<Tz> {
    t - chrono::Duration::seconds(t.second() as i64) - chrono::Duration::nanoseconds(t.nanosecond() as i64)
}

/// Mirror `json_parser.yield_lines`: one papertrail JSON event in, one
/// 10-field tab-delimited record out.
fn project_event(json_line: &str) -> Option<String> {
    let event: Value = serde_json::from_str(json_line).ok()?;
    let field = |name: &str| event.get(name).and_then(Value::as_str).map(str::to_string);
    let field_num = |name: &str| {
        event.get(name).and_then(|v| {
            v.as_str().map(str::to_string).or_else(|| v.as_i64().map(|n| n.to_string()))
        })
    };

    let id = field_num("id")?;
    let generated_at = field("generated_at")?;
    let received_at = field("received_at")?;
    let source_id = field_num("source_id")?;
    let source_name = field("source_name")?;
    let source_ip = field("source_ip")?;
    let facility = field("facility")?;
    let severity = field("severity")?;
    let program = field("program")?;
    let message = field("message")?;

    Some(format!("{id}\t{generated_at}\t{received_at}\t{source_id}\t{source_name}\t{source_ip}\t{facility}\t{severity}\t{program}\t{message}"))
}
