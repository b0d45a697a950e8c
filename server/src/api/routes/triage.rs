//! The triage HTTP surface (§6): the day view, the manual ingestion
//! triggers, the synchronous ticket actions, the chat callback, and the
//! operational endpoints (`invalidate_cache`, `purge_queue`, `healthz`).
//! Shaped on the teacher's `favorites/mod.rs` (`XApiState` + `routes(deps) ->
//! Router<()>` + one handler per route).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Form, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use serde_json::Value;

use crate::api::types::{ApiError, PlainText, PlainTextError};
use crate::core::config::S3Config;
use crate::core::constants::DISPLAY_ZONE;
use crate::data::Store;
use crate::data::error::SchedulerError;
use crate::domain::notification::render_similar_link;
use crate::domain::{
    CacheCoordinator, Correlator, CorrelationFilter, CorrelationResult, MatchLevel, NotificationDispatcher,
    NotifyError, RealtimeIngestor, Scheduler, TaskPayload,
};

#[derive(Clone)]
pub struct TriageApiState {
    pub correlator: Correlator,
    pub cache: CacheCoordinator,
    pub scheduler: Scheduler,
    pub store: Arc<dyn Store>,
    pub notifier: Arc<NotificationDispatcher>,
    pub realtime: Arc<RealtimeIngestor>,
    pub s3: S3Config,
}

#[allow(clippy::too_many_arguments)]
pub fn routes(
    correlator: Correlator,
    cache: CacheCoordinator,
    scheduler: Scheduler,
    store: Arc<dyn Store>,
    notifier: Arc<NotificationDispatcher>,
    realtime: Arc<RealtimeIngestor>,
    s3: S3Config,
) -> Router<()> {
    let state = TriageApiState { correlator, cache, scheduler, store, notifier, realtime, s3 };

    Router::new()
        .route("/", get(list_day))
        .route("/api/parse_s3", post(parse_s3))
        .route("/api/parse_s3_day", post(parse_s3_day))
        .route("/api/parse_s3_date_range", post(parse_s3_date_range))
        .route("/realtime_update", post(realtime_update))
        .route("/hide_traceback", post(hide_traceback))
        .route("/restore_all", post(restore_all))
        .route("/create_jira_ticket", post(create_jira_ticket))
        .route("/jira_comment", post(jira_comment))
        .route("/jira_formatted_list/{id}", get(jira_formatted_list))
        .route("/slack-callback", post(slack_callback))
        .route("/api/update_jira_db", put(update_jira_db))
        .route("/api/invalidate_cache", put(invalidate_cache_all))
        .route("/api/invalidate_cache/{name}", put(invalidate_cache_named))
        .route("/api/purge_queue", put(purge_queue))
        .route("/healthz", get(healthz))
        .with_state(state)
}

fn internal<E: std::fmt::Display>(e: E) -> ApiError {
    ApiError::internal(e.to_string())
}

#[derive(Deserialize)]
struct ListDayQuery {
    #[serde(default)]
    days_ago: i64,
    #[serde(default = "default_filter")]
    filter: String,
}

fn default_filter() -> String {
    "All Tracebacks".to_string()
}

/// `GET /` (§6): the triage page's data, as JSON — rendering it to HTML is
/// a collaborator's job, out of scope here.
async fn list_day(
    State(state): State<TriageApiState>,
    Query(query): Query<ListDayQuery>,
) -> Result<Json<Vec<CorrelationResult>>, ApiError> {
    let filter = CorrelationFilter::parse(&query.filter)
        .ok_or_else(|| ApiError::bad_request("INVALID_FILTER", format!("unrecognized filter: {}", query.filter)))?;

    let now = Utc::now().with_timezone(&DISPLAY_ZONE);
    let date = now.date_naive() - chrono::Duration::days(query.days_ago);
    let hidden = state.cache.hidden_traceback_ids().await.map_err(internal)?;
    let results = state.correlator.correlate_day(date, filter, &hidden, now).await.map_err(internal)?;
    Ok(Json(results))
}

#[derive(Deserialize)]
struct ParseS3Body {
    bucket: String,
    key: String,
}

/// `POST /api/parse_s3` (§6, §4.11 `parse_log_file`).
async fn parse_s3(State(state): State<TriageApiState>, Json(body): Json<ParseS3Body>) -> Result<StatusCode, ApiError> {
    state
        .scheduler
        .enqueue(TaskPayload::ParseLogFile { bucket: body.bucket, key: body.key }, None)
        .await
        .map_err(internal)?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Deserialize)]
struct ParseS3DayBody {
    date: String,
}

/// `POST /api/parse_s3_day` (§4.14 `ingest_day`): fans out one
/// `parse_log_file` task per hour of `date`.
async fn parse_s3_day(State(state): State<TriageApiState>, Json(body): Json<ParseS3DayBody>) -> Result<StatusCode, ApiError> {
    let date = NaiveDate::parse_from_str(&body.date, "%Y-%m-%d")
        .map_err(|_| ApiError::bad_request("INVALID_DATE", "date must be YYYY-MM-DD"))?;
    fan_out_day(&state, date).await.map_err(internal)?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Deserialize)]
struct ParseS3DateRangeBody {
    start_date: String,
    end_date: String,
}

async fn parse_s3_date_range(
    State(state): State<TriageApiState>,
    Json(body): Json<ParseS3DateRangeBody>,
) -> Result<StatusCode, ApiError> {
    let start = NaiveDate::parse_from_str(&body.start_date, "%Y-%m-%d")
        .map_err(|_| ApiError::bad_request("INVALID_START_DATE", "start_date must be YYYY-MM-DD"))?;
    let end = NaiveDate::parse_from_str(&body.end_date, "%Y-%m-%d")
        .map_err(|_| ApiError::bad_request("INVALID_END_DATE", "end_date must be YYYY-MM-DD"))?;
    if start > end {
        return Err(ApiError::bad_request("INVALID_RANGE", "start_date must not be after end_date"));
    }

    let mut date = start;
    while date <= end {
        fan_out_day(&state, date).await.map_err(internal)?;
        date += chrono::Duration::days(1);
    }
    Ok(StatusCode::ACCEPTED)
}

async fn fan_out_day(state: &TriageApiState, date: NaiveDate) -> Result<(), SchedulerError> {
    for hour in 0..24u32 {
        let key = format!("{}/dt={}/{}-{:02}.tsv.gz", state.s3.key_prefix, date.format("%Y-%m-%d"), date.format("%Y-%m-%d"), hour);
        state.scheduler.enqueue(TaskPayload::ParseLogFile { bucket: state.s3.bucket.clone(), key }, None).await?;
    }
    Ok(())
}

#[derive(Deserialize, Default)]
struct RealtimeUpdateBody {
    end_time: Option<String>,
}

/// `POST /realtime_update` (§4.6 `enqueue`).
async fn realtime_update(
    State(state): State<TriageApiState>,
    Json(body): Json<RealtimeUpdateBody>,
) -> Result<StatusCode, ApiError> {
    let now = Utc::now().with_timezone(&DISPLAY_ZONE);
    let end_time = match body.end_time {
        Some(raw) => Some(
            parse_display_timestamp(&raw)
                .ok_or_else(|| ApiError::bad_request("INVALID_END_TIME", "end_time must be RFC3339"))?,
        ),
        None => None,
    };
    state.realtime.enqueue(&state.scheduler, end_time, now).await.map_err(internal)?;
    Ok(StatusCode::ACCEPTED)
}

fn parse_display_timestamp(s: &str) -> Option<DateTime<Tz>> {
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc).with_timezone(&DISPLAY_ZONE))
}

#[derive(Deserialize)]
struct HideTracebackBody {
    traceback_text: String,
}

/// `POST /hide_traceback` (§3 `HiddenTracebackSet`): resolve the text to
/// every similar-matching `origin_id` and dismiss each from the day view.
async fn hide_traceback(
    State(state): State<TriageApiState>,
    Json(body): Json<HideTracebackBody>,
) -> Result<StatusCode, ApiError> {
    let matches = state
        .store
        .get_matching_tracebacks(&body.traceback_text, MatchLevel::Similar, 100)
        .await
        .map_err(internal)?;
    for traceback in matches {
        state.cache.hide_traceback(&traceback.origin_id).await.ok();
    }
    Ok(StatusCode::OK)
}

async fn restore_all(State(state): State<TriageApiState>) -> Result<StatusCode, ApiError> {
    state.cache.restore_all_tracebacks().await.map_err(internal)?;
    Ok(StatusCode::OK)
}

#[derive(Deserialize)]
struct CreateJiraTicketBody {
    origin_papertrail_id: String,
}

/// `POST /create_jira_ticket` (§4.14 `create_ticket`, no assignee): reuses
/// the chat callback's `create_ticket` with an unassigned team.
async fn create_jira_ticket(State(state): State<TriageApiState>, Json(body): Json<CreateJiraTicketBody>) -> Response {
    match state.notifier.create_ticket(&body.origin_papertrail_id, "UNASSIGNED").await {
        Ok(key) => PlainText(format!("{key} created")).into_response(),
        Err(NotifyError::TicketAlreadyExists(key)) => {
            PlainTextError(StatusCode::CONFLICT, format!("a ticket for this traceback already exists: {key}")).into_response()
        }
        Err(NotifyError::TracebackNotFound(id)) => {
            PlainTextError(StatusCode::NOT_FOUND, format!("traceback {id} not found")).into_response()
        }
        Err(e) => PlainTextError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Deserialize)]
struct JiraCommentBody {
    origin_papertrail_id: String,
    issue_key: String,
}

/// `POST /jira_comment` (§4.14 `comment_on_ticket`).
async fn jira_comment(State(state): State<TriageApiState>, Json(body): Json<JiraCommentBody>) -> Response {
    match state.notifier.create_comment_on_existing_ticket(&body.issue_key, &body.origin_papertrail_id).await {
        Ok(()) => PlainText(format!("commented on {}", body.issue_key)).into_response(),
        Err(NotifyError::TracebackNotFound(id)) => {
            PlainTextError(StatusCode::NOT_FOUND, format!("traceback {id} not found")).into_response()
        }
        Err(e) => PlainTextError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

/// `GET /jira_formatted_list/<id>` (§6): the links a ticket description
/// embeds, rendered as plain text for pasting by hand.
async fn jira_formatted_list(State(state): State<TriageApiState>, Path(id): Path<String>) -> Response {
    let traceback = match state.store.get_traceback(&id).await {
        Ok(Some(t)) => t,
        Ok(None) => return PlainTextError(StatusCode::NOT_FOUND, format!("traceback {id} not found")).into_response(),
        Err(e) => return PlainTextError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };

    let similar = match state.store.get_matching_tracebacks(&traceback.traceback_text, MatchLevel::Exact, 100).await {
        Ok(s) => s,
        Err(e) => return PlainTextError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };

    let body = similar.iter().map(render_similar_link).collect::<Vec<_>>().join("\n");
    PlainText(body).into_response()
}

/// `POST /slack-callback` (§4.12): the interactive message payload arrives
/// as a URL-encoded form with a single `payload` field holding JSON, in one
/// of two shapes — an action dispatch (`actions`) or a type-ahead option
/// load (`name`/`value`).
async fn slack_callback(State(state): State<TriageApiState>, Form(form): Form<HashMap<String, String>>) -> Response {
    let Some(payload) = form.get("payload") else {
        return PlainTextError(StatusCode::BAD_REQUEST, "missing payload".to_string()).into_response();
    };
    let value: Value = match serde_json::from_str(payload) {
        Ok(v) => v,
        Err(_) => return PlainTextError(StatusCode::BAD_REQUEST, "malformed payload".to_string()).into_response(),
    };

    if let Some(actions) = value.get("actions").and_then(Value::as_array) {
        let origin_id = value.get("callback_id").and_then(Value::as_str).unwrap_or_default();
        let Some(action) = actions.first() else {
            return Json(serde_json::json!({})).into_response();
        };
        let selected = action.pointer("/selected_options/0/value").and_then(Value::as_str).unwrap_or_default();

        match action.get("name").and_then(Value::as_str).unwrap_or_default() {
            "create_ticket" => {
                if let Err(e) = state.notifier.create_ticket(origin_id, selected).await {
                    tracing::warn!(error = %e, "create_ticket chat callback failed");
                }
            }
            "add_to_existing_ticket" => {
                if let Err(e) = state.notifier.create_comment_on_existing_ticket(selected, origin_id).await {
                    tracing::warn!(error = %e, "add_to_existing_ticket chat callback failed");
                }
            }
            other => tracing::warn!(action = other, "unrecognized chat callback action"),
        }
        return Json(serde_json::json!({})).into_response();
    }

    let query = value.get("value").and_then(Value::as_str).unwrap_or_default();
    match state.notifier.search_ticket_options(query).await {
        Ok(options) => Json(serde_json::json!({ "options": options })).into_response(),
        Err(e) => PlainTextError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Deserialize, Default)]
struct UpdateJiraDbBody {
    issue_key: Option<String>,
    all: Option<bool>,
}

/// `PUT /api/update_jira_db` (§4.10): exactly one of `issue_key` or
/// `all:true`.
async fn update_jira_db(State(state): State<TriageApiState>, Json(body): Json<UpdateJiraDbBody>) -> Result<StatusCode, ApiError> {
    match (body.issue_key, body.all) {
        (Some(key), None) => {
            state
                .scheduler
                .enqueue(TaskPayload::UpdateTicket { key, invalidate_cache: true }, None)
                .await
                .map_err(internal)?;
        }
        (None, Some(true)) => {
            state.scheduler.enqueue(TaskPayload::UpdateAllTickets, None).await.map_err(internal)?;
        }
        _ => return Err(ApiError::bad_request("INVALID_BODY", "expected exactly one of issue_key or all:true")),
    }
    Ok(StatusCode::ACCEPTED)
}

async fn invalidate_cache_region(state: &TriageApiState, name: Option<&str>) -> Result<StatusCode, ApiError> {
    match name {
        Some("traceback") => {
            state.cache.invalidate_traceback().await.map_err(internal)?;
        }
        Some("jira") => {
            state.cache.invalidate_jira().await.map_err(internal)?;
        }
        Some(other) => return Err(ApiError::bad_request("UNKNOWN_REGION", format!("unknown cache region: {other}"))),
        None => {
            state.cache.invalidate_traceback().await.map_err(internal)?;
            state.cache.invalidate_jira().await.map_err(internal)?;
        }
    }
    state.scheduler.apply_delay(TaskPayload::HydrateCache, Some(Duration::from_secs(60)), Duration::ZERO);
    Ok(StatusCode::OK)
}

/// `PUT /api/invalidate_cache` (§4.13): both regions.
async fn invalidate_cache_all(State(state): State<TriageApiState>) -> Result<StatusCode, ApiError> {
    invalidate_cache_region(&state, None).await
}

/// `PUT /api/invalidate_cache/<name>` (§4.13): one named region.
async fn invalidate_cache_named(State(state): State<TriageApiState>, Path(name): Path<String>) -> Result<StatusCode, ApiError> {
    invalidate_cache_region(&state, Some(&name)).await
}

/// `PUT /api/purge_queue` (§4.11).
async fn purge_queue(State(state): State<TriageApiState>) -> StatusCode {
    state.scheduler.purge_all();
    StatusCode::OK
}

/// `GET /healthz` (§6): index and cache reachable.
async fn healthz(State(state): State<TriageApiState>) -> StatusCode {
    let index_ok = state.store.get_tracebacks(None, None, 1).await.is_ok();
    let cache_ok = state.cache.health_check().await.is_ok();
    if index_ok && cache_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_display_timestamp_accepts_rfc3339_with_offset() {
        let dt = parse_display_timestamp("2024-03-01T12:00:00-05:00").unwrap();
        assert_eq!(dt.timezone(), DISPLAY_ZONE);
    }

    #[test]
    fn test_parse_display_timestamp_rejects_garbage() {
        assert!(parse_display_timestamp("not a timestamp").is_none());
    }

    #[test]
    fn test_default_filter_is_all_tracebacks() {
        assert_eq!(default_filter(), "All Tracebacks");
    }
}
