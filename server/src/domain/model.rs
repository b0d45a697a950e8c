//! Data model (spec §3): Traceback, ApiCall, Ticket, and the two session/TTL
//! behaviors (HiddenTracebackSet, SeenTracebackFlag) that belong to the web
//! boundary rather than a struct of their own.

use chrono::{DateTime, Datelike};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// A multi-line Python exception report with surrounding context (§3).
///
/// `origin_id` is the primary key: an opaque 18-digit id from the log
/// aggregator, compared as a string (never parsed as an integer — see
/// SPEC_FULL §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Traceback {
    pub origin_id: String,
    pub origin_timestamp: DateTime<Tz>,
    pub instance_id: String,
    pub program_name: String,
    pub traceback_text: String,
    pub traceback_plus_context_text: String,
    pub raw_traceback_text: String,
    pub raw_full_text: String,
    pub profile_name: Option<String>,
    pub username: Option<String>,
}

/// One authenticated request timing (§3). Stored in a monthly-partitioned
/// index keyed by `YYYY-MM` of `timestamp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiCall {
    pub papertrail_id: String,
    pub timestamp: DateTime<Tz>,
    pub instance_id: String,
    pub program_name: String,
    pub api_name: String,
    pub method: String,
    pub profile_name: Option<String>,
    pub username: String,
    pub duration_ms: u64,
    pub memory_final_mb: Option<i64>,
    pub memory_delta_mb: Option<i64>,
}

impl ApiCall {
    /// The `YYYY-MM` partition key this call belongs to (§3, §4.7).
    pub fn partition_key(&self) -> String {
        format!("{:04}-{:02}", self.timestamp.year(), self.timestamp.month())
    }
}

/// A mirror of an external tracker issue (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub key: String,
    pub url: String,
    pub summary: String,
    pub description: String,
    pub description_filtered: String,
    /// Separator-joined comment bodies.
    pub comments: String,
    pub comments_filtered: String,
    pub issue_type: String,
    pub status: String,
    pub assignee: Option<String>,
    pub created: DateTime<Tz>,
    pub updated: DateTime<Tz>,
}

/// Match precision for phrase queries (§4.8). Exactly two levels exist;
/// anything else is a programming error (§7 "Programming invariants").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchLevel {
    Exact,
    Similar,
}

/// Correlator day-filter values (§4.9).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationFilter {
    AllTracebacks,
    HasTicket,
    NoTicket,
    NoRecentTicket,
    HasOpenTicket,
}

impl CorrelationFilter {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "All Tracebacks" => Some(Self::AllTracebacks),
            "Has Ticket" => Some(Self::HasTicket),
            "No Ticket" => Some(Self::NoTicket),
            "No Recent Ticket" => Some(Self::NoRecentTicket),
            "Has Open Ticket" => Some(Self::HasOpenTicket),
            _ => None,
        }
    }
}

/// Result of correlating a single traceback against tickets and history (C9).
#[derive(Debug, Clone, Serialize)]
pub struct CorrelationResult {
    pub traceback: Traceback,
    pub jira_issues: Vec<Ticket>,
    pub similar_jira_issues: Vec<Ticket>,
    pub similar_tracebacks: Vec<Traceback>,
}
