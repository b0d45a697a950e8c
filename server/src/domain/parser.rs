//! C1 LineParser: split a single log record into structured fields and
//! normalize its timestamp (spec §4.1).

use chrono::{Datelike, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use thiserror::Error;

use crate::core::constants::DISPLAY_ZONE;

use super::model::Traceback;

pub const EXPECTED_FIELDS: usize = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("expected {EXPECTED_FIELDS} tab-delimited fields, got {0}")]
    WrongFieldCount(usize),
    #[error("unrecognized timestamp or timezone: {0:?}")]
    BadTimestamp(String),
}

impl ParseError {
    /// Permanent-input errors (§7): never retried, caller skips the line.
    pub fn is_transient(&self) -> bool {
        false
    }
}

/// The structured result of parsing one log record (§4.1 "Output").
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLine {
    pub papertrail_id: String,
    pub timestamp: chrono::DateTime<Tz>,
    pub instance_id: String,
    pub program_name: String,
    pub parsed_message: String,
    pub formatted_line: String,
}

/// Parse one tab-delimited log record (spec §6 wire format / §4.1).
pub fn parse_line(raw: &str) -> Result<ParsedLine, ParseError> {
    let fields: Vec<&str> = raw.splitn(EXPECTED_FIELDS, '\t').collect();
    if fields.len() != EXPECTED_FIELDS {
        return Err(ParseError::WrongFieldCount(fields.len()));
    }

    let papertrail_id = fields[0].to_string();
    let generated_at = fields[1];
    let instance_id = fields[4].to_string();
    let program_name = fields[8].to_string();
    let parsed_message = fields[9].to_string();

    let timestamp = parse_timestamp(generated_at)?;

    let formatted_line = format!(
        "{} {:02} {} {} {}: {}",
        timestamp.format("%b"),
        timestamp.day(),
        timestamp.format("%H:%M:%S"),
        instance_id,
        program_name,
        parsed_message,
    );

    Ok(ParsedLine {
        papertrail_id,
        timestamp,
        instance_id,
        program_name,
        parsed_message,
        formatted_line,
    })
}

/// Accept `YYYY-MM-DDTHH:MM:SS` with no suffix (UTC), `Z` (UTC), `-04:00` or
/// `-05:00` (America/New_York wall time); fail-fast on anything else, then
/// convert the result to the configured display zone (§4.1).
fn parse_timestamp(s: &str) -> Result<chrono::DateTime<Tz>, ParseError> {
    const NAIVE_FMT: &str = "%Y-%m-%dT%H:%M:%S";

    if let Some(naive_str) = s.strip_suffix('Z').or_else(|| {
        if !s.ends_with("-04:00") && !s.ends_with("-05:00") {
            Some(s)
        } else {
            None
        }
    }) {
        // No suffix, or explicit "Z" suffix: UTC wall time.
        let naive = NaiveDateTime::parse_from_str(naive_str, NAIVE_FMT)
            .map_err(|_| ParseError::BadTimestamp(s.to_string()))?;
        let utc = chrono::Utc.from_utc_datetime(&naive);
        return Ok(utc.with_timezone(&DISPLAY_ZONE));
    }

    if let Some(naive_str) = s.strip_suffix("-04:00").or_else(|| s.strip_suffix("-05:00")) {
        // Both offsets are wall-clock America/New_York per spec (EDT/EST).
        let naive = NaiveDateTime::parse_from_str(naive_str, NAIVE_FMT)
            .map_err(|_| ParseError::BadTimestamp(s.to_string()))?;
        let local = DISPLAY_ZONE
            .from_local_datetime(&naive)
            .single()
            .ok_or_else(|| ParseError::BadTimestamp(s.to_string()))?;
        return Ok(local);
    }

    Err(ParseError::BadTimestamp(s.to_string()))
}

/// Construct the final-text variants of a Traceback the way C2 does (exposed
/// here since C1's `formatted_line` feeds directly into the metadata-stamped
/// concatenation C2 performs).
pub fn stamp_metadata(parsed: &ParsedLine) -> String {
    parsed.formatted_line.clone()
}

impl From<&ParsedLine> for Traceback {
    /// Construct a bare Traceback shell from a single parsed line (no
    /// assembled text yet) — used only in tests to build fixtures quickly.
    fn from(p: &ParsedLine) -> Self {
        Traceback {
            origin_id: p.papertrail_id.clone(),
            origin_timestamp: p.timestamp,
            instance_id: p.instance_id.clone(),
            program_name: p.program_name.clone(),
            traceback_text: String::new(),
            traceback_plus_context_text: String::new(),
            raw_traceback_text: String::new(),
            raw_full_text: String::new(),
            profile_name: None,
            username: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_wrong_field_count() {
        let err = parse_line("a\tb\tc").unwrap_err();
        assert_eq!(err, ParseError::WrongFieldCount(3));
    }

    #[test]
    fn test_tenth_field_retains_tabs() {
        let line = "1\t2016-08-12T03:18:39\trecv\tsrc\tinst\tip\tUser\tNotice\tprogram\tmessage\twith\ttabs";
        let parsed = parse_line(line).unwrap();
        assert_eq!(parsed.parsed_message, "message\twith\ttabs");
    }

    // Scenario S1 (spec §8)
    #[test]
    fn test_s1_parse_archive_line() {
        let line = "700594297938165774\t2016-08-12T03:18:39\t2016-08-12T03:18:39Z\t407484803\ti-2ee330b7\t107.21.188.48\tUser\tNotice\tmanager.debug\tAssertionError\n";
        let parsed = parse_line(line).unwrap();
        assert_eq!(parsed.papertrail_id, "700594297938165774");
        assert_eq!(parsed.instance_id, "i-2ee330b7");
        assert_eq!(parsed.program_name, "manager.debug");
        assert_eq!(parsed.parsed_message, "AssertionError\n");
    }

    #[test]
    fn test_timestamp_no_suffix_is_utc() {
        let line = "1\t2016-08-12T03:18:39\tr\ts\ti\tip\tf\tsev\tprog\tmsg";
        let parsed = parse_line(line).unwrap();
        assert_eq!(parsed.timestamp.timezone(), DISPLAY_ZONE);
    }

    #[test]
    fn test_timestamp_offset_minus04_is_eastern_wall_time() {
        let line = "1\t2016-08-12T03:18:39-04:00\tr\ts\ti\tip\tf\tsev\tprog\tmsg";
        let parsed = parse_line(line).unwrap();
        assert_eq!(parsed.timestamp.hour(), 3);
        assert_eq!(parsed.timestamp.minute(), 18);
    }

    #[test]
    fn test_unrecognized_timezone_fails() {
        let line = "1\t2016-08-12T03:18:39+02:00\tr\ts\ti\tip\tf\tsev\tprog\tmsg";
        assert!(parse_line(line).is_err());
    }
}
