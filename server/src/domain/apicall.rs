//! C3 ApiCallExtractor: pull a structured API timing record out of a parsed
//! log line (spec §4.3).

use std::sync::OnceLock;

use regex::Regex;

use super::model::ApiCall;
use super::parser::ParsedLine;

const WHITELISTED_PROGRAMS: &[&str] = &["engine.server.debug", "manager.debug"];

fn api_call_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\d+/\w+#(?:(?P<profile_name>\w+)-)?(?P<username>[A-Za-z0-9_.+\-@]+).*\s(?P<api_name>\w+)\s\((?P<method>[A-Z]+)\)\s+took\s+(?P<duration>\d+)\s+milliseconds(?:\s+to\s+complete(?:\s+and\s+final\s+memory\s+(?P<memory_final>-?\d+)MB\s+\(delta\s+(?P<memory_delta>-?\d+)MB\))?)?",
        )
        .expect("invalid api call regex")
    })
}

/// Pre-filter (§4.3): the line must mention a completed timing, not come
/// from the main thread, and originate from a whitelisted program.
fn passes_prefilter(parsed: &ParsedLine) -> bool {
    parsed.parsed_message.contains("milliseconds to complete")
        && !parsed.parsed_message.contains("MainThread")
        && WHITELISTED_PROGRAMS.contains(&parsed.program_name.as_str())
}

/// Extract an `ApiCall` from a parsed line, or `None` if it isn't one
/// (§4.3).
pub fn extract_api_call(parsed: &ParsedLine) -> Option<ApiCall> {
    if !passes_prefilter(parsed) {
        return None;
    }

    let captures = api_call_regex().captures(&parsed.parsed_message)?;

    let profile_name = captures.name("profile_name").map(|m| m.as_str().to_string());
    let username = captures.name("username")?.as_str().to_string();
    let api_name = captures.name("api_name")?.as_str().to_string();
    let method = captures.name("method")?.as_str().to_string();
    let duration_ms: u64 = captures.name("duration")?.as_str().parse().ok()?;
    let memory_final_mb = captures
        .name("memory_final")
        .and_then(|m| m.as_str().parse().ok());
    let memory_delta_mb = captures
        .name("memory_delta")
        .and_then(|m| m.as_str().parse().ok());

    Some(ApiCall {
        papertrail_id: parsed.papertrail_id.clone(),
        timestamp: parsed.timestamp,
        instance_id: parsed.instance_id.clone(),
        program_name: parsed.program_name.clone(),
        api_name,
        method,
        profile_name,
        username,
        duration_ms,
        memory_final_mb,
        memory_delta_mb,
    })
}
