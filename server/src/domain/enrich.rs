//! C4 ProfileNameEnricher: recover profile_name / username for a Traceback
//! by scanning backward from its nearest preceding ERROR line (spec §4.4).

use std::sync::OnceLock;

use regex::Regex;

use super::model::Traceback;

const MARKER: &str = "Traceback (most recent call last)";

fn update_profile_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"#upd:(\S+?):").expect("invalid update-profile regex"))
}

fn activity_worker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r":(\S+):\s+ERROR").expect("invalid activity-worker regex"))
}

fn pid_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s(\d+)/MainThread").expect("invalid pid regex"))
}

fn profile_username_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"/(?:WS|PV)#(\S+)-(\S*@\S+)\s*:").expect("invalid profile/username regex")
    })
}

/// One raw line available for backward scanning: the metadata-stamped text
/// plus the PID embedded in it, if any.
pub struct EnrichmentLine<'a> {
    pub formatted_line: &'a str,
}

/// Attempt to fill in `profile_name`/`username` on `traceback` by walking
/// `preceding_lines` (most-recent-first) the way the original ERROR-anchored
/// heuristic does (§4.4). Never overwrites an already-populated field.
pub fn enrich(traceback: &mut Traceback, preceding_lines: &[EnrichmentLine<'_>]) {
    let Some(error_line) = find_nearest_error_line(preceding_lines) else {
        return;
    };

    if traceback.program_name.ends_with("update.debug") {
        if let Some(caps) = update_profile_regex().captures(error_line) {
            let captured = caps[1].to_string();
            if captured.contains('@') {
                set_if_absent(&mut traceback.username, captured);
            } else {
                set_if_absent(&mut traceback.profile_name, captured);
            }
        }
        return;
    }

    if traceback.program_name.contains("activity-worker") {
        if let Some(caps) = activity_worker_regex().captures(error_line) {
            set_if_absent(&mut traceback.profile_name, caps[1].to_string());
        }
        return;
    }

    if traceback.program_name.contains("engine.server.debug") || traceback.program_name.contains("manager.debug") {
        if let Some(pid_caps) = pid_regex().captures(error_line) {
            let pid = &pid_caps[1];
            if let Some(line) = find_latest_line_with_pid(preceding_lines, pid) {
                if let Some(caps) = profile_username_regex().captures(line) {
                    set_if_absent(&mut traceback.profile_name, caps[1].to_string());
                    set_if_absent(&mut traceback.username, caps[2].to_string());
                }
            }
        }
    }
}

fn set_if_absent(field: &mut Option<String>, value: String) {
    if field.is_none() {
        *field = Some(value);
    }
}

/// Drop everything from the last traceback marker onward, then walk
/// backward to the first line containing "ERROR" (§4.4 step "call it E").
fn find_nearest_error_line<'a>(preceding_lines: &[EnrichmentLine<'a>]) -> Option<&'a str> {
    let cutoff = preceding_lines
        .iter()
        .rposition(|l| l.formatted_line.contains(MARKER))
        .unwrap_or(preceding_lines.len());

    preceding_lines[..cutoff]
        .iter()
        .rev()
        .map(|l| l.formatted_line)
        .find(|l| l.contains("ERROR"))
}

fn find_latest_line_with_pid<'a>(preceding_lines: &[EnrichmentLine<'a>], pid: &str) -> Option<&'a str> {
    let needle = format!("{pid}/");
    preceding_lines
        .iter()
        .rev()
        .map(|l| l.formatted_line)
        .find(|l| l.contains(&needle))
}
