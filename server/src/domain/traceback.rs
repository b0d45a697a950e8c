//! C2 TracebackAssembler: streaming state machine over a log stream with
//! backward context recovery (spec §4.2).

use std::collections::VecDeque;

use crate::core::constants::{MAX_CONTEXT_LINES, RING_CAPACITY};

use super::model::Traceback;
use super::parser::{ParsedLine, parse_line};

const TRACEBACK_MARKER: &str = "Traceback (most recent call last)";

const ERROR_MARKERS: &[&str] = &[
    "AssertionError",
    "KeyError",
    "NotImplementedError",
    "ValueError",
];

const EXCLUSION_SUBSTRINGS: &[&str] = &["details = AssertionError", "threading.pyc", "args:["];

/// The error predicate (§4.2): `line` contains one of the class markers
/// immediately preceded by a newline (message start of a stitched line), and
/// matches none of the exclusion patterns. The authoritative predicate is
/// this one; earlier drafts accepting markers without the leading newline
/// are bugs and must not be reproduced (§9 Open Question).
pub fn is_error_line(message: &str) -> bool {
    // Every parsed_message is conceptually the start of a stitched line, i.e.
    // immediately preceded by a newline in the assembled stream.
    let stitched = format!("\n{message}");

    let has_marker = ERROR_MARKERS
        .iter()
        .any(|marker| stitched.contains(&format!("\n{marker}")));
    if !has_marker {
        return false;
    }

    if EXCLUSION_SUBSTRINGS.iter().any(|excl| stitched.contains(excl)) {
        return false;
    }

    if assertion_join_child_process(&stitched) {
        return false;
    }

    true
}

/// `AssertionError.*can only join a child process` exclusion: matched as
/// "AssertionError somewhere before can only join a child process on the
/// same text", not as a general substring.
fn assertion_join_child_process(text: &str) -> bool {
    if let Some(pos) = text.find("AssertionError") {
        text[pos..].contains("can only join a child process")
    } else {
        false
    }
}

#[derive(Debug, Clone)]
struct RawLine {
    papertrail_id: String,
    instance_id: String,
    program_name: String,
    parsed_message: String,
    formatted_line: String,
}

impl From<&ParsedLine> for RawLine {
    fn from(p: &ParsedLine) -> Self {
        Self {
            papertrail_id: p.papertrail_id.clone(),
            instance_id: p.instance_id.clone(),
            program_name: p.program_name.clone(),
            parsed_message: p.parsed_message.clone(),
            formatted_line: p.formatted_line.clone(),
        }
    }
}

/// A bounded ring of recently-seen lines plus a malformed-line counter
/// (§4.2, §7 "malformed lines increment a counter and are skipped").
pub struct TracebackAssembler {
    ring: VecDeque<RawLine>,
    malformed_count: u64,
}

impl Default for TracebackAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl TracebackAssembler {
    pub fn new() -> Self {
        Self {
            ring: VecDeque::with_capacity(RING_CAPACITY),
            malformed_count: 0,
        }
    }

    pub fn malformed_count(&self) -> u64 {
        self.malformed_count
    }

    /// Feed one raw log record. Returns `Some(Traceback)` when this line is
    /// an origin line whose traceback text could be located.
    pub fn ingest(&mut self, raw: &str) -> Option<Traceback> {
        let parsed = match parse_line(raw) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed log line");
                self.malformed_count += 1;
                return None;
            }
        };

        let result = if is_error_line(&parsed.parsed_message) {
            self.assemble(&parsed)
        } else {
            None
        };

        self.push(&parsed);
        result
    }

    fn push(&mut self, parsed: &ParsedLine) {
        if self.ring.len() >= RING_CAPACITY {
            self.ring.pop_front();
        }
        self.ring.push_back(RawLine::from(parsed));
    }

    fn assemble(&self, origin: &ParsedLine) -> Option<Traceback> {
        let mut context: Vec<&RawLine> = self
            .ring
            .iter()
            .rev()
            .filter(|l| l.instance_id == origin.instance_id && l.program_name == origin.program_name)
            .take(MAX_CONTEXT_LINES)
            .collect();
        context.reverse();

        let mut raw_full_lines: Vec<String> = context.iter().map(|l| l.formatted_line.clone()).collect();
        raw_full_lines.push(origin.formatted_line.clone());
        let raw_full_text = raw_full_lines.join("");
        let raw_traceback_text = find_from_last_marker(&raw_full_text).unwrap_or_default();

        let mut msg_lines: Vec<String> = context.iter().map(|l| l.parsed_message.clone()).collect();
        msg_lines.push(origin.parsed_message.clone());
        let joined_messages = msg_lines.join("");

        let marker_idx = joined_messages.rfind(TRACEBACK_MARKER)?;
        let traceback_text = joined_messages[marker_idx..].to_string();
        let traceback_plus_context_text =
            plus_context_text(&joined_messages[..marker_idx], &traceback_text);

        Some(Traceback {
            origin_id: origin.papertrail_id.clone(),
            origin_timestamp: origin.timestamp,
            instance_id: origin.instance_id.clone(),
            program_name: origin.program_name.clone(),
            traceback_text,
            traceback_plus_context_text,
            raw_traceback_text,
            raw_full_text,
            profile_name: None,
            username: None,
        })
    }
}

fn find_from_last_marker(text: &str) -> Option<String> {
    text.rfind(TRACEBACK_MARKER).map(|idx| text[idx..].to_string())
}

/// Last 3 non-empty lines before the marker, joined, prefixed onto
/// `traceback_text` (§4.2 step c, Testable Property 5).
fn plus_context_text(before_marker: &str, traceback_text: &str) -> String {
    let before_lines: Vec<&str> = before_marker.split('\n').filter(|l| !l.is_empty()).collect();
    let start = before_lines.len().saturating_sub(3);
    let context = &before_lines[start..];
    if context.is_empty() {
        traceback_text.to_string()
    } else {
        format!("{}\n{}", context.join("\n"), traceback_text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Testable Property 4 / §4.2 positive & negative lists.
    #[test]
    fn test_error_predicate_positive() {
        assert!(is_error_line("AssertionError"));
        assert!(is_error_line("KeyError: i broke it"));
        assert!(is_error_line("ValueError: sdf"));
    }

    #[test]
    fn test_error_predicate_negative() {
        assert!(!is_error_line("asdf details = AssertionError fdsa"));
        assert!(!is_error_line("AssertionError: can only join a child process"));
        assert!(!is_error_line("KeyError: threading.pyc"));
        assert!(!is_error_line("ValueE"));
    }

    fn line(id: &str, instance: &str, program: &str, msg: &str) -> String {
        format!("{id}\t2016-08-12T03:18:39\trecv\tsrc\t{instance}\tip\tUser\tNotice\t{program}\t{msg}")
    }

    // Scenario S2: 2 unrelated lines, 50 i-A/manager.debug lines with the
    // marker on line 48, then an origin AssertionError line from i-A.
    #[test]
    fn test_s2_assemble_one_traceback_with_context() {
        let mut assembler = TracebackAssembler::new();
        assert!(assembler.ingest(&line("1", "i-B", "other.debug", "unrelated one")).is_none());
        assert!(assembler.ingest(&line("2", "i-B", "other.debug", "unrelated two")).is_none());

        for i in 0..47 {
            assert!(
                assembler
                    .ingest(&line(&format!("frame-{i}"), "i-A", "manager.debug", "frame line"))
                    .is_none()
            );
        }
        assert!(
            assembler
                .ingest(&line("marker", "i-A", "manager.debug", "Traceback (most recent call last):"))
                .is_none()
        );
        for i in 0..2 {
            assert!(
                assembler
                    .ingest(&line(&format!("post-{i}"), "i-A", "manager.debug", "  File ..."))
                    .is_none()
            );
        }

        let tb = assembler
            .ingest(&line("700594297938165774", "i-A", "manager.debug", "AssertionError"))
            .expect("origin line should assemble a traceback");

        assert!(tb.traceback_text.starts_with("Traceback (most recent call last):"));
        assert_eq!(tb.origin_id, "700594297938165774");
        assert_eq!(tb.instance_id, "i-A");
    }

    #[test]
    fn test_no_marker_emits_nothing() {
        let mut assembler = TracebackAssembler::new();
        assembler.ingest(&line("1", "i-A", "p", "just some log line"));
        let result = assembler.ingest(&line("2", "i-A", "p", "AssertionError"));
        assert!(result.is_none());
    }

    #[test]
    fn test_malformed_line_increments_counter_and_is_skipped() {
        let mut assembler = TracebackAssembler::new();
        assert!(assembler.ingest("too\tfew\tfields").is_none());
        assert_eq!(assembler.malformed_count(), 1);
    }

    #[test]
    fn test_traceback_text_starts_with_marker_and_bounded_context() {
        let mut assembler = TracebackAssembler::new();
        for i in 0..5 {
            assembler.ingest(&line(&format!("c{i}"), "i-A", "p", &format!("context {i}")));
        }
        assembler.ingest(&line("m", "i-A", "p", "Traceback (most recent call last):"));
        let tb = assembler
            .ingest(&line("origin", "i-A", "p", "AssertionError"))
            .unwrap();
        assert!(tb.traceback_text.starts_with(TRACEBACK_MARKER));
        let extra_lines = tb.traceback_plus_context_text.len() - tb.traceback_text.len();
        assert!(extra_lines <= "context 0\ncontext 1\ncontext 2\n".len());
    }
}
