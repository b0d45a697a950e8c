//! C10 ticket tracker client (§4.10, §6 "Ticket tracker"): a thin REST
//! adapter over a Jira-like issue tracker. Field semantics (description
//! template, comment separator, required fields on create) are grounded on
//! `jira_issue_aservice.py` in the original implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde_json::{Value, json};

use crate::core::config::JiraConfig;
use crate::core::constants::DISPLAY_ZONE;
use crate::domain::model::Ticket;

use super::error::TrackerError;

/// Comments are stored on `Ticket` as one joined string; this is the
/// separator between individual comment bodies (mirrors
/// `jira_issue_aservice.COMMENT_SEPARATOR`).
pub const COMMENT_SEPARATOR: &str = "\n!!!newcomment!!!\n";

const ISSUE_TYPE: &str = "Bug";
const PRIORITY: &str = "Critical";
const LABEL: &str = "tracebacks";

/// Required + optional fields for creating a new issue (§6 "Ticket tracker").
pub struct NewIssueFields {
    pub project_key: String,
    pub summary: String,
    pub description: String,
    pub assignee: Option<String>,
    pub component: Option<String>,
}

impl NewIssueFields {
    fn to_json(&self) -> Value {
        let mut fields = json!({
            "project": {"key": self.project_key},
            "summary": self.summary,
            "description": self.description,
            "issuetype": {"name": ISSUE_TYPE},
            "priority": {"name": PRIORITY},
            "labels": [LABEL],
        });
        if let Some(assignee) = &self.assignee {
            fields["assignee"] = json!({"name": assignee});
        }
        if let Some(component) = &self.component {
            fields["components"] = json!([{"name": component}]);
        }
        json!({"fields": fields})
    }
}

#[async_trait]
pub trait TrackerClient: Send + Sync {
    /// Fetch a single issue by key; `Ok(None)` if it has been deleted (§4.10).
    async fn issue(&self, key: &str) -> Result<Option<Ticket>, TrackerError>;
    /// Create an issue, returning its newly assigned key.
    async fn create_issue(&self, fields: NewIssueFields) -> Result<String, TrackerError>;
    async fn add_comment(&self, key: &str, body: &str) -> Result<(), TrackerError>;
    /// Paginated key-only scan of the configured project (§4.10 `update_all_tickets`).
    async fn search_issue_keys(&self, jql: &str, start_at: usize, max_results: usize) -> Result<Vec<String>, TrackerError>;
}

pub struct JiraTrackerClient {
    client: reqwest::Client,
    config: JiraConfig,
}

impl JiraTrackerClient {
    pub fn new(config: JiraConfig) -> Self {
        Self { client: reqwest::Client::new(), config }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/rest/api/2{}", self.config.server.trim_end_matches('/'), path)
    }

    fn link_to_issue(&self, key: &str) -> String {
        format!("{}/browse/{key}", self.config.server.trim_end_matches('/'))
    }

    fn basic_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.basic_auth(&self.config.basic_auth_username, Some(&self.config.basic_auth_password))
    }

    fn parse_issue(&self, key: &str, raw: &Value) -> Result<Ticket, TrackerError> {
        let fields = raw.get("fields").ok_or_else(|| TrackerError::Malformed("missing fields".into()))?;

        let comments: Vec<String> = fields
            .pointer("/comment/comments")
            .and_then(Value::as_array)
            .map(|comments| {
                comments
                    .iter()
                    .filter_map(|c| c.get("body").and_then(Value::as_str).map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let created = parse_jira_timestamp(fields.get("created").and_then(Value::as_str))?;
        let updated = parse_jira_timestamp(fields.get("updated").and_then(Value::as_str))?;

        Ok(Ticket {
            key: key.to_string(),
            url: self.link_to_issue(key),
            summary: field_str(fields, "summary"),
            description: field_str(fields, "description"),
            description_filtered: field_str(fields, "description").to_lowercase(),
            comments: comments.join(COMMENT_SEPARATOR),
            comments_filtered: comments.join(COMMENT_SEPARATOR).to_lowercase(),
            issue_type: fields.pointer("/issuetype/name").and_then(Value::as_str).unwrap_or(ISSUE_TYPE).to_string(),
            status: fields.pointer("/status/name").and_then(Value::as_str).unwrap_or_default().to_string(),
            assignee: fields.pointer("/assignee/displayName").and_then(Value::as_str).map(str::to_string),
            created,
            updated,
        })
    }
}

fn field_str(fields: &Value, name: &str) -> String {
    fields.get(name).and_then(Value::as_str).unwrap_or_default().to_string()
}

/// Jira timestamps come back in RFC3339-ish form; normalized to the display
/// zone like every other timestamp in this service (§3).
fn parse_jira_timestamp(raw: Option<&str>) -> Result<DateTime<Tz>, TrackerError> {
    let raw = raw.ok_or_else(|| TrackerError::Malformed("missing timestamp".into()))?;
    let parsed: DateTime<Utc> = DateTime::parse_from_rfc3339(raw)
        .map_err(|e| TrackerError::Malformed(format!("bad timestamp {raw:?}: {e}")))?
        .with_timezone(&Utc);
    Ok(parsed.with_timezone(&DISPLAY_ZONE))
}

#[async_trait]
impl TrackerClient for JiraTrackerClient {
    async fn issue(&self, key: &str) -> Result<Option<Ticket>, TrackerError> {
        let request = self.basic_auth(self.client.get(self.url(&format!("/issue/{key}"))));
        let response = request.send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(TrackerError::Malformed(format!("issue {key} returned {}", response.status())));
        }
        let raw: Value = response.json().await.map_err(|e| TrackerError::Malformed(e.to_string()))?;
        self.parse_issue(key, &raw).map(Some)
    }

    async fn create_issue(&self, fields: NewIssueFields) -> Result<String, TrackerError> {
        let request = self.basic_auth(self.client.post(self.url("/issue")).json(&fields.to_json()));
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(TrackerError::Malformed(format!("create_issue returned {}", response.status())));
        }
        let raw: Value = response.json().await.map_err(|e| TrackerError::Malformed(e.to_string()))?;
        raw.get("key")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| TrackerError::Malformed("create_issue response missing key".into()))
    }

    async fn add_comment(&self, key: &str, body: &str) -> Result<(), TrackerError> {
        let request = self
            .basic_auth(self.client.post(self.url(&format!("/issue/{key}/comment"))))
            .json(&json!({"body": body}));
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(TrackerError::Malformed(format!("add_comment on {key} returned {}", response.status())));
        }
        Ok(())
    }

    async fn search_issue_keys(&self, jql: &str, start_at: usize, max_results: usize) -> Result<Vec<String>, TrackerError> {
        let request = self.basic_auth(self.client.get(self.url("/search")).query(&[
            ("jql", jql.to_string()),
            ("startAt", start_at.to_string()),
            ("maxResults", max_results.to_string()),
            ("fields", "key".to_string()),
        ]));
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(TrackerError::Malformed(format!("search_issues returned {}", response.status())));
        }
        let raw: Value = response.json().await.map_err(|e| TrackerError::Malformed(e.to_string()))?;
        let keys = raw
            .get("issues")
            .and_then(Value::as_array)
            .map(|issues| issues.iter().filter_map(|i| i.get("key").and_then(Value::as_str).map(str::to_string)).collect())
            .unwrap_or_default();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_issue_fields_sets_required_jira_fields() {
        let fields = NewIssueFields {
            project_key: "PPC".to_string(),
            summary: "KeyError: x".to_string(),
            description: "Error observed in production.".to_string(),
            assignee: Some("joe".to_string()),
            component: None,
        };
        let json = fields.to_json();
        assert_eq!(json["fields"]["project"]["key"], "PPC");
        assert_eq!(json["fields"]["issuetype"]["name"], "Bug");
        assert_eq!(json["fields"]["priority"]["name"], "Critical");
        assert_eq!(json["fields"]["labels"][0], "tracebacks");
        assert_eq!(json["fields"]["assignee"]["name"], "joe");
    }

    #[test]
    fn test_new_issue_fields_omits_assignee_when_unassigned() {
        let fields = NewIssueFields {
            project_key: "PPC".to_string(),
            summary: "s".to_string(),
            description: "d".to_string(),
            assignee: None,
            component: None,
        };
        assert!(fields.to_json()["fields"].get("assignee").is_none());
    }
}
