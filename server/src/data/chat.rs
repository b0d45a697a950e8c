//! C12 chat client (§4.12, §6 "Chat webhook"): posts traceback notifications
//! and ticket-creation acknowledgments to a Slack-like chat system. Payload
//! shape and the two-transport split are grounded on
//! `src/lib/slack/slack_poster.py` in the original implementation.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::core::config::SlackConfig;
use crate::domain::model::{Ticket, Traceback};

use super::error::ChatError;

const NUM_LINES_TO_POST: usize = 5;
const MAX_CHARS_PER_LINE: usize = 200;
const MAX_HITS: usize = 40;

/// Assignment options rendered on the "Create a Jira ticket…" dropdown
/// (§4.12). Labels embed whichever human name is configured for that team,
/// falling back to a bare team name when unset.
#[derive(Debug, Clone, Default)]
pub struct AssigneeLabels {
    pub adwords: Option<String>,
    pub bing: Option<String>,
    pub social: Option<String>,
    pub grader: Option<String>,
}

fn option(text: impl Into<String>, value: &str) -> Value {
    json!({"text": text.into(), "value": value})
}

impl AssigneeLabels {
    fn dropdown_options(&self) -> Vec<Value> {
        vec![
            option("Unassigned", "UNASSIGNED"),
            option(team_label("Adwords", &self.adwords), "ADWORDS"),
            option(team_label("Bing", &self.bing), "BING"),
            option(team_label("Social", &self.social), "SOCIAL"),
            option(team_label("Grader", &self.grader), "GRADER"),
        ]
    }
}

fn team_label(team: &str, assignee: &Option<String>) -> String {
    match assignee {
        Some(name) => format!("{team} (assign to {name})"),
        None => team.to_string(),
    }
}

/// Channel keyword routing (§4.12 "Chat channel routing").
pub(crate) fn channel_for_text(text: &str) -> &'static str {
    let lower = text.to_lowercase();
    if lower.contains("facebook") {
        "social"
    } else if lower.contains("adwords") {
        "adwords"
    } else {
        "default"
    }
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Post a rich traceback notification to the routed channel (§4.12 step 3).
    async fn post_notification(
        &self,
        traceback: &Traceback,
        similar_tracebacks: &[Traceback],
        jira_issues: &[Ticket],
    ) -> Result<(), ChatError>;

    /// Post as a human account rather than the bot, so another integration's
    /// chat bridge notices (§9 "Real user vs bot chat posting").
    async fn post_as_real_user(&self, channel: &str, message: &str) -> Result<(), ChatError>;
}

pub struct SlackChatClient {
    client: reqwest::Client,
    config: SlackConfig,
    assignees: AssigneeLabels,
}

impl SlackChatClient {
    pub fn new(config: SlackConfig, assignees: AssigneeLabels) -> Self {
        Self { client: reqwest::Client::new(), config, assignees }
    }

    fn webhook_url(&self, traceback: &Traceback) -> &str {
        let channel = channel_for_text(&traceback.traceback_text);
        let url = match channel {
            "social" => self.config.webhook_tracebacks_social.as_deref(),
            "adwords" => self.config.webhook_tracebacks_adwords.as_deref(),
            _ => None,
        };
        url.unwrap_or(&self.config.webhook_tracebacks)
    }

    fn build_payload(&self, traceback: &Traceback, similar_tracebacks: &[Traceback], jira_issues: &[Ticket]) -> Value {
        let last_lines: Vec<String> = traceback
            .traceback_plus_context_text
            .lines()
            .rev()
            .take(NUM_LINES_TO_POST)
            .map(|line| line.chars().take(MAX_CHARS_PER_LINE).collect::<String>())
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        let preview = format!("```\n{}```", last_lines.join("\n"));
        let full_text = format!("```\n{}```", traceback.traceback_plus_context_text);

        let hits = similar_tracebacks
            .iter()
            .take(MAX_HITS)
            .map(render_hit)
            .collect::<Vec<_>>()
            .join("\n");

        let jira_text = jira_issues.iter().map(render_jira_issue).collect::<Vec<_>>().join("\n");

        json!({
            "text": preview,
            "attachments": [
                {"text": full_text},
                {"text": hits, "short": true},
                {"text": jira_text, "short": true},
                {
                    "callback_id": traceback.origin_id,
                    "color": "#007ABD",
                    "attachment_type": "default",
                    "fallback": "Create Jira Ticket",
                    "short": true,
                    "actions": [
                        {
                            "name": "create_ticket",
                            "text": "Create a Jira ticket...",
                            "type": "select",
                            "options": self.assignees.dropdown_options(),
                        },
                        {
                            "name": "add_to_existing_ticket",
                            "text": "Add to existing ticket",
                            "type": "select",
                            "data_source": "external",
                        },
                    ],
                },
            ],
        })
    }
}

fn render_hit(t: &Traceback) -> String {
    format!(
        " - <{}|{}>",
        format!("https://papertrailapp.com/systems/{}/events?focus={}", t.instance_id, t.origin_id),
        t.origin_timestamp.format("%Y-%m-%d %H:%M:%S"),
    )
}

fn render_jira_issue(t: &Ticket) -> String {
    format!(
        " - <{}|{}>, {}, {}: {}",
        t.url,
        t.key,
        t.status.to_uppercase(),
        t.assignee.as_deref().unwrap_or("Unassigned"),
        t.summary,
    )
}

#[async_trait]
impl ChatClient for SlackChatClient {
    async fn post_notification(&self, traceback: &Traceback, similar_tracebacks: &[Traceback], jira_issues: &[Ticket]) -> Result<(), ChatError> {
        let url = self.webhook_url(traceback);
        let payload = self.build_payload(traceback, similar_tracebacks, jira_issues);
        tracing::debug!(origin_id = %traceback.origin_id, "sending traceback notification to chat");

        let response = self.client.post(url).json(&payload).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "chat webhook rejected the payload");
            return Err(ChatError::Rejected(format!("{status}: {body}")));
        }
        Ok(())
    }

    async fn post_as_real_user(&self, channel: &str, message: &str) -> Result<(), ChatError> {
        let token = self
            .config
            .real_user_token
            .as_deref()
            .ok_or_else(|| ChatError::NoWebhook(channel.to_string()))?;

        let response = self
            .client
            .post("https://slack.com/api/chat.postMessage")
            .query(&[("token", token), ("channel", channel), ("as_user", "true"), ("text", message)])
            .send()
            .await?;

        if response.status().is_success() {
            tracing::info!(channel = %channel, "posted to chat as real user");
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "real-user chat post rejected");
            Err(ChatError::Rejected(format!("{status}: {body}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_routing_facebook_goes_to_social() {
        assert_eq!(channel_for_text("saw a Facebook login error"), "social");
    }

    #[test]
    fn test_channel_routing_adwords() {
        assert_eq!(channel_for_text("AdWords API returned 500"), "adwords");
    }

    #[test]
    fn test_channel_routing_default() {
        assert_eq!(channel_for_text("KeyError: foo"), "default");
    }

    #[test]
    fn test_dropdown_options_include_all_five_teams() {
        let labels = AssigneeLabels {
            adwords: Some("Joe".to_string()),
            bing: Some("Peter".to_string()),
            social: Some("Sam G.".to_string()),
            grader: Some("Gary".to_string()),
        };
        let options = labels.dropdown_options();
        assert_eq!(options.len(), 5);
        assert_eq!(options[0]["value"], "UNASSIGNED");
        assert_eq!(options[1]["text"], "Adwords (assign to Joe)");
    }
}
