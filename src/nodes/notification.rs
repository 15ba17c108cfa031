use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::core::{ExecutionContext, Segment};
use crate::error::NodeError;
use crate::nodes::executor::{NodeContext, NodeExecutor, NodeRunResult};

#[derive(Deserialize)]
struct NotificationConfig {
    /// Literal user ids/addresses or `{{path}}` templates. A template that
    /// resolves to an array fans out to each element.
    recipients: Vec<String>,
    #[serde(default = "default_channels")]
    channels: Vec<Channel>,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    body: String,
}

#[derive(Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum Channel {
    Email,
    InApp,
    Sms,
}

fn default_channels() -> Vec<Channel> {
    vec![Channel::Email]
}

impl Channel {
    fn name(self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::InApp => "in_app",
            Channel::Sms => "sms",
        }
    }
}

/// Per-recipient, per-channel dispatch. A single delivery failure never
/// aborts the remaining deliveries.
pub struct NotificationExecutor;

fn resolve_recipients(raw: &[String], ctx: &ExecutionContext) -> Vec<String> {
    let mut recipients = Vec::new();
    for entry in raw {
        if entry.contains("{{") {
            let trimmed = entry.trim();
            let path = trimmed
                .trim_start_matches("{{")
                .trim_end_matches("}}")
                .trim();
            match ctx.variables.get(path) {
                Some(Segment::Array(items)) => {
                    recipients.extend(items.iter().map(|s| s.to_display_string()));
                }
                _ => {
                    let resolved = ctx.variables.resolve_template(entry);
                    if !resolved.is_empty() {
                        recipients.push(resolved);
                    }
                }
            }
        } else {
            recipients.push(entry.clone());
        }
    }
    recipients
}

#[async_trait]
impl NodeExecutor for NotificationExecutor {
    async fn execute(
        &self,
        _node_id: &str,
        config: &Value,
        ctx: &ExecutionContext,
        services: &NodeContext,
    ) -> Result<NodeRunResult, NodeError> {
        let cfg: NotificationConfig = serde_json::from_value(config.clone())
            .map_err(|e| NodeError::ConfigError(e.to_string()))?;
        let subject = ctx.variables.resolve_template(&cfg.subject);
        let body = ctx.variables.resolve_template(&cfg.body);
        let recipients = resolve_recipients(&cfg.recipients, ctx);

        let mut deliveries = Vec::new();
        for recipient in &recipients {
            for channel in &cfg.channels {
                let outcome = match channel {
                    Channel::Email => {
                        services.notifier.send_email(recipient, &subject, &body).await
                    }
                    Channel::InApp => {
                        services
                            .notifier
                            .create_in_app(recipient, &subject, &body)
                            .await
                    }
                    // SMS has no provider wired; recorded as undelivered.
                    Channel::Sms => Err(NodeError::NotificationError(
                        "sms provider not configured".into(),
                    )),
                };
                deliveries.push(json!({
                    "recipient": recipient,
                    "channel": channel.name(),
                    "delivered": outcome.is_ok(),
                    "error": outcome.err().map(|e| e.to_string()),
                }));
            }
        }

        Ok(NodeRunResult::advance()
            .with_output("deliveries", Value::Array(deliveries))
            .with_output("recipient_count", Value::from(recipients.len())))
    }
}
