use super::{NotificationChannel, RipEvent};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

pub struct SlackNotifier {
    webhook_url: String,
    client: reqwest::Client,
}

impl SlackNotifier {
    pub fn new(webhook_url: String) -> Self {
        Self {
            webhook_url,
            client: reqwest::Client::builder()
                .timeout(SEND_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }

    fn format_message(&self, event: &RipEvent) -> serde_json::Value {
        let (title, mut fields, detail) = match event {
            RipEvent::Started {
                handler_id,
                device,
                kind,
            } => {
                let id = handler_id.to_string();
                let short_id = &id[..8.min(id.len())];
                (
                    format!("{} Rip Started", capitalize(kind.as_str())),
                    vec![format!("*Device:*\n`{}`", device)],
                    Some(format!("*Handler:*\n`{}`", short_id)),
                )
            }
            RipEvent::Succeeded {
                device,
                kind,
                artifact,
            } => (
                format!("{} Rip Complete", capitalize(kind.as_str())),
                vec![format!("*Device:*\n`{}`", device)],
                Some(format!("*Output:*\n`{}`", artifact.display())),
            ),
            RipEvent::Failed { device, kind, .. } => (
                format!("{} Rip Failed", capitalize(kind.as_str())),
                vec![format!("*Device:*\n`{}`", device)],
                None,
            ),
        };

        if let Some(detail) = detail {
            fields.push(detail);
        }

        let mut blocks = vec![
            json!({
                "type": "header",
                "text": {
                    "type": "plain_text",
                    "text": title,
                    "emoji": true
                }
            }),
            json!({
                "type": "section",
                "fields": fields
                    .into_iter()
                    .map(|text| json!({ "type": "mrkdwn", "text": text }))
                    .collect::<Vec<_>>()
            }),
        ];

        if let RipEvent::Failed { reason, .. } = event {
            blocks.push(json!({
                "type": "section",
                "text": {
                    "type": "mrkdwn",
                    "text": format!("*Error:*\n```{}```", reason)
                }
            }));
        }

        json!({ "blocks": blocks })
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[async_trait]
impl NotificationChannel for SlackNotifier {
    async fn notify(&self, event: RipEvent) -> Result<()> {
        let payload = self.format_message(&event);
        self.client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
