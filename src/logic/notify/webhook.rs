//! Webhook Alert Sink
//!
//! POSTs a JSON alert to a configured URL. Generic payloads are the alert
//! itself; Slack and Discord get their native message shapes.
//!
//! `deliver` only queues the alert. A background worker posts it with
//! bounded connect and read timeouts, so a slow or silent endpoint never
//! holds up a detection cycle.

use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::thread;
use std::time::Duration;

use super::types::{color_for, Alert, SinkError};
use super::AlertSink;
use crate::constants::{WEBHOOK_QUEUE_CAPACITY, WEBHOOK_TIMEOUT_MS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookPlatform {
    Generic,
    Slack,
    Discord,
}

impl WebhookPlatform {
    /// Guess from the URL host
    pub fn detect(url: &str) -> Self {
        if url.contains("hooks.slack.com") {
            WebhookPlatform::Slack
        } else if url.contains("discord.com/api/webhooks") {
            WebhookPlatform::Discord
        } else {
            WebhookPlatform::Generic
        }
    }
}

// ============================================================================
// CLIENT
// ============================================================================

/// Formats and posts a single alert, blocking for at most the timeout
#[derive(Clone)]
pub struct WebhookClient {
    url: String,
    platform: WebhookPlatform,
    agent: ureq::Agent,
}

impl WebhookClient {
    pub fn new(url: impl Into<String>, platform: WebhookPlatform, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout(timeout)
            .build();
        Self { url: url.into(), platform, agent }
    }

    pub fn format(&self, alert: &Alert) -> String {
        match self.platform {
            WebhookPlatform::Slack => format_slack(alert),
            WebhookPlatform::Discord => format_discord(alert),
            WebhookPlatform::Generic => {
                serde_json::to_string(alert).unwrap_or_else(|_| "{}".to_string())
            }
        }
    }

    pub fn post(&self, alert: &Alert) -> Result<(), SinkError> {
        let body = self.format(alert);

        match self
            .agent
            .post(&self.url)
            .set("Content-Type", "application/json")
            .send_string(&body)
        {
            Ok(resp) => {
                log::debug!("[Notify] Webhook accepted alert for event #{} ({})", alert.event_id, resp.status());
                Ok(())
            }
            Err(ureq::Error::Status(code, _)) => {
                Err(SinkError::Delivery(format!("webhook returned HTTP {}", code)))
            }
            Err(e) => Err(SinkError::Unavailable(e.to_string())),
        }
    }
}

// ============================================================================
// SINK
// ============================================================================

pub struct WebhookSink {
    client: WebhookClient,
    queue: SyncSender<Alert>,
}

impl WebhookSink {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let platform = WebhookPlatform::detect(&url);
        Self::with_platform(url, platform)
    }

    pub fn with_platform(url: impl Into<String>, platform: WebhookPlatform) -> Self {
        Self::with_options(
            url,
            platform,
            Duration::from_millis(WEBHOOK_TIMEOUT_MS),
            WEBHOOK_QUEUE_CAPACITY,
        )
    }

    /// Custom request timeout and queue depth (at least 1)
    pub fn with_options(
        url: impl Into<String>,
        platform: WebhookPlatform,
        timeout: Duration,
        capacity: usize,
    ) -> Self {
        let client = WebhookClient::new(url, platform, timeout);
        let (queue, pending) = mpsc::sync_channel::<Alert>(capacity.max(1));

        let worker = client.clone();
        let spawned = thread::Builder::new()
            .name("webhook-alerts".to_string())
            .spawn(move || {
                // Ends once the sink (and its sender) is dropped
                for alert in pending {
                    if let Err(e) = worker.post(&alert) {
                        log::warn!("[Notify] Webhook failed for event #{}: {}", alert.event_id, e);
                    }
                }
                log::debug!("[Notify] Webhook worker stopped");
            });
        if let Err(e) = spawned {
            log::error!("[Notify] Could not start webhook worker: {}", e);
        }

        Self { client, queue }
    }

    pub fn format(&self, alert: &Alert) -> String {
        self.client.format(alert)
    }
}

impl AlertSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    fn deliver(&self, alert: &Alert) -> Result<(), SinkError> {
        match self.queue.try_send(alert.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                Err(SinkError::Delivery("webhook queue full, alert dropped".to_string()))
            }
            Err(TrySendError::Disconnected(_)) => {
                Err(SinkError::Unavailable("webhook worker is not running".to_string()))
            }
        }
    }
}

fn format_slack(alert: &Alert) -> String {
    serde_json::json!({
        "blocks": [
            {
                "type": "header",
                "text": { "type": "plain_text", "text": alert.title }
            },
            {
                "type": "section",
                "text": { "type": "mrkdwn", "text": alert.message },
                "fields": [
                    { "type": "mrkdwn", "text": format!("*Severity:* {}", alert.severity) },
                    { "type": "mrkdwn", "text": format!("*Event:* #{}", alert.event_id) }
                ]
            }
        ],
        "attachments": [{ "color": color_for(alert.severity) }]
    })
    .to_string()
}

fn format_discord(alert: &Alert) -> String {
    let color = u32::from_str_radix(&color_for(alert.severity)[1..], 16).unwrap_or(0);
    let timestamp = chrono::DateTime::from_timestamp_millis(alert.timestamp)
        .map(|t| t.to_rfc3339())
        .unwrap_or_default();

    serde_json::json!({
        "embeds": [{
            "title": alert.title,
            "description": alert.message,
            "color": color,
            "fields": [
                { "name": "Severity", "value": alert.severity.as_str(), "inline": true },
                { "name": "Event", "value": format!("#{}", alert.event_id), "inline": true }
            ],
            "timestamp": timestamp
        }]
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::time::Instant;

    use crate::logic::model::Label;
    use crate::logic::policy::Severity;

    fn alert() -> Alert {
        Alert {
            title: "Critical Content Detected".to_string(),
            message: "Detected: porn (75.0%)".to_string(),
            severity: Severity::Critical,
            label: Label::Porn,
            confidence: 0.75,
            event_id: 7,
            timestamp: 1_700_000_000_000,
        }
    }

    #[test]
    fn test_platform_detection() {
        assert_eq!(WebhookPlatform::detect("https://hooks.slack.com/services/x"), WebhookPlatform::Slack);
        assert_eq!(
            WebhookPlatform::detect("https://discord.com/api/webhooks/1/abc"),
            WebhookPlatform::Discord
        );
        assert_eq!(WebhookPlatform::detect("http://localhost:9000/alerts"), WebhookPlatform::Generic);
    }

    #[test]
    fn test_generic_payload_is_alert_json() {
        let sink = WebhookSink::new("http://localhost/alerts");
        let value: serde_json::Value = serde_json::from_str(&sink.format(&alert())).unwrap();
        assert_eq!(value["severity"], "CRITICAL");
        assert_eq!(value["label"], "porn");
        assert_eq!(value["event_id"], 7);
    }

    #[test]
    fn test_slack_and_discord_shapes() {
        let slack = WebhookSink::with_platform("u", WebhookPlatform::Slack).format(&alert());
        assert!(slack.contains("blocks"));
        assert!(slack.contains("Critical Content Detected"));

        let discord = WebhookSink::with_platform("u", WebhookPlatform::Discord).format(&alert());
        let value: serde_json::Value = serde_json::from_str(&discord).unwrap();
        assert_eq!(value["embeds"][0]["color"], 0xdc2626);
    }

    /// Accepts connections and never answers
    fn silent_endpoint() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let mut held = Vec::new();
            for stream in listener.incoming() {
                held.push(stream);
            }
        });
        format!("http://{}/alerts", addr)
    }

    #[test]
    fn test_unreachable_endpoint_is_error() {
        // Port 9 (discard) on localhost is closed in test environments
        let client =
            WebhookClient::new("http://127.0.0.1:9/alerts", WebhookPlatform::Generic, Duration::from_secs(2));
        assert!(client.post(&alert()).is_err());
    }

    #[test]
    fn test_post_times_out_on_silent_endpoint() {
        let client = WebhookClient::new(silent_endpoint(), WebhookPlatform::Generic, Duration::from_millis(300));

        let started = Instant::now();
        assert!(matches!(client.post(&alert()), Err(SinkError::Unavailable(_))));
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn test_deliver_never_waits_on_the_network() {
        let sink = WebhookSink::with_options(
            silent_endpoint(),
            WebhookPlatform::Generic,
            Duration::from_secs(30),
            1,
        );

        let started = Instant::now();
        let results: Vec<_> = (0..5).map(|_| sink.deliver(&alert())).collect();
        assert!(started.elapsed() < Duration::from_millis(500));

        // One alert in the worker, at most one queued, the rest dropped
        assert!(results[0].is_ok());
        let dropped = results.iter().filter(|r| matches!(r, Err(SinkError::Delivery(_)))).count();
        assert!(dropped >= 3, "results: {:?}", results);
    }
}
