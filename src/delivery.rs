//! Webhook delivery
//!
//! Formats a message as a markdown notification and POSTs it to the chat
//! webhook with explicit timeouts and bounded exponential backoff.

use crate::clock::Clock;
use crate::config::{Config, TIMESTAMP_FORMAT, WEBHOOK_URL_PREFIXES};
use crate::error::{DeliveryError, Result};
use crate::network::{HostProbe, NetworkCheck};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Characters the destination's markdown renderer treats specially
const MARKDOWN_SPECIAL: &[char] = &[
    '\\', '`', '*', '_', '#', '[', ']', '(', ')', '~', '<', '>', '-', '=', '|', '{', '}', '.',
    '!',
];

const CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// A fully-built POST to the webhook
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Minimal POST-only transport; `Err` means no response was obtained
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn post(&self, request: &WebhookRequest) -> Result<HttpResponse>;
}

/// Production transport backed by a shared `reqwest::Client`
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(connect_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post(&self, request: &WebhookRequest) -> Result<HttpResponse> {
        let mut builder = self
            .client
            .post(&request.url)
            .timeout(request.timeout)
            .body(request.body.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok(HttpResponse { status, body })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryTimeouts {
    pub connect: Duration,
    /// Whole-request bound covering write and read
    pub request: Duration,
}

impl Default for DeliveryTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(10),
            request: Duration::from_secs(15),
        }
    }
}

/// Exponential backoff: `initial_delay` doubling per retry, capped at `max_delay`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(5000),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.initial_delay
            .saturating_mul(1u32 << retry.min(16))
            .min(self.max_delay)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub succeeded: bool,
    pub http_status: Option<u16>,
    pub attempts_made: u32,
    pub last_error: Option<DeliveryError>,
}

impl DeliveryOutcome {
    fn rejected(error: DeliveryError) -> Self {
        Self {
            succeeded: false,
            http_status: None,
            attempts_made: 0,
            last_error: Some(error),
        }
    }

    /// Collapse into a `Result`; a spent retry budget becomes `ExhaustedRetries`
    pub fn into_result(self) -> std::result::Result<(), DeliveryError> {
        if self.succeeded {
            return Ok(());
        }
        match self.last_error {
            Some(last) if last.is_retryable() => Err(DeliveryError::ExhaustedRetries {
                attempts: self.attempts_made,
                last: Box::new(last),
            }),
            Some(other) => Err(other),
            None => Err(DeliveryError::Transport("unknown failure".to_string())),
        }
    }
}

/// Only the canonical webhook endpoints are accepted
pub fn is_valid_webhook_url(url: &str) -> bool {
    WEBHOOK_URL_PREFIXES.iter().any(|prefix| url.starts_with(prefix))
}

/// Backslash-escape markdown control characters
pub fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if MARKDOWN_SPECIAL.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Notification text: header, coded sender, fenced body, timestamp
pub fn format_message(sender: &str, body: &str, at: DateTime<Local>) -> String {
    format!(
        "**收到新短信**\n\n**发件人：** `{}`\n**内容：**\n```\n{}\n```\n**时间：** {}\n\n---\n来自短信转发器",
        escape_markdown(sender),
        escape_markdown(body.trim()),
        at.format(TIMESTAMP_FORMAT)
    )
}

#[derive(Serialize)]
struct MarkdownPayload<'a> {
    msgtype: &'static str,
    markdown: MarkdownContent<'a>,
}

#[derive(Serialize)]
struct MarkdownContent<'a> {
    content: &'a str,
}

/// Wire body: `{"msgtype":"markdown","markdown":{"content":...}}`
pub fn build_payload(content: &str) -> Result<String> {
    let payload = MarkdownPayload {
        msgtype: "markdown",
        markdown: MarkdownContent { content },
    };
    Ok(serde_json::to_string(&payload)?)
}

/// Sends notifications to the webhook with retry
pub struct DeliveryClient {
    transport: Arc<dyn HttpTransport>,
    network: Arc<dyn NetworkCheck>,
    retry: RetryPolicy,
    timeouts: DeliveryTimeouts,
}

impl DeliveryClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        network: Arc<dyn NetworkCheck>,
        retry: RetryPolicy,
        timeouts: DeliveryTimeouts,
    ) -> Self {
        Self {
            transport,
            network,
            retry,
            timeouts,
        }
    }

    /// reqwest transport plus a host probe for the webhook domain
    pub fn from_config(config: &Config) -> Result<Self> {
        let timeouts = config.delivery_timeouts();
        let transport = ReqwestTransport::new(timeouts.connect)?;
        let probe = HostProbe::new(
            config.probe_host.clone(),
            Duration::from_millis(config.probe_timeout_ms),
        );
        Ok(Self::new(
            Arc::new(transport),
            Arc::new(probe),
            config.retry_policy(),
            timeouts,
        ))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub async fn deliver(
        &self,
        destination_url: &str,
        sender: &str,
        body: &str,
        clock: &dyn Clock,
    ) -> DeliveryOutcome {
        if !is_valid_webhook_url(destination_url) {
            warn!("Rejecting unrecognized webhook URL");
            return DeliveryOutcome::rejected(DeliveryError::InvalidDestination);
        }

        if !self.network_available().await {
            error!("Network unavailable, not forwarding message from {}", sender);
            return DeliveryOutcome::rejected(DeliveryError::NetworkUnavailable);
        }

        let content = format_message(sender, body, clock.now());
        let payload = match build_payload(&content) {
            Ok(p) => p,
            Err(e) => return DeliveryOutcome::rejected(DeliveryError::Transport(e.to_string())),
        };

        let request = WebhookRequest {
            url: destination_url.to_string(),
            headers: vec![
                ("Content-Type".to_string(), CONTENT_TYPE.to_string()),
                ("Accept".to_string(), "application/json".to_string()),
            ],
            body: payload,
            timeout: self.timeouts.request,
        };

        self.send_with_retry(&request).await
    }

    /// Fire a fixed notification to check the destination end to end
    pub async fn send_test_message(
        &self,
        destination_url: &str,
        clock: &dyn Clock,
    ) -> DeliveryOutcome {
        self.deliver(
            destination_url,
            "测试消息",
            "这是一条测试短信，用于验证配置是否正确",
            clock,
        )
        .await
    }

    /// Run the connectivity check on the blocking pool; it may do DNS and TCP
    async fn network_available(&self) -> bool {
        let network = self.network.clone();
        match tokio::task::spawn_blocking(move || network.is_available()).await {
            Ok(online) => online,
            Err(e) => {
                warn!("Network check task failed: {}", e);
                false
            }
        }
    }

    async fn send_with_retry(&self, request: &WebhookRequest) -> DeliveryOutcome {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut http_status = None;
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            match self.transport.post(request).await {
                Ok(response) if response.is_success() => {
                    if attempt > 1 {
                        info!("Webhook delivered after {} attempts", attempt);
                    } else {
                        debug!("Webhook delivered (HTTP {})", response.status);
                    }
                    return DeliveryOutcome {
                        succeeded: true,
                        http_status: Some(response.status),
                        attempts_made: attempt,
                        last_error: None,
                    };
                }
                Ok(response) => {
                    warn!(
                        "Webhook attempt {}/{} got HTTP {}",
                        attempt, max_attempts, response.status
                    );
                    http_status = Some(response.status);
                    last_error = Some(DeliveryError::Http(response.status));
                }
                Err(e) => {
                    warn!("Webhook attempt {}/{} failed: {}", attempt, max_attempts, e);
                    http_status = None;
                    last_error = Some(DeliveryError::Transport(e.to_string()));
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(self.retry.delay_for(attempt - 1)).await;
            }
        }

        error!("Webhook delivery gave up after {} attempts", max_attempts);
        DeliveryOutcome {
            succeeded: false,
            http_status,
            attempts_made: max_attempts,
            last_error,
        }
    }
}
