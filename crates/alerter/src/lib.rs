use crate::error::AlerterError;
use configuration::{NotificationConfig, TelegramConfig};
use reqwest::Client;
use serde::Serialize;
use events::{LogLevel, WsMessage};
use tokio::sync::broadcast;
pub mod error;

/// The JSON payload for the Telegram `sendMessage` endpoint.
#[derive(Debug, Serialize)]
struct SendMessagePayload<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str, // To allow for formatting like bold, italics etc.
}

/// The JSON payload POSTed to the configured notification-service webhook;
/// the Rust-side port of the original platform's Celery email tasks.
#[derive(Debug, Serialize)]
struct NotificationPayload<'a> {
    event_type: &'a str,
    message: &'a str,
}

/// A client for sending messages to the Telegram Bot API.
pub struct TelegramAlerter {
    client: Client,
    token: String,
    chat_id: String,
}

impl TelegramAlerter {
    /// Creates a new `TelegramAlerter`.
    ///
    /// Returns `None` if the token or chat_id is missing from the configuration,
    /// allowing the system to gracefully disable alerting.
    pub fn new(config: &TelegramConfig) -> Option<Self> {
        let (Some(token), Some(chat_id)) = (&config.bot_token, &config.chat_id) else {
            tracing::warn!("Telegram alerter is not configured (missing bot_token or chat_id).");
            return None;
        };
        Some(Self {
            client: Client::new(),
            token: token.clone(),
            chat_id: chat_id.clone(),
        })
    }

    /// Sends a text message to the configured Telegram chat.
    pub async fn send_message(&self, message: &str) -> Result<(), AlerterError> {
        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.token);

        let payload = SendMessagePayload {
            chat_id: &self.chat_id,
            text: message,
            parse_mode: "MarkdownV2", // Use Markdown for rich formatting
        };

        let response = self.client.post(&url).json(&payload).send().await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Failed to decode error response".to_string());
            return Err(AlerterError::ApiError(error_text));
        }

        Ok(())
    }
}

/// A client that POSTs a generic JSON notification to a configured
/// webhook/email-gateway URL (§10.G), alongside the Telegram leg.
pub struct WebhookAlerter {
    client: Client,
    url: String,
}

impl WebhookAlerter {
    /// Returns `None` if no `webhook_url` is configured, disabling this leg
    /// without disabling Telegram alerting.
    pub fn new(config: &NotificationConfig) -> Option<Self> {
        let url = config.webhook_url.clone()?;
        Some(Self { client: Client::new(), url })
    }

    /// Posts a notification to the configured webhook.
    pub async fn send(&self, event_type: &str, message: &str) -> Result<(), AlerterError> {
        let payload = NotificationPayload { event_type, message };
        let response = self.client.post(&self.url).json(&payload).send().await?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Failed to decode error response".to_string());
            return Err(AlerterError::ApiError(error_text));
        }

        Ok(())
    }
}

/// A long-running service that listens to a broadcast channel of `WsMessage` events
/// and sends Telegram and webhook alerts for critical events.
pub async fn run_alerter_service(
    telegram: TelegramAlerter,
    webhook: Option<WebhookAlerter>,
    mut event_rx: broadcast::Receiver<WsMessage>,
) {
    tracing::info!("Alerter service started. Listening for critical events.");

    // Send a startup message
    let _ = telegram.send_message("✅ *Zenith Engine Started*").await;

    loop {
        match event_rx.recv().await {
            Ok(event) => {
                // We match on the event type to decide if an alert is needed.
                let to_send: Option<(&str, String)> = match event {
                    WsMessage::Log(log) => {
                        // We only care about high-severity logs
                        match log.level {
                            LogLevel::Error | LogLevel::Warn => {
                                // Extract the most important part of the message
                                let title = if log.message.contains("CRITICAL") { "🚨 CRITICAL" } else { "⚠️ ERROR" };
                                Some(("log", format!("*{}*: {}", title, escape_markdown(&log.message))))
                            }
                            _ => None, // Ignore Info logs
                        }
                    }
                    WsMessage::TradeExecuted(trade) => {
                        let side = format!("{:?}", trade.side).to_uppercase();
                        let icon = if side == "BUY" { "📈" } else { "📉" };
                        Some((
                            "trade_executed",
                            format!(
                                "{} *{} {}* `@{}`\n`{}` units",
                                icon, side, escape_markdown(&trade.symbol), trade.entry_price, trade.quantity
                            ),
                        ))
                    }
                    WsMessage::ActionError(err) => Some((
                        "action_error",
                        format!(
                            "⚠️ *Action error* (subscription `{}`): {}",
                            err.subscription_id,
                            escape_markdown(&err.message)
                        ),
                    )),
                    WsMessage::TrialExpired(trial) => Some((
                        "trial_expired",
                        format!("⏰ *Trial expired* for subscription `{}`", trial.subscription_id),
                    )),
                };

                if let Some((event_type, msg)) = to_send {
                    if let Err(e) = telegram.send_message(&msg).await {
                        tracing::error!(error = ?e, "Failed to send Telegram alert.");
                    }
                    if let Some(webhook) = &webhook {
                        if let Err(e) = webhook.send(event_type, &msg).await {
                            tracing::error!(error = ?e, "Failed to send webhook notification.");
                        }
                    }
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("Alerter service lagged, skipped {} messages.", n);
            }
            Err(broadcast::error::RecvError::Closed) => {
                tracing::error!("Broadcast channel closed. Alerter service shutting down.");
                break;
            }
        }
    }
}

/// A helper function to escape characters that have special meaning in Telegram's MarkdownV2.
fn escape_markdown(text: &str) -> String {
    let special_chars = r"_*[]()~`>#+-=|{}.!";
    special_chars.chars().fold(text.to_string(), |s, c| s.replace(c, &format!("\\{}", c)))
}