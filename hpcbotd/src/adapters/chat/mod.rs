// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::app::errors::{AppError, AppResult, codes};
use crate::app::ports::ChatNotifierPort;

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Writes notifications to the log. Used when no bot token is configured.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl ChatNotifierPort for LogNotifier {
    async fn notify(&self, chat_id: i64, text: &str) -> AppResult<()> {
        tracing::info!(chat_id, "notification: {text}");
        Ok(())
    }

    async fn notify_operators(&self, text: &str) -> AppResult<()> {
        tracing::debug!("operator notification: {text}");
        Ok(())
    }
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: i64,
    text: &'a str,
}

#[derive(Deserialize)]
struct ApiReply {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Bot API delivery through `sendMessage`.
pub struct TelegramNotifier {
    client: reqwest::Client,
    endpoint: String,
    bot_token: String,
    log_chat_id: Option<i64>,
}

impl TelegramNotifier {
    pub fn new(
        api_base: &str,
        bot_token: &str,
        log_chat_id: Option<i64>,
        timeout: Duration,
    ) -> Result<Self> {
        if bot_token.trim().is_empty() {
            bail!("bot token must not be empty");
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            client,
            endpoint: send_message_url(api_base, bot_token),
            bot_token: bot_token.to_string(),
            log_chat_id,
        })
    }

    async fn send(&self, chat_id: i64, text: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&SendMessage { chat_id, text })
            .send()
            .await
            .context("sendMessage request")?;
        let status = response.status();
        let reply: ApiReply = response
            .json()
            .await
            .with_context(|| format!("sendMessage reply ({status})"))?;
        if !status.is_success() || !reply.ok {
            bail!(
                "sendMessage rejected with {status}: {}",
                reply.description.unwrap_or_default()
            );
        }
        Ok(())
    }

    /// reqwest errors carry the endpoint URL, which embeds the token.
    fn delivery_error(&self, chat_id: i64, err: anyhow::Error) -> AppError {
        let detail = format!("{err:#}").replace(&self.bot_token, "<token>");
        AppError::transport(
            codes::DELIVERY_FAILURE,
            format!("delivery to chat {chat_id} failed: {detail}"),
        )
    }
}

fn send_message_url(api_base: &str, bot_token: &str) -> String {
    format!("{}/bot{bot_token}/sendMessage", api_base.trim_end_matches('/'))
}

#[async_trait]
impl ChatNotifierPort for TelegramNotifier {
    #[tracing::instrument(name = "chat", level = "debug", skip(self, text), fields(op = "notify"))]
    async fn notify(&self, chat_id: i64, text: &str) -> AppResult<()> {
        self.send(chat_id, text)
            .await
            .map_err(|err| self.delivery_error(chat_id, err))
    }

    async fn notify_operators(&self, text: &str) -> AppResult<()> {
        let Some(chat_id) = self.log_chat_id else {
            return Ok(());
        };
        self.send(chat_id, text)
            .await
            .map_err(|err| self.delivery_error(chat_id, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::errors::AppErrorKind;

    #[tokio::test]
    async fn log_notifier_always_delivers() {
        let notifier = LogNotifier;
        notifier.notify(42, "done").await.unwrap();
        notifier.notify_operators("done").await.unwrap();
    }

    #[test]
    fn endpoint_embeds_token() {
        assert_eq!(
            send_message_url("https://api.telegram.org/", "123:abc"),
            "https://api.telegram.org/bot123:abc/sendMessage"
        );
    }

    #[test]
    fn empty_token_is_rejected() {
        assert!(TelegramNotifier::new(DEFAULT_API_BASE, " ", None, Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn unreachable_api_is_a_delivery_failure() {
        let notifier = TelegramNotifier::new(
            "http://127.0.0.1:1",
            "123:secret",
            Some(7),
            Duration::from_secs(2),
        )
        .unwrap();
        let err = notifier.notify(42, "done").await.unwrap_err();
        assert_eq!(err.kind(), AppErrorKind::Transport);
        assert_eq!(err.code(), codes::DELIVERY_FAILURE);
        assert!(!err.message().contains("secret"));
        assert!(notifier.notify_operators("done").await.is_err());
    }

    #[tokio::test]
    async fn operator_copy_is_skipped_without_log_chat() {
        let notifier = TelegramNotifier::new(
            "http://127.0.0.1:1",
            "123:secret",
            None,
            Duration::from_secs(2),
        )
        .unwrap();
        notifier.notify_operators("done").await.unwrap();
    }
}
