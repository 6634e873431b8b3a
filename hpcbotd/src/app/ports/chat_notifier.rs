// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::errors::AppResult;

#[async_trait]
/// Outbound chat delivery.
pub trait ChatNotifierPort: Send + Sync {
    async fn notify(&self, chat_id: i64, text: &str) -> AppResult<()>;

    /// Copy for the operator log chat. No-op when none is configured.
    async fn notify_operators(&self, text: &str) -> AppResult<()>;
}
