// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::app::errors::AppResult;
use crate::app::types::UserRecord;

#[async_trait]
/// User lookup and quota accounting.
pub trait UserDirectoryPort: Send + Sync {
    async fn get_user(&self, id: i64) -> AppResult<Option<UserRecord>>;
    async fn calculations_since(&self, user_id: i64, since: OffsetDateTime) -> AppResult<i64>;
    async fn is_blocked(&self, user_id: i64) -> AppResult<bool>;
}
