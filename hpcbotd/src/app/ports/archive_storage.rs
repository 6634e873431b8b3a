// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;

use async_trait::async_trait;

use crate::app::errors::AppResult;

#[async_trait]
/// Durable archive for finished calculation output.
pub trait ArchiveStoragePort: Send + Sync {
    /// Stores `local` under `{base}/{name}` and returns `name`.
    async fn put(&self, local: &Path, name: &str) -> AppResult<String>;

    /// Public link for a stored entry, `None` when the server refuses.
    async fn shared_link(&self, name: &str) -> AppResult<Option<String>>;

    async fn get(&self, name: &str, local: &Path) -> AppResult<()>;
}
