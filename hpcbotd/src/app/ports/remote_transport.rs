// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;

use async_trait::async_trait;

use crate::app::errors::AppResult;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

#[async_trait]
/// Command execution and file transfer against one remote host.
/// Implementations own their session and reopen it when it dies.
pub trait RemoteTransportPort: Send + Sync {
    /// Whether the cached session is usable without reconnecting.
    async fn is_alive(&self) -> bool;

    async fn execute(&self, command: &str) -> AppResult<ExecOutput>;

    /// Downloads `remote` into `local`. When `local` is an existing
    /// directory the remote basename is appended.
    async fn get(&self, remote: &str, local: &Path) -> AppResult<()>;

    /// Uploads `local` to `remote`, creating missing parents. When `remote`
    /// is an existing directory the local basename is appended.
    async fn put(&self, local: &Path, remote: &str) -> AppResult<()>;

    async fn mkdir_recursive(&self, remote: &str) -> AppResult<()>;

    async fn is_remote_dir(&self, remote: &str) -> AppResult<bool>;
}
