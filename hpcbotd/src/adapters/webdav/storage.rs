// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;

use async_trait::async_trait;

use super::WebDavConnection;
use crate::adapters::remote_fs::{self, join_remote};
use crate::app::errors::{AppError, AppResult, codes};
use crate::app::ports::ArchiveStoragePort;

/// Durable result storage: a WebDAV connection plus the folder everything
/// is archived under.
pub struct RemoteStorage {
    connection: WebDavConnection,
    base_path: String,
}

impl RemoteStorage {
    pub fn new(connection: WebDavConnection, base_path: impl Into<String>) -> Self {
        Self {
            connection,
            base_path: base_path.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn remote_path(&self, name: &str) -> String {
        join_remote(&self.base_path, name)
    }
}

fn storage_error(err: anyhow::Error) -> AppError {
    AppError::transport(codes::STORAGE_ERROR, format!("{err:#}"))
}

#[async_trait]
impl ArchiveStoragePort for RemoteStorage {
    #[tracing::instrument(
        name = "webdav",
        level = "debug",
        skip(self, local),
        fields(op = "put", path = %name)
    )]
    async fn put(&self, local: &Path, name: &str) -> AppResult<String> {
        let remote = self.remote_path(name);
        // Upload to the exact target so a retry merges instead of nesting.
        remote_fs::upload_tree(&self.connection, local, &remote)
            .await
            .map_err(storage_error)?;
        tracing::info!("archived {} as {remote}", local.display());
        Ok(name.to_string())
    }

    async fn shared_link(&self, name: &str) -> AppResult<Option<String>> {
        self.connection
            .share(&self.remote_path(name))
            .await
            .map_err(storage_error)
    }

    #[tracing::instrument(
        name = "webdav",
        level = "debug",
        skip(self, local),
        fields(op = "get", path = %name)
    )]
    async fn get(&self, name: &str, local: &Path) -> AppResult<()> {
        remote_fs::get(&self.connection, &self.remote_path(name), local)
            .await
            .map_err(storage_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::webdav::WebDavCredentials;
    use std::time::Duration;

    #[test]
    fn names_live_under_base_path() {
        let conn = WebDavConnection::new(
            WebDavCredentials {
                host: "https://cloud.example.org".into(),
                username: "bot".into(),
                password: "pw".into(),
            },
            Duration::from_secs(1),
        )
        .unwrap();
        let storage = RemoteStorage::new(conn, "/hpc/results/");
        assert_eq!(storage.remote_path("1_2_water"), "/hpc/results/1_2_water");
    }

    #[tokio::test]
    async fn unreachable_server_is_a_storage_error() {
        let conn = WebDavConnection::new(
            WebDavCredentials {
                host: "http://127.0.0.1:1".into(),
                username: "bot".into(),
                password: "pw".into(),
            },
            Duration::from_secs(2),
        )
        .unwrap();
        let storage = RemoteStorage::new(conn, "results");
        let tmp = tempfile::tempdir().unwrap();
        let err = storage.put(tmp.path(), "x").await.unwrap_err();
        assert_eq!(err.code(), codes::STORAGE_ERROR);
        assert!(storage.shared_link("x").await.is_err());
    }
}
