// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result, anyhow};
use russh_sftp::client::SftpSession;
use std::path::Path;
use tokio::fs as tokiofs;
use tokio::io::AsyncWriteExt;

use super::SessionManager;
use crate::adapters::remote_fs::{BoxFuture, RemoteEntry, RemoteFs};

impl SessionManager {
    /// Opens an SFTP subsystem on the current connection.
    pub(crate) async fn sftp(&self) -> Result<SftpFs> {
        let guard = self.handle.lock().await;
        let handle = guard
            .as_ref()
            .ok_or_else(|| anyhow!("SSH handle lost before opening SFTP"))?;
        let channel = handle.channel_open_session().await?;
        channel.request_subsystem(true, "sftp").await?;
        let sftp = SftpSession::new(channel.into_stream()).await?;
        Ok(SftpFs { sftp })
    }
}

/// `RemoteFs` over one SFTP session.
pub(crate) struct SftpFs {
    sftp: SftpSession,
}

impl SftpFs {
    pub(crate) async fn close(self) {
        let _ = self.sftp.close().await;
    }
}

impl RemoteFs for SftpFs {
    fn stat<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let meta = self.sftp.metadata(path).await?;
            Ok(meta.is_dir())
        })
    }

    fn create_dir<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.sftp
                .create_dir(path)
                .await
                .with_context(|| format!("creating path {path}"))
        })
    }

    fn list_dir<'a>(&'a self, path: &'a str) -> BoxFuture<'a, Result<Vec<RemoteEntry>>> {
        Box::pin(async move {
            let entries = self
                .sftp
                .read_dir(path)
                .await
                .with_context(|| format!("listing {path}"))?;
            Ok(entries
                .into_iter()
                .filter(|entry| entry.file_name() != "." && entry.file_name() != "..")
                .map(|entry| RemoteEntry {
                    name: entry.file_name(),
                    is_dir: entry.metadata().is_dir(),
                })
                .collect())
        })
    }

    fn upload_file<'a>(&'a self, local: &'a Path, remote: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            tracing::debug!("uploading file over sftp: {} -> {remote}", local.display());
            let mut lfile = tokiofs::File::open(local)
                .await
                .with_context(|| format!("opening {}", local.display()))?;
            let mut rfile = self
                .sftp
                .create(remote)
                .await
                .with_context(|| format!("creating remote file {remote}"))?;
            tokio::io::copy(&mut lfile, &mut rfile).await?;
            rfile.flush().await?;
            rfile.shutdown().await?;
            Ok(())
        })
    }

    fn download_file<'a>(&'a self, remote: &'a str, local: &'a Path) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if let Some(parent) = local.parent() {
                tokiofs::create_dir_all(parent).await?;
            }
            let mut rfile = self
                .sftp
                .open(remote)
                .await
                .with_context(|| format!("opening remote file {remote}"))?;
            let mut lfile = tokiofs::File::create(local).await?;
            tokio::io::copy(&mut rfile, &mut lfile).await?;
            lfile.flush().await?;
            Ok(())
        })
    }
}
