// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::adapters::remote_fs;
use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{ExecOutput, RemoteTransportPort};
use crate::app::types::ConnectionParams;

mod error;
mod session;

pub use error::AuthenticationFailure;
pub use session::SessionManager;

use session::SftpFs;

use error::{is_authentication_failure, is_sftp_missing_path};

/// Per-operation limits for one cluster connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SshTimeouts {
    pub connect: Duration,
    pub exec: Duration,
    pub transfer: Duration,
}

impl Default for SshTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(30),
            exec: Duration::from_secs(120),
            transfer: Duration::from_secs(600),
        }
    }
}

/// Command execution and file transfer against one cluster.
pub struct SshConnection {
    session: SessionManager,
    timeouts: SshTimeouts,
}

impl SshConnection {
    pub fn new(params: ConnectionParams, timeouts: SshTimeouts) -> Self {
        let keepalive = timeouts.connect.max(Duration::from_secs(10));
        Self {
            session: SessionManager::new(params, keepalive),
            timeouts,
        }
    }

    fn params(&self) -> &ConnectionParams {
        self.session.params()
    }

    async fn connect(&self) -> AppResult<()> {
        with_timeout(self.timeouts.connect, "connect", self.session.ensure_connected())
            .await?
            .map_err(map_connect_error)
    }

    async fn open_sftp(&self, what: &'static str) -> AppResult<SftpFs> {
        self.connect().await?;
        self.session
            .sftp()
            .await
            .map_err(|err| map_transfer_error(what, err))
    }

    /// Runs one transfer within the transfer limit and closes the SFTP
    /// subsystem afterwards.
    async fn finish_transfer<T>(
        &self,
        fs: SftpFs,
        what: &'static str,
        result: AppResult<anyhow::Result<T>>,
    ) -> AppResult<T> {
        fs.close().await;
        result?.map_err(|err| map_transfer_error(what, err))
    }

    pub async fn shutdown(&self) {
        self.session.shutdown().await;
    }
}

async fn with_timeout<T>(
    limit: Duration,
    what: &'static str,
    fut: impl Future<Output = T>,
) -> AppResult<T> {
    tokio::time::timeout(limit, fut).await.map_err(|_| {
        AppError::transport(codes::TIMEOUT, format!("ssh {what} timed out after {limit:?}"))
    })
}

fn map_connect_error(err: anyhow::Error) -> AppError {
    let code = if is_authentication_failure(&err) {
        codes::AUTHENTICATION_FAILURE
    } else {
        codes::CONNECTION_FAILURE
    };
    AppError::transport(code, format!("ssh connect failed: {err:#}"))
}

fn map_exec_error(err: anyhow::Error) -> AppError {
    AppError::transport(codes::REMOTE_ERROR, format!("ssh exec failed: {err:#}"))
}

fn map_transfer_error(what: &str, err: anyhow::Error) -> AppError {
    if is_sftp_missing_path(&err) {
        return AppError::with_message(
            AppErrorKind::NotFound,
            codes::NOT_FOUND,
            format!("sftp {what}: remote path missing: {err:#}"),
        );
    }
    AppError::transport(codes::REMOTE_ERROR, format!("sftp {what} failed: {err:#}"))
}

#[async_trait]
impl RemoteTransportPort for SshConnection {
    async fn is_alive(&self) -> bool {
        !self.session.needs_connect().await
    }

    #[tracing::instrument(
        name = "ssh",
        level = "debug",
        skip(self, command),
        fields(op = "exec", host = %self.params().host, user = %self.params().username, port = self.params().port)
    )]
    async fn execute(&self, command: &str) -> AppResult<ExecOutput> {
        self.connect().await?;
        let (stdout, stderr, exit_code) =
            with_timeout(self.timeouts.exec, "exec", self.session.exec_capture(command))
                .await?
                .map_err(map_exec_error)?;
        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code,
        })
    }

    #[tracing::instrument(
        name = "sftp",
        level = "debug",
        skip(self, remote, local),
        fields(op = "get", host = %self.params().host, user = %self.params().username, port = self.params().port, path = %remote)
    )]
    async fn get(&self, remote: &str, local: &Path) -> AppResult<()> {
        let fs = self.open_sftp("get").await?;
        let result =
            with_timeout(self.timeouts.transfer, "get", remote_fs::get(&fs, remote, local)).await;
        self.finish_transfer(fs, "get", result).await
    }

    #[tracing::instrument(
        name = "sftp",
        level = "debug",
        skip(self, local, remote),
        fields(op = "put", host = %self.params().host, user = %self.params().username, port = self.params().port, path = %remote)
    )]
    async fn put(&self, local: &Path, remote: &str) -> AppResult<()> {
        let fs = self.open_sftp("put").await?;
        let result =
            with_timeout(self.timeouts.transfer, "put", remote_fs::put(&fs, local, remote)).await;
        self.finish_transfer(fs, "put", result).await
    }

    #[tracing::instrument(
        name = "sftp",
        level = "debug",
        skip(self, remote),
        fields(op = "mkdir", host = %self.params().host, user = %self.params().username, port = self.params().port, path = %remote)
    )]
    async fn mkdir_recursive(&self, remote: &str) -> AppResult<()> {
        let fs = self.open_sftp("mkdir").await?;
        let result = with_timeout(
            self.timeouts.transfer,
            "mkdir",
            remote_fs::mkdir_recursive(&fs, remote),
        )
        .await;
        self.finish_transfer(fs, "mkdir", result).await
    }

    async fn is_remote_dir(&self, remote: &str) -> AppResult<bool> {
        let fs = self.open_sftp("stat").await?;
        let result = with_timeout(
            self.timeouts.exec,
            "stat",
            remote_fs::is_remote_dir(&fs, remote),
        )
        .await
        .map(Ok);
        self.finish_transfer(fs, "stat", result).await
    }
}
