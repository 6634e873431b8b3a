// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{ExecOutput, RemoteTransportPort};
use crate::app::services::runner::{Runner, normalize_extension};
use crate::app::services::shell::chdir_prefix;

/// A compute endpoint: its transport, upload root and runners.
pub struct Cluster {
    label: String,
    upload_path: String,
    runners: Vec<Runner>,
    by_extension: HashMap<String, usize>,
    transport: Arc<dyn RemoteTransportPort>,
}

impl Cluster {
    /// Fails when two runners claim the same extension.
    pub fn new(
        label: impl Into<String>,
        upload_path: impl Into<String>,
        runners: Vec<Runner>,
        transport: Arc<dyn RemoteTransportPort>,
    ) -> AppResult<Self> {
        let label = label.into();
        let mut by_extension = HashMap::new();
        for (idx, runner) in runners.iter().enumerate() {
            for ext in runner.associations() {
                if by_extension.insert(ext.clone(), idx).is_some() {
                    return Err(AppError::with_message(
                        AppErrorKind::InvalidConfig,
                        codes::INVALID_CONFIG,
                        format!(
                            "cluster {label}: extension {ext} is associated with more than one runner"
                        ),
                    ));
                }
            }
        }
        Ok(Self {
            label,
            upload_path: upload_path.into().trim_end_matches('/').to_string(),
            runners,
            by_extension,
            transport,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// `{upload_path}/{relative}`.
    pub fn remote_path(&self, relative: &str) -> String {
        format!("{}/{}", self.upload_path, relative.trim_start_matches('/'))
    }

    pub fn runner_for_extension(&self, ext: &str) -> Option<&Runner> {
        self.by_extension
            .get(&normalize_extension(ext))
            .map(|idx| &self.runners[*idx])
    }

    /// First runner, in declaration order, that parses `command`.
    pub fn find_suitable_runner(&self, command: &str) -> Option<(&Runner, Vec<String>)> {
        self.runners
            .iter()
            .find_map(|runner| runner.split_command(command).ok().map(|args| (runner, args)))
    }

    /// Runs `runner` on the cluster, optionally inside `chdir`. Output is
    /// returned uninterpreted.
    pub async fn submit(
        &self,
        runner: &Runner,
        args: Option<&[String]>,
        filename: Option<&str>,
        chdir: Option<&str>,
    ) -> AppResult<ExecOutput> {
        let mut command = runner.build_command(args, filename)?;
        if let Some(dir) = chdir {
            command = format!("{}{command}", chdir_prefix(dir));
        }
        tracing::debug!(cluster = %self.label, "executing {command}");
        self.transport.execute(&command).await
    }

    /// `None` when no runner recognizes `command`.
    pub async fn perform_command(
        &self,
        command: &str,
        filename: Option<&str>,
        chdir: Option<&str>,
    ) -> AppResult<Option<ExecOutput>> {
        let Some((runner, args)) = self.find_suitable_runner(command) else {
            return Ok(None);
        };
        self.submit(runner, Some(&args), filename, chdir)
            .await
            .map(Some)
    }

    /// Uploads `local_path` below the upload root and returns the remote
    /// path. The relative part is `remote_path` when given, else the path
    /// relative to `local_root`, else the file name.
    pub async fn upload_file(
        &self,
        local_path: &Path,
        local_root: Option<&Path>,
        remote_path: Option<&str>,
    ) -> AppResult<String> {
        let relative = match remote_path {
            Some(rel) => rel.trim_start_matches('/').to_string(),
            None => relative_remote_path(local_path, local_root)?,
        };
        let remote = self.remote_path(&relative);
        self.transport.put(local_path, &remote).await?;
        Ok(remote)
    }

    /// Downloads `{upload_path}/{remote}` to `local`.
    pub async fn download_file(&self, remote: &str, local: &Path) -> AppResult<PathBuf> {
        self.transport.get(&self.remote_path(remote), local).await?;
        Ok(local.to_path_buf())
    }

    /// Downloads each `{upload_path}/{remote}` into the paired local path.
    /// Failures are logged and reported per item; the batch always runs to
    /// the end.
    pub async fn download_many(&self, remotes: &[String], locals: &[PathBuf]) -> Vec<bool> {
        let mut success = Vec::with_capacity(remotes.len().min(locals.len()));
        for (remote, local) in remotes.iter().zip(locals) {
            let remote = self.remote_path(remote);
            match self.transport.get(&remote, local).await {
                Ok(()) => success.push(true),
                Err(err) => {
                    tracing::error!(cluster = %self.label, "failed to download {remote}: {err}");
                    success.push(false);
                }
            }
        }
        success
    }
}

impl fmt::Display for Cluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cluster {}, available programs:", self.label)?;
        for runner in &self.runners {
            write!(f, "\n{runner}")?;
        }
        Ok(())
    }
}

fn relative_remote_path(local_path: &Path, local_root: Option<&Path>) -> AppResult<String> {
    let relative = match local_root {
        Some(root) => local_path.strip_prefix(root).map_err(|_| {
            AppError::with_message(
                AppErrorKind::Validation,
                codes::LOCAL_ERROR,
                format!(
                    "{} is not below {}",
                    local_path.display(),
                    root.display()
                ),
            )
        })?,
        None => Path::new(local_path.file_name().ok_or_else(|| {
            AppError::validation(format!("{} has no file name", local_path.display()))
        })?),
    };
    let parts: Vec<String> = relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(os) => Some(os.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        return Err(AppError::validation(format!(
            "nothing to upload at {}",
            local_path.display()
        )));
    }
    Ok(parts.join("/"))
}
