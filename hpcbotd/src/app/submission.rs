// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{CalculationStorePort, ClockPort, UserDirectoryPort};
use crate::app::services::accounting;
use crate::app::services::cluster::Cluster;
use crate::app::services::runner::{Runner, normalize_extension};
use crate::app::types::{Calculation, NewCalculation, Quota, SubmitType, folder_name};

/// A created calculation and where its input file has to be written.
#[derive(Debug, Clone)]
pub struct Submission {
    pub calculation: Calculation,
    pub input_path: PathBuf,
}

impl Submission {
    /// Writes the input next to its final name and renames it into place,
    /// so the upload stage never sees a partial file.
    pub async fn write_input(&self, contents: &[u8]) -> AppResult<()> {
        let mut partial = self.input_path.clone().into_os_string();
        partial.push(".part");
        let partial = PathBuf::from(partial);
        tokio::fs::write(&partial, contents)
            .await
            .map_err(|err| local_error(&partial, err))?;
        tokio::fs::rename(&partial, &self.input_path)
            .await
            .map_err(|err| local_error(&self.input_path, err))
    }
}

fn local_error(path: &Path, err: std::io::Error) -> AppError {
    AppError::with_message(
        AppErrorKind::Internal,
        codes::LOCAL_ERROR,
        format!("{}: {err}", path.display()),
    )
}

/// First cluster whose runner index has `extension`. A free-form command
/// must parse with that runner; its arguments are returned alongside.
pub fn select_cluster<'a>(
    clusters: &'a [Cluster],
    extension: &str,
    command: Option<&str>,
) -> AppResult<Option<(&'a Cluster, &'a Runner, Option<Vec<String>>)>> {
    for cluster in clusters {
        let Some(runner) = cluster.runner_for_extension(extension) else {
            continue;
        };
        let args = match command {
            Some(command) => Some(runner.split_command(command)?),
            None => None,
        };
        return Ok(Some((cluster, runner, args)));
    }
    Ok(None)
}

/// Entry point for the chat front-end: checks the user, picks a cluster
/// and records a not-started calculation.
pub struct SubmissionService {
    clusters: Arc<[Cluster]>,
    users: Arc<dyn UserDirectoryPort>,
    store: Arc<dyn CalculationStorePort>,
    clock: Arc<dyn ClockPort>,
    download_path: PathBuf,
}

impl SubmissionService {
    pub fn new(
        clusters: Arc<[Cluster]>,
        users: Arc<dyn UserDirectoryPort>,
        store: Arc<dyn CalculationStorePort>,
        clock: Arc<dyn ClockPort>,
        download_path: PathBuf,
    ) -> Self {
        Self {
            clusters,
            users,
            store,
            clock,
            download_path,
        }
    }

    pub async fn submit(
        &self,
        user_id: i64,
        file_name: &str,
        command: Option<&str>,
    ) -> AppResult<Submission> {
        let extension = input_extension(file_name)?;

        let user = self.users.get_user(user_id).await?.ok_or_else(|| {
            AppError::with_message(
                AppErrorKind::NotFound,
                codes::NOT_FOUND,
                format!("user {user_id} is not registered"),
            )
        })?;
        if self.users.is_blocked(user_id).await? {
            return Err(AppError::with_message(
                AppErrorKind::Blocked,
                codes::USER_BLOCKED,
                format!("user {user_id} is blocked"),
            ));
        }

        let now = self.clock.now_utc();
        let quota = Quota {
            since: accounting::period_start(now)?,
            limit: user.calculation_limit,
        };
        let used = self.users.calculations_since(user_id, quota.since).await?;
        if used >= quota.limit {
            return Err(limit_exceeded(user_id, quota.limit));
        }

        let (cluster, runner, args) = select_cluster(&self.clusters, &extension, command)?
            .ok_or_else(|| {
                AppError::with_message(
                    AppErrorKind::NotFound,
                    codes::NOT_FOUND,
                    format!("no cluster runs {extension} files"),
                )
            })?;
        let command_line = runner.command_line(args.as_deref())?;

        let workdir = self.download_path.join(folder_name(now, user_id, file_name));
        self.claim_workdir(&workdir).await?;
        let created = self
            .store
            .create_calculation(
                &NewCalculation {
                    name: file_name.to_string(),
                    command: command_line,
                    started_at: now,
                    submit_type: SubmitType::Chat,
                    user_id,
                    cluster_label: cluster.label().to_string(),
                },
                Some(quota),
            )
            .await;
        let calculation = match created {
            Ok(Some(calculation)) => calculation,
            Ok(None) => {
                release_workdir(&workdir).await;
                return Err(limit_exceeded(user_id, quota.limit));
            }
            Err(err) => {
                release_workdir(&workdir).await;
                return Err(err);
            }
        };
        tracing::info!(
            calculation = calculation.id,
            user = user_id,
            cluster = %cluster.label(),
            "calculation {} accepted",
            calculation.name
        );
        Ok(Submission {
            input_path: workdir.join(file_name),
            calculation,
        })
    }

    /// Creates the working directory, refusing one that already exists:
    /// the same user sending the same file name twice within a second
    /// would otherwise share it.
    async fn claim_workdir(&self, workdir: &Path) -> AppResult<()> {
        tokio::fs::create_dir_all(&self.download_path)
            .await
            .map_err(|err| local_error(&self.download_path, err))?;
        match tokio::fs::create_dir(workdir).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(AppError::with_message(
                    AppErrorKind::Conflict,
                    codes::CONFLICT,
                    format!("working directory {} is already in use", workdir.display()),
                ))
            }
            Err(err) => Err(local_error(workdir, err)),
        }
    }
}

async fn release_workdir(workdir: &Path) {
    if let Err(err) = tokio::fs::remove_dir(workdir).await {
        tracing::warn!("cannot remove {}: {err}", workdir.display());
    }
}

fn limit_exceeded(user_id: i64, limit: i64) -> AppError {
    AppError::with_message(
        AppErrorKind::LimitExceeded,
        codes::LIMIT_EXCEEDED,
        format!("user {user_id} has used all {limit} calculations this month"),
    )
}

/// Extension of a bare file name, with its leading dot.
fn input_extension(file_name: &str) -> AppResult<String> {
    let path = Path::new(file_name);
    if path.file_name().and_then(|n| n.to_str()) != Some(file_name) {
        return Err(AppError::validation(format!(
            "{file_name:?} is not a plain file name"
        )));
    }
    path.extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map(normalize_extension)
        .ok_or_else(|| AppError::validation(format!("{file_name:?} has no extension")))
}
