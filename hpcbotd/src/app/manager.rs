// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use rand::Rng;
use tokio::sync::watch;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{ArchiveStoragePort, CalculationStorePort, ChatNotifierPort, ClockPort};
use crate::app::services::cluster::Cluster;
use crate::app::services::notifications;
use crate::app::services::runner::Runner;
use crate::app::services::slurm;
use crate::app::types::{Calculation, CalculationStatus, StatusUpdate};

/// Delay between two manager cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollingInterval {
    Fixed(Duration),
    /// Uniform in `[min, max)`.
    Jittered { min: Duration, max: Duration },
}

impl PollingInterval {
    pub fn next_delay(&self) -> Duration {
        match *self {
            PollingInterval::Fixed(d) => d,
            PollingInterval::Jittered { min, max } if min < max => {
                rand::rng().random_range(min..max)
            }
            PollingInterval::Jittered { min, .. } => min,
        }
    }
}

/// What happens to a calculation whose notification could not be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotifyPolicy {
    /// Advance to sent anyway; the failure is only logged.
    #[default]
    MarkSentUnconditionally,
    /// Keep the status so the next cycle tries again.
    RetryUntilDelivered,
}

#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub download_path: PathBuf,
    pub polling: PollingInterval,
    pub notify_policy: NotifyPolicy,
}

/// Drives calculations through upload, start, poll, fetch, archive and
/// notify. Each stage reads its calculations, works cluster by cluster and
/// commits its status changes in one bulk update. Items that fail a stage
/// are left out of the update and picked up again on the next cycle.
pub struct Manager {
    clusters: Arc<[Cluster]>,
    store: Arc<dyn CalculationStorePort>,
    archive: Arc<dyn ArchiveStoragePort>,
    notifier: Arc<dyn ChatNotifierPort>,
    clock: Arc<dyn ClockPort>,
    queue_runner: Runner,
    settings: ManagerSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Upload,
    Start,
    Poll,
    Fetch,
    Archive,
    Notify,
}

impl Stage {
    const ORDER: [Stage; 6] = [
        Stage::Upload,
        Stage::Start,
        Stage::Poll,
        Stage::Fetch,
        Stage::Archive,
        Stage::Notify,
    ];

    fn name(self) -> &'static str {
        match self {
            Stage::Upload => "upload",
            Stage::Start => "start",
            Stage::Poll => "poll",
            Stage::Fetch => "fetch",
            Stage::Archive => "archive",
            Stage::Notify => "notify",
        }
    }
}

impl Manager {
    pub fn new(
        clusters: Arc<[Cluster]>,
        store: Arc<dyn CalculationStorePort>,
        archive: Arc<dyn ArchiveStoragePort>,
        notifier: Arc<dyn ChatNotifierPort>,
        clock: Arc<dyn ClockPort>,
        settings: ManagerSettings,
    ) -> AppResult<Self> {
        Ok(Self {
            clusters,
            store,
            archive,
            notifier,
            clock,
            queue_runner: slurm::queue_runner()?,
            settings,
        })
    }

    /// Makes sure every configured cluster has a datastore row.
    pub async fn register_clusters(&self) -> AppResult<()> {
        for cluster in self.clusters.iter() {
            let id = self.store.ensure_cluster(cluster.label()).await?;
            tracing::debug!(cluster = %cluster.label(), id, "cluster registered");
        }
        Ok(())
    }

    /// Runs cycles until `cancel` flips to true or its sender goes away.
    /// Always returns a cancelled error in that case.
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) -> AppResult<()> {
        tracing::info!(clusters = self.clusters.len(), "manager loop started");
        loop {
            self.run_cycle(&cancel).await?;

            let delay = self.settings.polling.next_delay();
            tracing::debug!("next cycle in {:?}", delay);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        tracing::info!("manager loop cancelled");
                        return Err(AppError::cancelled());
                    }
                }
            }
        }
    }

    /// One pass over all stages. Stage failures are logged and do not stop
    /// the remaining stages; only cancellation ends the cycle early.
    pub async fn run_cycle(&self, cancel: &watch::Receiver<bool>) -> AppResult<()> {
        for stage in Stage::ORDER {
            if *cancel.borrow() {
                return Err(AppError::cancelled());
            }
            match self.run_stage(stage).await {
                Ok(0) => {}
                Ok(n) => tracing::info!(stage = stage.name(), updated = n, "stage committed"),
                Err(err) if err.kind() == AppErrorKind::Cancelled => return Err(err),
                Err(err) => {
                    tracing::error!(stage = stage.name(), code = err.code(), "stage failed: {err}")
                }
            }
        }
        Ok(())
    }

    async fn run_stage(&self, stage: Stage) -> AppResult<usize> {
        let updates = match stage {
            Stage::Upload => self.upload_stage().await?,
            Stage::Start => self.start_stage().await?,
            Stage::Poll => self.poll_stage().await?,
            Stage::Fetch => self.fetch_stage().await?,
            Stage::Archive => self.archive_stage().await?,
            Stage::Notify => self.notify_stage().await?,
        };
        if updates.is_empty() {
            return Ok(0);
        }
        self.store.apply_updates(&updates).await?;
        Ok(updates.len())
    }

    /// Pushes each new calculation's input file to `{upload}/{folder}/{name}`.
    /// Calculations whose input has not been written yet wait for a later
    /// cycle.
    async fn upload_stage(&self) -> AppResult<Vec<StatusUpdate>> {
        let calcs = self.store.list_by_status(CalculationStatus::NotStarted).await?;
        let mut updates = Vec::new();
        for (cluster, calcs) in self.by_cluster(calcs) {
            for calc in calcs {
                let local = self
                    .settings
                    .download_path
                    .join(calc.folder_name())
                    .join(&calc.name);
                match tokio::fs::try_exists(&local).await {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::debug!(calculation = calc.id, "input {} not written yet", local.display());
                        continue;
                    }
                    Err(err) => {
                        tracing::warn!(calculation = calc.id, "cannot check {}: {err}", local.display());
                        continue;
                    }
                }
                match cluster
                    .upload_file(&local, Some(&self.settings.download_path), None)
                    .await
                {
                    Ok(remote) => {
                        tracing::debug!(cluster = %cluster.label(), calculation = calc.id, "uploaded to {remote}");
                        updates.push(StatusUpdate::status(calc.id, CalculationStatus::Uploaded));
                    }
                    Err(err) => {
                        tracing::warn!(cluster = %cluster.label(), calculation = calc.id, "upload failed: {err}");
                        updates.push(StatusUpdate::status(
                            calc.id,
                            CalculationStatus::FailedToUpload,
                        ));
                    }
                }
            }
        }
        Ok(updates)
    }

    /// Submits uploaded calculations. Anything short of a parsed job id
    /// leaves the calculation where it is for an operator to look at.
    async fn start_stage(&self) -> AppResult<Vec<StatusUpdate>> {
        let calcs = self.store.list_by_status(CalculationStatus::Uploaded).await?;
        let mut updates = Vec::new();
        for (cluster, calcs) in self.by_cluster(calcs) {
            for calc in calcs {
                let remote_dir = cluster.remote_path(&calc.folder_name());
                let output = match cluster
                    .perform_command(&calc.command, Some(&calc.name), Some(&remote_dir))
                    .await
                {
                    Ok(Some(output)) => output,
                    Ok(None) => {
                        tracing::warn!(cluster = %cluster.label(), calculation = calc.id, "no runner accepts command {:?}", calc.command);
                        continue;
                    }
                    Err(err) => {
                        tracing::warn!(cluster = %cluster.label(), calculation = calc.id, "submission failed: {err}");
                        continue;
                    }
                };
                match slurm::parse_submission_ack(&output.stdout) {
                    Some(job_id) => {
                        tracing::info!(cluster = %cluster.label(), calculation = calc.id, job_id, "submitted");
                        updates.push(StatusUpdate {
                            id: calc.id,
                            status: CalculationStatus::Pending,
                            finished_at: None,
                            job_id: Some(job_id),
                        });
                    }
                    None => tracing::warn!(
                        cluster = %cluster.label(),
                        calculation = calc.id,
                        "no job id in submission output; stdout: {:?} stderr: {:?}",
                        output.stdout,
                        output.stderr
                    ),
                }
            }
        }
        Ok(updates)
    }

    /// One queue listing per cluster, reconciled against tracked jobs.
    /// Clusters are queried concurrently so a slow one only costs its own
    /// timeout.
    async fn poll_stage(&self) -> AppResult<Vec<StatusUpdate>> {
        let calcs = self.store.list_unfinished().await?;
        let groups: Vec<_> = self
            .by_cluster(calcs)
            .into_iter()
            .filter(|(_, calcs)| calcs.iter().any(|c| c.job_id.is_some()))
            .collect();
        let listings =
            join_all(groups.iter().map(|(cluster, _)| self.queue_listing(cluster))).await;
        let now = self.clock.now_utc();
        let mut updates = Vec::new();
        for ((cluster, calcs), listing) in groups.iter().zip(listings) {
            match listing {
                Ok(listing) => updates.extend(slurm::reconcile(calcs, &listing, now)),
                Err(err) => {
                    tracing::warn!(cluster = %cluster.label(), code = err.code(), "queue listing skipped: {err}")
                }
            }
        }
        Ok(updates)
    }

    async fn queue_listing(
        &self,
        cluster: &Cluster,
    ) -> AppResult<HashMap<i64, CalculationStatus>> {
        let output = cluster.submit(&self.queue_runner, None, None, None).await?;
        tracing::debug!(cluster = %cluster.label(), "queue output: {:?}, stderr: {:?}", output.stdout, output.stderr);
        if output.exit_code != 0 {
            return Err(AppError::with_message(
                AppErrorKind::Transport,
                codes::REMOTE_ERROR,
                format!(
                    "{} exited with {}: {}",
                    self.queue_runner.program(),
                    output.exit_code,
                    output.stderr.trim()
                ),
            ));
        }
        Ok(slurm::parse_queue_listing(&output.stdout)?)
    }

    /// Pulls finished working directories into the download root.
    async fn fetch_stage(&self) -> AppResult<Vec<StatusUpdate>> {
        let calcs = self.store.list_by_status(CalculationStatus::FinishedOk).await?;
        let mut updates = Vec::new();
        for (cluster, calcs) in self.by_cluster(calcs) {
            let folders: Vec<String> = calcs.iter().map(Calculation::folder_name).collect();
            let locals = vec![self.settings.download_path.clone(); folders.len()];
            let success = cluster.download_many(&folders, &locals).await;
            for (calc, ok) in calcs.iter().zip(success) {
                if ok {
                    updates.push(StatusUpdate::status(calc.id, CalculationStatus::Loaded));
                }
            }
        }
        Ok(updates)
    }

    async fn archive_stage(&self) -> AppResult<Vec<StatusUpdate>> {
        let calcs = self.store.list_by_status(CalculationStatus::Loaded).await?;
        let mut updates = Vec::new();
        for calc in calcs {
            let folder = calc.folder_name();
            let local = self.settings.download_path.join(&folder);
            match self.archive.put(&local, &folder).await {
                Ok(_) => updates.push(StatusUpdate::status(calc.id, CalculationStatus::Clouded)),
                Err(err) => {
                    tracing::error!(cluster = %calc.cluster_label, calculation = calc.id, "failed to upload to storage: {err}")
                }
            }
        }
        Ok(updates)
    }

    async fn notify_stage(&self) -> AppResult<Vec<StatusUpdate>> {
        let calcs = self.store.list_for_notification().await?;
        let mut updates = Vec::new();
        for calc in calcs {
            let link = if calc.status == CalculationStatus::Clouded {
                match self.archive.shared_link(&calc.folder_name()).await {
                    Ok(link) => link,
                    Err(err) => {
                        tracing::warn!(calculation = calc.id, "share link failed: {err}");
                        None
                    }
                }
            } else {
                None
            };
            let Some(message) = notifications::compose(&calc, link.as_deref()) else {
                continue;
            };

            let delivered = match calc.user.chat_id {
                Some(chat_id) => match self.notifier.notify(chat_id, &message.user_text).await {
                    Ok(()) => true,
                    Err(err) => {
                        tracing::error!(calculation = calc.id, user = calc.user.id, "failed to notify user: {err}");
                        false
                    }
                },
                None => {
                    tracing::warn!(calculation = calc.id, user = calc.user.id, "user has no chat id");
                    false
                }
            };
            if !delivered && self.settings.notify_policy == NotifyPolicy::RetryUntilDelivered {
                continue;
            }
            // once per calculation, on the way to sent
            if let Err(err) = self.notifier.notify_operators(&message.operator_text).await {
                tracing::warn!(calculation = calc.id, "operator copy not delivered: {err}");
            }
            updates.push(StatusUpdate::status(calc.id, CalculationStatus::Sent));
        }
        Ok(updates)
    }

    /// Pairs configured clusters with their calculations, in configuration
    /// order. Calculations bound to an unknown label are logged and skipped.
    fn by_cluster(&self, calcs: Vec<Calculation>) -> Vec<(&Cluster, Vec<Calculation>)> {
        let mut groups: HashMap<String, Vec<Calculation>> = HashMap::new();
        for calc in calcs {
            groups.entry(calc.cluster_label.clone()).or_default().push(calc);
        }
        let mut out = Vec::new();
        for cluster in self.clusters.iter() {
            if let Some(calcs) = groups.remove(cluster.label()) {
                out.push((cluster, calcs));
            }
        }
        for (label, calcs) in groups {
            tracing::warn!(cluster = %label, count = calcs.len(), "calculations reference an unconfigured cluster");
        }
        out
    }
}
