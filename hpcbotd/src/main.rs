// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;

use adapters::cli::Command;
use adapters::ssh::{SshConnection, SshTimeouts};
use app::errors::AppErrorKind;
use app::manager::{Manager, ManagerSettings};
use app::ports::{ArchiveStoragePort, ChatNotifierPort};
use app::services::cluster::Cluster;
use app::services::runner::Runner;
use app::submission::SubmissionService;

mod adapters;
mod app;
mod config;
mod logging;

fn log_config_report(report: &config::ConfigReport) {
    match (&report.config_path, report.config_path_source) {
        (Some(path), Some(source)) => {
            tracing::info!(
                "config path: {} (source={}, present={})",
                path.display(),
                source.as_str(),
                report.config_file_present
            );
        }
        (Some(path), None) => {
            tracing::info!(
                "config path: {} (present={})",
                path.display(),
                report.config_file_present
            );
        }
        (None, _) => {
            tracing::info!("config path: (none)");
        }
    }
    tracing::info!(
        "config database_path: {} (source={})",
        report.database_path.value.display(),
        report.database_path.source.as_str()
    );
    tracing::info!(
        "config download_path: {} (source={})",
        report.download_path.value.display(),
        report.download_path.source.as_str()
    );
    tracing::info!(
        "config polling: {:?} (source={})",
        report.polling.value,
        report.polling.source.as_str()
    );
    tracing::info!(
        "config notifications.policy: {:?} (source={})",
        report.notify_policy.value,
        report.notify_policy.source.as_str()
    );
    tracing::info!(
        "config verbose: {} (source={})",
        report.verbose.value,
        report.verbose.source.as_str()
    );
    tracing::info!("config clusters: [{}]", report.cluster_labels.join(", "));
}

/// Clusters in config order, each with its own SSH connection. The
/// connections are returned too so they can be closed on exit.
fn build_clusters(
    config: &config::Config,
) -> anyhow::Result<(Arc<[Cluster]>, Vec<Arc<SshConnection>>)> {
    let timeouts = SshTimeouts {
        connect: config.timeouts.connect,
        exec: config.timeouts.exec,
        transfer: config.timeouts.transfer,
    };
    let mut clusters = Vec::with_capacity(config.clusters.len());
    let mut connections = Vec::with_capacity(config.clusters.len());
    for entry in &config.clusters {
        let runners = entry
            .runners
            .iter()
            .cloned()
            .map(Runner::new)
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("cluster {}", entry.label))?;
        let connection = Arc::new(SshConnection::new(entry.connection.clone(), timeouts));
        clusters.push(Cluster::new(
            entry.label.clone(),
            entry.upload_path.clone(),
            runners,
            connection.clone(),
        )?);
        connections.push(connection);
    }
    Ok((clusters.into(), connections))
}

fn build_notifier(config: &config::Config) -> anyhow::Result<Arc<dyn ChatNotifierPort>> {
    match config.chat.as_ref().and_then(|chat| {
        chat.bot_token
            .as_deref()
            .map(|token| (token, chat.log_chat_id, chat.api_base.as_deref()))
    }) {
        Some((token, log_chat_id, api_base)) => {
            let notifier = adapters::chat::TelegramNotifier::new(
                api_base.unwrap_or(adapters::chat::DEFAULT_API_BASE),
                token,
                log_chat_id,
                config.timeouts.http,
            )?;
            Ok(Arc::new(notifier))
        }
        None => {
            tracing::warn!("no chat bot token configured; notifications are only logged");
            Ok(Arc::new(adapters::chat::LogNotifier))
        }
    }
}

fn build_archive(config: &config::Config) -> anyhow::Result<Arc<dyn ArchiveStoragePort>> {
    let storage = config
        .storage
        .as_ref()
        .context("the [storage] section is required to run the manager")?;
    let connection = adapters::webdav::WebDavConnection::new(
        adapters::webdav::WebDavCredentials {
            host: storage.host.clone(),
            username: storage.username.clone(),
            password: storage.password.clone(),
        },
        config.timeouts.http,
    )?;
    tracing::info!("archive storage at {}", connection.base_url());
    Ok(Arc::new(adapters::webdav::RemoteStorage::new(
        connection,
        storage.base_path.clone(),
    )))
}

async fn run_manager(
    config: &config::Config,
    store: Arc<adapters::db::SqliteStoreAdapter>,
    once: bool,
) -> anyhow::Result<()> {
    let (clusters, connections) = build_clusters(config)?;
    let manager = Manager::new(
        clusters,
        store,
        build_archive(config)?,
        build_notifier(config)?,
        Arc::new(adapters::time::SystemClock::new()),
        ManagerSettings {
            download_path: config.download_path.clone(),
            polling: config.polling,
            notify_policy: config.notify_policy,
        },
    )?;
    manager.register_clusters().await?;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, stopping after the current stage");
            let _ = cancel_tx.send(true);
        }
    });

    let result = if once {
        manager.run_cycle(&cancel_rx).await
    } else {
        manager.run(cancel_rx).await
    };
    for connection in &connections {
        connection.shutdown().await;
    }
    match result {
        Err(err) if err.kind() == AppErrorKind::Cancelled => Ok(()),
        other => Ok(other?),
    }
}

async fn submit(
    config: &config::Config,
    store: Arc<adapters::db::SqliteStoreAdapter>,
    user: i64,
    file: &str,
    command: Option<&str>,
    input: Option<&Path>,
) -> anyhow::Result<()> {
    let (clusters, _) = build_clusters(config)?;
    let service = SubmissionService::new(
        clusters,
        store.clone(),
        store,
        Arc::new(adapters::time::SystemClock::new()),
        config.download_path.clone(),
    );
    // read first so a missing source does not leave a calculation behind
    let contents = match input {
        Some(path) => Some(
            tokio::fs::read(path)
                .await
                .with_context(|| format!("reading {}", path.display()))?,
        ),
        None => None,
    };
    let submission = service.submit(user, file, command).await?;
    if let Some(contents) = contents {
        submission.write_input(&contents).await?;
    }
    tracing::info!(
        id = submission.calculation.id,
        cluster = %submission.calculation.cluster_label,
        "calculation recorded"
    );
    println!("{}", submission.input_path.display());
    Ok(())
}

async fn open_store(path: &Path) -> anyhow::Result<Arc<adapters::db::SqliteStoreAdapter>> {
    config::ensure_database_dir(path)?;
    let db = adapters::db::CalculationStore::open(path)
        .await
        .with_context(|| format!("opening database {}", path.display()))?;
    Ok(Arc::new(adapters::db::SqliteStoreAdapter::new(db)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let parsed = adapters::cli::parse_opts();
    let opts = parsed.opts;
    let command = opts.command_or_default();
    let interval_secs = match &command {
        Command::Run { interval_secs, .. } => *interval_secs,
        _ => None,
    };
    let config::LoadResult { config, report } = config::load_with_report(
        opts.config,
        config::Overrides {
            database_path: opts.database_path,
            download_path: opts.download_path,
            interval_secs,
            verbose: parsed.verbose_override,
        },
    )?;
    logging::init(config.verbose);
    log_config_report(&report);

    let store = open_store(&config.database_path).await?;
    match command {
        Command::Run { once, .. } => run_manager(&config, store, once).await,
        Command::Submit {
            user,
            file,
            command,
            input,
        } => {
            submit(
                &config,
                store,
                user,
                &file,
                command.as_deref(),
                input.as_deref(),
            )
            .await
        }
        Command::AddUser {
            id,
            limit,
            blocked,
            chat_id,
        } => {
            let user = store
                .inner()
                .upsert_user(id, limit, blocked, chat_id)
                .await?;
            tracing::info!(
                id = user.id,
                limit = user.calculation_limit,
                blocked = user.blocked,
                "user saved"
            );
            Ok(())
        }
    }
}
