// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result};
use serde::Deserialize;
use std::{
    collections::HashSet,
    fmt, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::app::manager::{NotifyPolicy, PollingInterval};
use crate::app::services::runner::{Runner, RunnerSpec, normalize_extension};
use crate::app::types::{ConnectionParams, Credentials};

const APP_DIR_NAME: &str = "hpcbot";
const CONFIG_FILE_NAME: &str = "hpcbotd.toml";
const CONFIG_ENV_VAR: &str = "HPCBOT_CONFIG_PATH";
const DATABASE_FILE_NAME: &str = "hpcbot.sqlite";
const DOWNLOADS_DIR_NAME: &str = "downloads";
const DEFAULT_POLL_MIN_SECS: u64 = 5;
const DEFAULT_POLL_MAX_SECS: u64 = 20;
const DEFAULT_SSH_PORT: u16 = 22;
const DEFAULT_CONNECT_SECS: u64 = 30;
const DEFAULT_EXEC_SECS: u64 = 120;
const DEFAULT_TRANSFER_SECS: u64 = 600;
const DEFAULT_HTTP_SECS: u64 = 60;

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    database_path: Option<String>,
    download_path: Option<String>,
    verbose: Option<bool>,
    polling: Option<PollingFile>,
    #[serde(default)]
    timeouts: TimeoutsFile,
    notifications: Option<NotificationsFile>,
    storage: Option<StorageFile>,
    chat: Option<ChatFile>,
    #[serde(default)]
    clusters: Vec<ClusterFile>,
}

#[derive(Debug, Default, Deserialize)]
struct PollingFile {
    interval_secs: Option<u64>,
    min_secs: Option<u64>,
    max_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct TimeoutsFile {
    connect_secs: Option<u64>,
    exec_secs: Option<u64>,
    transfer_secs: Option<u64>,
    http_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct NotificationsFile {
    policy: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StorageFile {
    host: String,
    username: String,
    password: String,
    #[serde(default)]
    base_path: String,
}

#[derive(Debug, Deserialize)]
struct ChatFile {
    bot_token: Option<String>,
    log_chat_id: Option<i64>,
    api_base: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClusterFile {
    label: String,
    host: String,
    port: Option<u16>,
    username: String,
    password: Option<String>,
    key_path: Option<String>,
    upload_path: String,
    #[serde(default)]
    runners: Vec<RunnerSpec>,
}

/// Per-operation limits, shared by every remote adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    pub exec: Duration,
    pub transfer: Duration,
    pub http: Duration,
}

#[derive(Clone)]
pub struct StorageConfig {
    pub host: String,
    pub username: String,
    pub password: String,
    pub base_path: String,
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("base_path", &self.base_path)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct ChatConfig {
    pub bot_token: Option<String>,
    pub log_chat_id: Option<i64>,
    pub api_base: Option<String>,
}

impl fmt::Debug for ChatConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatConfig")
            .field("bot_token", &self.bot_token.as_ref().map(|_| "<redacted>"))
            .field("log_chat_id", &self.log_chat_id)
            .field("api_base", &self.api_base)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub label: String,
    pub connection: ConnectionParams,
    pub upload_path: String,
    pub runners: Vec<RunnerSpec>,
}

#[derive(Debug)]
pub struct Config {
    pub database_path: PathBuf,
    pub download_path: PathBuf,
    pub verbose: bool,
    pub polling: PollingInterval,
    pub timeouts: Timeouts,
    pub notify_policy: NotifyPolicy,
    pub storage: Option<StorageConfig>,
    pub chat: Option<ChatConfig>,
    pub clusters: Vec<ClusterConfig>,
    #[allow(dead_code)]
    pub config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Override,
    Env,
    ConfigFile,
    Default,
}

impl ConfigSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigSource::Override => "override",
            ConfigSource::Env => "env",
            ConfigSource::ConfigFile => "config",
            ConfigSource::Default => "default",
        }
    }
}

#[derive(Debug)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

#[derive(Debug)]
pub struct ConfigReport {
    pub config_path: Option<PathBuf>,
    pub config_path_source: Option<ConfigSource>,
    pub config_file_present: bool,
    pub database_path: ConfigValue<PathBuf>,
    pub download_path: ConfigValue<PathBuf>,
    pub polling: ConfigValue<PollingInterval>,
    pub notify_policy: ConfigValue<NotifyPolicy>,
    pub verbose: ConfigValue<bool>,
    pub cluster_labels: Vec<String>,
}

#[derive(Debug)]
pub struct LoadResult {
    pub config: Config,
    pub report: ConfigReport,
}

#[derive(Debug, Default)]
pub struct Overrides {
    pub database_path: Option<PathBuf>,
    pub download_path: Option<PathBuf>,
    pub interval_secs: Option<u64>,
    pub verbose: Option<bool>,
}

#[allow(dead_code)]
pub fn load(config_path_override: Option<PathBuf>, overrides: Overrides) -> Result<Config> {
    Ok(load_with_report(config_path_override, overrides)?.config)
}

pub fn load_with_report(
    config_path_override: Option<PathBuf>,
    overrides: Overrides,
) -> Result<LoadResult> {
    let (config_path, config_path_source, required) = match config_path_override {
        Some(path) => (Some(expand_path(path)), Some(ConfigSource::Override), true),
        None => match config_path_from_env()? {
            Some(path) => (Some(expand_path(path)), Some(ConfigSource::Env), true),
            None => match default_config_path().ok() {
                Some(path) => (Some(path), Some(ConfigSource::Default), false),
                None => (None, None, false),
            },
        },
    };
    let config_file_present = config_path
        .as_deref()
        .map(|path| path.exists())
        .unwrap_or(false);

    let file_config = match config_path.as_deref() {
        Some(path) => read_config_file(path, required)?,
        None => FileConfig::default(),
    };
    let base_dir = config_path.as_deref().and_then(|path| path.parent());

    let (database_path, database_source) = match overrides.database_path {
        Some(path) => (expand_path(path), ConfigSource::Override),
        None => match &file_config.database_path {
            Some(raw) => (resolve_path(raw, base_dir), ConfigSource::ConfigFile),
            None => (
                default_data_dir()
                    .map(|dir| dir.join(DATABASE_FILE_NAME))
                    .context(
                        "failed to resolve default database path; specify --database-path or set database_path in the config file",
                    )?,
                ConfigSource::Default,
            ),
        },
    };

    let (download_path, download_source) = match overrides.download_path {
        Some(path) => (expand_path(path), ConfigSource::Override),
        None => match &file_config.download_path {
            Some(raw) => (resolve_path(raw, base_dir), ConfigSource::ConfigFile),
            None => (
                default_data_dir()
                    .map(|dir| dir.join(DOWNLOADS_DIR_NAME))
                    .context(
                        "failed to resolve default download path; specify --download-path or set download_path in the config file",
                    )?,
                ConfigSource::Default,
            ),
        },
    };

    let (verbose, verbose_source) = match overrides.verbose {
        Some(verbose) => (verbose, ConfigSource::Override),
        None => match file_config.verbose {
            Some(verbose) => (verbose, ConfigSource::ConfigFile),
            None => (false, ConfigSource::Default),
        },
    };

    let (polling, polling_source) = match overrides.interval_secs {
        Some(secs) => (fixed_interval(secs)?, ConfigSource::Override),
        None => match &file_config.polling {
            Some(polling) => (parse_polling(polling)?, ConfigSource::ConfigFile),
            None => (
                PollingInterval::Jittered {
                    min: Duration::from_secs(DEFAULT_POLL_MIN_SECS),
                    max: Duration::from_secs(DEFAULT_POLL_MAX_SECS),
                },
                ConfigSource::Default,
            ),
        },
    };

    let (notify_policy, notify_source) = match file_config
        .notifications
        .as_ref()
        .and_then(|n| n.policy.as_deref())
    {
        Some(raw) => (parse_notify_policy(raw)?, ConfigSource::ConfigFile),
        None => (NotifyPolicy::default(), ConfigSource::Default),
    };

    let timeouts = parse_timeouts(&file_config.timeouts)?;
    let clusters = file_config
        .clusters
        .into_iter()
        .map(|cluster| parse_cluster(cluster, base_dir))
        .collect::<Result<Vec<_>>>()?;
    validate_clusters(&clusters)?;

    let storage = file_config.storage.map(|s| StorageConfig {
        host: s.host,
        username: s.username,
        password: s.password,
        base_path: s.base_path,
    });
    let chat = file_config.chat.map(|c| ChatConfig {
        bot_token: c.bot_token.filter(|t| !t.trim().is_empty()),
        log_chat_id: c.log_chat_id,
        api_base: c.api_base,
    });

    let report = ConfigReport {
        config_path: config_path.clone(),
        config_path_source,
        config_file_present,
        database_path: ConfigValue {
            value: database_path.clone(),
            source: database_source,
        },
        download_path: ConfigValue {
            value: download_path.clone(),
            source: download_source,
        },
        polling: ConfigValue {
            value: polling,
            source: polling_source,
        },
        notify_policy: ConfigValue {
            value: notify_policy,
            source: notify_source,
        },
        verbose: ConfigValue {
            value: verbose,
            source: verbose_source,
        },
        cluster_labels: clusters.iter().map(|c| c.label.clone()).collect(),
    };

    let config = Config {
        database_path,
        download_path,
        verbose,
        polling,
        timeouts,
        notify_policy,
        storage,
        chat,
        clusters,
        config_path,
    };

    Ok(LoadResult { config, report })
}

pub fn ensure_database_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create database directory {}", parent.display()))?;
    }
    Ok(())
}

fn fixed_interval(secs: u64) -> Result<PollingInterval> {
    if secs == 0 {
        anyhow::bail!("polling interval must be at least one second");
    }
    Ok(PollingInterval::Fixed(Duration::from_secs(secs)))
}

fn parse_polling(polling: &PollingFile) -> Result<PollingInterval> {
    match (polling.interval_secs, polling.min_secs, polling.max_secs) {
        (Some(secs), None, None) => fixed_interval(secs),
        (None, Some(min), Some(max)) => {
            if min == 0 || min >= max {
                anyhow::bail!("polling range must satisfy 0 < min_secs < max_secs (got {min}..{max})");
            }
            Ok(PollingInterval::Jittered {
                min: Duration::from_secs(min),
                max: Duration::from_secs(max),
            })
        }
        _ => anyhow::bail!(
            "[polling] takes either interval_secs or both min_secs and max_secs"
        ),
    }
}

fn parse_notify_policy(raw: &str) -> Result<NotifyPolicy> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "mark_sent" => Ok(NotifyPolicy::MarkSentUnconditionally),
        "retry_until_delivered" => Ok(NotifyPolicy::RetryUntilDelivered),
        other => anyhow::bail!(
            "unknown notification policy {other:?}; expected mark_sent or retry_until_delivered"
        ),
    }
}

fn parse_timeouts(file: &TimeoutsFile) -> Result<Timeouts> {
    let secs = |value: Option<u64>, default: u64, name: &str| -> Result<Duration> {
        let value = value.unwrap_or(default);
        if value == 0 {
            anyhow::bail!("timeouts.{name} must be at least one second");
        }
        Ok(Duration::from_secs(value))
    };
    Ok(Timeouts {
        connect: secs(file.connect_secs, DEFAULT_CONNECT_SECS, "connect_secs")?,
        exec: secs(file.exec_secs, DEFAULT_EXEC_SECS, "exec_secs")?,
        transfer: secs(file.transfer_secs, DEFAULT_TRANSFER_SECS, "transfer_secs")?,
        http: secs(file.http_secs, DEFAULT_HTTP_SECS, "http_secs")?,
    })
}

fn parse_cluster(file: ClusterFile, base_dir: Option<&Path>) -> Result<ClusterConfig> {
    let label = file.label.trim().to_string();
    if label.is_empty() {
        anyhow::bail!("cluster label must not be empty");
    }
    let credentials = match (file.password, file.key_path) {
        (Some(password), None) => Credentials::Password(password),
        (None, Some(key_path)) => Credentials::KeyPath(resolve_path(&key_path, base_dir)),
        (Some(_), Some(_)) => {
            anyhow::bail!("cluster {label}: set either password or key_path, not both")
        }
        (None, None) => anyhow::bail!("cluster {label}: password or key_path is required"),
    };
    let port = file.port.unwrap_or(DEFAULT_SSH_PORT);
    if port == 0 {
        anyhow::bail!("cluster {label}: port must be between 1 and 65535");
    }
    let mut extensions = HashSet::new();
    for spec in &file.runners {
        Runner::new(spec.clone()).with_context(|| format!("cluster {label}"))?;
        for ext in &spec.associations {
            let ext = normalize_extension(ext);
            if !extensions.insert(ext.clone()) {
                anyhow::bail!(
                    "cluster {label}: extension {ext} is associated with more than one runner"
                );
            }
        }
    }
    Ok(ClusterConfig {
        connection: ConnectionParams {
            host: file.host,
            port,
            username: file.username,
            credentials,
        },
        upload_path: file.upload_path,
        runners: file.runners,
        label,
    })
}

fn validate_clusters(clusters: &[ClusterConfig]) -> Result<()> {
    let mut seen = HashSet::new();
    for cluster in clusters {
        if !seen.insert(cluster.label.as_str()) {
            anyhow::bail!("cluster label {} is configured more than once", cluster.label);
        }
    }
    Ok(())
}

fn read_config_file(path: &Path, required: bool) -> Result<FileConfig> {
    if !path.exists() {
        if required {
            anyhow::bail!("config file not found at {}", path.display());
        }
        return Ok(FileConfig::default());
    }

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

fn resolve_path(raw: &str, base_dir: Option<&Path>) -> PathBuf {
    let expanded = shellexpand::tilde(raw);
    let path = PathBuf::from(expanded.as_ref());
    if path.is_absolute() {
        return path;
    }
    match base_dir {
        Some(dir) => dir.join(path),
        None => path,
    }
}

fn expand_path(path: PathBuf) -> PathBuf {
    let path_string = path.to_string_lossy().to_string();
    let expanded = shellexpand::tilde(&path_string);
    PathBuf::from(expanded.as_ref())
}

fn config_path_from_env() -> Result<Option<PathBuf>> {
    match std::env::var_os(CONFIG_ENV_VAR) {
        Some(value) => {
            if value.is_empty() {
                anyhow::bail!("{CONFIG_ENV_VAR} is set but empty");
            }
            Ok(Some(PathBuf::from(value)))
        }
        None => Ok(None),
    }
}

fn default_config_path() -> Result<PathBuf> {
    let base = dirs::config_dir().context("failed to resolve config directory")?;
    Ok(base.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}

fn default_data_dir() -> Result<PathBuf> {
    let base = dirs::data_dir().context("failed to resolve data directory")?;
    Ok(base.join(APP_DIR_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct EnvVarGuard {
        key: &'static str,
        prev: Option<OsString>,
    }

    impl EnvVarGuard {
        fn set(key: &'static str, value: &str) -> Self {
            let prev = std::env::var_os(key);
            // SAFETY: tests serialize env mutations with ENV_LOCK.
            unsafe {
                std::env::set_var(key, value);
            }
            Self { key, prev }
        }

        fn clear(key: &'static str) -> Self {
            let prev = std::env::var_os(key);
            // SAFETY: tests serialize env mutations with ENV_LOCK.
            unsafe {
                std::env::remove_var(key);
            }
            Self { key, prev }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            match &self.prev {
                // SAFETY: tests serialize env mutations with ENV_LOCK.
                Some(value) => unsafe {
                    std::env::set_var(self.key, value);
                },
                // SAFETY: tests serialize env mutations with ENV_LOCK.
                None => unsafe {
                    std::env::remove_var(self.key);
                },
            }
        }
    }

    const CLUSTER: &str = r#"
[[clusters]]
label = "alpha"
host = "alpha.example.org"
username = "calc"
key_path = "keys/alpha"
upload_path = "/scratch/calc"

[[clusters.runners]]
program = "g16"
allowed_args = ["{}"]
associations = ["gjf", ".com"]
description = "Gaussian 16"
"#;

    fn write_config(dir: &TempDir, body: &str) -> PathBuf {
        let config_dir = dir.path().join("config");
        fs::create_dir_all(&config_dir).unwrap();
        let config_path = config_dir.join(CONFIG_FILE_NAME);
        fs::write(&config_path, body).unwrap();
        config_path
    }

    #[test]
    fn missing_optional_config_file_is_ok() {
        let dir = TempDir::new().unwrap();
        let cfg = read_config_file(&dir.path().join("missing.toml"), false).unwrap();
        assert!(cfg.database_path.is_none());
        assert!(cfg.clusters.is_empty());
    }

    #[test]
    fn missing_required_config_file_errors() {
        let dir = TempDir::new().unwrap();
        let err = read_config_file(&dir.path().join("missing.toml"), true).unwrap_err();
        assert!(err.to_string().contains("config file not found"));
    }

    #[test]
    fn resolves_relative_paths_from_config_dir() {
        let dir = TempDir::new().unwrap();
        let body = format!(
            "database_path = \"db/hpcbot.sqlite\"\ndownload_path = \"work\"\n{CLUSTER}"
        );
        let config_path = write_config(&dir, &body);
        let config_dir = config_path.parent().unwrap().to_path_buf();

        let config = load(Some(config_path.clone()), Overrides::default()).unwrap();
        assert_eq!(config.database_path, config_dir.join("db").join("hpcbot.sqlite"));
        assert_eq!(config.download_path, config_dir.join("work"));
        assert_eq!(config.config_path, Some(config_path));
        let alpha = &config.clusters[0];
        assert_eq!(alpha.label, "alpha");
        assert_eq!(alpha.connection.port, DEFAULT_SSH_PORT);
        assert_eq!(
            alpha.connection.credentials,
            Credentials::KeyPath(config_dir.join("keys").join("alpha"))
        );
        assert_eq!(alpha.runners[0].program, "g16");
    }

    #[test]
    fn defaults_apply_when_sections_are_missing() {
        let dir = TempDir::new().unwrap();
        let config_path = write_config(&dir, "database_path = \"db.sqlite\"\ndownload_path = \"dl\"\n");
        let LoadResult { config, report } =
            load_with_report(Some(config_path), Overrides::default()).unwrap();
        assert_eq!(
            config.polling,
            PollingInterval::Jittered {
                min: Duration::from_secs(DEFAULT_POLL_MIN_SECS),
                max: Duration::from_secs(DEFAULT_POLL_MAX_SECS),
            }
        );
        assert_eq!(config.notify_policy, NotifyPolicy::MarkSentUnconditionally);
        assert_eq!(config.timeouts.exec, Duration::from_secs(DEFAULT_EXEC_SECS));
        assert!(config.storage.is_none());
        assert!(config.chat.is_none());
        assert_eq!(report.polling.source, ConfigSource::Default);
        assert_eq!(report.database_path.source, ConfigSource::ConfigFile);
    }

    #[test]
    fn reads_sections() {
        let dir = TempDir::new().unwrap();
        let body = r#"
database_path = "db.sqlite"
download_path = "dl"
verbose = true

[polling]
interval_secs = 30

[timeouts]
connect_secs = 5

[notifications]
policy = "retry_until_delivered"

[storage]
host = "https://cloud.example.org"
username = "bot"
password = "pw"
base_path = "hpc"

[chat]
bot_token = "123:abc"
log_chat_id = -100
"#;
        let config = load(Some(write_config(&dir, body)), Overrides::default()).unwrap();
        assert!(config.verbose);
        assert_eq!(config.polling, PollingInterval::Fixed(Duration::from_secs(30)));
        assert_eq!(config.timeouts.connect, Duration::from_secs(5));
        assert_eq!(config.notify_policy, NotifyPolicy::RetryUntilDelivered);
        let storage = config.storage.unwrap();
        assert_eq!(storage.base_path, "hpc");
        assert!(!format!("{storage:?}").contains("pw"));
        let chat = config.chat.unwrap();
        assert_eq!(chat.log_chat_id, Some(-100));
        assert!(!format!("{chat:?}").contains("abc"));
    }

    #[test]
    fn overrides_apply_per_field() {
        let dir = TempDir::new().unwrap();
        let config_path = write_config(
            &dir,
            "database_path = \"db/from_config.sqlite\"\ndownload_path = \"dl\"\n[polling]\ninterval_secs = 9\n",
        );
        let config_dir = config_path.parent().unwrap().to_path_buf();

        let LoadResult { config, report } = load_with_report(
            Some(config_path),
            Overrides {
                database_path: None,
                download_path: Some(PathBuf::from("from_flag")),
                interval_secs: Some(2),
                verbose: Some(true),
            },
        )
        .unwrap();

        assert_eq!(
            config.database_path,
            config_dir.join("db").join("from_config.sqlite")
        );
        assert_eq!(config.download_path, PathBuf::from("from_flag"));
        assert_eq!(config.polling, PollingInterval::Fixed(Duration::from_secs(2)));
        assert!(config.verbose);
        assert_eq!(report.polling.source, ConfigSource::Override);
        assert_eq!(report.download_path.source, ConfigSource::Override);
    }

    #[test]
    fn polling_range_must_be_ordered() {
        let dir = TempDir::new().unwrap();
        for body in [
            "[polling]\nmin_secs = 20\nmax_secs = 5\n",
            "[polling]\nmin_secs = 0\nmax_secs = 5\n",
            "[polling]\nmin_secs = 5\nmax_secs = 5\n",
            "[polling]\nmin_secs = 5\n",
            "[polling]\ninterval_secs = 3\nmin_secs = 1\nmax_secs = 5\n",
        ] {
            let body = format!("database_path = \"db.sqlite\"\ndownload_path = \"dl\"\n{body}");
            assert!(
                load(Some(write_config(&dir, &body)), Overrides::default()).is_err(),
                "accepted {body}"
            );
        }
        assert!(fixed_interval(0).is_err());
    }

    #[test]
    fn unknown_notification_policy_is_rejected() {
        assert!(parse_notify_policy("sometimes").is_err());
        assert_eq!(
            parse_notify_policy(" Mark_Sent ").unwrap(),
            NotifyPolicy::MarkSentUnconditionally
        );
    }

    #[test]
    fn duplicate_cluster_labels_are_rejected() {
        let dir = TempDir::new().unwrap();
        let body = format!("database_path = \"db.sqlite\"\ndownload_path = \"dl\"\n{CLUSTER}{CLUSTER}");
        let err = load(Some(write_config(&dir, &body)), Overrides::default()).unwrap_err();
        assert!(format!("{err:#}").contains("more than once"));
    }

    #[test]
    fn cluster_needs_exactly_one_credential() {
        let dir = TempDir::new().unwrap();
        let both = CLUSTER.replace("key_path = \"keys/alpha\"", "key_path = \"k\"\npassword = \"pw\"");
        let none = CLUSTER.replace("key_path = \"keys/alpha\"\n", "");
        for cluster in [both, none] {
            let body = format!("database_path = \"db.sqlite\"\ndownload_path = \"dl\"\n{cluster}");
            assert!(load(Some(write_config(&dir, &body)), Overrides::default()).is_err());
        }
    }

    #[test]
    fn runner_defaults_must_match_patterns() {
        let dir = TempDir::new().unwrap();
        let cluster = CLUSTER.replace(
            "allowed_args = [\"{}\"]",
            "allowed_args = [\"{}\"]\ndefault_args = [\"--bogus\"]",
        );
        let body = format!("database_path = \"db.sqlite\"\ndownload_path = \"dl\"\n{cluster}");
        assert!(load(Some(write_config(&dir, &body)), Overrides::default()).is_err());
    }

    #[test]
    fn shared_extension_within_cluster_is_rejected() {
        let dir = TempDir::new().unwrap();
        let body = format!(
            "database_path = \"db.sqlite\"\ndownload_path = \"dl\"\n{CLUSTER}\n[[clusters.runners]]\nprogram = \"g09\"\nallowed_args = [\"{{}}\"]\nassociations = [\"gjf\"]\n"
        );
        let err = load(Some(write_config(&dir, &body)), Overrides::default()).unwrap_err();
        assert!(format!("{err:#}").contains("more than one runner"));
    }

    #[test]
    fn ensure_database_dir_creates_parent_directory() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("nested").join("hpcbot.sqlite");
        ensure_database_dir(&db_path).unwrap();
        assert!(dir.path().join("nested").is_dir());
    }

    #[test]
    fn ensure_database_dir_no_parent_does_not_error() {
        ensure_database_dir(Path::new("hpcbot.sqlite")).unwrap();
    }

    #[test]
    fn env_config_path_used_when_no_override() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _env = EnvVarGuard::clear(CONFIG_ENV_VAR);
        let dir = TempDir::new().unwrap();
        let config_path = write_config(&dir, "database_path = \"db.sqlite\"\ndownload_path = \"dl\"\nverbose = true\n");
        let _env = EnvVarGuard::set(CONFIG_ENV_VAR, config_path.to_str().unwrap());

        let LoadResult { config, report } = load_with_report(None, Overrides::default()).unwrap();
        assert!(config.verbose);
        assert_eq!(config.config_path, Some(config_path));
        assert_eq!(report.config_path_source, Some(ConfigSource::Env));
    }

    #[test]
    fn cli_config_path_takes_precedence_over_env() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _env = EnvVarGuard::clear(CONFIG_ENV_VAR);
        let dir = TempDir::new().unwrap();
        let env_path = dir.path().join("env.toml");
        let cli_path = dir.path().join("cli.toml");
        fs::write(&env_path, "database_path = \"db.sqlite\"\ndownload_path = \"dl\"\nverbose = true\n").unwrap();
        fs::write(&cli_path, "database_path = \"db.sqlite\"\ndownload_path = \"dl\"\nverbose = false\n").unwrap();
        let _env = EnvVarGuard::set(CONFIG_ENV_VAR, env_path.to_str().unwrap());

        let LoadResult { config, report } =
            load_with_report(Some(cli_path.clone()), Overrides::default()).unwrap();
        assert!(!config.verbose);
        assert_eq!(config.config_path, Some(cli_path));
        assert_eq!(report.config_path_source, Some(ConfigSource::Override));
    }
}
