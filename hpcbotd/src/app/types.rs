// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};

use time::OffsetDateTime;

/// Lifecycle of a calculation. Progress is defined by `value()`, never by
/// declaration order, so comparisons go through `progress_cmp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CalculationStatus {
    NotStarted,
    Uploaded,
    Pending,
    Running,
    FinishedOk,
    FailedToUpload,
    Loaded,
    Clouded,
    Sent,
}

impl CalculationStatus {
    pub const ALL: [CalculationStatus; 9] = [
        CalculationStatus::NotStarted,
        CalculationStatus::Uploaded,
        CalculationStatus::Pending,
        CalculationStatus::Running,
        CalculationStatus::FinishedOk,
        CalculationStatus::FailedToUpload,
        CalculationStatus::Loaded,
        CalculationStatus::Clouded,
        CalculationStatus::Sent,
    ];

    pub fn value(self) -> i64 {
        match self {
            CalculationStatus::NotStarted => 0,
            CalculationStatus::Uploaded => 5,
            CalculationStatus::Pending => 10,
            CalculationStatus::Running => 50,
            CalculationStatus::FinishedOk => 100,
            CalculationStatus::FailedToUpload => 110,
            CalculationStatus::Loaded => 200,
            CalculationStatus::Clouded => 300,
            CalculationStatus::Sent => 1000,
        }
    }

    pub fn from_value(value: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.value() == value)
    }

    /// Maps a scheduler state code. Anything the scheduler reports other
    /// than pending or running counts as finished.
    pub fn from_scheduler_code(code: &str) -> Self {
        match code {
            "PD" => CalculationStatus::Pending,
            "R" => CalculationStatus::Running,
            _ => CalculationStatus::FinishedOk,
        }
    }

    pub fn progress_cmp(self, other: Self) -> Ordering {
        self.value().cmp(&other.value())
    }

    pub fn is_ahead_of(self, other: Self) -> bool {
        self.progress_cmp(other) == Ordering::Greater
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CalculationStatus::NotStarted => "not_started",
            CalculationStatus::Uploaded => "uploaded",
            CalculationStatus::Pending => "pending",
            CalculationStatus::Running => "running",
            CalculationStatus::FinishedOk => "finished_ok",
            CalculationStatus::FailedToUpload => "failed_to_upload",
            CalculationStatus::Loaded => "loaded",
            CalculationStatus::Clouded => "clouded",
            CalculationStatus::Sent => "sent",
        }
    }
}

impl fmt::Display for CalculationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitType {
    Chat,
}

impl SubmitType {
    pub fn value(self) -> i64 {
        match self {
            SubmitType::Chat => 0,
        }
    }

    pub fn from_value(value: i64) -> Option<Self> {
        match value {
            0 => Some(SubmitType::Chat),
            _ => None,
        }
    }
}

/// Owning user of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserRef {
    pub id: i64,
    pub chat_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamps {
    pub started_at: OffsetDateTime,
    pub finished_at: Option<OffsetDateTime>,
}

/// Persisted calculation as the manager sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Calculation {
    pub id: i64,
    pub name: String,
    pub command: String,
    pub timestamps: Timestamps,
    pub job_id: Option<i64>,
    pub status: CalculationStatus,
    pub submit_type: SubmitType,
    pub user: UserRef,
    pub cluster_label: String,
}

impl Calculation {
    /// Working directory name shared by the local download root and the
    /// cluster upload root.
    pub fn folder_name(&self) -> String {
        folder_name(self.timestamps.started_at, self.user.id, &self.name)
    }
}

pub fn folder_name(started_at: OffsetDateTime, user_id: i64, file_name: &str) -> String {
    let stem = Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{}_{}_{}", started_at.unix_timestamp(), user_id, stem)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCalculation {
    pub name: String,
    pub command: String,
    pub started_at: OffsetDateTime,
    pub submit_type: SubmitType,
    pub user_id: i64,
    pub cluster_label: String,
}

/// Upper bound on a user's calculations started at or after `since`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub since: OffsetDateTime,
    pub limit: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserRecord {
    pub id: i64,
    pub calculation_limit: i64,
    pub blocked: bool,
    pub chat_id: Option<i64>,
}

/// One row change produced by a manager stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusUpdate {
    pub id: i64,
    pub status: CalculationStatus,
    pub finished_at: Option<OffsetDateTime>,
    pub job_id: Option<i64>,
}

impl StatusUpdate {
    pub fn status(id: i64, status: CalculationStatus) -> Self {
        Self {
            id,
            status,
            finished_at: None,
            job_id: None,
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    Password(String),
    KeyPath(PathBuf),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Password(_) => f.write_str("Password(<redacted>)"),
            Credentials::KeyPath(path) => f.debug_tuple("KeyPath").field(path).finish(),
        }
    }
}

/// Where and as whom to connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub credentials: Credentials,
}
