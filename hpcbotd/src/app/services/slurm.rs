// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use time::OffsetDateTime;

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::services::runner::{Runner, RunnerSpec};
use crate::app::types::{Calculation, CalculationStatus, StatusUpdate};

/// `squeue` output format: right-aligned job id and short state code.
pub const QUEUE_FORMAT: &str = "%.15i %.5t";

static SUBMISSION_ACK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Submitted batch job (\d+)").expect("submission regex is valid")
});

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("queue listing line {line} has {fields} fields: {text:?}")]
    UnexpectedFields {
        line: usize,
        fields: usize,
        text: String,
    },
}

impl From<ParseError> for AppError {
    fn from(err: ParseError) -> Self {
        AppError::with_message(AppErrorKind::Parse, codes::PARSE_ERROR, err.to_string())
    }
}

/// Runner used to list the queue once per cluster and cycle.
pub fn queue_runner() -> AppResult<Runner> {
    Runner::new(RunnerSpec {
        program: "squeue".to_string(),
        allowed_args: vec!["-o".to_string(), regex::escape(QUEUE_FORMAT)],
        default_args: vec!["-o".to_string(), QUEUE_FORMAT.to_string()],
        associations: Vec::new(),
        description: "queue listing".to_string(),
    })
}

/// Job id from sbatch output like "Submitted batch job 11".
pub fn parse_submission_ack(stdout: &str) -> Option<i64> {
    SUBMISSION_ACK
        .captures(stdout)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<i64>().ok())
}

/// Parses queue listing text into job id -> status.
///
/// The first line is a header. Each remaining non-blank line holds a job id
/// and a state code; a missing code maps to finished like any unknown code.
/// Ids that are not plain integers (array or het job steps) are skipped,
/// they can never match an id taken from a submission acknowledgement.
pub fn parse_queue_listing(stdout: &str) -> Result<HashMap<i64, CalculationStatus>, ParseError> {
    let mut jobs = HashMap::new();
    for (idx, line) in stdout.lines().enumerate().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let (id, code) = match fields.as_slice() {
            [] => continue,
            [id] => (*id, ""),
            [id, code] => (*id, *code),
            _ => {
                return Err(ParseError::UnexpectedFields {
                    line: idx + 1,
                    fields: fields.len(),
                    text: line.to_string(),
                });
            }
        };
        let Ok(id) = id.parse::<i64>() else {
            tracing::debug!("skipping queue entry {id}");
            continue;
        };
        jobs.insert(id, CalculationStatus::from_scheduler_code(code));
    }
    Ok(jobs)
}

/// Status changes for tracked calculations given the current listing.
///
/// Listed jobs only move forward. A tracked job that is no longer listed is
/// finished and stamped with `now`. Calculations without a job id are not
/// touched.
pub fn reconcile(
    tracked: &[Calculation],
    listing: &HashMap<i64, CalculationStatus>,
    now: OffsetDateTime,
) -> Vec<StatusUpdate> {
    let mut updates = Vec::new();
    for calc in tracked {
        let Some(job_id) = calc.job_id else {
            continue;
        };
        match listing.get(&job_id) {
            Some(reported) => {
                if reported.is_ahead_of(calc.status) {
                    updates.push(StatusUpdate::status(calc.id, *reported));
                }
            }
            None => updates.push(StatusUpdate {
                id: calc.id,
                status: CalculationStatus::FinishedOk,
                finished_at: Some(now),
                job_id: None,
            }),
        }
    }
    updates
}
