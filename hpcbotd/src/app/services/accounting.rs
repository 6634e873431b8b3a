// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use time::{Date, OffsetDateTime, Time, UtcOffset};

use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};

/// Start of the quota period containing `now`: the first day of the UTC
/// calendar month at midnight.
pub fn period_start(now: OffsetDateTime) -> AppResult<OffsetDateTime> {
    let now = now.to_offset(UtcOffset::UTC);
    let first = Date::from_calendar_date(now.year(), now.month(), 1).map_err(|err| {
        AppError::with_message(
            AppErrorKind::Internal,
            codes::INTERNAL_ERROR,
            format!("cannot compute period start: {err}"),
        )
    })?;
    Ok(first.with_time(Time::MIDNIGHT).assume_utc())
}
