// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use async_trait::async_trait;

use crate::app::errors::AppResult;
use crate::app::types::{Calculation, CalculationStatus, NewCalculation, Quota, StatusUpdate};

#[async_trait]
pub trait CalculationStorePort: Send + Sync {
    /// Get-or-create by label; returns the cluster row id.
    async fn ensure_cluster(&self, label: &str) -> AppResult<i64>;
    /// Counts and inserts in one statement. `None` when `quota` is already
    /// used up.
    async fn create_calculation(
        &self,
        calc: &NewCalculation,
        quota: Option<Quota>,
    ) -> AppResult<Option<Calculation>>;
    async fn get_calculation(&self, id: i64) -> AppResult<Option<Calculation>>;
    async fn list_by_status(&self, status: CalculationStatus) -> AppResult<Vec<Calculation>>;
    /// Everything the scheduler may still be working on.
    async fn list_unfinished(&self) -> AppResult<Vec<Calculation>>;
    /// Chat-submitted calculations that are archived or failed to upload.
    async fn list_for_notification(&self) -> AppResult<Vec<Calculation>>;
    /// Applies all updates in one transaction.
    async fn apply_updates(&self, updates: &[StatusUpdate]) -> AppResult<()>;
}
