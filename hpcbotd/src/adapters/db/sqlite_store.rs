// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::adapters::db::{CalculationStore, StoreError};
use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::ports::{CalculationStorePort, UserDirectoryPort};
use crate::app::types::{
    Calculation, CalculationStatus, NewCalculation, Quota, StatusUpdate, UserRecord,
};

#[derive(Clone)]
pub struct SqliteStoreAdapter {
    store: Arc<CalculationStore>,
}

impl SqliteStoreAdapter {
    pub fn new(store: CalculationStore) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    /// Store operations that have no port, such as user administration.
    pub fn inner(&self) -> &CalculationStore {
        &self.store
    }
}

/// Persistence errors become app errors here and nowhere else.
pub(crate) fn map_store_error(err: StoreError) -> AppError {
    match err {
        StoreError::EmptyName
        | StoreError::EmptyCommand
        | StoreError::EmptyLabel
        | StoreError::NegativeLimit(_) => AppError::with_message(
            AppErrorKind::Validation,
            codes::INVALID_ARGUMENT,
            err.to_string(),
        ),
        StoreError::UserNotFound(_) | StoreError::CalculationNotFound(_) => {
            AppError::with_message(AppErrorKind::NotFound, codes::NOT_FOUND, err.to_string())
        }
        StoreError::Timestamp(_) | StoreError::UnknownStatus(_) | StoreError::UnknownSubmitType(_) => {
            AppError::with_message(AppErrorKind::Internal, codes::STORAGE_ERROR, err.to_string())
        }
        StoreError::Sqlx(e) => {
            AppError::with_message(AppErrorKind::Internal, codes::STORAGE_ERROR, e.to_string())
        }
    }
}

#[async_trait]
impl CalculationStorePort for SqliteStoreAdapter {
    async fn ensure_cluster(&self, label: &str) -> AppResult<i64> {
        self.store.ensure_cluster(label).await.map_err(map_store_error)
    }

    async fn create_calculation(
        &self,
        calc: &NewCalculation,
        quota: Option<Quota>,
    ) -> AppResult<Option<Calculation>> {
        self.store
            .create_calculation(calc, quota)
            .await
            .map_err(map_store_error)
    }

    async fn get_calculation(&self, id: i64) -> AppResult<Option<Calculation>> {
        self.store.get_calculation(id).await.map_err(map_store_error)
    }

    async fn list_by_status(&self, status: CalculationStatus) -> AppResult<Vec<Calculation>> {
        self.store
            .list_by_status(status)
            .await
            .map_err(map_store_error)
    }

    async fn list_unfinished(&self) -> AppResult<Vec<Calculation>> {
        self.store.list_unfinished().await.map_err(map_store_error)
    }

    async fn list_for_notification(&self) -> AppResult<Vec<Calculation>> {
        self.store
            .list_for_notification()
            .await
            .map_err(map_store_error)
    }

    async fn apply_updates(&self, updates: &[StatusUpdate]) -> AppResult<()> {
        self.store
            .apply_updates(updates)
            .await
            .map(|_| ())
            .map_err(map_store_error)
    }
}

#[async_trait]
impl UserDirectoryPort for SqliteStoreAdapter {
    async fn get_user(&self, id: i64) -> AppResult<Option<UserRecord>> {
        self.store.get_user(id).await.map_err(map_store_error)
    }

    async fn calculations_since(&self, user_id: i64, since: OffsetDateTime) -> AppResult<i64> {
        self.store
            .count_since(user_id, since)
            .await
            .map_err(map_store_error)
    }

    async fn is_blocked(&self, user_id: i64) -> AppResult<bool> {
        let user = self.store.get_user(user_id).await.map_err(map_store_error)?;
        Ok(user.is_some_and(|u| u.blocked))
    }
}
