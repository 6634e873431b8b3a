// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::fmt;

pub mod codes {
    pub const AUTHENTICATION_FAILURE: &str = "authentication_failure";
    pub const CONNECTION_FAILURE: &str = "connection_failure";
    pub const TIMEOUT: &str = "timeout";
    pub const REMOTE_ERROR: &str = "remote_error";
    pub const LOCAL_ERROR: &str = "local_error";
    pub const STORAGE_ERROR: &str = "storage_error";
    pub const DELIVERY_FAILURE: &str = "delivery_failure";
    pub const INVALID_ARGUMENT: &str = "invalid_argument";
    pub const PROGRAM_MISMATCH: &str = "program_mismatch";
    pub const USER_BLOCKED: &str = "user_blocked";
    pub const LIMIT_EXCEEDED: &str = "limit_exceeded";
    pub const PARSE_ERROR: &str = "parse_error";
    pub const INVALID_CONFIG: &str = "invalid_config";
    pub const NOT_FOUND: &str = "not_found";
    pub const CONFLICT: &str = "conflict";
    pub const INTERNAL_ERROR: &str = "internal_error";
    pub const CANCELED: &str = "canceled";
}

/// Broad error categories. The manager decides retry behaviour from these:
/// transport failures leave a calculation where it is so the next cycle
/// retries it, everything else is surfaced or logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppErrorKind {
    Transport,
    Validation,
    Blocked,
    LimitExceeded,
    Parse,
    InvalidConfig,
    NotFound,
    Conflict,
    Internal,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct AppError {
    kind: AppErrorKind,
    code: &'static str,
    message: String,
    context: Option<String>,
}

impl AppError {
    pub fn new(kind: AppErrorKind, code: &'static str) -> Self {
        Self {
            kind,
            code,
            message: code.to_string(),
            context: None,
        }
    }

    pub fn with_message(
        kind: AppErrorKind,
        code: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            context: None,
        }
    }

    pub fn transport(code: &'static str, message: impl Into<String>) -> Self {
        Self::with_message(AppErrorKind::Transport, code, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::with_message(AppErrorKind::Validation, codes::INVALID_ARGUMENT, message)
    }

    pub fn cancelled() -> Self {
        Self::with_message(AppErrorKind::Cancelled, codes::CANCELED, "cancelled")
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn kind(&self) -> AppErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ctx) = &self.context {
            write!(f, "{} ({})", self.message, ctx)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context_when_present() {
        let err = AppError::transport(codes::REMOTE_ERROR, "sftp put failed")
            .with_context("cluster=alpha");
        assert_eq!(err.to_string(), "sftp put failed (cluster=alpha)");
        assert_eq!(err.kind(), AppErrorKind::Transport);
        assert_eq!(err.code(), codes::REMOTE_ERROR);
    }

    #[test]
    fn new_uses_code_as_message() {
        let err = AppError::new(AppErrorKind::NotFound, codes::NOT_FOUND);
        assert_eq!(err.message(), "not_found");
        assert!(err.context().is_none());
    }
}
