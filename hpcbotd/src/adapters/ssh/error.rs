// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use thiserror::Error as ThisError;

/// The server refused our credentials, as opposed to being unreachable.
#[derive(Debug, ThisError)]
#[error("authentication_failure")]
pub struct AuthenticationFailure;

pub(crate) fn is_authentication_failure(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<AuthenticationFailure>())
}

pub(crate) fn is_sftp_missing_path(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        let Some(sftp_error) = cause.downcast_ref::<russh_sftp::client::error::Error>() else {
            return false;
        };
        matches!(
            sftp_error,
            russh_sftp::client::error::Error::Status(status)
                if status.status_code == russh_sftp::protocol::StatusCode::NoSuchFile
        )
    })
}
