// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use anyhow::{Context, Result};
use russh::client::AuthResult;
use russh::keys::PrivateKeyWithHashAlg;
use std::sync::Arc;

use crate::adapters::ssh::AuthenticationFailure;
use crate::app::types::Credentials;

use super::{ClientHandler, SessionManager};

fn auth_succeeded(result: &AuthResult) -> bool {
    matches!(result, AuthResult::Success)
}

impl SessionManager {
    /// Ensure we have a connected & authenticated handle.
    pub async fn ensure_connected(&self) -> Result<()> {
        let mut handle_field = self.handle.lock().await;

        // If handle exists but is closed, drop it so we reconnect.
        let needs_connect = match handle_field.as_ref() {
            None => true,
            Some(h) if h.is_closed() => true,
            Some(_) => false,
        };
        if !needs_connect {
            return Ok(());
        }

        let params = &self.params;
        tracing::info!(
            "establishing connection with {}@{}:{}",
            params.username,
            params.host,
            params.port
        );
        let handler = ClientHandler::new(params.host.clone(), params.port);
        let mut handle = russh::client::connect(
            self.config.clone(),
            (params.host.as_str(), params.port),
            handler,
        )
        .await
        .context("SSH connect failed")?;

        let result = match &params.credentials {
            Credentials::KeyPath(path) => {
                let key = russh::keys::load_secret_key(path, None)
                    .with_context(|| format!("failed to load secret key at {}", path.display()))?;
                // Prefer SHA-256 for RSA if applicable (ignored for non-RSA keys)
                let pk = PrivateKeyWithHashAlg::new(
                    Arc::new(key),
                    handle.best_supported_rsa_hash().await?.flatten(),
                );
                handle
                    .authenticate_publickey(params.username.clone(), pk)
                    .await?
            }
            Credentials::Password(password) => {
                handle
                    .authenticate_password(params.username.clone(), password.clone())
                    .await?
            }
        };
        if !auth_succeeded(&result) {
            tracing::debug!("authentication rejected for {}@{}", params.username, params.host);
            return Err(AuthenticationFailure.into());
        }

        tracing::info!("authenticated as {}@{}", params.username, params.host);
        *handle_field = Some(handle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::auth_succeeded;
    use russh::client::AuthResult;
    use russh::{MethodKind, MethodSet};

    #[test]
    fn only_success_counts() {
        assert!(auth_succeeded(&AuthResult::Success));
        let methods = [MethodKind::PublicKey];
        assert!(!auth_succeeded(&AuthResult::Failure {
            remaining_methods: MethodSet::from(methods.as_slice()),
            partial_success: true,
        }));
    }
}
