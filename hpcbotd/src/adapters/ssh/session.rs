// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use russh::client::Config;
use russh::keys::ssh_key::HashAlg;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::app::types::ConnectionParams;

mod auth;
mod exec;
mod sftp;

pub(crate) use sftp::SftpFs;

/// russh client handler. Cluster hosts are trusted on first sight; the key
/// fingerprint is logged so an operator can compare it out of band.
#[derive(Clone, Debug)]
struct ClientHandler {
    host: String,
    port: u16,
}

impl ClientHandler {
    fn new(host: String, port: u16) -> Self {
        Self { host, port }
    }
}

impl russh::client::Handler for ClientHandler {
    type Error = anyhow::Error;
    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::ssh_key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        tracing::warn!(
            host = %self.host,
            port = self.port,
            "accepting server key {} without verification",
            server_public_key.fingerprint(HashAlg::Sha256)
        );
        Ok(true)
    }
}

/// Owns one long-lived SSH connection and reopens it when it drops.
pub struct SessionManager {
    params: ConnectionParams,
    config: Arc<Config>,
    // Commands are serialized on the handle.
    handle: Arc<Mutex<Option<russh::client::Handle<ClientHandler>>>>,
}

impl SessionManager {
    pub fn new(params: ConnectionParams, keepalive: Duration) -> Self {
        let cfg = Config {
            inactivity_timeout: None,
            keepalive_interval: Some(keepalive),
            keepalive_max: 3,
            channel_buffer_size: 64,
            window_size: 1024 * 1024,
            ..Default::default()
        };
        Self {
            params,
            config: Arc::new(cfg),
            handle: Arc::new(Mutex::new(None)),
        }
    }

    pub fn params(&self) -> &ConnectionParams {
        &self.params
    }

    pub async fn needs_connect(&self) -> bool {
        let handle_field = self.handle.lock().await;
        match handle_field.as_ref() {
            None => true,
            Some(h) if h.is_closed() => true,
            Some(_) => false,
        }
    }

    pub async fn shutdown(&self) {
        let mut handle_field = self.handle.lock().await;
        if let Some(handle) = handle_field.take() {
            let _ = handle
                .disconnect(russh::Disconnect::ByApplication, "", "en")
                .await;
        }
    }
}
