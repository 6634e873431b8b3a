// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! In-process stand-ins for the ports, shared by unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::adapters::remote_fs::{self, LocalDirFs};
use crate::app::errors::{AppError, AppResult, codes};
use crate::app::ports::{
    ArchiveStoragePort, ChatNotifierPort, ClockPort, ExecOutput, RemoteTransportPort,
    UserDirectoryPort,
};
use crate::app::types::UserRecord;

fn transport_error(message: impl Into<String>) -> AppError {
    AppError::transport(codes::REMOTE_ERROR, message)
}

/// Transport whose remote filesystem is a local directory and whose command
/// output is scripted.
pub(crate) struct FakeTransport {
    fs: LocalDirFs,
    commands: Mutex<Vec<String>>,
    replies: Mutex<VecDeque<AppResult<ExecOutput>>>,
    failing_gets: Mutex<HashSet<String>>,
    failing_puts: AtomicBool,
}

impl FakeTransport {
    pub(crate) fn new(root: &Path) -> Arc<Self> {
        Arc::new(Self {
            fs: LocalDirFs::new(root),
            commands: Mutex::new(Vec::new()),
            replies: Mutex::new(VecDeque::new()),
            failing_gets: Mutex::new(HashSet::new()),
            failing_puts: AtomicBool::new(false),
        })
    }

    pub(crate) fn reply(&self, reply: AppResult<ExecOutput>) {
        self.replies.lock().expect("replies lock").push_back(reply);
    }

    pub(crate) fn reply_stdout(&self, stdout: &str) {
        self.reply(Ok(ExecOutput {
            stdout: stdout.to_string(),
            ..Default::default()
        }));
    }

    pub(crate) fn fail_get(&self, remote: &str) {
        self.failing_gets
            .lock()
            .expect("failing_gets lock")
            .insert(remote.to_string());
    }

    pub(crate) fn fail_puts(&self, fail: bool) {
        self.failing_puts.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn commands(&self) -> Vec<String> {
        self.commands.lock().expect("commands lock").clone()
    }
}

#[async_trait]
impl RemoteTransportPort for FakeTransport {
    async fn is_alive(&self) -> bool {
        true
    }

    async fn execute(&self, command: &str) -> AppResult<ExecOutput> {
        self.commands
            .lock()
            .expect("commands lock")
            .push(command.to_string());
        self.replies
            .lock()
            .expect("replies lock")
            .pop_front()
            .unwrap_or_else(|| Ok(ExecOutput::default()))
    }

    async fn get(&self, remote: &str, local: &Path) -> AppResult<()> {
        if self
            .failing_gets
            .lock()
            .expect("failing_gets lock")
            .contains(remote)
        {
            return Err(transport_error(format!("scripted get failure for {remote}")));
        }
        remote_fs::get(&self.fs, remote, local)
            .await
            .map_err(|e| transport_error(e.to_string()))
    }

    async fn put(&self, local: &Path, remote: &str) -> AppResult<()> {
        if self.failing_puts.load(Ordering::SeqCst) {
            return Err(transport_error(format!("scripted put failure for {remote}")));
        }
        remote_fs::put(&self.fs, local, remote)
            .await
            .map_err(|e| transport_error(e.to_string()))
    }

    async fn mkdir_recursive(&self, remote: &str) -> AppResult<()> {
        remote_fs::mkdir_recursive(&self.fs, remote)
            .await
            .map_err(|e| transport_error(e.to_string()))
    }

    async fn is_remote_dir(&self, remote: &str) -> AppResult<bool> {
        Ok(remote_fs::is_remote_dir(&self.fs, remote).await)
    }
}

/// Archive that records what was stored.
#[derive(Default)]
pub(crate) struct FakeArchive {
    stored: Mutex<Vec<(PathBuf, String)>>,
    failing: Mutex<HashSet<String>>,
    no_links: AtomicBool,
}

impl FakeArchive {
    pub(crate) fn fail_for(&self, name: &str) {
        self.failing
            .lock()
            .expect("failing lock")
            .insert(name.to_string());
    }

    pub(crate) fn refuse_links(&self) {
        self.no_links.store(true, Ordering::SeqCst);
    }

    pub(crate) fn stored(&self) -> Vec<(PathBuf, String)> {
        self.stored.lock().expect("stored lock").clone()
    }
}

#[async_trait]
impl ArchiveStoragePort for FakeArchive {
    async fn put(&self, local: &Path, name: &str) -> AppResult<String> {
        if self.failing.lock().expect("failing lock").contains(name) {
            return Err(transport_error(format!("scripted archive failure for {name}")));
        }
        self.stored
            .lock()
            .expect("stored lock")
            .push((local.to_path_buf(), name.to_string()));
        Ok(name.to_string())
    }

    async fn shared_link(&self, name: &str) -> AppResult<Option<String>> {
        if self.no_links.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(Some(format!("https://cloud.example/s/{name}")))
    }

    async fn get(&self, _name: &str, _local: &Path) -> AppResult<()> {
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct RecordingNotifier {
    sent: Mutex<Vec<(i64, String)>>,
    operator: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub(crate) fn fail(&self, fail: bool) {
        self.failing.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn sent(&self) -> Vec<(i64, String)> {
        self.sent.lock().expect("sent lock").clone()
    }

    pub(crate) fn operator_messages(&self) -> Vec<String> {
        self.operator.lock().expect("operator lock").clone()
    }
}

#[async_trait]
impl ChatNotifierPort for RecordingNotifier {
    async fn notify(&self, chat_id: i64, text: &str) -> AppResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::transport(codes::DELIVERY_FAILURE, "scripted delivery failure"));
        }
        self.sent
            .lock()
            .expect("sent lock")
            .push((chat_id, text.to_string()));
        Ok(())
    }

    async fn notify_operators(&self, text: &str) -> AppResult<()> {
        self.operator
            .lock()
            .expect("operator lock")
            .push(text.to_string());
        Ok(())
    }
}

pub(crate) struct FixedClock(pub OffsetDateTime);

impl ClockPort for FixedClock {
    fn now_utc(&self) -> OffsetDateTime {
        self.0
    }
}

/// Users held in memory with a per-user calculation count.
#[derive(Default)]
pub(crate) struct FakeUsers {
    users: Mutex<HashMap<i64, UserRecord>>,
    counts: Mutex<HashMap<i64, i64>>,
}

impl FakeUsers {
    pub(crate) fn insert(&self, user: UserRecord, existing: i64) {
        self.users.lock().expect("users lock").insert(user.id, user);
        self.counts
            .lock()
            .expect("counts lock")
            .insert(user.id, existing);
    }
}

#[async_trait]
impl UserDirectoryPort for FakeUsers {
    async fn get_user(&self, id: i64) -> AppResult<Option<UserRecord>> {
        Ok(self.users.lock().expect("users lock").get(&id).copied())
    }

    async fn calculations_since(&self, user_id: i64, _since: OffsetDateTime) -> AppResult<i64> {
        Ok(self
            .counts
            .lock()
            .expect("counts lock")
            .get(&user_id)
            .copied()
            .unwrap_or(0))
    }

    async fn is_blocked(&self, user_id: i64) -> AppResult<bool> {
        Ok(self
            .users
            .lock()
            .expect("users lock")
            .get(&user_id)
            .map(|u| u.blocked)
            .unwrap_or(false))
    }
}
