// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod chat;
pub mod cli;
pub mod db;
pub(crate) mod remote_fs;
pub mod ssh;
pub mod time;
pub mod webdav;
