// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod accounting;
pub mod cluster;
pub mod notifications;
pub mod runner;
pub mod shell;
pub mod slurm;
