// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod errors;
pub mod manager;
pub mod ports;
pub mod services;
pub mod submission;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;
