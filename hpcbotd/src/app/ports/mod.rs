// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

pub mod archive_storage;
pub mod calculation_store;
pub mod chat_notifier;
pub mod clock;
pub mod remote_transport;
pub mod user_directory;

pub use archive_storage::ArchiveStoragePort;
pub use calculation_store::CalculationStorePort;
pub use chat_notifier::ChatNotifierPort;
pub use clock::ClockPort;
pub use remote_transport::{ExecOutput, RemoteTransportPort};
pub use user_directory::UserDirectoryPort;
