// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::registry::RegistryState;
use crate::status::ReportError;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the writers, the tailer and the registry.
///
/// Transient network failures are normally absorbed by the clients and only
/// show up on the status channel; the variants that reach callers are the
/// ones that must not be silently ignored.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("The max log line size allowed is {max} bytes (got {size} bytes)")]
    RecordTooLarge { size: usize, max: usize },

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Client created in process {birth_pid} cannot be used in process {current_pid}")]
    NotForkSafe { birth_pid: u32, current_pid: u32 },

    #[error("StreamTailerSetupError {host}:{port} -- {message}")]
    SetupFailure {
        host: String,
        port: u16,
        message: String,
    },

    #[error("Failed to decode response: {0}")]
    ProtocolDecode(String),

    #[error("Status reporter failed: {0}")]
    StatusReport(#[from] ReportError),

    #[error("Logger registry is {0}")]
    RegistryState(RegistryState),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Short name of the failure, used in status messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::RecordTooLarge { .. } => "RecordTooLarge",
            Error::BackendUnavailable(_) => "BackendUnavailable",
            Error::NotForkSafe { .. } => "NotForkSafe",
            Error::SetupFailure { .. } => "SetupFailure",
            Error::ProtocolDecode(_) => "ProtocolDecode",
            Error::StatusReport(_) => "StatusReport",
            Error::RegistryState(_) => "RegistryState",
            Error::Config(_) => "Config",
            Error::Io(_) => "Io",
        }
    }
}
