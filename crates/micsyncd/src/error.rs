//! Daemon error types with miette diagnostics.

use miette::Diagnostic;
use thiserror::Error;

use micsync_config::ConfigError;
use micsync_core::{CoreError, ErrorKind};

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    #[error(transparent)]
    #[diagnostic(code(micsyncd::config))]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(code(micsyncd::engine))]
    Core(#[from] CoreError),

    #[error("No enabled vendors in {path}")]
    #[diagnostic(
        code(micsyncd::no_vendors),
        help("Add a [vendors.<code>] table, or run: micsyncd init-config")
    )]
    NoVendors { path: String },

    #[error("Config file already exists: {path}")]
    #[diagnostic(code(micsyncd::config_exists), help("Pass --force to overwrite it."))]
    ConfigExists { path: String },

    #[error("Sync failed for: {vendors}")]
    #[diagnostic(code(micsyncd::sync_failed))]
    SyncFailed { vendors: String },

    #[error("Discovery update rejected: {reason}")]
    #[diagnostic(code(micsyncd::discovery_rejected))]
    DiscoveryRejected { kind: ErrorKind, reason: String },

    #[error("Failed to encode output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(ConfigError::NoCredentials { .. }) => exit_code::AUTH,
            Self::Config(_) | Self::NoVendors { .. } | Self::ConfigExists { .. } => {
                exit_code::USAGE
            }
            Self::Core(e) => kind_exit_code(e.kind()),
            Self::DiscoveryRejected { kind, .. } => kind_exit_code(*kind),
            Self::SyncFailed { .. } => exit_code::CONNECTION,
            Self::Json(_) | Self::Io(_) => exit_code::GENERAL,
        }
    }
}

fn kind_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Authentication => exit_code::AUTH,
        ErrorKind::DiscoveryUpdateConflict => exit_code::CONFLICT,
        ErrorKind::UnknownVendor
        | ErrorKind::InvalidAddress
        | ErrorKind::UnsupportedCapability
        | ErrorKind::Config => exit_code::USAGE,
        ErrorKind::TransientNetwork | ErrorKind::VendorServer | ErrorKind::SyncTimeout => {
            exit_code::CONNECTION
        }
        _ => exit_code::GENERAL,
    }
}
