use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum SyncError {
    #[error("invalid period label: {0}")]
    InvalidPeriod(String),

    #[error("invalid filter assignment (expected key=value): {0}")]
    InvalidFilter(String),

    #[error("invalid row kind: {0}")]
    InvalidRowKind(String),

    #[error("missing config file perfboard.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("config is missing a remote endpoint")]
    MissingEndpoint,

    #[error("unknown view: {0}")]
    UnknownView(String),

    #[error("view {view} is not ready: missing {missing}")]
    NotReady { view: String, missing: String },

    #[error("remote procedure client setup failed: {0}")]
    RpcSetup(String),

    #[error("remote procedure {procedure} failed: {message}")]
    Remote {
        procedure: String,
        message: String,
        code: Option<String>,
    },

    #[error("preference not found: {0}")]
    PreferenceNotFound(String),

    #[error("preference store error: {0}")]
    Preferences(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
