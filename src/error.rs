//! Error types shared across the crate

use std::path::PathBuf;
use thiserror::Error;

/// Failure talking to the Digitraffic API
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("malformed response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// A coordinator poll did not produce new data
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Digitraffic API error: {0}")]
pub struct UpdateFailed(pub String);

/// Errors reading or writing the persisted config entries
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config entry file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode config entries: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("config entry '{0}' not found")]
    NotFound(String),
}

/// Misuse of a config flow, as opposed to user input errors which are reported on the form
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("step '{step}' requires '{missing}' to be selected first")]
    OutOfOrder {
        step: &'static str,
        missing: &'static str,
    },

    #[error("config entry '{0}' is not a {1} entry")]
    WrongEntryType(String, &'static str),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A config entry could not be set up
#[derive(Debug, Error)]
pub enum SetupError {
    /// The first poll failed; the entry should be retried later
    #[error("config entry '{entry_id}' not ready: {source}")]
    NotReady {
        entry_id: String,
        #[source]
        source: UpdateFailed,
    },

    #[error("config entry '{0}' is already set up")]
    AlreadySetUp(String),
}
