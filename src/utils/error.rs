//! The `error` module defines the error types used across the `meshpub`
//! binaries and library.
//!
//! Failures that travel over the wire are not errors in this sense: the
//! broker reports those as `{"result": "failed", "detail": ...}` response
//! frames and the session keeps running. The variants here cover the
//! process-level failures (bad addresses, unreachable services, socket
//! I/O) that end a client session or abort startup with a non-zero exit.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid address `{0}`")]
    InvalidAddress(String),

    #[error("directory service unreachable at {0}")]
    DirectoryUnreachable(String),

    #[error("no available brokers")]
    NoBrokers,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed frame: {0}")]
    Frame(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}
