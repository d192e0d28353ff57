//! Error types for ChatRelay.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(String),

    /// Failure while a model was streaming output (transport, status, payload).
    #[error("Generation error: {0}")]
    Generation(String),
}

pub type Result<T> = std::result::Result<T, Error>;
