use std::{result::Result as StdResult, time::Duration};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no such characteristic `{0}`")]
    UnknownCharacteristic(String),
    #[error("encoder `{0}` not found")]
    UnknownEncoder(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("insufficient arguments: {0}")]
    InsufficientArguments(String),
    #[error("operation not permitted on `{0}`")]
    NotSupported(String),
    #[error("an activation is already in progress")]
    ActivationPending,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("timed out after {0:?} waiting for the peripheral to start")]
    SwitchTimeout(Duration),
    #[error("invalid device config: {0}")]
    Config(String),
}

impl Error {
    /// Lookup and encoding failures never touch shared state and can be retried as-is.
    pub fn is_recoverable(&self) -> bool {
        !matches!(*self, Error::Transport(_) | Error::SwitchTimeout(_))
    }
}

pub type Result<T> = StdResult<T, Error>;
