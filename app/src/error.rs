use crate::bus::error::Error as BusError;
use dispatch::Error as DispatchError;
use thiserror::Error;

#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("No peers known yet")]
    NoPeersKnown,
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
}

impl Error {
    pub(crate) fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    /// Whether the error can only be fixed by changing configuration.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Configuration(_))
    }
}
