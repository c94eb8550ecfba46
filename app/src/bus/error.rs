use thiserror::Error;

pub(crate) use tokio::sync::oneshot::error::RecvError as OneshotRecvError;

#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Failed to send command to the bus")]
    ChannelSendError,
    #[error("Failed to read from one-shot channel")]
    OneshotRecvError(#[from] OneshotRecvError),
}
