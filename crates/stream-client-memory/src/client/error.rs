use tether_stream_client::ClientError;
use thiserror::Error;

/// Errors that can occur when using an in-memory client.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// The client was configured to refuse connecting.
    #[error("failed to connect to endpoint `{0}`")]
    Connect(String),

    /// The client has already been destroyed.
    #[error("client has been destroyed")]
    Destroyed,

    /// The network refused to serve the stream.
    #[error("subscription to `{0}` was rejected")]
    Rejected(String),
}

impl ClientError for Error {}
