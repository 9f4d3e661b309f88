use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tether_stream_client::StreamDefinition;

/// A message stored in, and delivered by, the in-memory network.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamMessage {
    /// The stream (and partition) the message was published to.
    pub stream: StreamDefinition,

    /// Position of the message within its stream partition.
    pub sequence: u64,

    /// Publish time in milliseconds since the epoch.
    pub timestamp: u64,

    /// The message payload.
    pub content: Bytes,
}
