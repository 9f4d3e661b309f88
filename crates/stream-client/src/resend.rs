use crate::listener::{HandleListener, ListenerId};
use crate::stream::StreamDefinition;

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;

/// A trait representing a one-shot replay of historical stream data.
///
/// Listeners receive `on_finished` once every replayed message was delivered.
#[async_trait]
pub trait ResendHandle
where
    Self: Debug + Send + Sync + 'static,
{
    /// The message type delivered by the resend.
    type Message: Clone + Debug + Send + Sync + 'static;

    /// The stream being replayed.
    fn stream(&self) -> &StreamDefinition;

    /// Registers a listener for messages, message errors and completion.
    fn listen(&self, listener: Arc<dyn HandleListener<Self::Message>>) -> ListenerId;

    /// Removes a previously registered listener.
    fn unlisten(&self, id: ListenerId);

    /// Whether all messages have been delivered.
    fn is_finished(&self) -> bool;

    /// Stops the replay and releases its resources.
    async fn cancel(&self);
}
