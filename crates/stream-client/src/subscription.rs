use crate::listener::{HandleListener, ListenerId};
use crate::stream::StreamDefinition;

use std::fmt::Debug;
use std::sync::Arc;

/// A trait representing one active real-time subscription to a stream.
pub trait SubscriptionHandle
where
    Self: Debug + Send + Sync + 'static,
{
    /// The message type delivered by the subscription.
    type Message: Clone + Debug + Send + Sync + 'static;

    /// The stream this subscription reads from.
    fn stream(&self) -> &StreamDefinition;

    /// Registers a listener for messages and message errors.
    fn listen(&self, listener: Arc<dyn HandleListener<Self::Message>>) -> ListenerId;

    /// Removes a previously registered listener.
    fn unlisten(&self, id: ListenerId);
}
