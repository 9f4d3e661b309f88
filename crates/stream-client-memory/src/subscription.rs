use crate::handle::HandleCore;
use crate::message::StreamMessage;

use std::sync::Arc;

use tether_stream_client::{HandleListener, ListenerId, StreamDefinition, SubscriptionHandle};

/// An in-memory live subscription.
#[derive(Clone, Debug)]
pub struct MemorySubscription {
    id: u64,
    stream: StreamDefinition,
    core: Arc<HandleCore>,
}

impl MemorySubscription {
    pub(crate) const fn new(id: u64, stream: StreamDefinition, core: Arc<HandleCore>) -> Self {
        Self { id, stream, core }
    }

    pub(crate) const fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn close(&self) {
        self.core.close();
    }

    /// Whether the subscription has been unsubscribed (or its client destroyed).
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }

    /// Number of listeners currently attached.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.core.listener_count()
    }
}

impl SubscriptionHandle for MemorySubscription {
    type Message = StreamMessage;

    fn stream(&self) -> &StreamDefinition {
        &self.stream
    }

    fn listen(&self, listener: Arc<dyn HandleListener<StreamMessage>>) -> ListenerId {
        self.core.listen(listener)
    }

    fn unlisten(&self, id: ListenerId) {
        self.core.unlisten(id);
    }
}
