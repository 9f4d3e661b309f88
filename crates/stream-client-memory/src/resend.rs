use crate::handle::HandleCore;
use crate::message::StreamMessage;
use crate::network::{Counters, MemoryNetwork};

use std::sync::Arc;

use async_trait::async_trait;
use tether_stream_client::{HandleListener, ListenerId, ResendHandle, StreamDefinition};

/// An in-memory replay of stream history.
#[derive(Clone, Debug)]
pub struct MemoryResend {
    stream: StreamDefinition,
    core: Arc<HandleCore>,
    network: MemoryNetwork,
}

impl MemoryResend {
    pub(crate) const fn new(
        stream: StreamDefinition,
        core: Arc<HandleCore>,
        network: MemoryNetwork,
    ) -> Self {
        Self {
            stream,
            core,
            network,
        }
    }

    /// Whether the resend has been cancelled.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.core.is_closed()
    }
}

#[async_trait]
impl ResendHandle for MemoryResend {
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

    fn is_finished(&self) -> bool {
        self.core.is_finished()
    }

    async fn cancel(&self) {
        Counters::bump(&self.network.counters().resend_cancels);
        self.core.close();
    }
}
