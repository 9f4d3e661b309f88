use std::sync::Arc;

use parking_lot::Mutex;
use tether_stream_client::{HandleListener, MessageError};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// What a handle pushed, in the order it pushed it.
pub enum Delivery<M> {
    Message(M),
    Failed(MessageError<M>),
}

/// The sending side of a flow. Taking the sender closes the flow for writes.
pub type Gate<M> = Arc<Mutex<Option<mpsc::UnboundedSender<Delivery<M>>>>>;

/// Pushes handle events into the pull side of a flow.
///
/// Nothing caller-supplied runs here: handles call listeners under their own
/// locks, so errors are queued with the messages and reported by the reader.
pub struct Forwarder<M> {
    pub gate: Gate<M>,
    pub abort: CancellationToken,
    pub finished: CancellationToken,
}

impl<M> Forwarder<M> {
    fn forward(&self, delivery: Delivery<M>) {
        if self.abort.is_cancelled() {
            return;
        }

        if let Some(sender) = self.gate.lock().as_ref() {
            let _ = sender.send(delivery);
        }
    }
}

impl<M> HandleListener<M> for Forwarder<M>
where
    M: Send + 'static,
{
    fn on_message(&self, message: M) {
        self.forward(Delivery::Message(message));
    }

    fn on_error(&self, error: MessageError<M>) {
        self.forward(Delivery::Failed(error));
    }

    fn on_finished(&self) {
        self.finished.cancel();
    }
}
