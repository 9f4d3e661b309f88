mod forwarder;
mod producer;

use crate::callbacks::{CallbackCell, MessageErrorCallback};
use forwarder::{Delivery, Gate};

use std::fmt::{self, Debug, Display};
use std::sync::Arc;

use futures::Stream;
use parking_lot::Mutex;
use tether_stream_client::{
    MessageError, ResendOptions, StreamClient, StreamDefinition, SubscribeParams,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Lifecycle of a [`Flow`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlowState {
    /// The underlying subscribe or resend call has not completed yet.
    Created,

    /// The handle is live and items are being forwarded.
    Running,

    /// The flow ended on its own (resend finished, client destroyed or failed).
    Closed,

    /// The flow was aborted by its owner.
    Aborted,
}

impl FlowState {
    /// Whether no further items can be produced.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Aborted)
    }
}

impl Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Closed => write!(f, "closed"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Options for creating a [`Flow`].
pub struct FlowOptions<M, E> {
    /// Drop undecodable messages instead of forwarding their raw payload.
    pub ignore_undecoded_messages: bool,

    /// Where errors and lifecycle notifications go.
    pub callbacks: CallbackCell<M, E>,

    /// Cancelling this token aborts the flow.
    pub parent: Option<CancellationToken>,
}

impl<M, E> Default for FlowOptions<M, E> {
    fn default() -> Self {
        Self {
            ignore_undecoded_messages: false,
            callbacks: CallbackCell::default(),
            parent: None,
        }
    }
}

impl<M, E> Clone for FlowOptions<M, E> {
    fn clone(&self) -> Self {
        Self {
            ignore_undecoded_messages: self.ignore_undecoded_messages,
            callbacks: self.callbacks.clone(),
            parent: self.parent.clone(),
        }
    }
}

impl<M, E> Debug for FlowOptions<M, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowOptions")
            .field("ignore_undecoded_messages", &self.ignore_undecoded_messages)
            .field("callbacks", &self.callbacks)
            .field("parent", &self.parent.is_some())
            .finish()
    }
}

impl<M, E> FlowOptions<M, E> {
    /// Default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop undecodable messages instead of forwarding their raw payload.
    #[must_use]
    pub const fn ignore_undecoded_messages(mut self, ignore: bool) -> Self {
        self.ignore_undecoded_messages = ignore;
        self
    }

    /// Route callbacks through `callbacks`.
    #[must_use]
    pub fn with_callbacks(mut self, callbacks: CallbackCell<M, E>) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// Abort the flow when `parent` is cancelled.
    #[must_use]
    pub fn with_parent(mut self, parent: CancellationToken) -> Self {
        self.parent = Some(parent);
        self
    }
}

/// State shared between a flow, its abort handles and its producer task.
pub(crate) struct Shared<M> {
    gate: Gate<M>,
    abort: CancellationToken,
    released: CancellationToken,
    state: Mutex<FlowState>,
    on_message_error: MessageErrorCallback<M>,
    ignore_undecoded_messages: bool,
}

impl<M> Shared<M> {
    pub(crate) fn state(&self) -> FlowState {
        *self.state.lock()
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.abort.is_cancelled()
    }

    pub(crate) fn mark_running(&self) {
        let mut state = self.state.lock();
        if *state == FlowState::Created {
            *state = FlowState::Running;
        }
    }

    /// Ends the flow without aborting it; buffered items stay readable.
    pub(crate) fn close(&self) {
        self.gate.lock().take();

        let mut state = self.state.lock();
        if !state.is_terminal() {
            *state = if self.abort.is_cancelled() {
                FlowState::Aborted
            } else {
                FlowState::Closed
            };
        }
    }

    /// Reports a failed message; yields its raw payload unless undecoded
    /// messages are ignored.
    fn recover(&self, error: MessageError<M>) -> Option<M> {
        (self.on_message_error)(&error);
        error.raw.filter(|_| !self.ignore_undecoded_messages)
    }

    fn abort(&self) {
        self.abort.cancel();
        self.gate.lock().take();

        let mut state = self.state.lock();
        if !state.is_terminal() {
            *state = FlowState::Aborted;
        }
    }
}

/// Aborts a [`Flow`] from outside, without awaiting the release.
pub struct FlowAbortHandle<M> {
    shared: Arc<Shared<M>>,
}

impl<M> Clone for FlowAbortHandle<M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<M> Debug for FlowAbortHandle<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlowAbortHandle")
            .field("state", &self.shared.state())
            .finish()
    }
}

impl<M> FlowAbortHandle<M> {
    /// Stops forwarding immediately. The handle is released by the producer task.
    pub fn abort(&self) {
        self.shared.abort();
    }

    /// Whether the flow was aborted.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.shared.is_aborted()
    }
}

/// A cancellable, pull-based sequence of messages from one subscription or
/// resend.
///
/// The flow exclusively owns its underlying handle and releases it exactly
/// once: when the flow closes on its own, or after it is aborted. Dropping a
/// flow aborts it.
pub struct Flow<M> {
    receiver: mpsc::UnboundedReceiver<Delivery<M>>,
    shared: Arc<Shared<M>>,
}

impl<M> Debug for Flow<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flow")
            .field("state", &self.shared.state())
            .finish_non_exhaustive()
    }
}

impl<M> Flow<M>
where
    M: Send + 'static,
{
    fn channel<E>(options: &FlowOptions<M, E>) -> (Self, Arc<Shared<M>>)
    where
        E: 'static,
    {
        let (sender, receiver) = mpsc::unbounded_channel();
        let callbacks = options.callbacks.clone();
        let shared = Arc::new(Shared {
            gate: Arc::new(Mutex::new(Some(sender))),
            abort: options
                .parent
                .as_ref()
                .map_or_else(CancellationToken::new, CancellationToken::child_token),
            released: CancellationToken::new(),
            state: Mutex::new(FlowState::Created),
            on_message_error: Arc::new(move |error: &MessageError<M>| {
                callbacks.message_error(error);
            }),
            ignore_undecoded_messages: options.ignore_undecoded_messages,
        });

        (
            Self {
                receiver,
                shared: Arc::clone(&shared),
            },
            shared,
        )
    }

    /// Subscribes to a stream and yields its live messages.
    ///
    /// Must be called within a Tokio runtime.
    pub fn subscribe<C>(
        client: Arc<C>,
        params: SubscribeParams,
        options: FlowOptions<M, C::Error>,
    ) -> Self
    where
        C: StreamClient<Message = M>,
    {
        let (flow, shared) = Self::channel(&options);
        tokio::spawn(producer::subscription(client, params, options, shared));
        flow
    }

    /// Replays historical messages of a stream, then closes.
    ///
    /// Must be called within a Tokio runtime.
    pub fn resend<C>(
        client: Arc<C>,
        stream: StreamDefinition,
        resend_options: ResendOptions,
        options: FlowOptions<M, C::Error>,
    ) -> Self
    where
        C: StreamClient<Message = M>,
    {
        let (flow, shared) = Self::channel(&options);
        tokio::spawn(producer::resend(
            client,
            stream,
            resend_options,
            options,
            shared,
        ));
        flow
    }

    /// The next item, or `None` once the flow is closed or aborted.
    ///
    /// Message errors queued ahead of the item are reported to
    /// `on_message_error` on the way, in emission order. Cancel safe.
    pub async fn next(&mut self) -> Option<M> {
        loop {
            if self.shared.is_aborted() {
                return None;
            }

            let delivery = tokio::select! {
                biased;
                () = self.shared.abort.cancelled() => None,
                delivery = self.receiver.recv() => delivery,
            }?;

            match delivery {
                Delivery::Message(message) => return Some(message),
                Delivery::Failed(error) => {
                    if let Some(raw) = self.shared.recover(error) {
                        return Some(raw);
                    }
                }
            }
        }
    }

    /// Aborts the flow and waits until its handle has been released.
    ///
    /// Buffered items are discarded. Calling it again has no further effect.
    pub async fn abort(&mut self) {
        self.shared.abort();
        self.receiver.close();
        self.shared.released.cancelled().await;
    }

    /// A handle that aborts the flow synchronously.
    #[must_use]
    pub fn abort_handle(&self) -> FlowAbortHandle<M> {
        FlowAbortHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> FlowState {
        self.shared.state()
    }

    /// Adapts the flow into a [`Stream`]. Dropping the stream aborts the flow.
    pub fn into_stream(self) -> impl Stream<Item = M> + Send {
        futures::stream::unfold(self, |mut flow| async move {
            flow.next().await.map(|item| (item, flow))
        })
    }
}

impl<M> Drop for Flow<M> {
    fn drop(&mut self) {
        self.shared.abort();
    }
}
