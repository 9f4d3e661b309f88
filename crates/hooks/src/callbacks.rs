use std::fmt::{self, Debug, Display};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tether_stream_client::MessageError;
use tracing::{debug, error};

/// Receives every message of a flow.
pub type MessageCallback<M> = Arc<dyn Fn(M) + Send + Sync>;

/// Receives construction failures (client, subscription or resend).
pub type ErrorCallback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Receives per-message processing failures.
pub type MessageErrorCallback<M> = Arc<dyn Fn(&MessageError<M>) + Send + Sync>;

/// A lifecycle notification without payload.
pub type LifecycleCallback = Arc<dyn Fn() + Send + Sync>;

/// The callbacks supplied by a caller on one render.
pub struct Callbacks<M, E> {
    /// Called with every received message.
    pub on_message: Option<MessageCallback<M>>,

    /// Called when subscribing or resending fails. Logs when unset.
    pub on_error: Option<ErrorCallback<E>>,

    /// Called when a message could not be processed.
    pub on_message_error: Option<MessageErrorCallback<M>>,

    /// Called right before a flow starts.
    pub on_before_start: Option<LifecycleCallback>,

    /// Called after a flow has finished or was aborted.
    pub on_after_finish: Option<LifecycleCallback>,

    /// Called once the underlying handle is live.
    pub on_subscribed: Option<LifecycleCallback>,

    /// Called once the underlying handle was released.
    pub on_unsubscribed: Option<LifecycleCallback>,
}

impl<M, E> Default for Callbacks<M, E> {
    fn default() -> Self {
        Self {
            on_message: None,
            on_error: None,
            on_message_error: None,
            on_before_start: None,
            on_after_finish: None,
            on_subscribed: None,
            on_unsubscribed: None,
        }
    }
}

impl<M, E> Clone for Callbacks<M, E> {
    fn clone(&self) -> Self {
        Self {
            on_message: self.on_message.clone(),
            on_error: self.on_error.clone(),
            on_message_error: self.on_message_error.clone(),
            on_before_start: self.on_before_start.clone(),
            on_after_finish: self.on_after_finish.clone(),
            on_subscribed: self.on_subscribed.clone(),
            on_unsubscribed: self.on_unsubscribed.clone(),
        }
    }
}

impl<M, E> Debug for Callbacks<M, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_message", &self.on_message.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_message_error", &self.on_message_error.is_some())
            .field("on_before_start", &self.on_before_start.is_some())
            .field("on_after_finish", &self.on_after_finish.is_some())
            .field("on_subscribed", &self.on_subscribed.is_some())
            .field("on_unsubscribed", &self.on_unsubscribed.is_some())
            .finish()
    }
}

/// A single slot holding the latest [`Callbacks`].
///
/// Long-lived flows invoke through the cell, so replacing a callback takes
/// effect on the next invocation without restarting anything.
pub struct CallbackCell<M, E> {
    inner: Arc<ArcSwap<Callbacks<M, E>>>,
}

impl<M, E> Clone for CallbackCell<M, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M, E> Debug for CallbackCell<M, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CallbackCell")
            .field(&*self.inner.load())
            .finish()
    }
}

impl<M, E> Default for CallbackCell<M, E> {
    fn default() -> Self {
        Self::new(Callbacks::default())
    }
}

impl<M, E> CallbackCell<M, E> {
    /// Creates a cell holding `callbacks`.
    pub fn new(callbacks: Callbacks<M, E>) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(callbacks)),
        }
    }

    /// Replaces the callbacks.
    pub fn store(&self, callbacks: Callbacks<M, E>) {
        self.inner.store(Arc::new(callbacks));
    }

    /// Invokes the current `on_message`.
    pub fn message(&self, message: M) {
        if let Some(on_message) = &self.inner.load().on_message {
            on_message(message);
        }
    }

    /// Invokes the current `on_message_error`.
    pub fn message_error(&self, message_error: &MessageError<M>) {
        match &self.inner.load().on_message_error {
            Some(on_message_error) => on_message_error(message_error),
            None => debug!("Message error: {}", message_error),
        }
    }

    /// Invokes the current `on_before_start`.
    pub fn before_start(&self) {
        Self::notify(self.inner.load().on_before_start.as_ref());
    }

    /// Invokes the current `on_after_finish`.
    pub fn after_finish(&self) {
        Self::notify(self.inner.load().on_after_finish.as_ref());
    }

    /// Invokes the current `on_subscribed`.
    pub fn subscribed(&self) {
        Self::notify(self.inner.load().on_subscribed.as_ref());
    }

    /// Invokes the current `on_unsubscribed`.
    pub fn unsubscribed(&self) {
        Self::notify(self.inner.load().on_unsubscribed.as_ref());
    }

    fn notify(callback: Option<&LifecycleCallback>) {
        if let Some(callback) = callback {
            callback();
        }
    }
}

impl<M, E: Display> CallbackCell<M, E> {
    /// Invokes the current `on_error`, or logs the error when none is set.
    pub fn error(&self, err: &E) {
        match &self.inner.load().on_error {
            Some(on_error) => on_error(err),
            None => error!("Stream error: {}", err),
        }
    }
}
