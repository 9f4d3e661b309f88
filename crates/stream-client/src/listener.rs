use std::error::Error;
use std::fmt::{self, Debug, Display};

/// Identifies a registered listener so it can be removed again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Wraps a raw listener id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw listener id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// A message the client received but could not process (e.g. failed to decode).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageError<M> {
    /// Why the message could not be processed.
    pub reason: String,

    /// The raw message, if the client could recover it.
    pub raw: Option<M>,
}

impl<M> MessageError<M> {
    /// Creates an error that carries no raw payload.
    pub fn new<R>(reason: R) -> Self
    where
        R: Into<String>,
    {
        Self {
            reason: reason.into(),
            raw: None,
        }
    }

    /// Creates an error that carries the raw, undecoded message.
    pub fn undecoded<R>(reason: R, raw: M) -> Self
    where
        R: Into<String>,
    {
        Self {
            reason: reason.into(),
            raw: Some(raw),
        }
    }
}

impl<M> Display for MessageError<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to process message: {}", self.reason)
    }
}

impl<M: Debug> Error for MessageError<M> {}

/// Receives the events pushed by a subscription or resend handle.
///
/// Handles buffer events until the first listener is attached, then replay
/// them to it in order. Listeners are called synchronously by the handle and
/// must not call back into it.
pub trait HandleListener<M>: Send + Sync + 'static {
    /// Called for every message, in emission order.
    fn on_message(&self, message: M);

    /// Called when a message could not be processed.
    fn on_error(&self, error: MessageError<M>);

    /// Called once a resend has delivered all of its messages.
    fn on_finished(&self) {}
}
