use crate::cache_key::CacheKey;
use crate::callbacks::Callbacks;

use std::fmt::{self, Debug};
use std::sync::Arc;

use tether_stream_client::{MessageError, ResendOptions};

/// Options passed to a hook on every render.
///
/// Callbacks may change freely between renders without restarting anything;
/// the remaining fields are part of the hook's dependencies.
pub struct HookOptions<M, E> {
    /// Changing the key restarts the flow.
    pub cache_key: Option<CacheKey>,

    /// A disabled hook holds no flow.
    pub disabled: bool,

    /// Drop undecodable messages instead of delivering their raw payload.
    pub ignore_undecoded_messages: bool,

    /// History to replay. Subscriptions replay nothing when unset; resends
    /// default to the last message.
    pub resend_options: Option<ResendOptions>,

    /// The callbacks to use from now on.
    pub callbacks: Callbacks<M, E>,
}

/// Options of a [`SubscribeHook`](super::SubscribeHook).
pub type SubscribeOptions<M, E> = HookOptions<M, E>;

/// Options of a [`ResendHook`](super::ResendHook).
pub type ResendHookOptions<M, E> = HookOptions<M, E>;

impl<M, E> Default for HookOptions<M, E> {
    fn default() -> Self {
        Self {
            cache_key: None,
            disabled: false,
            ignore_undecoded_messages: false,
            resend_options: None,
            callbacks: Callbacks::default(),
        }
    }
}

impl<M, E> Clone for HookOptions<M, E> {
    fn clone(&self) -> Self {
        Self {
            cache_key: self.cache_key.clone(),
            disabled: self.disabled,
            ignore_undecoded_messages: self.ignore_undecoded_messages,
            resend_options: self.resend_options.clone(),
            callbacks: self.callbacks.clone(),
        }
    }
}

impl<M, E> Debug for HookOptions<M, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookOptions")
            .field("cache_key", &self.cache_key)
            .field("disabled", &self.disabled)
            .field("ignore_undecoded_messages", &self.ignore_undecoded_messages)
            .field("resend_options", &self.resend_options)
            .field("callbacks", &self.callbacks)
            .finish()
    }
}

impl<M, E> HookOptions<M, E> {
    /// Default options: enabled, no callbacks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cache key.
    #[must_use]
    pub fn cache_key<K>(mut self, cache_key: K) -> Self
    where
        K: Into<CacheKey>,
    {
        self.cache_key = Some(cache_key.into());
        self
    }

    /// Disables or enables the hook.
    #[must_use]
    pub const fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    /// Drop undecodable messages instead of delivering their raw payload.
    #[must_use]
    pub const fn ignore_undecoded_messages(mut self, ignore: bool) -> Self {
        self.ignore_undecoded_messages = ignore;
        self
    }

    /// Sets the history to replay.
    #[must_use]
    pub fn resend_options(mut self, resend_options: ResendOptions) -> Self {
        self.resend_options = Some(resend_options);
        self
    }

    /// Called with every message.
    #[must_use]
    pub fn on_message<F>(mut self, on_message: F) -> Self
    where
        F: Fn(M) + Send + Sync + 'static,
    {
        self.callbacks.on_message = Some(Arc::new(on_message));
        self
    }

    /// Called when subscribing or resending fails.
    #[must_use]
    pub fn on_error<F>(mut self, on_error: F) -> Self
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.callbacks.on_error = Some(Arc::new(on_error));
        self
    }

    /// Called when a message could not be processed.
    #[must_use]
    pub fn on_message_error<F>(mut self, on_message_error: F) -> Self
    where
        F: Fn(&MessageError<M>) + Send + Sync + 'static,
    {
        self.callbacks.on_message_error = Some(Arc::new(on_message_error));
        self
    }

    /// Called right before a flow starts.
    #[must_use]
    pub fn on_before_start<F>(mut self, on_before_start: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.callbacks.on_before_start = Some(Arc::new(on_before_start));
        self
    }

    /// Called once a flow has ended.
    #[must_use]
    pub fn on_after_finish<F>(mut self, on_after_finish: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.callbacks.on_after_finish = Some(Arc::new(on_after_finish));
        self
    }

    /// Called once the subscription or resend is live.
    #[must_use]
    pub fn on_subscribed<F>(mut self, on_subscribed: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.callbacks.on_subscribed = Some(Arc::new(on_subscribed));
        self
    }

    /// Called once the subscription or resend was released.
    #[must_use]
    pub fn on_unsubscribed<F>(mut self, on_unsubscribed: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.callbacks.on_unsubscribed = Some(Arc::new(on_unsubscribed));
        self
    }
}
