use crate::resend::ResendHandle;
use crate::stream::{ResendOptions, StreamDefinition, SubscribeParams};
use crate::subscription::SubscriptionHandle;

use std::error::Error;
use std::fmt::Debug;

use async_trait::async_trait;
use tokio::sync::broadcast;

/// Marker trait for client errors
pub trait ClientError: Debug + Error + Send + Sync + 'static {}

/// Marker trait for client configuration.
///
/// Configurations are compared structurally: two configs that are `==` describe
/// the same client.
pub trait ClientConfig: Clone + Debug + PartialEq + Send + Sync + 'static {}

/// Lifecycle events emitted by a client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientEvent {
    /// The connection was (re-)established.
    Connected,

    /// The connection was lost.
    Disconnected,

    /// The client hit an unrecoverable error.
    Error(String),

    /// The client was destroyed and can no longer be used.
    Destroyed,
}

/// A trait representing a live connection to a streaming backend.
#[async_trait]
pub trait StreamClient
where
    Self: Debug + Send + Sync + Sized + 'static,
{
    /// The error type for the client.
    type Error: ClientError;

    /// The configuration used to construct the client.
    type Config: ClientConfig;

    /// The message type delivered by subscriptions and resends.
    type Message: Clone + Debug + Send + Sync + 'static;

    /// The handle type of live subscriptions.
    type Subscription: SubscriptionHandle<Message = Self::Message>;

    /// The handle type of resend operations.
    type Resend: ResendHandle<Message = Self::Message>;

    /// Constructs a new client from the given configuration.
    async fn connect(config: Self::Config) -> Result<Self, Self::Error>;

    /// Tears the client down. Subsequent calls have no further effect.
    async fn destroy(&self);

    /// Whether the client has been destroyed.
    fn is_destroyed(&self) -> bool;

    /// Subscribes to the lifecycle events of the client.
    fn events(&self) -> broadcast::Receiver<ClientEvent>;

    /// Opens a live subscription.
    async fn subscribe(&self, params: SubscribeParams) -> Result<Self::Subscription, Self::Error>;

    /// Closes a live subscription.
    async fn unsubscribe(&self, subscription: &Self::Subscription) -> Result<(), Self::Error>;

    /// Starts replaying historical messages of a stream.
    async fn resend(
        &self,
        stream: StreamDefinition,
        options: ResendOptions,
    ) -> Result<Self::Resend, Self::Error>;
}
