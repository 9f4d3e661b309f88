//! Abstract interface for real-time stream clients.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Clients own the connection to the streaming backend.
pub mod client;

/// Listeners receive events pushed by subscription and resend handles.
pub mod listener;

/// Resend handles replay historical messages of a stream.
pub mod resend;

/// Stream definitions and subscription parameters.
pub mod stream;

/// Subscription handles represent live subscriptions to a stream.
pub mod subscription;

pub use client::{ClientConfig, ClientError, ClientEvent, StreamClient};
pub use listener::{HandleListener, ListenerId, MessageError};
pub use resend::ResendHandle;
pub use stream::{ResendOptions, StreamDefinition, SubscribeParams};
pub use subscription::SubscriptionHandle;
