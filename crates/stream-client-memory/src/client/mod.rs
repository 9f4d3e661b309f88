mod error;

use crate::handle::{HandleCore, HandleEvent};
use crate::message::StreamMessage;
use crate::network::{Counters, MemoryNetwork};
use crate::resend::MemoryResend;
use crate::subscription::MemorySubscription;
pub use error::Error;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tether_stream_client::{
    ClientConfig, ClientEvent, ResendOptions, StreamClient, StreamDefinition, SubscribeParams,
    SubscriptionHandle,
};
use tokio::sync::broadcast;
use tracing::debug;

/// Options for the in-memory client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryClientConfig {
    /// Clients with the same endpoint share a network.
    pub endpoint: String,

    /// Makes `connect` fail.
    #[serde(default)]
    pub fail_connect: bool,

    /// Time `connect` takes before completing.
    #[serde(default)]
    pub connect_delay: Option<Duration>,
}

impl MemoryClientConfig {
    /// Configuration for a client connecting to `endpoint`.
    pub fn new<K>(endpoint: K) -> Self
    where
        K: Into<String>,
    {
        Self {
            endpoint: endpoint.into(),
            fail_connect: false,
            connect_delay: None,
        }
    }

    /// Makes `connect` fail.
    #[must_use]
    pub const fn failing(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    /// Makes `connect` take `delay` before completing.
    #[must_use]
    pub const fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }
}

impl ClientConfig for MemoryClientConfig {}

/// An in-memory stream client.
#[derive(Debug)]
pub struct MemoryClient {
    config: MemoryClientConfig,
    network: MemoryNetwork,
    destroyed: AtomicBool,
    destroy_calls: AtomicUsize,
    events: broadcast::Sender<ClientEvent>,
    subscriptions: Mutex<HashMap<u64, MemorySubscription>>,
}

impl MemoryClient {
    /// The configuration the client was built from.
    #[must_use]
    pub const fn config(&self) -> &MemoryClientConfig {
        &self.config
    }

    /// The network the client is connected to.
    #[must_use]
    pub const fn network(&self) -> &MemoryNetwork {
        &self.network
    }

    /// How many times `destroy` was called on this client.
    #[must_use]
    pub fn destroy_calls(&self) -> usize {
        self.destroy_calls.load(Ordering::SeqCst)
    }

    /// Emits a `Disconnected` event as if the connection dropped.
    pub fn simulate_disconnect(&self) {
        let _ = self.events.send(ClientEvent::Disconnected);
    }

    /// Emits an `Error` event.
    pub fn simulate_error<R>(&self, reason: R)
    where
        R: Into<String>,
    {
        let _ = self.events.send(ClientEvent::Error(reason.into()));
    }

    fn ensure_usable(&self, stream: &StreamDefinition) -> Result<(), Error> {
        if self.is_destroyed() {
            return Err(Error::Destroyed);
        }

        if self.network.is_rejected(stream) {
            return Err(Error::Rejected(stream.to_string()));
        }

        Ok(())
    }
}

#[async_trait]
impl StreamClient for MemoryClient {
    type Error = Error;
    type Config = MemoryClientConfig;
    type Message = StreamMessage;
    type Subscription = MemorySubscription;
    type Resend = MemoryResend;

    async fn connect(config: MemoryClientConfig) -> Result<Self, Error> {
        if let Some(delay) = config.connect_delay {
            tokio::time::sleep(delay).await;
        }

        if config.fail_connect {
            return Err(Error::Connect(config.endpoint));
        }

        let network = MemoryNetwork::endpoint(&config.endpoint);
        Counters::bump(&network.counters().clients_connected);
        debug!("Connected memory client to {}", config.endpoint);

        let (events, _) = broadcast::channel(16);
        let _ = events.send(ClientEvent::Connected);

        Ok(Self {
            config,
            network,
            destroyed: AtomicBool::new(false),
            destroy_calls: AtomicUsize::new(0),
            events,
            subscriptions: Mutex::new(HashMap::new()),
        })
    }

    async fn destroy(&self) {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        let subscriptions: Vec<_> = self.subscriptions.lock().drain().collect();
        for (id, subscription) in subscriptions {
            self.network.detach(subscription.stream(), id);
            subscription.close();
        }

        Counters::bump(&self.network.counters().clients_destroyed);
        debug!("Destroyed memory client for {}", self.config.endpoint);

        let _ = self.events.send(ClientEvent::Destroyed);
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    async fn subscribe(&self, params: SubscribeParams) -> Result<MemorySubscription, Error> {
        Counters::bump(&self.network.counters().subscribe_calls);
        self.ensure_usable(&params.stream)?;

        if let Some(delay) = self.network.subscribe_delay() {
            tokio::time::sleep(delay).await;
            self.ensure_usable(&params.stream)?;
        }

        let id = self.network.next_id();
        let core = Arc::new(HandleCore::default());
        let subscription = MemorySubscription::new(id, params.stream.clone(), Arc::clone(&core));

        self.network
            .attach(&params.stream, id, core, params.resend.as_ref());
        self.subscriptions.lock().insert(id, subscription.clone());

        debug!("Subscribed to {} ({})", params.stream, id);

        Ok(subscription)
    }

    async fn unsubscribe(&self, subscription: &MemorySubscription) -> Result<(), Error> {
        Counters::bump(&self.network.counters().unsubscribe_calls);

        self.network
            .detach(subscription.stream(), subscription.id());
        subscription.close();
        self.subscriptions.lock().remove(&subscription.id());

        debug!(
            "Unsubscribed from {} ({})",
            subscription.stream(),
            subscription.id()
        );

        Ok(())
    }

    async fn resend(
        &self,
        stream: StreamDefinition,
        options: ResendOptions,
    ) -> Result<MemoryResend, Error> {
        Counters::bump(&self.network.counters().resend_calls);
        self.ensure_usable(&stream)?;

        let core = Arc::new(HandleCore::default());
        for message in self.network.history(&stream, &options) {
            core.dispatch(HandleEvent::Message(message));
        }
        core.dispatch(HandleEvent::Finished);

        Ok(MemoryResend::new(stream, core, self.network.clone()))
    }
}
