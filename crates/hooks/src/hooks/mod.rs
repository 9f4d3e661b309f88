mod effect;
mod options;

use crate::context::ClientContext;
use effect::{Effect, FlowTarget};
pub use options::{HookOptions, ResendHookOptions, SubscribeOptions};

use std::fmt::{self, Debug};

use tether_stream_client::{StreamClient, StreamDefinition, SubscribeParams};

/// Keeps a live subscription to a stream for as long as it is mounted.
///
/// The subscription is restarted when the client, the stream, the resend
/// options, the `disabled` or `ignore_undecoded_messages` flags, or the cache
/// key change. It also resubscribes once whenever the client reports a
/// disconnect.
pub struct SubscribeHook<C: StreamClient> {
    effect: Effect<C>,
}

impl<C: StreamClient> Debug for SubscribeHook<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscribeHook")
            .field("active", &self.is_active())
            .finish()
    }
}

impl<C: StreamClient> Default for SubscribeHook<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: StreamClient> SubscribeHook<C> {
    /// Creates a mounted hook holding no subscription yet.
    #[must_use]
    pub fn new() -> Self {
        Self {
            effect: Effect::new(),
        }
    }

    /// Renders the hook with the current inputs.
    ///
    /// Must be called within a Tokio runtime.
    pub fn render<S>(
        &mut self,
        context: &ClientContext<C>,
        stream: S,
        options: SubscribeOptions<C::Message, C::Error>,
    ) where
        S: Into<StreamDefinition>,
    {
        let params = SubscribeParams {
            stream: stream.into(),
            resend: options.resend_options.clone(),
        };

        self.effect
            .render(context, FlowTarget::Subscribe(params), options);
    }

    /// Whether a subscription flow is running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.effect.is_active()
    }

    /// Stops the subscription and waits until it has been released.
    pub async fn unmount(&mut self) {
        self.effect.unmount().await;
    }
}

/// Replays the history of a stream once per set of inputs.
///
/// Restart rules match [`SubscribeHook`], except that a disconnect does not
/// restart the replay.
pub struct ResendHook<C: StreamClient> {
    effect: Effect<C>,
}

impl<C: StreamClient> Debug for ResendHook<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResendHook")
            .field("active", &self.is_active())
            .finish()
    }
}

impl<C: StreamClient> Default for ResendHook<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: StreamClient> ResendHook<C> {
    /// Creates a mounted hook.
    #[must_use]
    pub fn new() -> Self {
        Self {
            effect: Effect::new(),
        }
    }

    /// Renders the hook with the current inputs. Without resend options the
    /// last message is replayed.
    ///
    /// Must be called within a Tokio runtime.
    pub fn render<S>(
        &mut self,
        context: &ClientContext<C>,
        stream: S,
        options: ResendHookOptions<C::Message, C::Error>,
    ) where
        S: Into<StreamDefinition>,
    {
        let target = FlowTarget::Resend {
            stream: stream.into(),
            options: options.resend_options.clone().unwrap_or_default(),
        };

        self.effect.render(context, target, options);
    }

    /// Whether the replay is still running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.effect.is_active()
    }

    /// Stops the replay and waits until it has been released.
    pub async fn unmount(&mut self) {
        self.effect.unmount().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use bytes::Bytes;
    use tether_stream_client::ResendOptions;
    use tether_stream_client_memory::{
        Error, MemoryClient, MemoryClientConfig, MemoryNetwork, StreamMessage,
    };
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    async fn setup_context() -> (ClientContext<MemoryClient>, Arc<MemoryClient>, MemoryNetwork) {
        let client = Arc::new(
            MemoryClient::connect(MemoryClientConfig::new(format!(
                "memory-{}",
                uuid::Uuid::new_v4()
            )))
            .await
            .unwrap(),
        );
        let network = client.network().clone();
        (
            ClientContext::with_client(Arc::clone(&client)),
            client,
            network,
        )
    }

    async fn wait_for_subscribers(network: &MemoryNetwork, stream: &str, count: usize) {
        timeout(Duration::from_secs(1), async {
            while network.active_subscriptions(stream) != count {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    fn forwarding(sender: &mpsc::UnboundedSender<Bytes>) -> SubscribeOptions<StreamMessage, Error> {
        let sender = sender.clone();
        SubscribeOptions::new().on_message(move |message: StreamMessage| {
            let _ = sender.send(message.content);
        })
    }

    #[tokio::test]
    async fn test_callback_change_does_not_resubscribe() {
        let (context, _client, network) = setup_context().await;
        let (first_sender, mut first) = mpsc::unbounded_channel();
        let (second_sender, mut second) = mpsc::unbounded_channel();
        let mut hook = SubscribeHook::new();

        hook.render(&context, "stream-1", forwarding(&first_sender));
        wait_for_subscribers(&network, "stream-1", 1).await;
        network.publish("stream-1", "one");
        assert_eq!(first.recv().await.unwrap(), Bytes::from("one"));

        hook.render(&context, "stream-1", forwarding(&second_sender));
        network.publish("stream-1", "two");
        assert_eq!(second.recv().await.unwrap(), Bytes::from("two"));
        assert!(first.try_recv().is_err());

        assert_eq!(network.stats().subscribe_calls, 1);
        assert_eq!(network.stats().unsubscribe_calls, 0);
        hook.unmount().await;
    }

    #[tokio::test]
    async fn test_stream_change_resubscribes_once() {
        let (context, _client, network) = setup_context().await;
        let (sender, _receiver) = mpsc::unbounded_channel();
        let mut hook = SubscribeHook::new();

        hook.render(&context, "stream-1", forwarding(&sender));
        wait_for_subscribers(&network, "stream-1", 1).await;
        hook.render(&context, "stream-1", forwarding(&sender));
        hook.render(&context, "stream-2", forwarding(&sender));
        wait_for_subscribers(&network, "stream-2", 1).await;
        wait_for_subscribers(&network, "stream-1", 0).await;

        assert_eq!(network.stats().subscribe_calls, 2);
        assert_eq!(network.stats().unsubscribe_calls, 1);
        hook.unmount().await;
    }

    #[tokio::test]
    async fn test_unmount_unsubscribes_and_stops_messages() {
        let (context, _client, network) = setup_context().await;
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let mut hook = SubscribeHook::new();

        hook.render(&context, "stream-1", forwarding(&sender));
        wait_for_subscribers(&network, "stream-1", 1).await;

        hook.unmount().await;
        network.publish("stream-1", "late");

        assert!(!hook.is_active());
        assert_eq!(network.stats().unsubscribe_calls, 1);
        assert_eq!(network.active_subscriptions("stream-1"), 0);
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disabled_hook_holds_no_flow() {
        let (context, _client, network) = setup_context().await;
        let before_start = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&before_start);
        let mut hook = SubscribeHook::new();

        hook.render(
            &context,
            "stream-1",
            SubscribeOptions::new().disabled(true).on_before_start(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        hook.render(&ClientContext::empty(), "stream-1", SubscribeOptions::new());
        hook.unmount().await;

        assert!(!hook.is_active());
        assert_eq!(before_start.load(Ordering::SeqCst), 0);
        assert_eq!(network.stats().subscribe_calls, 0);
    }

    async fn wait_for_cycles(network: &MemoryNetwork, subscribes: usize, unsubscribes: usize) {
        timeout(Duration::from_secs(1), async {
            loop {
                let stats = network.stats();
                if stats.subscribe_calls == subscribes
                    && stats.unsubscribe_calls == unsubscribes
                    && network.active_subscriptions("stream-1") == subscribes - unsubscribes
                {
                    break;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_each_dependency_change_restarts_once() {
        let (context, _client, network) = setup_context().await;
        let mut hook = SubscribeHook::new();
        let keyed = |key: i64| SubscribeOptions::new().cache_key(key);

        hook.render(&context, "stream-1", keyed(1));
        wait_for_cycles(&network, 1, 0).await;

        hook.render(&context, "stream-1", keyed(1));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(network.stats().subscribe_calls, 1);
        assert_eq!(network.stats().unsubscribe_calls, 0);

        hook.render(&context, "stream-1", keyed(2));
        wait_for_cycles(&network, 2, 1).await;

        hook.render(&context, "stream-1", keyed(2).ignore_undecoded_messages(true));
        wait_for_cycles(&network, 3, 2).await;

        hook.render(
            &context,
            "stream-1",
            keyed(2)
                .ignore_undecoded_messages(true)
                .resend_options(ResendOptions::Last { count: 5 }),
        );
        wait_for_cycles(&network, 4, 3).await;

        hook.unmount().await;
        wait_for_cycles(&network, 4, 4).await;
    }

    #[tokio::test]
    async fn test_disabled_then_enabled_reactivates() {
        let (context, _client, network) = setup_context().await;
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let before_start = Arc::new(AtomicUsize::new(0));
        let options = |disabled: bool| {
            let counter = Arc::clone(&before_start);
            forwarding(&sender)
                .disabled(disabled)
                .on_before_start(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
        };
        let mut hook = SubscribeHook::new();

        hook.render(&context, "stream-1", options(false));
        wait_for_cycles(&network, 1, 0).await;

        hook.render(&context, "stream-1", options(true));
        wait_for_cycles(&network, 1, 1).await;
        assert!(!hook.is_active());

        hook.render(&context, "stream-1", options(false));
        wait_for_cycles(&network, 2, 1).await;
        assert!(hook.is_active());
        assert_eq!(before_start.load(Ordering::SeqCst), 2);

        network.publish("stream-1", "again");
        assert_eq!(receiver.recv().await.unwrap(), Bytes::from("again"));
        hook.unmount().await;
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    async fn test_disconnect_resubscribes() {
        let (context, client, network) = setup_context().await;
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let mut hook = SubscribeHook::new();

        hook.render(&context, "stream-1", forwarding(&sender));
        wait_for_subscribers(&network, "stream-1", 1).await;

        client.simulate_disconnect();
        timeout(Duration::from_secs(1), async {
            while network.stats().subscribe_calls < 2 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        wait_for_subscribers(&network, "stream-1", 1).await;

        network.publish("stream-1", "after");
        assert_eq!(receiver.recv().await.unwrap(), Bytes::from("after"));
        assert_eq!(network.stats().unsubscribe_calls, 1);
        assert!(logs_contain("resubscribing"));
        hook.unmount().await;
    }

    #[tokio::test]
    async fn test_resend_hook_replays_history_then_finishes() {
        let (context, _client, network) = setup_context().await;
        for content in ["a", "b", "c"] {
            network.publish("stream-1", content);
        }
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let (finished_sender, mut finished) = mpsc::unbounded_channel();
        let mut hook = ResendHook::new();

        let message_sender = sender.clone();
        hook.render(
            &context,
            "stream-1",
            ResendHookOptions::new()
                .resend_options(ResendOptions::Last { count: 2 })
                .on_message(move |message: StreamMessage| {
                    let _ = message_sender.send(message.content);
                })
                .on_after_finish(move || {
                    let _ = finished_sender.send(());
                }),
        );

        assert_eq!(receiver.recv().await.unwrap(), Bytes::from("b"));
        assert_eq!(receiver.recv().await.unwrap(), Bytes::from("c"));
        timeout(Duration::from_secs(1), finished.recv())
            .await
            .unwrap()
            .unwrap();

        assert!(!hook.is_active());
        assert_eq!(network.stats().resend_calls, 1);
        hook.unmount().await;
    }

    #[tokio::test]
    async fn test_resend_hook_defaults_to_last_message() {
        let (context, _client, network) = setup_context().await;
        network.publish("stream-1", "old");
        network.publish("stream-1", "latest");
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let mut hook = ResendHook::new();

        hook.render(&context, "stream-1", forwarding(&sender));

        assert_eq!(receiver.recv().await.unwrap(), Bytes::from("latest"));
        hook.unmount().await;
        assert!(receiver.try_recv().is_err());
    }
}
