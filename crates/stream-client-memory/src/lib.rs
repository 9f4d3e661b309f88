//! In-memory implementation of the stream client, for local development and tests.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod handle;
mod network;

/// In-memory clients.
pub mod client;

/// Messages carried by the in-memory network.
pub mod message;

/// Resend handles of in-memory clients.
pub mod resend;

/// Subscription handles of in-memory clients.
pub mod subscription;

pub use client::{Error, MemoryClient, MemoryClientConfig};
pub use message::StreamMessage;
pub use network::{MemoryNetwork, NetworkStats};
pub use resend::MemoryResend;
pub use subscription::MemorySubscription;

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;
    use tether_stream_client::{
        ClientEvent, HandleListener, MessageError, ResendHandle, ResendOptions, StreamClient,
        SubscribeParams, SubscriptionHandle,
    };
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    #[derive(Debug, PartialEq)]
    enum Event {
        Message(Bytes),
        Error(String, Option<Bytes>),
        Finished,
    }

    struct TestListener {
        sender: mpsc::UnboundedSender<Event>,
    }

    impl HandleListener<StreamMessage> for TestListener {
        fn on_message(&self, message: StreamMessage) {
            let _ = self.sender.send(Event::Message(message.content));
        }

        fn on_error(&self, error: MessageError<StreamMessage>) {
            let _ = self
                .sender
                .send(Event::Error(error.reason, error.raw.map(|raw| raw.content)));
        }

        fn on_finished(&self) {
            let _ = self.sender.send(Event::Finished);
        }
    }

    fn setup_test_listener() -> (Arc<TestListener>, mpsc::UnboundedReceiver<Event>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Arc::new(TestListener { sender }), receiver)
    }

    fn unique_endpoint() -> String {
        format!("memory-{}", uuid::Uuid::new_v4())
    }

    async fn connect(endpoint: &str) -> MemoryClient {
        MemoryClient::connect(MemoryClientConfig::new(endpoint))
            .await
            .unwrap()
    }

    async fn recv(receiver: &mut mpsc::UnboundedReceiver<Event>) -> Event {
        timeout(Duration::from_secs(1), receiver.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    async fn test_subscribe_and_publish() {
        let endpoint = unique_endpoint();
        let client = connect(&endpoint).await;
        let (listener, mut receiver) = setup_test_listener();

        let subscription = client
            .subscribe(SubscribeParams::new("stream-1"))
            .await
            .unwrap();
        subscription.listen(listener);

        let network = MemoryNetwork::endpoint(&endpoint);
        network.publish("stream-1", "message1");
        network.publish("stream-1", "message2");
        network.publish("stream-2", "elsewhere");

        assert_eq!(recv(&mut receiver).await, Event::Message(Bytes::from("message1")));
        assert_eq!(recv(&mut receiver).await, Event::Message(Bytes::from("message2")));
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_backlog_is_replayed_to_first_listener() {
        let endpoint = unique_endpoint();
        let client = connect(&endpoint).await;
        let network = client.network().clone();

        let subscription = client
            .subscribe(SubscribeParams::new("stream-1"))
            .await
            .unwrap();

        network.publish("stream-1", "early");

        let (listener, mut receiver) = setup_test_listener();
        subscription.listen(listener);
        network.publish("stream-1", "late");

        assert_eq!(recv(&mut receiver).await, Event::Message(Bytes::from("early")));
        assert_eq!(recv(&mut receiver).await, Event::Message(Bytes::from("late")));
    }

    #[tokio::test]
    async fn test_subscribe_with_resend_replays_history_first() {
        let endpoint = unique_endpoint();
        let network = MemoryNetwork::endpoint(&endpoint);
        network.publish("stream-1", "old1");
        network.publish("stream-1", "old2");
        network.publish("stream-1", "old3");

        let client = connect(&endpoint).await;
        let (listener, mut receiver) = setup_test_listener();
        let subscription = client
            .subscribe(
                SubscribeParams::new("stream-1").with_resend(ResendOptions::Last { count: 2 }),
            )
            .await
            .unwrap();
        subscription.listen(listener);
        network.publish("stream-1", "new");

        assert_eq!(recv(&mut receiver).await, Event::Message(Bytes::from("old2")));
        assert_eq!(recv(&mut receiver).await, Event::Message(Bytes::from("old3")));
        assert_eq!(recv(&mut receiver).await, Event::Message(Bytes::from("new")));
    }

    #[tokio::test]
    async fn test_resend_range_then_finished() {
        let endpoint = unique_endpoint();
        let network = MemoryNetwork::endpoint(&endpoint);
        network.publish_at("stream-1", 100, "a");
        network.publish_at("stream-1", 200, "b");
        network.publish_at("stream-1", 300, "c");

        let client = connect(&endpoint).await;
        let resend = client
            .resend("stream-1".into(), ResendOptions::Range { from: 150, to: 300 })
            .await
            .unwrap();
        assert!(resend.is_finished());

        let (listener, mut receiver) = setup_test_listener();
        resend.listen(listener);

        assert_eq!(recv(&mut receiver).await, Event::Message(Bytes::from("b")));
        assert_eq!(recv(&mut receiver).await, Event::Message(Bytes::from("c")));
        assert_eq!(recv(&mut receiver).await, Event::Finished);

        resend.cancel().await;
        assert_eq!(network.stats().resend_cancels, 1);
    }

    #[tokio::test]
    async fn test_undecodable_message_carries_raw_payload() {
        let endpoint = unique_endpoint();
        let client = connect(&endpoint).await;
        let (listener, mut receiver) = setup_test_listener();
        let subscription = client
            .subscribe(SubscribeParams::new("stream-1"))
            .await
            .unwrap();
        subscription.listen(listener);

        client.network().publish_undecodable("stream-1", "garbage");
        client.network().publish_corrupt("stream-1", "checksum mismatch");

        assert_eq!(
            recv(&mut receiver).await,
            Event::Error(
                "undecodable message".to_string(),
                Some(Bytes::from("garbage"))
            )
        );
        assert_eq!(
            recv(&mut receiver).await,
            Event::Error("checksum mismatch".to_string(), None)
        );
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_delivery() {
        let endpoint = unique_endpoint();
        let client = connect(&endpoint).await;
        let (listener, mut receiver) = setup_test_listener();
        let subscription = client
            .subscribe(SubscribeParams::new("stream-1"))
            .await
            .unwrap();
        subscription.listen(listener);
        assert_eq!(client.network().active_subscriptions("stream-1"), 1);

        client.unsubscribe(&subscription).await.unwrap();
        client.network().publish("stream-1", "ignored");

        assert!(subscription.is_closed());
        assert_eq!(client.network().active_subscriptions("stream-1"), 0);
        assert!(receiver.try_recv().is_err());
        assert_eq!(client.network().stats().unsubscribe_calls, 1);
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    async fn test_destroy_is_counted_once_and_announced() {
        let endpoint = unique_endpoint();
        let client = connect(&endpoint).await;
        let mut events = client.events();
        let subscription = client
            .subscribe(SubscribeParams::new("stream-1"))
            .await
            .unwrap();

        client.destroy().await;
        client.destroy().await;

        assert!(client.is_destroyed());
        assert!(subscription.is_closed());
        assert_eq!(client.destroy_calls(), 2);
        assert_eq!(client.network().stats().clients_destroyed, 1);
        assert_eq!(events.recv().await.unwrap(), ClientEvent::Destroyed);
        assert!(matches!(
            client.subscribe(SubscribeParams::new("stream-1")).await,
            Err(Error::Destroyed)
        ));
    }

    #[tokio::test]
    async fn test_rejected_stream_and_failing_connect() {
        let endpoint = unique_endpoint();
        let client = connect(&endpoint).await;
        client.network().reject_subscriptions("private");

        assert!(matches!(
            client.subscribe(SubscribeParams::new("private")).await,
            Err(Error::Rejected(_))
        ));
        assert!(matches!(
            MemoryClient::connect(MemoryClientConfig::new(&endpoint).failing()).await,
            Err(Error::Connect(_))
        ));
    }

    #[test]
    fn test_config_deserializes_with_defaults() {
        let config: MemoryClientConfig =
            serde_json::from_str(r#"{"endpoint":"local"}"#).unwrap();

        assert_eq!(config, MemoryClientConfig::new("local"));
    }
}
