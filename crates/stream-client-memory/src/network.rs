use crate::handle::{HandleCore, HandleEvent};
use crate::message::StreamMessage;

use std::collections::{HashMap, HashSet};
use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use parking_lot::Mutex;
use tether_stream_client::{MessageError, ResendOptions, StreamDefinition};
use tracing::debug;

static NETWORKS: LazyLock<Mutex<HashMap<String, MemoryNetwork>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

type StreamKey = (String, u32);

fn stream_key(stream: &StreamDefinition) -> StreamKey {
    (stream.id.clone(), stream.partition_or_default())
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| {
            u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
        })
}

#[derive(Default)]
struct StreamState {
    history: Vec<StreamMessage>,
    subscribers: Vec<(u64, Arc<HandleCore>)>,
}

#[derive(Debug, Default)]
pub struct Counters {
    pub clients_connected: AtomicUsize,
    pub clients_destroyed: AtomicUsize,
    pub subscribe_calls: AtomicUsize,
    pub unsubscribe_calls: AtomicUsize,
    pub resend_calls: AtomicUsize,
    pub resend_cancels: AtomicUsize,
}

impl Counters {
    pub fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

/// Point-in-time view of the calls made against a network.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NetworkStats {
    /// Clients successfully connected.
    pub clients_connected: usize,

    /// Clients torn down (counted once per client).
    pub clients_destroyed: usize,

    /// Calls to `subscribe`, including failed ones.
    pub subscribe_calls: usize,

    /// Calls to `unsubscribe`.
    pub unsubscribe_calls: usize,

    /// Calls to `resend`, including failed ones.
    pub resend_calls: usize,

    /// Calls to `cancel` on resend handles.
    pub resend_cancels: usize,
}

struct Inner {
    endpoint: String,
    streams: Mutex<HashMap<StreamKey, StreamState>>,
    rejected: Mutex<HashSet<String>>,
    subscribe_delay: Mutex<Option<Duration>>,
    counters: Counters,
    next_id: AtomicU64,
}

/// An in-memory broker shared by every client connected to the same endpoint.
#[derive(Clone)]
pub struct MemoryNetwork {
    inner: Arc<Inner>,
}

impl Debug for MemoryNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryNetwork")
            .field("endpoint", &self.inner.endpoint)
            .finish_non_exhaustive()
    }
}

impl MemoryNetwork {
    /// Returns the network behind `endpoint`, creating it on first use.
    /// Networks are never dropped; tests use unique endpoint names.
    #[must_use]
    pub fn endpoint(endpoint: &str) -> Self {
        NETWORKS
            .lock()
            .entry(endpoint.to_string())
            .or_insert_with(|| Self {
                inner: Arc::new(Inner {
                    endpoint: endpoint.to_string(),
                    streams: Mutex::new(HashMap::new()),
                    rejected: Mutex::new(HashSet::new()),
                    subscribe_delay: Mutex::new(None),
                    counters: Counters::default(),
                    next_id: AtomicU64::new(0),
                }),
            })
            .clone()
    }

    /// Publishes a message stamped with the current time.
    pub fn publish<S, B>(&self, stream: S, content: B) -> StreamMessage
    where
        S: Into<StreamDefinition>,
        B: Into<Bytes>,
    {
        self.publish_at(stream, now_millis(), content)
    }

    /// Publishes a message with an explicit timestamp.
    pub fn publish_at<S, B>(&self, stream: S, timestamp: u64, content: B) -> StreamMessage
    where
        S: Into<StreamDefinition>,
        B: Into<Bytes>,
    {
        let stream = stream.into();
        let (message, subscribers) = {
            let mut streams = self.inner.streams.lock();
            let state = streams.entry(stream_key(&stream)).or_default();
            let message = StreamMessage {
                stream,
                sequence: state.history.len() as u64,
                timestamp,
                content: content.into(),
            };
            state.history.push(message.clone());
            (message, Self::handles(state))
        };

        debug!("Publishing message to {}: {:?}", message.stream, message);

        for handle in subscribers {
            handle.dispatch(HandleEvent::Message(message.clone()));
        }

        message
    }

    /// Delivers a message that subscribers fail to decode. The raw payload is
    /// attached to the error; nothing is stored in history.
    pub fn publish_undecodable<S, B>(&self, stream: S, content: B) -> StreamMessage
    where
        S: Into<StreamDefinition>,
        B: Into<Bytes>,
    {
        let stream = stream.into();
        let raw = StreamMessage {
            stream: stream.clone(),
            sequence: u64::MAX,
            timestamp: now_millis(),
            content: content.into(),
        };

        for handle in self.subscribers(&stream) {
            handle.dispatch(HandleEvent::Error(MessageError::undecoded(
                "undecodable message",
                raw.clone(),
            )));
        }

        raw
    }

    /// Delivers a message error without a recoverable payload.
    pub fn publish_corrupt<S, R>(&self, stream: S, reason: R)
    where
        S: Into<StreamDefinition>,
        R: Into<String>,
    {
        let stream = stream.into();
        let reason = reason.into();

        for handle in self.subscribers(&stream) {
            handle.dispatch(HandleEvent::Error(MessageError::new(reason.clone())));
        }
    }

    /// Makes every subscribe and resend call for `stream_id` fail.
    pub fn reject_subscriptions<K>(&self, stream_id: K)
    where
        K: Into<String>,
    {
        self.inner.rejected.lock().insert(stream_id.into());
    }

    /// Delays every subsequent subscribe call.
    pub fn set_subscribe_delay(&self, delay: Option<Duration>) {
        *self.inner.subscribe_delay.lock() = delay;
    }

    /// Number of live subscriptions attached to `stream`.
    pub fn active_subscriptions<S>(&self, stream: S) -> usize
    where
        S: Into<StreamDefinition>,
    {
        self.inner
            .streams
            .lock()
            .get(&stream_key(&stream.into()))
            .map_or(0, |state| state.subscribers.len())
    }

    /// Snapshot of the calls made so far.
    #[must_use]
    pub fn stats(&self) -> NetworkStats {
        let counters = &self.inner.counters;
        NetworkStats {
            clients_connected: counters.clients_connected.load(Ordering::SeqCst),
            clients_destroyed: counters.clients_destroyed.load(Ordering::SeqCst),
            subscribe_calls: counters.subscribe_calls.load(Ordering::SeqCst),
            unsubscribe_calls: counters.unsubscribe_calls.load(Ordering::SeqCst),
            resend_calls: counters.resend_calls.load(Ordering::SeqCst),
            resend_cancels: counters.resend_cancels.load(Ordering::SeqCst),
        }
    }

    pub(crate) fn counters(&self) -> &Counters {
        &self.inner.counters
    }

    pub(crate) fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn is_rejected(&self, stream: &StreamDefinition) -> bool {
        self.inner.rejected.lock().contains(&stream.id)
    }

    pub(crate) fn subscribe_delay(&self) -> Option<Duration> {
        *self.inner.subscribe_delay.lock()
    }

    /// Registers a live subscriber. Requested history is queued on the handle
    /// inside the same critical section, so no message is missed or repeated.
    pub(crate) fn attach(
        &self,
        stream: &StreamDefinition,
        id: u64,
        handle: Arc<HandleCore>,
        resend: Option<&ResendOptions>,
    ) {
        let mut streams = self.inner.streams.lock();
        let state = streams.entry(stream_key(stream)).or_default();

        if let Some(options) = resend {
            for message in select_history(&state.history, options) {
                handle.dispatch(HandleEvent::Message(message));
            }
        }

        state.subscribers.push((id, handle));
    }

    pub(crate) fn detach(&self, stream: &StreamDefinition, id: u64) -> bool {
        let mut streams = self.inner.streams.lock();
        streams.get_mut(&stream_key(stream)).is_some_and(|state| {
            let before = state.subscribers.len();
            state.subscribers.retain(|(subscriber, _)| *subscriber != id);
            state.subscribers.len() != before
        })
    }

    pub(crate) fn history(
        &self,
        stream: &StreamDefinition,
        options: &ResendOptions,
    ) -> Vec<StreamMessage> {
        self.inner
            .streams
            .lock()
            .get(&stream_key(stream))
            .map(|state| select_history(&state.history, options))
            .unwrap_or_default()
    }

    fn subscribers(&self, stream: &StreamDefinition) -> Vec<Arc<HandleCore>> {
        self.inner
            .streams
            .lock()
            .get(&stream_key(stream))
            .map(Self::handles)
            .unwrap_or_default()
    }

    fn handles(state: &StreamState) -> Vec<Arc<HandleCore>> {
        state
            .subscribers
            .iter()
            .map(|(_, handle)| Arc::clone(handle))
            .collect()
    }
}

fn select_history(history: &[StreamMessage], options: &ResendOptions) -> Vec<StreamMessage> {
    match options {
        ResendOptions::Last { count } => {
            let count = usize::try_from(*count).unwrap_or(usize::MAX);
            history[history.len().saturating_sub(count)..].to_vec()
        }
        ResendOptions::From {
            timestamp,
            sequence,
        } => history
            .iter()
            .filter(|message| {
                message.timestamp > *timestamp
                    || (message.timestamp == *timestamp && message.sequence >= *sequence)
            })
            .cloned()
            .collect(),
        ResendOptions::Range { from, to } => history
            .iter()
            .filter(|message| (*from..=*to).contains(&message.timestamp))
            .cloned()
            .collect(),
    }
}
