mod error;

use crate::cache_key::CacheKey;
use crate::context::{ClientContext, ContextPublisher};
use crate::opts::Opts;
pub use error::Error;

use std::fmt::{self, Debug};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tether_stream_client::{ClientEvent, StreamClient};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

/// Options for the client resolver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverOptions {
    /// How long a failed configuration is refused before it may be attempted
    /// again. `Duration::ZERO` disables the cooldown.
    pub failure_cooldown: Duration,

    /// Rebuild an owned client once it reports a disconnect or an error.
    pub rebuild_on_disconnect: bool,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            failure_cooldown: Duration::from_secs(3),
            rebuild_on_disconnect: false,
        }
    }
}

#[derive(Debug)]
enum Resolution<E>
where
    E: Debug + fmt::Display,
{
    Pending,
    Settled(Result<(), Error<E>>),
}

impl<E> Clone for Resolution<E>
where
    E: Debug + fmt::Display,
{
    fn clone(&self) -> Self {
        match self {
            Self::Pending => Self::Pending,
            Self::Settled(result) => Self::Settled(result.clone()),
        }
    }
}

struct Failure<K> {
    config: K,
    cache_key: Option<CacheKey>,
    at: Instant,
}

struct State<C: StreamClient> {
    mounted: bool,
    attempt: u64,
    config: Option<C::Config>,
    cache_key: Option<CacheKey>,
    owned: Option<Arc<C>>,
    inherited: Option<Arc<C>>,
    resolved: Option<Arc<C>>,
    failure: Option<Failure<C::Config>>,
    watcher: Option<CancellationToken>,
}

impl<C: StreamClient> State<C> {
    fn cooldown_remaining(
        &self,
        config: &C::Config,
        cache_key: Option<&CacheKey>,
        cooldown: Duration,
    ) -> Option<Duration> {
        let failure = self.failure.as_ref()?;
        if failure.config != *config || failure.cache_key.as_ref() != cache_key {
            return None;
        }

        cooldown
            .checked_sub(failure.at.elapsed())
            .filter(|remaining| !remaining.is_zero())
    }

    fn stop_watching(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.cancel();
        }
    }
}

struct Shared<C: StreamClient> {
    options: ResolverOptions,
    state: Mutex<State<C>>,
    publisher: ContextPublisher<C>,
    status: watch::Sender<Resolution<C::Error>>,
    tasks: TaskTracker,
}

impl<C: StreamClient> Shared<C> {
    fn publish(&self, state: &State<C>) {
        self.publisher.publish(state.resolved.clone());
    }

    fn settle(&self, result: Result<(), Error<C::Error>>) {
        self.status.send_replace(Resolution::Settled(result));
    }

    /// Issues a new construction attempt, superseding any pending one.
    fn begin(
        self: &Arc<Self>,
        state: &mut State<C>,
        config: C::Config,
        cache_key: Option<CacheKey>,
    ) {
        state.attempt += 1;
        let attempt = state.attempt;
        state.config = Some(config.clone());
        state.cache_key.clone_from(&cache_key);

        if let Some(remaining) =
            state.cooldown_remaining(&config, cache_key.as_ref(), self.options.failure_cooldown)
        {
            warn!(
                "Refusing to construct client for {:?} for another {:?}",
                config, remaining
            );
            self.settle(Err(Error::CoolingDown { remaining }));
            return;
        }

        debug!("Issued client construction attempt {}", attempt);
        self.status.send_replace(Resolution::Pending);

        let shared = Arc::clone(self);
        self.tasks.spawn(async move {
            let result = C::connect(config.clone()).await;
            shared.complete(attempt, config, cache_key, result).await;
        });
    }

    async fn complete(
        self: Arc<Self>,
        attempt: u64,
        config: C::Config,
        cache_key: Option<CacheKey>,
        result: Result<C, C::Error>,
    ) {
        let client = match result {
            Ok(client) => Arc::new(client),
            Err(err) => {
                let mut state = self.state.lock();
                if state.mounted && state.attempt == attempt {
                    warn!("Failed to construct client: {}", err);
                    state.failure = Some(Failure {
                        config,
                        cache_key,
                        at: Instant::now(),
                    });
                    self.settle(Err(Error::Construction(Arc::new(err))));
                } else {
                    debug!("Construction attempt {} failed after being superseded", attempt);
                }
                return;
            }
        };

        let retired = {
            let mut state = self.state.lock();
            if state.mounted && state.attempt == attempt {
                state.failure = None;
                state.resolved = Some(Arc::clone(&client));
                self.watch(&mut state, &client);
                self.publish(&state);
                self.settle(Ok(()));
                debug!("Installed client from attempt {}", attempt);
                state.owned.replace(client)
            } else {
                warn!("Discarding client from superseded attempt {}", attempt);
                Some(client)
            }
        };

        if let Some(retired) = retired {
            retired.destroy().await;
            debug!("Destroyed retired client");
        }
    }

    /// Drops the owned client; descendants fall back to the inherited one.
    fn release(self: &Arc<Self>, state: &mut State<C>) {
        state.attempt += 1;
        state.config = None;
        state.cache_key = None;
        state.failure = None;
        state.stop_watching();
        state.resolved.clone_from(&state.inherited);
        self.settle(Ok(()));

        if let Some(owned) = state.owned.take() {
            self.tasks.spawn(async move {
                owned.destroy().await;
                debug!("Destroyed client after configuration was removed");
            });
        }
    }

    fn watch(self: &Arc<Self>, state: &mut State<C>, client: &Arc<C>) {
        state.stop_watching();
        if !self.options.rebuild_on_disconnect {
            return;
        }

        let token = CancellationToken::new();
        state.watcher = Some(token.clone());

        let mut events = client.events();
        let client = Arc::clone(client);
        let shared = Arc::clone(self);
        self.tasks.spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => return,
                    event = events.recv() => match event {
                        Ok(ClientEvent::Disconnected | ClientEvent::Error(_)) => break,
                        Ok(ClientEvent::Destroyed) | Err(RecvError::Closed) => return,
                        Ok(ClientEvent::Connected) | Err(RecvError::Lagged(_)) => {}
                    },
                }
            }

            shared.rebuild(client).await;
        });
    }

    async fn rebuild(self: Arc<Self>, client: Arc<C>) {
        {
            let mut state = self.state.lock();
            let current = state
                .owned
                .as_ref()
                .is_some_and(|owned| Arc::ptr_eq(owned, &client));
            if !state.mounted || !current {
                return;
            }

            let Some(config) = state.config.clone() else {
                return;
            };
            let cache_key = state.cache_key.clone();

            debug!("Client lost its connection, rebuilding");
            state.watcher = None;
            state.failure = None;
            state.owned = None;
            let inner = &mut *state;
            inner.resolved.clone_from(&inner.inherited);
            self.publish(&state);
            self.begin(&mut state, config, cache_key);
        }

        client.destroy().await;
    }
}

/// Obtains the client for a scope: either borrowed from the parent context or
/// constructed (and owned) from a configuration.
///
/// Owned clients are destroyed exactly once: when superseded by a newer
/// client, when the configuration is removed, or on [`unmount`](Self::unmount).
pub struct ClientResolver<C: StreamClient> {
    shared: Arc<Shared<C>>,
    config: Opts<Option<C::Config>>,
    last_config: Option<Arc<Option<C::Config>>>,
    last_cache_key: Option<CacheKey>,
}

impl<C: StreamClient> Debug for ClientResolver<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("ClientResolver")
            .field("mounted", &state.mounted)
            .field("attempt", &state.attempt)
            .field("config", &state.config)
            .field("owned", &state.owned.is_some())
            .finish_non_exhaustive()
    }
}

impl<C: StreamClient> Default for ClientResolver<C> {
    fn default() -> Self {
        Self::new(ResolverOptions::default())
    }
}

impl<C: StreamClient> ClientResolver<C> {
    /// Creates a mounted resolver.
    #[must_use]
    pub fn new(options: ResolverOptions) -> Self {
        let (status, _) = watch::channel(Resolution::Settled(Ok(())));

        Self {
            shared: Arc::new(Shared {
                options,
                state: Mutex::new(State {
                    mounted: true,
                    attempt: 0,
                    config: None,
                    cache_key: None,
                    owned: None,
                    inherited: None,
                    resolved: None,
                    failure: None,
                    watcher: None,
                }),
                publisher: ContextPublisher::new(None),
                status,
                tasks: TaskTracker::new(),
            }),
            config: Opts::default(),
            last_config: None,
            last_cache_key: None,
        }
    }

    /// Resolves the client for this render.
    ///
    /// Without a configuration the parent's client is used as is. With one, a
    /// client is constructed in the background whenever the configuration
    /// (compared structurally) or the cache key changes; until it is ready
    /// the previously resolved client stays in effect. Before the first owned
    /// client exists, or while a lost one is rebuilt, that is the parent's.
    ///
    /// Must be called within a Tokio runtime.
    pub fn resolve(
        &mut self,
        parent: &ClientContext<C>,
        config: Option<C::Config>,
        cache_key: Option<CacheKey>,
    ) -> Option<Arc<C>> {
        let config = self.config.stabilize(config);
        let changed = self
            .last_config
            .as_ref()
            .is_none_or(|last| !Arc::ptr_eq(last, &config))
            || self.last_cache_key != cache_key;
        self.last_config = Some(Arc::clone(&config));
        self.last_cache_key.clone_from(&cache_key);

        let mut guard = self.shared.state.lock();
        let state = &mut *guard;
        if !state.mounted {
            return None;
        }

        state.inherited = parent.current();

        match config.as_ref() {
            Some(config) if changed => self.shared.begin(state, config.clone(), cache_key),
            None if changed => self.shared.release(state),
            _ => {}
        }

        // Until an owned client is installed the parent's stays in effect.
        if state.owned.is_none() {
            state.resolved.clone_from(&state.inherited);
        }

        self.shared.publish(state);
        state.resolved.clone()
    }

    /// Requests a fresh client for the current configuration.
    ///
    /// Has no effect without a configuration. Subject to the failure cooldown.
    pub fn invalidate(&self) {
        let mut state = self.shared.state.lock();
        if !state.mounted {
            return;
        }

        if let Some(config) = state.config.clone() {
            let cache_key = state.cache_key.clone();
            self.shared.begin(&mut state, config, cache_key);
        }
    }

    /// The client currently in effect.
    #[must_use]
    pub fn current(&self) -> Option<Arc<C>> {
        self.shared.state.lock().resolved.clone()
    }

    /// A context that follows the resolved client, for descendants.
    #[must_use]
    pub fn context(&self) -> ClientContext<C> {
        self.shared.publisher.context()
    }

    /// Whether a construction attempt is in flight.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(*self.shared.status.borrow(), Resolution::Pending)
    }

    /// Waits for the latest construction attempt to complete.
    ///
    /// # Errors
    ///
    /// Returns the construction error of the latest attempt, a cooldown
    /// refusal, or [`Error::Unmounted`].
    pub async fn settled(&self) -> Result<Option<Arc<C>>, Error<C::Error>> {
        let mut status = self.shared.status.subscribe();
        let resolution = status
            .wait_for(|resolution| !matches!(resolution, Resolution::Pending))
            .await
            .map_err(|_| Error::Unmounted)?
            .clone();

        match resolution {
            Resolution::Settled(Ok(())) => Ok(self.current()),
            Resolution::Settled(Err(err)) => Err(err),
            Resolution::Pending => Err(Error::Unmounted),
        }
    }

    /// Destroys the owned client and waits for every background task,
    /// including pending constructions, to finish.
    pub async fn unmount(&mut self) {
        let retired = {
            let mut state = self.shared.state.lock();
            if state.mounted {
                state.mounted = false;
                state.attempt += 1;
                state.stop_watching();
                state.resolved = None;
                self.shared.publish(&state);
                state.owned.take()
            } else {
                None
            }
        };
        self.shared.settle(Err(Error::Unmounted));

        if let Some(client) = retired {
            client.destroy().await;
            debug!("Destroyed owned client on unmount");
        }

        self.shared.tasks.close();
        self.shared.tasks.wait().await;
    }
}
