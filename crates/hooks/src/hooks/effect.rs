use super::options::HookOptions;
use crate::cache_key::CacheKey;
use crate::callbacks::CallbackCell;
use crate::context::ClientContext;
use crate::flow::{Flow, FlowOptions};
use crate::opts::Opts;

use std::sync::Arc;

use tether_stream_client::{
    ClientEvent, ResendOptions, StreamClient, StreamDefinition, SubscribeParams,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

/// What a hook's flow reads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlowTarget {
    Subscribe(SubscribeParams),
    Resend {
        stream: StreamDefinition,
        options: ResendOptions,
    },
}

impl FlowTarget {
    fn open<C>(
        &self,
        client: &Arc<C>,
        options: FlowOptions<C::Message, C::Error>,
    ) -> Flow<C::Message>
    where
        C: StreamClient,
    {
        match self {
            Self::Subscribe(params) => {
                Flow::subscribe(Arc::clone(client), params.clone(), options)
            }
            Self::Resend {
                stream,
                options: resend,
            } => Flow::resend(Arc::clone(client), stream.clone(), resend.clone(), options),
        }
    }

    const fn resubscribes(&self) -> bool {
        matches!(self, Self::Subscribe(_))
    }
}

/// The inputs a running flow was started from.
struct Deps<C> {
    client: Arc<C>,
    target: Arc<FlowTarget>,
    ignore_undecoded_messages: bool,
    cache_key: Option<CacheKey>,
}

impl<C> Deps<C> {
    fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.client, &other.client)
            && Arc::ptr_eq(&self.target, &other.target)
            && self.ignore_undecoded_messages == other.ignore_undecoded_messages
            && self.cache_key == other.cache_key
    }
}

struct Run {
    stop: CancellationToken,
    done: CancellationToken,
}

enum Step<M> {
    Stop,
    Item(Option<M>),
    Event(Result<ClientEvent, RecvError>),
}

/// Keeps at most one flow in line with the inputs of the latest render.
pub struct Effect<C: StreamClient> {
    callbacks: CallbackCell<C::Message, C::Error>,
    target: Option<Opts<FlowTarget>>,
    deps: Option<Deps<C>>,
    run: Option<Run>,
    tasks: TaskTracker,
    mounted: bool,
}

impl<C: StreamClient> Effect<C> {
    pub fn new() -> Self {
        Self {
            callbacks: CallbackCell::default(),
            target: None,
            deps: None,
            run: None,
            tasks: TaskTracker::new(),
            mounted: true,
        }
    }

    /// Reconciles with this render's inputs. Restarts the flow only when a
    /// dependency changed; callbacks are swapped in place.
    pub fn render(
        &mut self,
        context: &ClientContext<C>,
        target: FlowTarget,
        options: HookOptions<C::Message, C::Error>,
    ) {
        if !self.mounted {
            return;
        }

        let HookOptions {
            cache_key,
            disabled,
            ignore_undecoded_messages,
            callbacks,
            ..
        } = options;

        self.callbacks.store(callbacks);
        let target = self.stabilize(target);

        let deps = context
            .current()
            .filter(|_| !disabled)
            .map(|client| Deps {
                client,
                target,
                ignore_undecoded_messages,
                cache_key,
            });

        let unchanged = match (&self.deps, &deps) {
            (Some(current), Some(next)) => current.same(next),
            (None, None) => true,
            _ => false,
        };
        if unchanged {
            return;
        }

        self.teardown();
        if let Some(deps) = &deps {
            self.start(deps);
        }
        self.deps = deps;
    }

    /// Whether a flow is currently running.
    pub fn is_active(&self) -> bool {
        self.run.as_ref().is_some_and(|run| !run.done.is_cancelled())
    }

    /// Stops the flow and waits until its handle has been released.
    pub async fn unmount(&mut self) {
        self.mounted = false;
        self.teardown();
        self.deps = None;
        self.tasks.close();
        self.tasks.wait().await;
    }

    fn stabilize(&mut self, target: FlowTarget) -> Arc<FlowTarget> {
        match &mut self.target {
            Some(opts) => opts.stabilize(target),
            None => {
                let opts = Opts::new(target);
                let current = opts.current();
                self.target = Some(opts);
                current
            }
        }
    }

    fn start(&mut self, deps: &Deps<C>) {
        let stop = CancellationToken::new();
        let done = CancellationToken::new();

        self.callbacks.before_start();

        let options = FlowOptions::new()
            .ignore_undecoded_messages(deps.ignore_undecoded_messages)
            .with_callbacks(self.callbacks.clone())
            .with_parent(stop.clone());
        let flow = deps.target.open(&deps.client, options.clone());
        let events = deps.target.resubscribes().then(|| deps.client.events());

        debug!("Started flow for {:?}", deps.target);

        self.tasks.spawn(drive(
            Arc::clone(&deps.client),
            Arc::clone(&deps.target),
            flow,
            events,
            options,
            stop.clone(),
            done.clone(),
        ));
        self.run = Some(Run { stop, done });
    }

    fn teardown(&mut self) {
        if let Some(run) = self.run.take() {
            run.stop.cancel();
        }
    }
}

impl<C: StreamClient> Drop for Effect<C> {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Pulls messages out of the flow until it ends or the hook stops it.
async fn drive<C>(
    client: Arc<C>,
    target: Arc<FlowTarget>,
    mut flow: Flow<C::Message>,
    mut events: Option<broadcast::Receiver<ClientEvent>>,
    options: FlowOptions<C::Message, C::Error>,
    stop: CancellationToken,
    done: CancellationToken,
) where
    C: StreamClient,
{
    let _done = done.drop_guard();

    loop {
        let step = tokio::select! {
            biased;
            () = stop.cancelled() => Step::Stop,
            item = flow.next() => Step::Item(item),
            event = next_event(events.as_mut()) => Step::Event(event),
        };

        match step {
            Step::Stop | Step::Item(None) => break,
            Step::Item(Some(message)) => {
                if stop.is_cancelled() {
                    break;
                }
                options.callbacks.message(message);
            }
            Step::Event(Ok(ClientEvent::Disconnected)) => {
                debug!("Client disconnected, resubscribing to {:?}", target);
                flow.abort().await;
                if stop.is_cancelled() {
                    break;
                }
                flow = target.open(&client, options.clone());
            }
            Step::Event(Err(RecvError::Closed)) => events = None,
            Step::Event(_) => {}
        }
    }

    flow.abort().await;
    options.callbacks.after_finish();
    debug!("Finished flow for {:?}", target);
}

async fn next_event(
    events: Option<&mut broadcast::Receiver<ClientEvent>>,
) -> Result<ClientEvent, RecvError> {
    match events {
        Some(events) => events.recv().await,
        None => std::future::pending().await,
    }
}
