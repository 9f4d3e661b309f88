use super::forwarder::Forwarder;
use super::{FlowOptions, Shared};

use std::sync::Arc;

use tether_stream_client::{
    ClientEvent, ResendHandle, ResendOptions, StreamClient, StreamDefinition, SubscribeParams,
    SubscriptionHandle,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Why a running flow stopped.
enum Ending {
    Aborted,
    Finished,
    Destroyed,
}

fn forwarder<M>(shared: &Shared<M>, finished: &CancellationToken) -> Arc<Forwarder<M>> {
    Arc::new(Forwarder {
        gate: Arc::clone(&shared.gate),
        abort: shared.abort.clone(),
        finished: finished.clone(),
    })
}

/// Waits until the flow is aborted, the handle finishes, or the client goes away.
async fn wait_for_ending(
    abort: &CancellationToken,
    finished: &CancellationToken,
    events: &mut broadcast::Receiver<ClientEvent>,
) -> Ending {
    loop {
        tokio::select! {
            biased;
            () = abort.cancelled() => return Ending::Aborted,
            () = finished.cancelled() => return Ending::Finished,
            event = events.recv() => match event {
                Ok(ClientEvent::Destroyed) | Err(RecvError::Closed) => return Ending::Destroyed,
                Ok(_) | Err(RecvError::Lagged(_)) => {}
            },
        }
    }
}

pub async fn subscription<C>(
    client: Arc<C>,
    params: SubscribeParams,
    options: FlowOptions<C::Message, C::Error>,
    shared: Arc<Shared<C::Message>>,
) where
    C: StreamClient,
{
    let _released = shared.released.clone().drop_guard();

    if shared.is_aborted() || client.is_destroyed() {
        debug!("Not subscribing to {}: flow ended before start", params.stream);
        shared.close();
        return;
    }

    let mut events = client.events();
    let stream = params.stream.clone();

    let subscription = match client.subscribe(params).await {
        Ok(subscription) => subscription,
        Err(err) => {
            if !shared.is_aborted() {
                options.callbacks.error(&err);
            }
            shared.close();
            return;
        }
    };

    if shared.is_aborted() {
        debug!("Flow for {} aborted while subscribing, releasing", stream);
        if let Err(err) = client.unsubscribe(&subscription).await {
            warn!("Failed to unsubscribe from {}: {}", stream, err);
        }
        shared.close();
        return;
    }

    let finished = CancellationToken::new();
    let listener = subscription.listen(forwarder(&shared, &finished));
    shared.mark_running();
    options.callbacks.subscribed();
    debug!("Flow subscribed to {}", stream);

    let ending = wait_for_ending(&shared.abort, &finished, &mut events).await;

    subscription.unlisten(listener);
    if matches!(ending, Ending::Destroyed) || client.is_destroyed() {
        debug!("Client destroyed, closing flow for {}", stream);
    } else if let Err(err) = client.unsubscribe(&subscription).await {
        warn!("Failed to unsubscribe from {}: {}", stream, err);
    }
    options.callbacks.unsubscribed();
    debug!("Flow released subscription to {}", stream);

    shared.close();
}

pub async fn resend<C>(
    client: Arc<C>,
    stream: StreamDefinition,
    resend_options: ResendOptions,
    options: FlowOptions<C::Message, C::Error>,
    shared: Arc<Shared<C::Message>>,
) where
    C: StreamClient,
{
    let _released = shared.released.clone().drop_guard();

    if shared.is_aborted() || client.is_destroyed() {
        debug!("Not resending {}: flow ended before start", stream);
        shared.close();
        return;
    }

    let mut events = client.events();

    let resend = match client.resend(stream.clone(), resend_options).await {
        Ok(resend) => resend,
        Err(err) => {
            if !shared.is_aborted() {
                options.callbacks.error(&err);
            }
            shared.close();
            return;
        }
    };

    if shared.is_aborted() {
        debug!("Flow for {} aborted while resending, releasing", stream);
        resend.cancel().await;
        shared.close();
        return;
    }

    let finished = CancellationToken::new();
    let listener = resend.listen(forwarder(&shared, &finished));
    shared.mark_running();
    options.callbacks.subscribed();
    debug!("Flow resending {}", stream);

    let ending = wait_for_ending(&shared.abort, &finished, &mut events).await;
    if matches!(ending, Ending::Finished) {
        debug!("Resend of {} finished", stream);
    }

    resend.unlisten(listener);
    resend.cancel().await;
    options.callbacks.unsubscribed();
    debug!("Flow released resend of {}", stream);

    shared.close();
}
