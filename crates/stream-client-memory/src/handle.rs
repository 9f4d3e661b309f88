use crate::message::StreamMessage;

use std::collections::VecDeque;
use std::fmt::{self, Debug};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tether_stream_client::{HandleListener, ListenerId, MessageError};

type Listener = Arc<dyn HandleListener<StreamMessage>>;

#[derive(Clone, Debug)]
pub enum HandleEvent {
    Message(StreamMessage),
    Error(MessageError<StreamMessage>),
    Finished,
}

#[derive(Default)]
struct HandleState {
    listeners: Vec<(ListenerId, Listener)>,
    backlog: VecDeque<HandleEvent>,
    next_listener: u64,
    closed: bool,
}

/// Event fan-out shared by subscription and resend handles.
///
/// Events dispatched before any listener is attached are kept in a backlog
/// and replayed, in order, to the first listener.
#[derive(Default)]
pub struct HandleCore {
    state: Mutex<HandleState>,
    finished: AtomicBool,
}

impl Debug for HandleCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("HandleCore")
            .field("listeners", &state.listeners.len())
            .field("backlog", &state.backlog.len())
            .field("closed", &state.closed)
            .field("finished", &self.finished.load(Ordering::SeqCst))
            .finish()
    }
}

impl HandleCore {
    pub fn dispatch(&self, event: HandleEvent) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }

        if matches!(event, HandleEvent::Finished) {
            self.finished.store(true, Ordering::SeqCst);
        }

        if state.listeners.is_empty() {
            state.backlog.push_back(event);
            return;
        }

        // Delivered under the lock so concurrent dispatches keep their order.
        for (_, listener) in &state.listeners {
            deliver(listener.as_ref(), event.clone());
        }
    }

    pub fn listen(&self, listener: Listener) -> ListenerId {
        let mut state = self.state.lock();
        let id = ListenerId::new(state.next_listener);
        state.next_listener += 1;

        if !state.closed && state.listeners.is_empty() {
            for event in state.backlog.drain(..) {
                deliver(listener.as_ref(), event);
            }
        }

        state.listeners.push((id, listener));
        id
    }

    pub fn unlisten(&self, id: ListenerId) {
        self.state
            .lock()
            .listeners
            .retain(|(listener_id, _)| *listener_id != id);
    }

    /// Drops all listeners and buffered events; later dispatches are ignored.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.listeners.clear();
        state.backlog.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn listener_count(&self) -> usize {
        self.state.lock().listeners.len()
    }
}

fn deliver(listener: &dyn HandleListener<StreamMessage>, event: HandleEvent) {
    match event {
        HandleEvent::Message(message) => listener.on_message(message),
        HandleEvent::Error(error) => listener.on_error(error),
        HandleEvent::Finished => listener.on_finished(),
    }
}
