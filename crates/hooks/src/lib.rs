//! Lifecycle bindings between long-lived components and real-time stream
//! clients: scoped client contexts, client resolution, and subscribe/resend
//! hooks that keep at most one flow in line with their inputs.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Keys that force a fresh client or a restarted flow.
pub mod cache_key;

/// Swappable callback sets read at invocation time.
pub mod callbacks;

/// Scoped client contexts.
pub mod context;

/// Cancellable pull-based flows over subscriptions and resends.
pub mod flow;

/// Subscribe and resend hooks.
pub mod hooks;

/// Memoization of structurally equal values.
pub mod opts;

/// Providers scoping a client to a subtree.
pub mod provider;

/// Resolution and ownership of clients.
pub mod resolver;

pub use cache_key::CacheKey;
pub use callbacks::{CallbackCell, Callbacks};
pub use context::ClientContext;
pub use flow::{Flow, FlowAbortHandle, FlowOptions, FlowState};
pub use hooks::{HookOptions, ResendHook, ResendHookOptions, SubscribeHook, SubscribeOptions};
pub use opts::Opts;
pub use provider::{ClientProvider, ProviderSource};
pub use resolver::{ClientResolver, Error as ResolveError, ResolverOptions};
