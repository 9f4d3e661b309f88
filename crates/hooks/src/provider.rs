use crate::cache_key::CacheKey;
use crate::context::ClientContext;
use crate::resolver::{ClientResolver, Error, ResolverOptions};

use std::fmt::{self, Debug};
use std::sync::Arc;

use tether_stream_client::StreamClient;

/// Where a provider gets the client it exposes to its descendants.
pub enum ProviderSource<C: StreamClient> {
    /// Pass the parent's client through.
    Inherit,

    /// Create and own a client from this configuration.
    Config(C::Config),

    /// Expose a client created elsewhere. It is never destroyed by the provider.
    Client(Arc<C>),
}

impl<C: StreamClient> Clone for ProviderSource<C> {
    fn clone(&self) -> Self {
        match self {
            Self::Inherit => Self::Inherit,
            Self::Config(config) => Self::Config(config.clone()),
            Self::Client(client) => Self::Client(Arc::clone(client)),
        }
    }
}

impl<C: StreamClient> Debug for ProviderSource<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inherit => write!(f, "Inherit"),
            Self::Config(config) => f.debug_tuple("Config").field(config).finish(),
            Self::Client(client) => f.debug_tuple("Client").field(client).finish(),
        }
    }
}

/// Scopes a client to a subtree.
///
/// Descendants read the client from [`context`](Self::context) and are only
/// notified when the client instance changes, not on every render.
#[derive(Debug)]
pub struct ClientProvider<C: StreamClient> {
    resolver: ClientResolver<C>,
}

impl<C: StreamClient> Default for ClientProvider<C> {
    fn default() -> Self {
        Self::new(ResolverOptions::default())
    }
}

impl<C: StreamClient> ClientProvider<C> {
    /// Creates a mounted provider.
    #[must_use]
    pub fn new(options: ResolverOptions) -> Self {
        Self {
            resolver: ClientResolver::new(options),
        }
    }

    /// Renders the provider below `parent` and returns the context for its
    /// descendants.
    ///
    /// Must be called within a Tokio runtime.
    pub fn render(
        &mut self,
        parent: &ClientContext<C>,
        source: ProviderSource<C>,
        cache_key: Option<CacheKey>,
    ) -> ClientContext<C> {
        match source {
            ProviderSource::Inherit => {
                self.resolver.resolve(parent, None, cache_key);
            }
            ProviderSource::Config(config) => {
                self.resolver.resolve(parent, Some(config), cache_key);
            }
            ProviderSource::Client(client) => {
                self.resolver
                    .resolve(&ClientContext::with_client(client), None, cache_key);
            }
        }

        self.resolver.context()
    }

    /// The context exposed to descendants.
    #[must_use]
    pub fn context(&self) -> ClientContext<C> {
        self.resolver.context()
    }

    /// The client currently exposed to descendants.
    #[must_use]
    pub fn current(&self) -> Option<Arc<C>> {
        self.resolver.current()
    }

    /// Waits for a pending client construction to complete.
    ///
    /// # Errors
    ///
    /// See [`ClientResolver::settled`].
    pub async fn settled(&self) -> Result<Option<Arc<C>>, Error<C::Error>> {
        self.resolver.settled().await
    }

    /// Requests a fresh client for the current configuration.
    pub fn invalidate(&self) {
        self.resolver.invalidate();
    }

    /// Destroys the client the provider owns, if any.
    pub async fn unmount(&mut self) {
        self.resolver.unmount().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tether_stream_client_memory::{MemoryClient, MemoryClientConfig};
    use tokio::time::timeout;

    fn unique_endpoint() -> String {
        format!("memory-{}", uuid::Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_inherit_passes_parent_client_through() {
        let mut outer = ClientProvider::<MemoryClient>::default();
        let mut inner = ClientProvider::<MemoryClient>::default();

        let root = ClientContext::empty();
        let outer_context = outer.render(
            &root,
            ProviderSource::Config(MemoryClientConfig::new(unique_endpoint())),
            None,
        );
        let client = timeout(Duration::from_secs(1), outer.settled())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let inner_context = inner.render(&outer_context, ProviderSource::Inherit, None);

        assert!(Arc::ptr_eq(&client, &inner_context.current().unwrap()));

        inner.unmount().await;
        assert!(!client.is_destroyed());
        outer.unmount().await;
        assert_eq!(client.destroy_calls(), 1);
    }

    #[tokio::test]
    async fn test_prebuilt_client_is_borrowed() {
        let client = Arc::new(
            MemoryClient::connect(MemoryClientConfig::new(unique_endpoint()))
                .await
                .unwrap(),
        );
        let mut provider = ClientProvider::<MemoryClient>::default();

        let context = provider.render(
            &ClientContext::empty(),
            ProviderSource::Client(Arc::clone(&client)),
            None,
        );
        assert!(Arc::ptr_eq(&client, &context.current().unwrap()));

        provider.unmount().await;
        assert_eq!(client.destroy_calls(), 0);
    }

    #[tokio::test]
    async fn test_descendants_are_not_woken_by_equal_rerender() {
        let endpoint = unique_endpoint();
        let mut provider = ClientProvider::<MemoryClient>::default();
        let root = ClientContext::empty();

        let mut context = provider.render(
            &root,
            ProviderSource::Config(MemoryClientConfig::new(&endpoint)),
            None,
        );
        assert!(context.changed().await);

        provider.render(
            &root,
            ProviderSource::Config(MemoryClientConfig::new(&endpoint)),
            None,
        );
        assert!(
            timeout(Duration::from_millis(50), context.changed())
                .await
                .is_err()
        );

        provider.unmount().await;
    }
}
