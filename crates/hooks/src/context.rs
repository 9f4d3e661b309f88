use std::fmt::{self, Debug};
use std::sync::Arc;

use tokio::sync::watch;

type Slot<C> = Option<Arc<C>>;

/// Whether two resolved clients are the same instance.
pub(crate) fn same_client<C>(a: Option<&Arc<C>>, b: Option<&Arc<C>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

/// The client visible to a subtree.
///
/// Cheap to clone. Passed explicitly from providers to the resolvers and hooks
/// below them; descendants observe a change only when the resolved client
/// instance changes.
pub struct ClientContext<C> {
    receiver: Option<watch::Receiver<Slot<C>>>,
}

impl<C> Clone for ClientContext<C> {
    fn clone(&self) -> Self {
        Self {
            receiver: self.receiver.clone(),
        }
    }
}

impl<C> Debug for ClientContext<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientContext")
            .field("has_client", &self.current().is_some())
            .finish()
    }
}

impl<C> Default for ClientContext<C> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<C> ClientContext<C> {
    /// A root context without a client.
    #[must_use]
    pub const fn empty() -> Self {
        Self { receiver: None }
    }

    /// A root context holding a client created elsewhere.
    #[must_use]
    pub fn with_client(client: Arc<C>) -> Self {
        let (_, receiver) = watch::channel(Some(client));
        Self {
            receiver: Some(receiver),
        }
    }

    /// The client currently in effect, if any.
    #[must_use]
    pub fn current(&self) -> Option<Arc<C>> {
        self.receiver
            .as_ref()
            .and_then(|receiver| receiver.borrow().clone())
    }

    /// Waits until a different client instance is published.
    ///
    /// Returns `false` once no further change can happen.
    pub async fn changed(&mut self) -> bool {
        match self.receiver.as_mut() {
            Some(receiver) => receiver.changed().await.is_ok(),
            None => false,
        }
    }

    /// Waits until the current client satisfies `predicate`.
    ///
    /// Returns `None` if the context stops changing without a match.
    pub async fn wait_for<F>(&mut self, mut predicate: F) -> Option<Arc<C>>
    where
        F: FnMut(&Arc<C>) -> bool,
    {
        let receiver = self.receiver.as_mut()?;
        let slot = receiver
            .wait_for(|slot| slot.as_ref().is_some_and(&mut predicate))
            .await
            .ok()?;
        slot.clone()
    }
}

/// The writing side of a [`ClientContext`].
pub(crate) struct ContextPublisher<C> {
    sender: watch::Sender<Slot<C>>,
}

impl<C> ContextPublisher<C> {
    pub(crate) fn new(initial: Slot<C>) -> Self {
        let (sender, _) = watch::channel(initial);
        Self { sender }
    }

    pub(crate) fn context(&self) -> ClientContext<C> {
        ClientContext {
            receiver: Some(self.sender.subscribe()),
        }
    }

    /// Publishes `client`; subscribers are only woken for a different instance.
    pub(crate) fn publish(&self, client: Slot<C>) -> bool {
        self.sender.send_if_modified(|slot| {
            if same_client(slot.as_ref(), client.as_ref()) {
                false
            } else {
                *slot = client;
                true
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::time::timeout;

    #[test]
    fn test_empty_context() {
        let context = ClientContext::<String>::empty();

        assert!(context.current().is_none());
    }

    #[tokio::test]
    async fn test_republishing_same_client_does_not_notify() {
        let client = Arc::new("client".to_string());
        let publisher = ContextPublisher::new(Some(Arc::clone(&client)));
        let mut context = publisher.context();

        assert!(!publisher.publish(Some(Arc::clone(&client))));
        assert!(
            timeout(Duration::from_millis(50), context.changed())
                .await
                .is_err()
        );

        let replacement = Arc::new("client".to_string());
        assert!(publisher.publish(Some(Arc::clone(&replacement))));
        assert!(context.changed().await);
        assert!(Arc::ptr_eq(&context.current().unwrap(), &replacement));
    }

    #[tokio::test]
    async fn test_wait_for_matching_client() {
        let publisher = ContextPublisher::new(None);
        let mut context = publisher.context();

        let waiter = tokio::spawn(async move { context.wait_for(|client| **client == 2).await });

        publisher.publish(Some(Arc::new(1)));
        publisher.publish(Some(Arc::new(2)));

        let found = timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.as_deref(), Some(&2));
    }
}
