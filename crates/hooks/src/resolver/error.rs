use std::fmt::{Debug, Display};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while resolving a client.
#[derive(Debug, Error)]
pub enum Error<E>
where
    E: Debug + Display,
{
    /// Constructing the client failed.
    #[error("Failed to construct client: {0}")]
    Construction(Arc<E>),

    /// The configuration failed recently and may not be retried yet.
    #[error("Client construction is cooling down for another {remaining:?}")]
    CoolingDown {
        /// Time left until the next attempt is allowed.
        remaining: Duration,
    },

    /// The resolver was unmounted.
    #[error("Resolver was unmounted")]
    Unmounted,
}

impl<E> Clone for Error<E>
where
    E: Debug + Display,
{
    fn clone(&self) -> Self {
        match self {
            Self::Construction(err) => Self::Construction(Arc::clone(err)),
            Self::CoolingDown { remaining } => Self::CoolingDown {
                remaining: *remaining,
            },
            Self::Unmounted => Self::Unmounted,
        }
    }
}
