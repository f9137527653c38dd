//! Discovery resolver: find the large-message proxy colocated with an actor.
//!
//! The proxy for actor `R` always lives at `R/large-message-proxy`. Local
//! targets are looked up in the mailbox registry; remote targets are asked
//! with an `Identify` round trip that must answer within the timeout. The
//! resolver makes exactly one attempt; callers own any retry.

use std::time::Duration;

use uuid::Uuid;

use hashfall_core::protocol::{Identify, PROXY_NAME};
use hashfall_core::ActorPath;

use crate::system::{ActorSystem, SendError};

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("no answer from {target} within {after:?}")]
    Timeout { target: ActorPath, after: Duration },

    #[error("no actor at {0}")]
    NotFound(ActorPath),

    #[error("could not reach {target}: {source}")]
    Transport {
        target: ActorPath,
        #[source]
        source: SendError,
    },
}

/// Bounded exponential backoff between resolution attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. At least 1.
    pub attempts: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            initial_backoff: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Pause before retry number `retry` (0 = before the second attempt).
    pub fn backoff(&self, retry: u32) -> Duration {
        self.initial_backoff.saturating_mul(1u32 << retry.min(16))
    }
}

#[derive(Clone)]
pub struct Resolver {
    system: ActorSystem,
}

impl Resolver {
    pub fn new(system: ActorSystem) -> Self {
        Self { system }
    }

    /// Path of the proxy serving `target`.
    pub fn proxy_of(target: &ActorPath) -> ActorPath {
        target.child(PROXY_NAME)
    }

    pub async fn resolve(&self, target: &ActorPath, timeout: Duration) -> Result<ActorPath, ResolveError> {
        let proxy = Self::proxy_of(target);

        if proxy.is_local_to(self.system.address()) {
            return if self.system.contains(&proxy) {
                Ok(proxy)
            } else {
                Err(ResolveError::NotFound(proxy))
            };
        }

        let correlation = Uuid::new_v4();
        let answer = self.system.await_identity(correlation);
        let sent = self
            .system
            .tell(&proxy, Some(self.system.resolver_path()), Identify { correlation })
            .await;
        if let Err(source) = sent {
            self.system.forget_identity(&correlation);
            return Err(ResolveError::Transport { target: proxy, source });
        }

        match tokio::time::timeout(timeout, answer).await {
            Ok(Ok(Some(found))) => {
                tracing::debug!(proxy = %found, "proxy resolved");
                Ok(found)
            }
            Ok(Ok(None)) => Err(ResolveError::NotFound(proxy)),
            // Waiter dropped: the system is shutting down.
            Ok(Err(_)) | Err(_) => {
                self.system.forget_identity(&correlation);
                Err(ResolveError::Timeout {
                    target: proxy,
                    after: timeout,
                })
            }
        }
    }
}
