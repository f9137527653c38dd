//! Sending role of the large-message proxy.
//!
//! A transfer request is prepared off the mailbox: resolution (with the
//! retry policy) and encoding run in a spawned task that posts a `Prepared`
//! back to the proxy. Only then is a session opened, so slow resolution
//! never holds up acks or chunks of other sessions.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::time::Instant;
use uuid::Uuid;

use hashfall_core::protocol::{Ack, StreamCompleted, StreamFailure};
use hashfall_core::{ActorPath, AnyPayload};

use crate::error::StreamError;
use crate::metrics::ProxyMetrics;
use crate::proxy::ProxySettings;
use crate::resolver::{ResolveError, Resolver, RetryPolicy};
use crate::stream::{OutboundStream, Route};
use crate::system::Context;

/// Result of preparing one transfer, posted back to the owning proxy.
pub(crate) struct Prepared {
    route: Route,
    outcome: Result<(ActorPath, Bytes), StreamError>,
}

#[derive(Default)]
pub(crate) struct SenderRole {
    sessions: HashMap<Uuid, OutboundStream>,
}

impl SenderRole {
    pub fn open_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Start preparing a transfer of `payload` to `receiver`.
    pub fn prepare(
        &self,
        ctx: &Context,
        settings: &ProxySettings,
        original_sender: Option<ActorPath>,
        receiver: ActorPath,
        payload: Box<dyn AnyPayload>,
    ) {
        let system = ctx.system().clone();
        let myself = ctx.myself().clone();
        let timeout = settings.resolve_timeout;
        let retry = settings.retry;

        tokio::spawn(async move {
            let resolver = Resolver::new(system.clone());
            let outcome = match resolve_with_retry(&resolver, &receiver, timeout, retry).await {
                Ok(peer) => system
                    .codec()
                    .encode(payload.as_ref())
                    .map(|image| (peer, image))
                    .map_err(StreamError::from),
                Err(e) => Err(StreamError::from(e)),
            };

            let prepared = Prepared {
                route: Route {
                    original_sender,
                    original_receiver: receiver,
                },
                outcome,
            };
            if system.tell_local(&myself, None, prepared).is_err() {
                tracing::debug!(proxy = %myself, "proxy stopped before transfer was prepared");
            }
        });
    }

    pub async fn on_prepared(
        &mut self,
        ctx: &Context,
        settings: &ProxySettings,
        metrics: &ProxyMetrics,
        prepared: Prepared,
    ) {
        let Prepared { route, outcome } = prepared;
        let (peer, image) = match outcome {
            Ok(ready) => ready,
            Err(e) => {
                match &e {
                    StreamError::Resolution(_) => metrics.resolution_failed(),
                    _ => metrics.encode_failed(),
                }
                tracing::warn!(
                    receiver = %route.original_receiver,
                    kind = ?e.kind(),
                    error = %e,
                    "large message dropped before a session was opened"
                );
                return;
            }
        };

        let session_id = Uuid::new_v4();
        let image_len = image.len();
        let stream = OutboundStream::new(session_id, image, settings.chunk_size, settings.window, route, peer);
        tracing::info!(
            %session_id,
            peer = %stream.peer(),
            bytes = image_len,
            chunks = stream.total_chunks(),
            "session opened"
        );
        metrics.session_opened();
        self.sessions.insert(session_id, stream);
        self.pump(ctx, metrics, session_id).await;
    }

    /// Emit as many chunks as the session's credit allows.
    async fn pump(&mut self, ctx: &Context, metrics: &ProxyMetrics, session_id: Uuid) {
        loop {
            let Some(stream) = self.sessions.get_mut(&session_id) else {
                return;
            };
            let Some(chunk) = stream.poll_ready() else {
                return;
            };
            let peer = stream.peer().clone();
            metrics.observe_in_flight(stream.in_flight());

            let sequence = chunk.sequence;
            if let Err(e) = ctx.tell(&peer, chunk).await {
                self.abort(ctx, metrics, session_id, StreamError::from(e)).await;
                return;
            }
            metrics.chunk_sent();
            tracing::trace!(%session_id, sequence, "chunk sent");
        }
    }

    pub async fn on_ack(&mut self, ctx: &Context, metrics: &ProxyMetrics, ack: Ack) {
        let Some(stream) = self.sessions.get_mut(&ack.session_id) else {
            tracing::debug!(session_id = %ack.session_id, "ack for unknown session");
            return;
        };
        metrics.ack_received();
        if let Err(e) = stream.acknowledge() {
            self.abort(ctx, metrics, ack.session_id, StreamError::from(e)).await;
            return;
        }
        self.pump(ctx, metrics, ack.session_id).await;
    }

    pub async fn on_completed(&mut self, ctx: &Context, metrics: &ProxyMetrics, done: StreamCompleted) {
        let Some(mut stream) = self.sessions.remove(&done.session_id) else {
            tracing::debug!(session_id = %done.session_id, "completion for unknown session");
            return;
        };
        match stream.complete() {
            Ok(()) => {
                metrics.session_completed();
                tracing::info!(
                    session_id = %done.session_id,
                    chunks = stream.total_chunks(),
                    "session completed"
                );
            }
            Err(e) => {
                self.sessions.insert(done.session_id, stream);
                self.abort(ctx, metrics, done.session_id, StreamError::from(e)).await;
            }
        }
    }

    /// Handle a failure reported by the peer. Returns false if the session
    /// is not ours.
    pub fn on_failure(&mut self, metrics: &ProxyMetrics, failure: &StreamFailure) -> bool {
        let Some(mut stream) = self.sessions.remove(&failure.session_id) else {
            return false;
        };
        stream.fail();
        metrics.session_failed();
        let error = StreamError::Remote {
            kind: failure.kind,
            cause: failure.cause.clone(),
        };
        tracing::warn!(
            session_id = %failure.session_id,
            receiver = %stream.route().original_receiver,
            kind = ?error.kind(),
            error = %error,
            "session failed"
        );
        true
    }

    /// Expire sessions that saw no activity within the idle timeout.
    pub async fn expire_idle(&mut self, ctx: &Context, metrics: &ProxyMetrics, settings: &ProxySettings) {
        let now = Instant::now();
        let idle: Vec<Uuid> = self
            .sessions
            .iter()
            .filter(|(_, stream)| stream.is_idle(now, settings.idle_timeout))
            .map(|(id, _)| *id)
            .collect();
        for session_id in idle {
            self.abort(ctx, metrics, session_id, StreamError::IdleTimeout(settings.idle_timeout))
                .await;
        }
    }

    /// Tear a session down locally and tell the peer, best effort.
    async fn abort(&mut self, ctx: &Context, metrics: &ProxyMetrics, session_id: Uuid, error: StreamError) {
        let Some(mut stream) = self.sessions.remove(&session_id) else {
            return;
        };
        stream.fail();
        metrics.session_failed();
        tracing::warn!(
            %session_id,
            peer = %stream.peer(),
            kind = ?error.kind(),
            error = %error,
            "session failed"
        );

        let notice = StreamFailure {
            session_id,
            kind: error.kind(),
            cause: error.to_string(),
        };
        if let Err(e) = ctx.tell(stream.peer(), notice).await {
            tracing::debug!(%session_id, error = %e, "could not notify peer of failure");
        }
    }
}

async fn resolve_with_retry(
    resolver: &Resolver,
    target: &ActorPath,
    timeout: std::time::Duration,
    retry: RetryPolicy,
) -> Result<ActorPath, ResolveError> {
    let attempts = retry.attempts.max(1);
    let mut attempt = 0;
    loop {
        match resolver.resolve(target, timeout).await {
            Ok(proxy) => return Ok(proxy),
            Err(e) if attempt + 1 < attempts => {
                let pause = retry.backoff(attempt);
                tracing::debug!(receiver = %target, attempt, ?pause, error = %e, "resolution failed, retrying");
                tokio::time::sleep(pause).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
