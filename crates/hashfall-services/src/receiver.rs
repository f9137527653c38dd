//! Receiving role of the large-message proxy.
//!
//! Owns every reassembly buffer on this proxy. Sessions are keyed by id and
//! share nothing; a session that finishes (either way) is kept as a closed
//! entry until it goes idle, so late or duplicated chunks cannot reopen it.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::time::Instant;
use uuid::Uuid;

use hashfall_core::protocol::{Ack, ChunkEnvelope, FailureKind, StreamCompleted, StreamFailure};
use hashfall_core::ActorPath;

use crate::error::StreamError;
use crate::metrics::ProxyMetrics;
use crate::proxy::ProxySettings;
use crate::stream::{Accepted, InboundStream, ReceiveState, Route, SequencingError};
use crate::system::Context;

struct Inbound {
    stream: InboundStream,
    /// The sending proxy; acks and outcomes go here.
    reply_to: ActorPath,
}

impl Inbound {
    fn is_live(&self) -> bool {
        matches!(
            self.stream.state(),
            ReceiveState::AwaitingFirstChunk | ReceiveState::Buffering
        )
    }
}

#[derive(Default)]
pub(crate) struct ReceiverRole {
    sessions: HashMap<Uuid, Inbound>,
}

impl ReceiverRole {
    pub fn live_sessions(&self) -> usize {
        self.sessions.values().filter(|s| s.is_live()).count()
    }

    pub async fn on_chunk(
        &mut self,
        ctx: &Context,
        metrics: &ProxyMetrics,
        reply_to: Option<ActorPath>,
        chunk: ChunkEnvelope,
    ) {
        let session_id = chunk.session_id;
        let Some(reply_to) = reply_to else {
            tracing::warn!(%session_id, "chunk without a sending proxy, dropping");
            return;
        };
        metrics.chunk_received();

        if !self.sessions.contains_key(&session_id) {
            let route = Route {
                original_sender: chunk.original_sender.clone(),
                original_receiver: chunk.original_receiver.clone(),
            };
            if !route.original_receiver.is_local_to(ctx.system().address()) {
                tracing::warn!(
                    %session_id,
                    receiver = %route.original_receiver,
                    "chunk for a receiver on another node"
                );
                // Closed entry so the rest of the session is dropped quietly.
                let mut stream = InboundStream::new(session_id, route);
                stream.fail();
                self.sessions.insert(session_id, Inbound { stream, reply_to: reply_to.clone() });
                metrics.session_failed();
                let error = StreamError::from(SequencingError::RouteMismatch);
                notify_failure(ctx, &reply_to, session_id, &error).await;
                return;
            }

            tracing::debug!(%session_id, receiver = %route.original_receiver, "inbound session opened");
            metrics.session_opened();
            self.sessions.insert(
                session_id,
                Inbound {
                    stream: InboundStream::new(session_id, route),
                    reply_to: reply_to.clone(),
                },
            );
        }

        let Some(session) = self.sessions.get_mut(&session_id) else {
            return;
        };
        let sequence = chunk.sequence;
        match session.stream.accept(chunk) {
            Ok(Accepted::Buffered) => {
                if let Err(e) = ctx.tell(&reply_to, Ack { session_id }).await {
                    self.fail(ctx, metrics, session_id, StreamError::from(e)).await;
                }
            }
            Ok(Accepted::Completed(image)) => {
                if let Err(e) = ctx.tell(&reply_to, Ack { session_id }).await {
                    self.fail(ctx, metrics, session_id, StreamError::from(e)).await;
                    return;
                }
                self.complete(ctx, metrics, session_id, image).await;
            }
            Err(SequencingError::Closed) => {
                tracing::debug!(%session_id, sequence, "chunk for closed session, dropping");
            }
            Err(e) => {
                self.fail(ctx, metrics, session_id, StreamError::from(e)).await;
            }
        }
    }

    async fn complete(&mut self, ctx: &Context, metrics: &ProxyMetrics, session_id: Uuid, image: Bytes) {
        let Some(session) = self.sessions.get(&session_id) else {
            return;
        };
        let route = session.stream.route().clone();
        let reply_to = session.reply_to.clone();

        let payload = match ctx.system().codec().decode(&image) {
            Ok(payload) => payload,
            Err(e) => {
                self.fail(ctx, metrics, session_id, StreamError::from(e)).await;
                return;
            }
        };
        let manifest = payload.manifest();

        if let Err(e) = ctx
            .system()
            .deliver_payload(&route.original_receiver, route.original_sender.clone(), payload)
        {
            self.fail(ctx, metrics, session_id, StreamError::Delivery(e)).await;
            return;
        }

        metrics.payload_delivered();
        metrics.session_completed();
        tracing::info!(
            %session_id,
            receiver = %route.original_receiver,
            manifest,
            bytes = image.len(),
            "large message delivered"
        );
        if let Err(e) = ctx.tell(&reply_to, StreamCompleted { session_id }).await {
            tracing::debug!(%session_id, error = %e, "could not confirm completion");
        }
    }

    /// Fail a live session: drop its buffer, count it, tell the sender.
    async fn fail(&mut self, ctx: &Context, metrics: &ProxyMetrics, session_id: Uuid, error: StreamError) {
        let Some(session) = self.sessions.get_mut(&session_id) else {
            return;
        };
        session.stream.fail();
        let reply_to = session.reply_to.clone();
        metrics.session_failed();
        tracing::warn!(
            %session_id,
            sender = ?session.stream.route().original_sender,
            kind = ?error.kind(),
            error = %error,
            "inbound session failed"
        );
        notify_failure(ctx, &reply_to, session_id, &error).await;
    }

    /// The sending side gave up. Returns false if the session is unknown.
    pub fn on_failure(&mut self, metrics: &ProxyMetrics, failure: &StreamFailure) -> bool {
        let Some(session) = self.sessions.get_mut(&failure.session_id) else {
            return false;
        };
        if session.is_live() {
            session.stream.fail();
            metrics.session_failed();
            tracing::warn!(
                session_id = %failure.session_id,
                kind = ?failure.kind,
                cause = %failure.cause,
                "sender aborted session"
            );
        }
        true
    }

    /// Expire idle sessions. Live ones are failed with a timeout notice;
    /// closed ones are simply forgotten.
    pub async fn expire_idle(&mut self, ctx: &Context, metrics: &ProxyMetrics, settings: &ProxySettings) {
        let now = Instant::now();
        let idle: Vec<Uuid> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.stream.is_idle(now, settings.idle_timeout))
            .map(|(id, _)| *id)
            .collect();

        for session_id in idle {
            let live = self.sessions.get(&session_id).is_some_and(Inbound::is_live);
            if live {
                self.fail(ctx, metrics, session_id, StreamError::IdleTimeout(settings.idle_timeout))
                    .await;
            }
            self.sessions.remove(&session_id);
        }
    }
}

async fn notify_failure(ctx: &Context, reply_to: &ActorPath, session_id: Uuid, error: &StreamError) {
    let kind: FailureKind = error.kind();
    let notice = StreamFailure {
        session_id,
        kind,
        cause: error.to_string(),
    };
    if let Err(e) = ctx.tell(reply_to, notice).await {
        tracing::debug!(%session_id, error = %e, "could not report failure to sender");
    }
}
