//! Large-message proxy: the actor that carries oversized payloads for its
//! parent.
//!
//! Every actor that sends or receives large payloads has one proxy child
//! named `large-message-proxy`. The same actor plays both roles: it streams
//! out what its parent hands it as a [`LargeMessage`], and it reassembles
//! what remote proxies stream in, delivering the result to its parent as if
//! the original sender had sent it directly.

use std::time::Duration;

use async_trait::async_trait;

use hashfall_core::config::LargeMessageConfig;
use hashfall_core::protocol::{
    Ack, ChunkEnvelope, StreamCompleted, StreamFailure, DEFAULT_CHUNK_SIZE, DEFAULT_WINDOW, PROXY_NAME,
};
use hashfall_core::{ActorPath, AnyPayload, Payload};

use crate::metrics::ProxyMetrics;
use crate::receiver::ReceiverRole;
use crate::resolver::RetryPolicy;
use crate::sender::{Prepared, SenderRole};
use crate::system::{Actor, ActorSystem, Context, Envelope, SendError, SpawnError};

/// Request to move `payload` to `receiver` through the proxies. Handed to the
/// local proxy only; never serialized itself.
pub struct LargeMessage {
    payload: Box<dyn AnyPayload>,
    receiver: ActorPath,
}

impl LargeMessage {
    pub fn new<P: Payload>(payload: P, receiver: ActorPath) -> Self {
        Self::from_boxed(Box::new(payload), receiver)
    }

    pub fn from_boxed(payload: Box<dyn AnyPayload>, receiver: ActorPath) -> Self {
        Self { payload, receiver }
    }

    pub fn receiver(&self) -> &ActorPath {
        &self.receiver
    }
}

impl std::fmt::Debug for LargeMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LargeMessage")
            .field("manifest", &self.payload.manifest())
            .field("receiver", &self.receiver)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProxySettings {
    pub chunk_size: usize,
    pub window: usize,
    pub resolve_timeout: Duration,
    pub retry: RetryPolicy,
    pub idle_timeout: Duration,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            window: DEFAULT_WINDOW,
            resolve_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

impl From<&LargeMessageConfig> for ProxySettings {
    fn from(config: &LargeMessageConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            window: config.window,
            resolve_timeout: config.resolve_timeout(),
            retry: RetryPolicy {
                attempts: config.resolve_attempts,
                initial_backoff: config.resolve_backoff(),
            },
            idle_timeout: config.idle_timeout(),
        }
    }
}

/// Smallest idle window a proxy accepts; anything shorter would expire
/// sessions between two consecutive chunks.
pub const MIN_IDLE_TIMEOUT: Duration = Duration::from_millis(100);

/// Smallest resolution deadline a proxy accepts.
pub const MIN_RESOLVE_TIMEOUT: Duration = Duration::from_millis(10);

impl ProxySettings {
    /// Raise degenerate values to their usable minimum. A zero chunk size or
    /// window would panic the session, a zero timeout would fail it at once.
    pub fn normalized(self) -> Self {
        Self {
            chunk_size: self.chunk_size.max(1),
            window: self.window.max(1),
            resolve_timeout: self.resolve_timeout.max(MIN_RESOLVE_TIMEOUT),
            retry: RetryPolicy {
                attempts: self.retry.attempts.max(1),
                ..self.retry
            },
            idle_timeout: self.idle_timeout.max(MIN_IDLE_TIMEOUT),
        }
    }

    /// How often idle sessions are swept.
    fn sweep_interval(&self) -> Duration {
        (self.idle_timeout / 4).max(Duration::from_millis(10))
    }
}

/// Periodic nudge so idle sessions expire even when no traffic arrives.
struct Sweep;

pub struct LargeMessageProxy {
    settings: ProxySettings,
    metrics: ProxyMetrics,
    outbound: SenderRole,
    inbound: ReceiverRole,
}

impl LargeMessageProxy {
    pub fn new(settings: ProxySettings) -> Self {
        let normalized = settings.clone().normalized();
        if normalized != settings {
            tracing::warn!(?settings, ?normalized, "proxy settings raised to their minimum");
        }
        Self {
            settings: normalized,
            metrics: ProxyMetrics::new(),
            outbound: SenderRole::default(),
            inbound: ReceiverRole::default(),
        }
    }

    /// Handle on this proxy's counters; stays valid after the proxy is
    /// spawned.
    pub fn metrics(&self) -> ProxyMetrics {
        self.metrics.clone()
    }

    async fn sweep(&mut self, ctx: &Context) {
        self.outbound.expire_idle(ctx, &self.metrics, &self.settings).await;
        self.inbound.expire_idle(ctx, &self.metrics, &self.settings).await;
    }
}

#[async_trait]
impl Actor for LargeMessageProxy {
    async fn started(&mut self, ctx: &mut Context) {
        let system = ctx.system().clone();
        let myself = ctx.myself().clone();
        let every = self.settings.sweep_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if system.tell_local(&myself, None, Sweep).is_err() {
                    return;
                }
            }
        });
        tracing::debug!(proxy = %ctx.myself(), "large-message proxy started");
    }

    async fn handle(&mut self, ctx: &mut Context, envelope: Envelope) {
        let envelope = match envelope.take::<Sweep>() {
            Ok(_) => return self.sweep(ctx).await,
            Err(envelope) => envelope,
        };
        self.sweep(ctx).await;

        let envelope = match envelope.take::<LargeMessage>() {
            Ok((sender, request)) => {
                tracing::debug!(?request, "large message requested");
                return self.outbound.prepare(
                    ctx,
                    &self.settings,
                    sender,
                    request.receiver,
                    request.payload,
                );
            }
            Err(envelope) => envelope,
        };
        let envelope = match envelope.take::<Prepared>() {
            Ok((_, prepared)) => {
                return self
                    .outbound
                    .on_prepared(ctx, &self.settings, &self.metrics, prepared)
                    .await;
            }
            Err(envelope) => envelope,
        };
        let envelope = match envelope.take::<ChunkEnvelope>() {
            Ok((sender, chunk)) => return self.inbound.on_chunk(ctx, &self.metrics, sender, chunk).await,
            Err(envelope) => envelope,
        };
        let envelope = match envelope.take::<Ack>() {
            Ok((_, ack)) => return self.outbound.on_ack(ctx, &self.metrics, ack).await,
            Err(envelope) => envelope,
        };
        let envelope = match envelope.take::<StreamCompleted>() {
            Ok((_, done)) => return self.outbound.on_completed(ctx, &self.metrics, done).await,
            Err(envelope) => envelope,
        };
        match envelope.take::<StreamFailure>() {
            Ok((_, failure)) => {
                if !self.outbound.on_failure(&self.metrics, &failure)
                    && !self.inbound.on_failure(&self.metrics, &failure)
                {
                    tracing::debug!(session_id = %failure.session_id, "failure for unknown session");
                }
            }
            Err(envelope) => {
                tracing::warn!(proxy = %ctx.myself(), ?envelope, "unexpected message");
            }
        }
    }

    async fn stopped(&mut self, ctx: &mut Context) {
        tracing::debug!(
            proxy = %ctx.myself(),
            outbound = self.outbound.open_sessions(),
            inbound = self.inbound.live_sessions(),
            "large-message proxy stopped"
        );
    }
}

/// Spawn a proxy under `owner` and return its counters.
pub fn attach_proxy(
    system: &ActorSystem,
    owner: &ActorPath,
    settings: ProxySettings,
) -> Result<ProxyMetrics, SpawnError> {
    let proxy = LargeMessageProxy::new(settings);
    let metrics = proxy.metrics();
    system.spawn_at(owner.child(PROXY_NAME), proxy)?;
    Ok(metrics)
}

impl Context {
    /// Spawn this actor's proxy.
    pub fn attach_proxy(&self, settings: ProxySettings) -> Result<ProxyMetrics, SpawnError> {
        attach_proxy(self.system(), self.myself(), settings)
    }

    /// Send `payload` to `receiver` through this actor's proxy. The receiver
    /// sees this actor as the sender.
    pub fn send_large<P: Payload>(&self, receiver: &ActorPath, payload: P) -> Result<(), SendError> {
        self.system().send_large(self.myself(), receiver, payload)
    }
}

impl ActorSystem {
    /// Send `payload` from `from` to `receiver` through `from`'s proxy.
    pub fn send_large<P: Payload>(
        &self,
        from: &ActorPath,
        receiver: &ActorPath,
        payload: P,
    ) -> Result<(), SendError> {
        self.tell_local(
            &from.child(PROXY_NAME),
            Some(from.clone()),
            LargeMessage::new(payload, receiver.clone()),
        )
    }
}
