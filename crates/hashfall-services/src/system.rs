//! Actor system: mailboxes, sequential actor tasks, and message routing.
//!
//! Every actor owns one unbounded mailbox drained by one tokio task, so an
//! actor sees its messages strictly one at a time in arrival order and never
//! needs locks for its own state. Messages to local actors are handed over
//! as values; messages to actors on other nodes are encoded with the payload
//! codec, framed, and passed to the transport, which refuses frames above
//! the configured ceiling.
//!
//! The system answers `Identify` requests itself (no actor involved) so the
//! resolver can check whether a remote path is alive.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use hashfall_core::actor_path::is_valid_segment;
use hashfall_core::protocol::{ActorIdentity, Identify};
use hashfall_core::wire::{self, RemoteEnvelope, WireError};
use hashfall_core::{downcast, ActorPath, AnyPayload, EncodeError, NodeAddress, Payload, PayloadCodec};

use crate::transport::{InboundFrames, Transport, TransportError};

// ── Envelope ──────────────────────────────────────────────────────────────────

/// A message as seen by the receiving actor.
pub struct Envelope {
    pub sender: Option<ActorPath>,
    message: Box<dyn Any + Send>,
}

impl Envelope {
    pub fn new<M: Any + Send>(sender: Option<ActorPath>, message: M) -> Self {
        Self {
            sender,
            message: Box::new(message),
        }
    }

    pub fn from_boxed(sender: Option<ActorPath>, message: Box<dyn Any + Send>) -> Self {
        Self { sender, message }
    }

    pub fn is<M: Any>(&self) -> bool {
        self.message.is::<M>()
    }

    /// Take the message out as `M`, or give the envelope back untouched.
    pub fn take<M: Any>(self) -> Result<(Option<ActorPath>, M), Envelope> {
        match self.message.downcast::<M>() {
            Ok(message) => Ok((self.sender, *message)),
            Err(message) => Err(Envelope {
                sender: self.sender,
                message,
            }),
        }
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("sender", &self.sender)
            .finish_non_exhaustive()
    }
}

// ── Actor ─────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait Actor: Send + 'static {
    /// Runs once, before the first message.
    async fn started(&mut self, _ctx: &mut Context) {}

    async fn handle(&mut self, ctx: &mut Context, envelope: Envelope);

    /// Runs once after the mailbox is closed.
    async fn stopped(&mut self, _ctx: &mut Context) {}
}

/// Handed to an actor with every message.
pub struct Context {
    system: ActorSystem,
    myself: ActorPath,
}

impl Context {
    pub fn myself(&self) -> &ActorPath {
        &self.myself
    }

    pub fn system(&self) -> &ActorSystem {
        &self.system
    }

    /// Send a wire-capable message with this actor as sender.
    pub async fn tell<M: Payload>(&self, to: &ActorPath, message: M) -> Result<(), SendError> {
        self.system.tell(to, Some(self.myself.clone()), message).await
    }

    /// Send a message that only ever travels within this node.
    pub fn tell_local<M: Any + Send>(&self, to: &ActorPath, message: M) -> Result<(), SendError> {
        self.system.tell_local(to, Some(self.myself.clone()), message)
    }

    pub fn spawn_child<A: Actor>(&self, name: &str, actor: A) -> Result<ActorPath, SpawnError> {
        self.system.spawn_at(self.myself.child(name), actor)
    }

    /// Stop this actor and its children after the current message.
    pub fn stop(&self) {
        self.system.stop(&self.myself);
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("no actor at {0}")]
    NoSuchActor(ActorPath),

    #[error("{0} is not hosted on this node")]
    NotLocal(ActorPath),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("{0} is already taken")]
    NameTaken(ActorPath),

    #[error("invalid actor name {0:?}")]
    InvalidName(String),

    #[error("{0} belongs to another node")]
    NotLocal(ActorPath),
}

// ── System ────────────────────────────────────────────────────────────────────

enum Mail {
    Message(Envelope),
    Stop,
}

struct SystemInner {
    address: NodeAddress,
    codec: PayloadCodec,
    transport: Arc<dyn Transport>,
    mailboxes: DashMap<ActorPath, mpsc::UnboundedSender<Mail>>,
    identity_waiters: DashMap<Uuid, oneshot::Sender<Option<ActorPath>>>,
    shutdown: watch::Sender<bool>,
}

/// Handle to one node's actor system. Cheap to clone.
#[derive(Clone)]
pub struct ActorSystem {
    inner: Arc<SystemInner>,
}

impl ActorSystem {
    /// Start a system on a bound transport. The inbound frame pump runs
    /// until `shutdown`.
    pub fn start(codec: PayloadCodec, transport: Arc<dyn Transport>, inbound: InboundFrames) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let system = ActorSystem {
            inner: Arc::new(SystemInner {
                address: transport.local_address().clone(),
                codec,
                transport,
                mailboxes: DashMap::new(),
                identity_waiters: DashMap::new(),
                shutdown,
            }),
        };

        tracing::info!(node = %system.address(), "actor system started");
        tokio::spawn(system.clone().pump_inbound(inbound, shutdown_rx));
        system
    }

    pub fn address(&self) -> &NodeAddress {
        &self.inner.address
    }

    pub fn codec(&self) -> &PayloadCodec {
        &self.inner.codec
    }

    pub fn contains(&self, path: &ActorPath) -> bool {
        self.inner.mailboxes.contains_key(path)
    }

    pub fn actor_count(&self) -> usize {
        self.inner.mailboxes.len()
    }

    /// Spawn a top-level actor at `/user/<name>`.
    pub fn spawn<A: Actor>(&self, name: &str, actor: A) -> Result<ActorPath, SpawnError> {
        self.spawn_at(self.inner.address.user(name), actor)
    }

    pub fn spawn_at<A: Actor>(&self, path: ActorPath, mut actor: A) -> Result<ActorPath, SpawnError> {
        if !path.is_local_to(&self.inner.address) {
            return Err(SpawnError::NotLocal(path));
        }
        if let Some(bad) = path.segments().iter().find(|s| !is_valid_segment(s)) {
            return Err(SpawnError::InvalidName(bad.clone()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        match self.inner.mailboxes.entry(path.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => return Err(SpawnError::NameTaken(path)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(tx);
            }
        }

        let mut ctx = Context {
            system: self.clone(),
            myself: path.clone(),
        };
        let mut mailbox = MailboxGuard {
            rx,
            system: self.clone(),
            path: path.clone(),
        };
        tokio::spawn(async move {
            actor.started(&mut ctx).await;
            while let Some(mail) = mailbox.rx.recv().await {
                match mail {
                    Mail::Message(envelope) => actor.handle(&mut ctx, envelope).await,
                    Mail::Stop => break,
                }
            }
            actor.stopped(&mut ctx).await;
            tracing::debug!(actor = %ctx.myself, "actor stopped");
        });

        tracing::debug!(actor = %path, "actor spawned");
        Ok(path)
    }

    /// Stop an actor and everything below it in the path tree.
    pub fn stop(&self, path: &ActorPath) {
        let doomed: Vec<ActorPath> = self
            .inner
            .mailboxes
            .iter()
            .filter(|entry| is_same_or_descendant(entry.key(), path))
            .map(|entry| entry.key().clone())
            .collect();

        for victim in doomed {
            if let Some((_, mailbox)) = self.inner.mailboxes.remove(&victim) {
                let _ = mailbox.send(Mail::Stop);
            }
        }
    }

    /// Stop every actor and the inbound pump.
    pub fn shutdown(&self) {
        let roots: Vec<ActorPath> = self
            .inner
            .mailboxes
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        for path in roots {
            self.stop(&path);
        }
        self.inner.shutdown.send_replace(true);
        tracing::info!(node = %self.address(), "actor system shut down");
    }

    /// Resolves once `shutdown` has been called.
    pub async fn terminated(&self) {
        let mut rx = self.inner.shutdown.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }

    // ── Sending ───────────────────────────────────────────────────────────────

    pub async fn tell<M: Payload>(
        &self,
        to: &ActorPath,
        sender: Option<ActorPath>,
        message: M,
    ) -> Result<(), SendError> {
        if to.is_local_to(&self.inner.address) {
            return self.deliver_local(to, Envelope::new(sender, message));
        }
        let payload = self.inner.codec.encode(&message)?;
        self.send_remote(to, sender, M::MANIFEST, payload).await
    }

    /// Type-erased variant of [`tell`](Self::tell).
    pub async fn tell_payload(
        &self,
        to: &ActorPath,
        sender: Option<ActorPath>,
        message: Box<dyn AnyPayload>,
    ) -> Result<(), SendError> {
        if to.is_local_to(&self.inner.address) {
            return self.deliver_local(to, Envelope::from_boxed(sender, message.into_any()));
        }
        let manifest = message.manifest();
        let payload = self.inner.codec.encode(message.as_ref())?;
        self.send_remote(to, sender, manifest, payload).await
    }

    pub fn tell_local<M: Any + Send>(
        &self,
        to: &ActorPath,
        sender: Option<ActorPath>,
        message: M,
    ) -> Result<(), SendError> {
        if !to.is_local_to(&self.inner.address) {
            return Err(SendError::NotLocal(to.clone()));
        }
        self.deliver_local(to, Envelope::new(sender, message))
    }

    /// Hand a decoded payload to a local actor as if `sender` had sent it.
    pub fn deliver_payload(
        &self,
        to: &ActorPath,
        sender: Option<ActorPath>,
        payload: Box<dyn AnyPayload>,
    ) -> Result<(), SendError> {
        if !to.is_local_to(&self.inner.address) {
            return Err(SendError::NotLocal(to.clone()));
        }
        self.deliver_local(to, Envelope::from_boxed(sender, payload.into_any()))
    }

    fn deliver_local(&self, to: &ActorPath, envelope: Envelope) -> Result<(), SendError> {
        let mailbox = self
            .inner
            .mailboxes
            .get(to)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| SendError::NoSuchActor(to.clone()))?;
        mailbox
            .send(Mail::Message(envelope))
            .map_err(|_| SendError::NoSuchActor(to.clone()))
    }

    async fn send_remote(
        &self,
        to: &ActorPath,
        sender: Option<ActorPath>,
        manifest: &'static str,
        payload: Bytes,
    ) -> Result<(), SendError> {
        let envelope = RemoteEnvelope {
            recipient: to.clone(),
            sender,
            payload,
        };
        let frame = wire::encode_frame(&envelope, self.inner.transport.max_frame_bytes())?;
        let frame_len = frame.len();
        self.inner.transport.send(to.node(), frame).await?;
        tracing::trace!(to = %to, manifest, frame_len, "frame sent");
        Ok(())
    }

    // ── Identify ──────────────────────────────────────────────────────────────

    /// Register interest in the answer to an `Identify` request.
    pub(crate) fn await_identity(&self, correlation: Uuid) -> oneshot::Receiver<Option<ActorPath>> {
        let (tx, rx) = oneshot::channel();
        self.inner.identity_waiters.insert(correlation, tx);
        rx
    }

    pub(crate) fn forget_identity(&self, correlation: &Uuid) {
        self.inner.identity_waiters.remove(correlation);
    }

    /// Where remote nodes send `ActorIdentity` answers for this node.
    pub(crate) fn resolver_path(&self) -> ActorPath {
        self.inner.address.system_path("resolver")
    }

    // ── Inbound ───────────────────────────────────────────────────────────────

    async fn pump_inbound(self, mut inbound: InboundFrames, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    tracing::debug!(node = %self.address(), "inbound pump shutting down");
                    return;
                }

                frame = inbound.recv() => {
                    let Some(frame) = frame else {
                        tracing::info!(node = %self.address(), "transport closed, inbound pump exiting");
                        return;
                    };
                    self.route_frame(frame).await;
                }
            }
        }
    }

    async fn route_frame(&self, frame: Bytes) {
        let envelope = match wire::decode_frame(&frame, self.inner.transport.max_frame_bytes()) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(error = %e, "undecodable frame, discarding");
                return;
            }
        };

        let payload = match self.inner.codec.decode(&envelope.payload) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(
                    recipient = %envelope.recipient,
                    error = %e,
                    "undecodable message, discarding"
                );
                return;
            }
        };

        let payload = match downcast::<Identify>(payload) {
            Ok(identify) => {
                self.answer_identify(identify, envelope.recipient, envelope.sender).await;
                return;
            }
            Err(payload) => payload,
        };

        let payload = match downcast::<ActorIdentity>(payload) {
            Ok(identity) => {
                if let Some((_, waiter)) = self.inner.identity_waiters.remove(&identity.correlation) {
                    let _ = waiter.send(identity.found);
                }
                return;
            }
            Err(payload) => payload,
        };

        let manifest = payload.manifest();
        if let Err(e) = self.deliver_payload(&envelope.recipient, envelope.sender, payload) {
            tracing::debug!(manifest, error = %e, "dead letter");
        }
    }

    async fn answer_identify(&self, identify: Identify, asked: ActorPath, asker: Option<ActorPath>) {
        let Some(asker) = asker else {
            tracing::debug!(path = %asked, "identify without reply address, ignoring");
            return;
        };
        let found = self.contains(&asked).then_some(asked);
        let answer = ActorIdentity {
            correlation: identify.correlation,
            found,
        };
        if let Err(e) = self.tell(&asker, None, answer).await {
            tracing::debug!(to = %asker, error = %e, "failed to answer identify");
        }
    }
}

/// Owns an actor's mailbox receiver. When the actor task ends, normally or
/// by panic, the mailbox is unregistered unless the path has already been
/// handed to a new actor.
struct MailboxGuard {
    rx: mpsc::UnboundedReceiver<Mail>,
    system: ActorSystem,
    path: ActorPath,
}

impl Drop for MailboxGuard {
    fn drop(&mut self) {
        self.rx.close();
        self.system
            .inner
            .mailboxes
            .remove_if(&self.path, |_, tx| tx.is_closed());
    }
}

fn is_same_or_descendant(candidate: &ActorPath, root: &ActorPath) -> bool {
    candidate.node() == root.node() && candidate.segments().starts_with(root.segments())
}
