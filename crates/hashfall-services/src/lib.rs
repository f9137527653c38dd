//! hashfall-services: actor runtime, transports, and the large-message
//! proxies that carry oversized payloads between actors.

pub mod error;
pub mod metrics;
pub mod proxy;
pub mod resolver;
pub mod stream;
pub mod system;
pub mod tcp;
pub mod transport;

mod receiver;
mod sender;

pub use error::StreamError;
pub use metrics::{MetricsSnapshot, ProxyMetrics};
pub use proxy::{attach_proxy, LargeMessage, LargeMessageProxy, ProxySettings};
pub use resolver::{ResolveError, Resolver, RetryPolicy};
pub use system::{Actor, ActorSystem, Context, Envelope, SendError, SpawnError};
pub use tcp::TcpTransport;
pub use transport::{InboundFrames, MemoryNetwork, MemoryTransport, Transport, TransportError};
