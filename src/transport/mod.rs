//! Point-to-point transport between cluster roles.
//!
//! Every interaction is one [`Message`] answered by one [`Reply`]. Callers
//! hold an [`Endpoint`]; services implement [`Handler`]. Two transports are
//! provided: newline-delimited JSON over TCP, and direct in-process calls.

pub mod local;
pub mod tcp;

pub use local::LocalEndpoint;
pub use tcp::{bind, serve, TcpEndpoint};

use crate::error::TransportError;
use crate::models::{Message, Reply};
use async_trait::async_trait;
use std::sync::Arc;

/// Client side of a call.
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Human-readable address, used in logs and errors.
    fn address(&self) -> &str;

    /// Send one message and wait for its reply.
    async fn call(&self, message: Message) -> Result<Reply, TransportError>;

    /// Send one message, treating a rejection as a failed delivery.
    async fn deliver(&self, message: Message) -> Result<(), TransportError> {
        match self.call(message).await? {
            Reply::Accepted => Ok(()),
            Reply::Rejected { reason } => Err(TransportError::Rejected {
                endpoint: self.address().to_string(),
                reason,
            }),
        }
    }
}

/// Server side of a call.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, message: Message) -> Reply;
}

/// Shared endpoint handle, as stored in routing tables.
pub type SharedEndpoint = Arc<dyn Endpoint>;
