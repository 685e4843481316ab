//! In-process transport: calls go straight to a handler.

use super::{Endpoint, Handler};
use crate::error::TransportError;
use crate::models::{Message, Reply};
use async_trait::async_trait;
use std::sync::Arc;

/// Endpoint that invokes a [`Handler`] in the same process.
pub struct LocalEndpoint {
    name: String,
    handler: Arc<dyn Handler>,
}

impl LocalEndpoint {
    pub fn new(name: impl Into<String>, handler: Arc<dyn Handler>) -> Self {
        Self {
            name: name.into(),
            handler,
        }
    }
}

#[async_trait]
impl Endpoint for LocalEndpoint {
    fn address(&self) -> &str {
        &self.name
    }

    async fn call(&self, message: Message) -> Result<Reply, TransportError> {
        Ok(self.handler.handle(message).await)
    }
}
