//! Newline-delimited JSON over TCP.
//!
//! A client opens one connection per call, writes one message line and
//! reads one reply line. The server accepts any number of message lines
//! per connection and answers each in order.

use super::{Endpoint, Handler};
use crate::error::TransportError;
use crate::models::{Message, Reply};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Remote endpoint reached over TCP.
#[derive(Debug, Clone)]
pub struct TcpEndpoint {
    address: String,
    timeout: Duration,
}

impl TcpEndpoint {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
        }
    }

    fn io_error(&self, source: std::io::Error) -> TransportError {
        TransportError::Io {
            endpoint: self.address.clone(),
            source,
        }
    }

    fn codec_error(&self, source: serde_json::Error) -> TransportError {
        TransportError::Codec {
            endpoint: self.address.clone(),
            source,
        }
    }

    async fn round_trip(&self, message: &Message) -> Result<Reply, TransportError> {
        let stream = TcpStream::connect(&self.address)
            .await
            .map_err(|source| TransportError::Connect {
                endpoint: self.address.clone(),
                source,
            })?;
        let (read, mut write) = stream.into_split();

        let frame = encode_frame(message).map_err(|e| self.codec_error(e))?;
        write.write_all(&frame).await.map_err(|e| self.io_error(e))?;
        write.flush().await.map_err(|e| self.io_error(e))?;

        let mut reader = BufReader::new(read);
        let mut line = String::new();
        let read_bytes = reader
            .read_line(&mut line)
            .await
            .map_err(|e| self.io_error(e))?;
        if read_bytes == 0 {
            return Err(TransportError::Closed {
                endpoint: self.address.clone(),
            });
        }

        serde_json::from_str(line.trim_end()).map_err(|e| self.codec_error(e))
    }
}

#[async_trait]
impl Endpoint for TcpEndpoint {
    fn address(&self) -> &str {
        &self.address
    }

    async fn call(&self, message: Message) -> Result<Reply, TransportError> {
        debug!("Calling {} with {}", self.address, message.kind());
        match tokio::time::timeout(self.timeout, self.round_trip(&message)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout {
                endpoint: self.address.clone(),
                after: self.timeout,
            }),
        }
    }
}

fn encode_frame<T: Serialize>(value: &T) -> serde_json::Result<Vec<u8>> {
    let mut frame = serde_json::to_vec(value)?;
    frame.push(b'\n');
    Ok(frame)
}

/// Bind a listener, with the address in the error context.
pub async fn bind(address: &str) -> Result<TcpListener> {
    TcpListener::bind(address)
        .await
        .with_context(|| format!("Failed to bind {}", address))
}

/// Accept connections and dispatch their messages to `handler` until
/// `shutdown` resolves. Each connection runs on its own task.
pub async fn serve<F>(listener: TcpListener, handler: Arc<dyn Handler>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let local = listener
        .local_addr()
        .context("Listener has no local address")?;
    info!("Listening on {}", local);

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested, closing {}", local);
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("Accepted connection from {}", peer);
                    let handler = Arc::clone(&handler);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, handler).await {
                            warn!("Connection from {} failed: {}", peer, e);
                        }
                    });
                }
                Err(e) => warn!("Accept failed on {}: {}", local, e),
            }
        }
    }

    Ok(())
}

async fn handle_connection(stream: TcpStream, handler: Arc<dyn Handler>) -> Result<()> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let reply = match serde_json::from_str::<Message>(&line) {
            Ok(message) => handler.handle(message).await,
            Err(e) => {
                warn!("Malformed message: {}", e);
                Reply::rejected(format!("malformed message: {}", e))
            }
        };

        write.write_all(&encode_frame(&reply)?).await?;
        write.flush().await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CompletionNotice;
    use tokio::sync::oneshot;

    /// Accepts completions, rejects everything else, optionally slowly.
    struct CompletionOnly {
        delay: Duration,
    }

    #[async_trait]
    impl Handler for CompletionOnly {
        async fn handle(&self, message: Message) -> Reply {
            tokio::time::sleep(self.delay).await;
            match message {
                Message::Completion(_) => Reply::Accepted,
                other => Reply::rejected(format!("unexpected {}", other.kind())),
            }
        }
    }

    async fn start(delay: Duration) -> (String, oneshot::Sender<()>) {
        let listener = bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let handler: Arc<dyn Handler> = Arc::new(CompletionOnly { delay });
        tokio::spawn(serve(listener, handler, async move {
            let _ = stop_rx.await;
        }));
        (address, stop_tx)
    }

    #[tokio::test]
    async fn test_round_trip() {
        let (address, _stop) = start(Duration::ZERO).await;
        let endpoint = TcpEndpoint::new(address, Duration::from_secs(5));

        let notice = Message::Completion(CompletionNotice::new(0, 4));
        tokio_test::assert_ok!(endpoint.deliver(notice).await);

        let request = Message::Request(crate::models::Request::new(
            1,
            crate::models::Operation::Add,
            1.0,
            1.0,
        ));
        let err = endpoint.deliver(request).await.unwrap_err();
        assert!(matches!(err, TransportError::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_timeout() {
        let (address, _stop) = start(Duration::from_secs(3)).await;
        let endpoint = TcpEndpoint::new(address, Duration::from_millis(100));

        let notice = Message::Completion(CompletionNotice::new(0, 0));
        let err = endpoint.call(notice).await.unwrap_err();
        assert!(matches!(err, TransportError::Timeout { .. }));
        assert!(err.to_string().ends_with("timed out after 100ms"));
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let listener = bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let endpoint = TcpEndpoint::new(address, Duration::from_secs(2));
        let notice = Message::Completion(CompletionNotice::new(0, 1));
        let err = endpoint.call(notice).await.unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
    }

    #[tokio::test]
    async fn test_malformed_line_is_rejected() {
        let (address, _stop) = start(Duration::ZERO).await;

        let stream = TcpStream::connect(&address).await.unwrap();
        let (read, mut write) = stream.into_split();
        write.write_all(b"{not json}\n").await.unwrap();

        let mut line = String::new();
        BufReader::new(read).read_line(&mut line).await.unwrap();
        let reply: Reply = serde_json::from_str(line.trim_end()).unwrap();
        assert!(matches!(reply, Reply::Rejected { .. }));
    }
}
