//! TCP session client for the opt RPC service
//!
//! Requests are written as one line of text ending in `\n`, `og` check
//! reads included. Replies carry no length prefix: each `recv` is a single
//! read of at most `max_response_bytes`, relying on the service writing its
//! whole reply at once. Anything beyond that limit is cut off.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info};

use super::error::SessionError;
use super::transport::Transport;
use crate::protocol;

/// Default timeout for establishing the connection
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for a single reply
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Tunables for a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub max_response_bytes: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            max_response_bytes: crate::DEFAULT_MAX_RESPONSE_BYTES,
        }
    }
}

/// A live connection to the service
#[derive(Debug)]
pub struct Session {
    stream: Option<TcpStream>,
    addr: String,
    options: SessionOptions,
    /// Receive buffer, sized on first use and reused for every reply
    buf: Vec<u8>,
}

impl Session {
    /// Connect to `host:port`
    pub async fn connect(host: &str, port: u16, options: SessionOptions) -> Result<Self, SessionError> {
        let addr = format!("{}:{}", host, port);
        debug!(%addr, ?options, "Session::connect: called");

        let stream = tokio::time::timeout(options.connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| SessionError::ConnectTimeout {
                addr: addr.clone(),
                timeout: options.connect_timeout,
            })?
            .map_err(|source| SessionError::Connect {
                addr: addr.clone(),
                source,
            })?;

        info!(%addr, "Connected to opt RPC service");
        Ok(Self {
            stream: Some(stream),
            addr,
            options,
            buf: Vec::new(),
        })
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Shut the connection down; calling it again does nothing
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            debug!(addr = %self.addr, "Session::close: shutting down stream");
            if let Err(e) = stream.shutdown().await {
                debug!(%e, "Session::close: shutdown failed, dropping stream");
            }
            info!(addr = %self.addr, "Disconnected from opt RPC service");
        }
    }

    fn stream(&mut self) -> Result<&mut TcpStream, SessionError> {
        self.stream.as_mut().ok_or(SessionError::Closed)
    }
}

#[async_trait]
impl Transport for Session {
    async fn send(&mut self, request: &str) -> Result<(), SessionError> {
        debug!(%request, "Session::send: called");
        let mut line = String::with_capacity(request.len() + 1);
        line.push_str(request);
        line.push('\n');

        let stream = self.stream()?;
        stream.write_all(line.as_bytes()).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<String, SessionError> {
        let read_timeout = self.options.read_timeout;
        if self.buf.len() != self.options.max_response_bytes {
            self.buf.resize(self.options.max_response_bytes, 0);
        }
        let stream = self.stream.as_mut().ok_or(SessionError::Closed)?;
        let buf = &mut self.buf;

        let n = tokio::time::timeout(read_timeout, stream.read(buf))
            .await
            .map_err(|_| SessionError::Timeout(read_timeout))??;
        if n == 0 {
            debug!("Session::recv: peer closed connection");
            return Err(SessionError::Closed);
        }

        let reply = protocol::decode(&self.buf[..n]);
        debug!(bytes = n, %reply, "Session::recv: received reply");
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn listener() -> (TcpListener, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        (listener, port)
    }

    #[test]
    fn test_default_options() {
        let options = SessionOptions::default();
        assert_eq!(options.max_response_bytes, 512 * 1024);
        assert_eq!(options.read_timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_send_and_recv() {
        let (listener, port) = listener().await;
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let n = sock.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            sock.write_all(b"0 OK\r\n7\r\n\0").await.unwrap();
            request
        });

        let mut session = Session::connect("127.0.0.1", port, SessionOptions::default()).await.unwrap();
        session.send("og ival").await.unwrap();
        let reply = session.recv().await.unwrap();

        assert_eq!(reply, "0 OK\r\n7");
        assert_eq!(server.await.unwrap(), "og ival\n");
    }

    #[tokio::test]
    async fn test_reply_is_truncated_to_limit() {
        let (listener, port) = listener().await;
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            let _ = sock.read(&mut buf).await.unwrap();
            sock.write_all(b"0123456789").await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let options = SessionOptions {
            max_response_bytes: 4,
            ..Default::default()
        };
        let mut session = Session::connect("127.0.0.1", port, options).await.unwrap();
        session.send("og x").await.unwrap();
        assert_eq!(session.recv().await.unwrap(), "0123");
    }

    #[tokio::test]
    async fn test_recv_times_out() {
        let (listener, port) = listener().await;
        tokio::spawn(async move {
            let (_sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
        });

        let options = SessionOptions {
            read_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let mut session = Session::connect("127.0.0.1", port, options).await.unwrap();
        let err = session.recv().await.unwrap_err();
        assert!(matches!(err, SessionError::Timeout(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_recv_reports_peer_close() {
        let (listener, port) = listener().await;
        tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            drop(sock);
        });

        let mut session = Session::connect("127.0.0.1", port, SessionOptions::default()).await.unwrap();
        let err = session.recv().await.unwrap_err();
        assert!(matches!(err, SessionError::Closed | SessionError::Io(_)));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (listener, port) = listener().await;
        tokio::spawn(async move {
            let _ = listener.accept().await.unwrap();
        });

        let mut session = Session::connect("127.0.0.1", port, SessionOptions::default()).await.unwrap();
        assert!(session.is_open());
        session.close().await;
        session.close().await;
        assert!(!session.is_open());
        assert!(matches!(session.send("og x").await, Err(SessionError::Closed)));
    }

    #[tokio::test]
    async fn test_buffer_is_reused_across_replies() {
        let (listener, port) = listener().await;
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 64];
            for reply in [&b"0 OK\r\nlonger value\0"[..], &b"0 OK\0"[..]] {
                let _ = sock.read(&mut buf).await.unwrap();
                sock.write_all(reply).await.unwrap();
            }
        });

        let options = SessionOptions {
            max_response_bytes: 64,
            ..Default::default()
        };
        let mut session = Session::connect("127.0.0.1", port, options).await.unwrap();
        session.send("og a").await.unwrap();
        assert_eq!(session.recv().await.unwrap(), "0 OK\r\nlonger value");
        session.send("og b").await.unwrap();
        assert_eq!(session.recv().await.unwrap(), "0 OK");
        assert_eq!(session.buf.len(), 64);
    }

    #[tokio::test]
    async fn test_connect_times_out() {
        // Non-routable address; SYNs go unanswered
        let options = SessionOptions {
            connect_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        match Session::connect("10.255.255.1", 9000, options).await {
            Err(SessionError::ConnectTimeout { addr, timeout }) => {
                assert_eq!(addr, "10.255.255.1:9000");
                assert_eq!(timeout, Duration::from_millis(50));
            }
            // Hosts without a route fail fast instead of timing out
            Err(SessionError::Connect { .. }) => {}
            other => panic!("unexpected connect result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let (listener, port) = listener().await;
        drop(listener);

        let err = Session::connect("127.0.0.1", port, SessionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::Connect { .. }));
    }
}
