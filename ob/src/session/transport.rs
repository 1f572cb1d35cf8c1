//! Transport trait definition

use async_trait::async_trait;

use super::SessionError;

/// One request/response channel to the service
///
/// Callers never pipeline: every `send` is followed by exactly one `recv`
/// before the next `send`.
#[async_trait]
pub trait Transport: Send {
    /// Send one request
    async fn send(&mut self, request: &str) -> Result<(), SessionError>;

    /// Receive one decoded reply
    async fn recv(&mut self) -> Result<String, SessionError>;
}
