//! Connection to the opt RPC service
//!
//! [`Session`] owns one TCP connection for the lifetime of an outer run
//! iteration. The interpreter only sees the [`Transport`] trait, which lets it
//! run detached or against a scripted mock in tests.

pub mod client;
pub mod error;
pub mod transport;

pub use client::{Session, SessionOptions};
pub use error::SessionError;
pub use transport::Transport;
