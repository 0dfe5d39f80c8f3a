//! Authlink Relay - hosted callback channel service.
//!
//! Authenticator pages POST callback payloads to
//! `/v1/channel/{id}`; applications long-poll the same path. Each
//! channel id is a single-use 32-byte token minted by the client, so
//! the relay never learns who is talking.

pub mod api;
pub mod config;
pub mod mailbox;
pub mod server;

#[cfg(test)]
mod mailbox_props;

pub use server::RelayServer;
