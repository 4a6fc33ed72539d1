//! # ssh-mcp-gateway
//!
//! An agent-facing MCP gateway that accepts tool-call requests over the
//! Model Context Protocol and fans them out, via persistent SSH connections,
//! to a set of aliased remote hosts.
//!
//! ## Main components
//!
//! - [`keystore::KeyStore`] — the gateway's own Ed25519 identity, used as the
//!   credential of last resort when a tool call names neither a password nor
//!   an explicit private key.
//! - [`connection::Connection`] — one persistent SSH session to a single
//!   remote host, tracking its own working directory across calls.
//! - [`manager::Manager`] — the alias table: reserves aliases, serializes
//!   access to each one, reconnects on transport loss, shapes command output.
//! - [`pool::Pool`] — holds one [`manager::Manager`] per tenant (or a single
//!   global one), reaping idle tenants on a timer.
//! - [`dispatcher`] — the fixed set of MCP tools (`connect`, `run`, `read`,
//!   `sync`, ...) that translate tool-call arguments into `Manager` calls.
//! - [`server::GatewayServer`] — the `rmcp::ServerHandler` that wires the
//!   dispatcher to the MCP transport of choice.
//! - [`transport`] — stdio and streamable-HTTP bindings for the server.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use ssh_mcp_gateway::config::GatewayConfig;
//! use ssh_mcp_gateway::keystore::KeyStore;
//! use ssh_mcp_gateway::pool::Pool;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = GatewayConfig::load();
//!     let keystore = Arc::new(KeyStore::ensure(config.key_dir.clone())?);
//!     let pool = if config.global {
//!         Pool::global(keystore)
//!     } else {
//!         Pool::session_id_keyed(keystore)
//!     };
//!     let _ = pool;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod keystore;
pub mod manager;
pub mod pool;
pub mod security;
pub mod server;
pub mod transport;
