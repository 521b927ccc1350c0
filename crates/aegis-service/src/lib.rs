//! Aegis vault service.
//!
//! This crate exposes the genesis vault to local client processes:
//!
//! - **[`governance`]** -- Time-boxed unlock gate with lazy expiry and a
//!   pluggable [`Clock`].
//! - **[`protocol`]** -- Newline-delimited JSON requests and responses with a
//!   fixed status taxonomy.
//! - **[`dispatcher`]** -- Maps commands onto the vault and the gate; secret
//!   access is refused while the gate is locked.
//! - **[`server`]** -- Unix socket / Windows named pipe listener, one task per
//!   connection.
//! - **[`client`]** -- One-shot request client with connect timeout.
//! - **[`logs`]** -- Tail of the service log file.
//! - **[`config`]** -- TOML configuration for vault and service.
//! - **[`error`]** -- Unified service error types via [`thiserror`].
//!
//! Nothing here listens on a network interface.

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod governance;
pub mod logs;
pub mod protocol;
pub mod server;

// Re-export the most commonly used types at the crate root for convenience.
pub use client::ServiceClient;
pub use config::{AegisConfig, ServiceConfig};
pub use dispatcher::Dispatcher;
pub use error::{Result, ServiceError};
pub use governance::{Clock, GovernanceGate, ManualClock, SystemClock};
pub use protocol::{Command, ServiceRequest, ServiceResponse, Status};
pub use server::{Endpoint, ServiceServer, serve_connection};
