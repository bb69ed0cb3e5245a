//! Mock R2000 laser scanner for testing.
//!
//! This crate provides a reusable mock device that serves the HTTP command
//! interface and streams scan data on TCP handles. Responses can be shaped
//! through the [`DeviceBehavior`] trait (silence, error codes, latency,
//! dropped data connections).
//!
//! # Architecture
//!
//! - **Protocol layer**: constants, HTTP request parsing and packet builders
//!   (stateless)
//! - **Configuration layer**: [`ServerConfig`]
//! - **Server layer**: command server and one streaming thread per handle
//!
//! # Example
//!
//! ```no_run
//! use r2000_mock_server::{MockR2000, ServerConfig, SimpleBehavior};
//!
//! let server = MockR2000::new(ServerConfig::new(), SimpleBehavior)?;
//! let handle = server.spawn();
//! println!("command interface on port {}", handle.http_port());
//! # Ok::<(), std::io::Error>(())
//! ```

mod behavior;
mod config;
mod constants;
mod http;
mod packet_builder;
mod server;

pub use behavior::{DeviceBehavior, SimpleBehavior};
pub use config::ServerConfig;
pub use constants::*;
pub use http::{parse_request, CommandRequest};
pub use packet_builder::*;
pub use server::{MockR2000, ServerHandle};
