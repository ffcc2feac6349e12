//! `meshlink` adapter: transports, session handshake, correlation tracking,
//! and task dispatch for workers attached to a relay kernel.

pub mod client;
pub mod config;
pub mod logging;
pub mod network;
pub mod service;

pub use client::{ClientError, KernelClient};
pub use config::AdapterConfig;
