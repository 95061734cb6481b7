//! Bluetooth Module
//!
//! Provides BLE communication with the pedal.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                   ConnectionManager                      │
//! │      (state machine - single serialized event loop)      │
//! └─────┬──────────────┬───────────────┬──────────────┬─────┘
//!       │              │               │              │
//!       ▼              ▼               ▼              ▼
//! ┌──────────┐  ┌────────────┐  ┌─────────────┐  ┌──────────┐
//! │ Scanner  │  │ Connection │  │Notifications│  │ Commands │
//! └────┬─────┘  └─────┬──────┘  └──────┬──────┘  └────┬─────┘
//!      └──────────────┴───────┬────────┴──────────────┘
//!                             ▼
//!                   ┌───────────────────┐      ┌──────────┐
//!                   │ Transport (trait) │      │ Protocol │
//!                   │  WinRT / fake     │      │ + codec  │
//!                   └───────────────────┘      └──────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - UUIDs, command bytes and the base64 wire codec
//! - [`transport`] - Transport Adapter contract
//! - [`scanner`] - BLE device discovery
//! - [`connection`] - Connect and topology discovery with timeouts
//! - [`notifications`] - Status notification stream
//! - [`commands`] - Outbound pedal commands
//! - [`service`] - Connection Manager

pub mod commands;
pub mod connection;
pub mod notifications;
pub mod protocol;
pub mod scanner;
pub mod service;
pub mod transport;

#[cfg(windows)]
pub mod winrt;

#[cfg(test)]
pub(crate) mod fake;

pub use service::{ConnectionManager, ControllerError, ManagerCommand};
pub use transport::Transport;
