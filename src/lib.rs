//! Discover, connect to and control a BLE foot pedal.
//!
//! The [`app::PedalController`] is the entry point for presentation code;
//! everything below it is driven by the Connection Manager in
//! [`infrastructure::bluetooth::service`].

pub mod app;
pub mod domain;
pub mod infrastructure;

pub use app::{PedalController, PresentationState};
pub use domain::models::{
    AppEvent, ConnectionState, DeviceSummary, OutboundCommand, PeripheralId, StatusSignal,
};
