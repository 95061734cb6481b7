//! BLE Scanner Module
//!
//! Tracks the scan session on top of the transport so stopping is
//! idempotent.

use crate::infrastructure::bluetooth::transport::{
    ScanFilter, Transport, TransportError, TransportEventSender,
};
use std::sync::Arc;
use tracing::info;

/// BLE Scanner for discovering pedals
pub struct BleScanner {
    transport: Arc<dyn Transport>,
    filter: ScanFilter,
    scanning: bool,
}

impl BleScanner {
    /// Create a new scanner
    pub fn new(transport: Arc<dyn Transport>, filter: ScanFilter) -> Self {
        Self {
            transport,
            filter,
            scanning: false,
        }
    }

    /// Start scanning, restarting any scan already running.
    ///
    /// Scan results are delivered on `events`.
    pub async fn start(&mut self, events: TransportEventSender) -> Result<(), TransportError> {
        self.stop().await?;

        info!("Starting BLE scan");
        self.transport.start_scan(&self.filter, events).await?;
        self.scanning = true;
        Ok(())
    }

    /// Stop scanning. Does nothing when no scan is active.
    pub async fn stop(&mut self) -> Result<(), TransportError> {
        if !self.scanning {
            return Ok(());
        }
        info!("Stopping BLE scan...");
        self.scanning = false;
        self.transport.stop_scan().await
    }

    /// Check if currently scanning
    pub fn is_scanning(&self) -> bool {
        self.scanning
    }
}
