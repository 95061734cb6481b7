use serde::{Deserialize, Serialize};
use std::fmt;

/// Transport-assigned identifier of a peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeripheralId(pub String);

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeripheralId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A peripheral as reported by a scan callback.
///
/// Either name field may be missing from an advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeripheralHandle {
    pub id: PeripheralId,
    /// Local name from the advertisement payload
    pub local_name: Option<String>,
    /// Device name as cached by the platform stack
    pub name: Option<String>,
}

impl PeripheralHandle {
    /// Name shown to the user: local name first, then device name.
    pub fn display_name(&self) -> String {
        self.local_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .or(self.name.as_deref().filter(|n| !n.is_empty()))
            .unwrap_or("Unknown")
            .to_string()
    }

    pub fn summary(&self) -> DeviceSummary {
        DeviceSummary {
            id: self.id.clone(),
            display_name: self.display_name(),
        }
    }
}

/// Registry entry exposed to presentation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSummary {
    pub id: PeripheralId,
    pub display_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Scanning,
    Connecting,
    Connected,
    Disconnected,
}

/// Last status reported by the pedal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusSignal {
    #[default]
    White,
    Blue,
    Red,
    Green,
}

impl StatusSignal {
    /// Map a decoded notification value. Total: unknown values are White.
    pub fn from_code(code: &[u8]) -> Self {
        match code {
            b"B" => Self::Blue,
            b"R" => Self::Red,
            b"G" => Self::Green,
            _ => Self::White,
        }
    }
}

/// Control commands understood by the pedal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundCommand {
    NextPatch,
    PreviousPatch,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    RegistryChanged(Vec<DeviceSummary>),
    ConnectionState(ConnectionState),
    StatusSignal(StatusSignal),
    /// A pedal button press echoed back on the status characteristic
    PedalEcho(OutboundCommand),
    PermissionDenied,
    LogMessage(StatusMessage),
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

impl StatusMessage {
    pub fn new(message: impl Into<String>, severity: MessageSeverity) -> Self {
        Self {
            message: message.into(),
            severity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}
