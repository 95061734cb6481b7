//! Command Sender
//!
//! Writes pedal commands with write-without-response. A failed write
//! looks the same as a successful one to callers.

use crate::domain::models::{ConnectionState, OutboundCommand};
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::transport::{ConnectionHandle, Transport, WriteMode};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

pub struct CommandSender {
    transport: Arc<dyn Transport>,
    service_uuid: Uuid,
    command_char_uuid: Uuid,
}

impl CommandSender {
    pub fn new(transport: Arc<dyn Transport>, service_uuid: Uuid, command_char_uuid: Uuid) -> Self {
        Self {
            transport,
            service_uuid,
            command_char_uuid,
        }
    }

    /// Send `command` if `state` is Connected. Returns whether a write was
    /// issued.
    pub async fn send(
        &self,
        state: ConnectionState,
        connection: Option<&ConnectionHandle>,
        command: OutboundCommand,
    ) -> bool {
        let connection = match (state, connection) {
            (ConnectionState::Connected, Some(connection)) => connection,
            _ => {
                debug!("Ignoring {:?}: not connected ({:?})", command, state);
                return false;
            }
        };

        let payload = protocol::encode_command(command.as_bytes());
        info!("Sending {:?} to {}", command, connection.peripheral);

        // Fire-and-forget write
        if let Err(e) = self
            .transport
            .write_characteristic(
                connection,
                self.service_uuid,
                self.command_char_uuid,
                &payload,
                WriteMode::WithoutResponse,
            )
            .await
        {
            debug!("Unacknowledged write reported an error: {}", e);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::connection::ConnectionConfig;
    use crate::infrastructure::bluetooth::fake::FakeTransport;
    use crate::infrastructure::bluetooth::transport::TransportError;

    fn sender(fake: &FakeTransport) -> CommandSender {
        let config = ConnectionConfig::default();
        CommandSender::new(
            Arc::new(fake.clone()),
            config.service_uuid,
            config.command_char_uuid,
        )
    }

    fn connection() -> ConnectionHandle {
        ConnectionHandle {
            id: 1,
            peripheral: "pedal".into(),
        }
    }

    #[tokio::test]
    async fn test_no_write_unless_connected() {
        let fake = FakeTransport::new();
        let sender = sender(&fake);

        for state in [
            ConnectionState::Idle,
            ConnectionState::Scanning,
            ConnectionState::Connecting,
            ConnectionState::Disconnected,
        ] {
            assert!(
                !sender
                    .send(state, Some(&connection()), OutboundCommand::NextPatch)
                    .await
            );
        }
        assert!(
            !sender
                .send(ConnectionState::Connected, None, OutboundCommand::NextPatch)
                .await
        );
        assert_eq!(fake.write_count(), 0);
    }

    #[tokio::test]
    async fn test_writes_framed_command() {
        let fake = FakeTransport::new();
        let sender = sender(&fake);

        assert!(
            sender
                .send(
                    ConnectionState::Connected,
                    Some(&connection()),
                    OutboundCommand::PreviousPatch
                )
                .await
        );

        let writes = fake.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].mode, WriteMode::WithoutResponse);
        assert_eq!(
            protocol::decode_notification(&writes[0].payload).unwrap(),
            vec![0x00, 0x00, 0xB0, 0x1A, 0x00]
        );
        assert_eq!(writes[0].characteristic, ConnectionConfig::default().command_char_uuid);
    }

    #[tokio::test]
    async fn test_write_failure_is_not_surfaced() {
        let fake = FakeTransport::new();
        fake.fail_writes(TransportError::Write("radio busy".into()));
        let sender = sender(&fake);

        assert!(
            sender
                .send(
                    ConnectionState::Connected,
                    Some(&connection()),
                    OutboundCommand::NextPatch
                )
                .await
        );
        assert_eq!(fake.write_count(), 1);
    }
}
