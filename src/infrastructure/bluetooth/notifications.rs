//! Notification Stream Handler
//!
//! Owns the status subscription of the active connection and turns each
//! inbound payload into a [`StatusSignal`].

use crate::domain::models::{OutboundCommand, StatusSignal};
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::transport::{
    ConnectionHandle, SubscriptionHandle, Transport, TransportError, TransportEventSender,
};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// What a single notification amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationOutcome {
    Status {
        signal: StatusSignal,
        echo: Option<OutboundCommand>,
    },
    /// Dropped without a state change; carries the warning text.
    Discarded(String),
}

/// Decode one notification callback.
pub fn decode_status(result: Result<Option<String>, TransportError>) -> NotificationOutcome {
    let payload = match result {
        Err(e) => return NotificationOutcome::Discarded(format!("Notification error: {}", e)),
        Ok(None) => return NotificationOutcome::Discarded("No data was received".to_string()),
        Ok(Some(payload)) if payload.is_empty() => {
            return NotificationOutcome::Discarded("No data was received".to_string())
        }
        Ok(Some(payload)) => payload,
    };

    let bytes = match protocol::decode_notification(&payload) {
        Ok(bytes) => bytes,
        Err(e) => return NotificationOutcome::Discarded(format!("Malformed notification: {}", e)),
    };
    trace!("Raw notification: {:02X?}", &bytes);

    let echo = protocol::parse_echo(&bytes);
    if let Some(command) = echo {
        debug!("Received {:?} from pedal button", command);
    }

    NotificationOutcome::Status {
        signal: StatusSignal::from_code(&bytes),
        echo,
    }
}

pub struct NotificationStreamHandler {
    transport: Arc<dyn Transport>,
    service_uuid: Uuid,
    status_char_uuid: Uuid,
    subscription: Option<SubscriptionHandle>,
}

impl NotificationStreamHandler {
    pub fn new(transport: Arc<dyn Transport>, service_uuid: Uuid, status_char_uuid: Uuid) -> Self {
        Self {
            transport,
            service_uuid,
            status_char_uuid,
            subscription: None,
        }
    }

    /// Subscribe to status notifications on `connection`, replacing any
    /// previous subscription.
    pub async fn subscribe(
        &mut self,
        connection: &ConnectionHandle,
        events: TransportEventSender,
    ) -> Result<SubscriptionHandle, TransportError> {
        self.cancel().await;

        let subscription = self
            .transport
            .subscribe_characteristic(
                connection,
                self.service_uuid,
                self.status_char_uuid,
                events,
            )
            .await?;
        info!("Subscribed to status notifications ({:?})", subscription);
        self.subscription = Some(subscription);
        Ok(subscription)
    }

    /// Drop the subscription. Safe to call when none is active.
    pub async fn cancel(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            debug!("Cancelling notification subscription {:?}", subscription);
            if let Err(e) = self.transport.unsubscribe(subscription).await {
                warn!("Failed to cancel notification subscription: {}", e);
            }
        }
    }

    /// Whether `subscription` is the live one; events from older
    /// subscriptions are stale.
    pub fn is_current(&self, subscription: SubscriptionHandle) -> bool {
        self.subscription == Some(subscription)
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::fake::FakeTransport;
    use tokio::sync::mpsc;

    fn status(payload: &str) -> NotificationOutcome {
        decode_status(Ok(Some(payload.to_string())))
    }

    #[test]
    fn test_known_codes() {
        let expect = |signal| NotificationOutcome::Status { signal, echo: None };
        assert_eq!(status("Qg=="), expect(StatusSignal::Blue));
        assert_eq!(status("Ug=="), expect(StatusSignal::Red));
        assert_eq!(status("Rw=="), expect(StatusSignal::Green));
        assert_eq!(status("WA=="), expect(StatusSignal::White));
        assert_eq!(status("UkI="), expect(StatusSignal::White));
    }

    #[test]
    fn test_errors_are_discarded() {
        assert!(matches!(
            decode_status(Err(TransportError::Subscribe("gone".into()))),
            NotificationOutcome::Discarded(_)
        ));
        assert!(matches!(decode_status(Ok(None)), NotificationOutcome::Discarded(_)));
        assert!(matches!(status(""), NotificationOutcome::Discarded(_)));
        assert!(matches!(status("%%%"), NotificationOutcome::Discarded(_)));
    }

    #[test]
    fn test_button_echo() {
        assert_eq!(
            status("gICwGgA="),
            NotificationOutcome::Status {
                signal: StatusSignal::White,
                echo: Some(OutboundCommand::PreviousPatch),
            }
        );
    }

    #[tokio::test]
    async fn test_subscription_lifecycle() {
        let fake = FakeTransport::new();
        let config = crate::infrastructure::bluetooth::connection::ConnectionConfig::default();
        let mut handler = NotificationStreamHandler::new(
            Arc::new(fake.clone()),
            config.service_uuid,
            config.status_char_uuid,
        );
        let connection = ConnectionHandle {
            id: 7,
            peripheral: "pedal".into(),
        };

        handler.cancel().await;
        assert!(fake.unsubscribed().is_empty());

        let (tx, _rx) = mpsc::unbounded_channel();
        let first = handler.subscribe(&connection, tx.clone()).await.unwrap();
        let second = handler.subscribe(&connection, tx).await.unwrap();
        assert!(!handler.is_current(first));
        assert!(handler.is_current(second));
        assert_eq!(fake.unsubscribed(), vec![first]);

        handler.cancel().await;
        assert!(!handler.is_subscribed());
        assert_eq!(fake.unsubscribed(), vec![first, second]);
    }
}
