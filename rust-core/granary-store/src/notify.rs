// SPDX-License-Identifier: PMPL-1.0-or-later
//! Channel-backed notifier.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use granary_model::GranuleNotification;

use crate::error::StoreError;
use crate::Notifier;

/// A message as it left the notifier: topic plus JSON body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub body: String,
}

impl PublishedMessage {
    pub fn notification(&self) -> Result<GranuleNotification, StoreError> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Publishes onto an unbounded tokio channel.
///
/// Publishing fails with [`StoreError::Unavailable`] once the receiver has
/// been dropped.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<PublishedMessage>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PublishedMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn publish(
        &self,
        topic: &str,
        notification: &GranuleNotification,
    ) -> Result<(), StoreError> {
        let body = serde_json::to_string(notification)?;
        self.sender
            .send(PublishedMessage {
                topic: topic.to_string(),
                body,
            })
            .map_err(|_| StoreError::Unavailable(format!("topic {topic} has no subscriber")))?;
        debug!(topic, granule_id = %notification.record.granule_id, event = %notification.event, "published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use granary_model::EventType;
    use serde_json::json;

    fn notification() -> GranuleNotification {
        GranuleNotification {
            record: serde_json::from_value(json!({
                "granuleId": "g1",
                "collectionId": "c___1",
                "status": "completed",
                "published": true,
                "error": {},
                "createdAt": 5,
                "updatedAt": 6,
                "timestamp": 6,
            }))
            .unwrap(),
            event: EventType::Create,
        }
    }

    #[tokio::test]
    async fn test_publish_delivers_json_body() {
        let (notifier, mut receiver) = ChannelNotifier::new();
        notifier.publish("granule-topic", &notification()).await.unwrap();

        let message = receiver.try_recv().unwrap();
        assert_eq!(message.topic, "granule-topic");
        assert!(message.body.contains("\"event\":\"Create\""));
        assert_eq!(message.notification().unwrap(), notification());
    }

    #[tokio::test]
    async fn test_publish_without_receiver_is_unavailable() {
        let (notifier, receiver) = ChannelNotifier::new();
        drop(receiver);
        let err = notifier.publish("t", &notification()).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
