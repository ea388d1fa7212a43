//-
// Copyright (c) 2026, Jason Lingle
//
// This file is part of Mailvane.
//
// Mailvane is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Mailvane is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Mailvane. If not, see <http://www.gnu.org/licenses/>.

//! Fan-out of notifications between server instances.
//!
//! Every notification published locally is also handed to a `Broker` on the
//! channel `imap:notify:<mailbox id>`, encoded as CBOR together with the id
//! of the publishing instance. Each instance listens on `imap:notify:*` and
//! republishes what it receives to its local subscribers, skipping its own
//! messages.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

use super::hub::NotifyHub;
use super::Notification;
use crate::support::error::Error;

pub const CHANNEL_PREFIX: &str = "imap:notify:";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerMessage {
    pub channel: String,
    pub payload: Vec<u8>,
}

/// A publish/subscribe transport shared by several instances.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, channel: &str, payload: Vec<u8>)
        -> Result<(), Error>;

    /// Starts receiving messages on every channel matching `pattern`, where a
    /// trailing `*` matches any suffix.
    fn subscribe(&self, pattern: &str) -> mpsc::Receiver<BrokerMessage>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub instance_id: String,
    pub notification: Notification,
}

pub fn channel_for(mailbox_id: &str) -> String {
    format!("{}{}", CHANNEL_PREFIX, mailbox_id)
}

pub fn encode(
    instance_id: &str,
    notification: &Notification,
) -> Result<Vec<u8>, Error> {
    Ok(serde_cbor::to_vec(&Envelope {
        instance_id: instance_id.to_owned(),
        notification: notification.clone(),
    })?)
}

pub fn decode(payload: &[u8]) -> Result<Envelope, Error> {
    Ok(serde_cbor::from_slice(payload)?)
}

fn pattern_matches(pattern: &str, channel: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => channel.starts_with(prefix),
        None => channel == pattern,
    }
}

/// Hands `notification` to the broker on a background task.
pub(super) fn forward(
    broker: Arc<dyn Broker>,
    instance_id: &str,
    notification: &Notification,
) {
    let payload = match encode(instance_id, notification) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Failed to encode notification for relay: {}", e);
            return;
        },
    };

    let channel = channel_for(&notification.mailbox_id);
    tokio::spawn(async move {
        if let Err(e) = broker.publish(&channel, payload).await {
            warn!("Failed to relay notification on {}: {}", channel, e);
        }
    });
}

/// Republishes notifications from other instances until the hub goes away
/// or the broker closes the subscription.
pub(super) async fn run_inbound(
    hub: Weak<NotifyHub>,
    instance_id: String,
    mut messages: mpsc::Receiver<BrokerMessage>,
) {
    while let Some(message) = messages.recv().await {
        let hub = match hub.upgrade() {
            Some(hub) => hub,
            None => return,
        };

        match decode(&message.payload) {
            Ok(envelope) if envelope.instance_id == instance_id => (),
            Ok(envelope) => {
                debug!(
                    "Relayed {} for {} from {}",
                    envelope.notification.event.kind(),
                    envelope.notification.mailbox_id,
                    envelope.instance_id
                );
                hub.deliver_local(&envelope.notification);
            },
            Err(e) => warn!(
                "Discarding undecodable relay message on {}: {}",
                message.channel, e
            ),
        }
    }
}

/// An in-process broker.
///
/// Instances sharing one `LocalBroker` see each other's messages, which is
/// all a single-node deployment needs.
#[derive(Clone)]
pub struct LocalBroker {
    sender: broadcast::Sender<BrokerMessage>,
}

impl LocalBroker {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }
}

#[async_trait]
impl Broker for LocalBroker {
    async fn publish(
        &self,
        channel: &str,
        payload: Vec<u8>,
    ) -> Result<(), Error> {
        // No receivers just means nobody is listening yet.
        let _ = self.sender.send(BrokerMessage {
            channel: channel.to_owned(),
            payload,
        });
        Ok(())
    }

    fn subscribe(&self, pattern: &str) -> mpsc::Receiver<BrokerMessage> {
        let mut source = self.sender.subscribe();
        let (sender, receiver) = mpsc::channel(64);
        let pattern = pattern.to_owned();
        tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(message) => {
                        if pattern_matches(&pattern, &message.channel)
                            && sender.send(message).await.is_err()
                        {
                            return;
                        }
                    },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Local broker subscriber lagged by {}", n);
                    },
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });
        receiver
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::notify::Event;

    fn sample() -> Notification {
        Notification {
            origin: "conn-1".to_owned(),
            mailbox_id: "mb1".to_owned(),
            folder_id: "f1".to_owned(),
            folder_path: "INBOX".to_owned(),
            event: Event::Flags {
                seq: 3,
                uid: 9,
                flags: vec!["\\Seen".to_owned()],
            },
        }
    }

    #[test]
    fn envelope_encoding() {
        let payload = encode("imap-a", &sample()).unwrap();
        let envelope = decode(&payload).unwrap();
        assert_eq!("imap-a", envelope.instance_id);
        assert_eq!(sample(), envelope.notification);
        assert!(decode(b"garbage").is_err());
    }

    #[test]
    fn patterns() {
        assert!(pattern_matches("imap:notify:*", "imap:notify:mb1"));
        assert!(pattern_matches("imap:notify:mb1", "imap:notify:mb1"));
        assert!(!pattern_matches("imap:notify:mb1", "imap:notify:mb2"));
        assert!(!pattern_matches("imap:notify:*", "other:mb1"));
    }

    #[tokio::test]
    async fn local_broker_filters_channels() {
        let broker = LocalBroker::new(16);
        let mut rx = broker.subscribe("imap:notify:*");
        broker.publish("other", b"x".to_vec()).await.unwrap();
        broker
            .publish(&channel_for("mb1"), b"y".to_vec())
            .await
            .unwrap();

        let message = rx.recv().await.unwrap();
        assert_eq!("imap:notify:mb1", message.channel);
        assert_eq!(b"y".to_vec(), message.payload);
    }
}
