//! # Notifications
//!
//! Relay messages and events pushed by the core, outside any call.
//!
//! The core publishes `(topic, JSON payload)` pairs on its own threads. The
//! adapter parses them into [`Notification`]s and posts each one to the host
//! context, where the registered [`HandleNotification`] sees it.
//!
//! | Topic      | Payload                                                 |
//! |------------|---------------------------------------------------------|
//! | `message`  | `{ "client"?, "relay_url", "message" }`                 |
//! | `event`    | `{ "client"?, "relay_url", "subscription_id", "event" }`|
//! | `shutdown` | `{ "client"? }` or `null`                               |
//!
//! `client` is the handle id of the client the notification belongs to.
//! Payloads without it are broadcast to every listener.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// A notification from the core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// Raw relay message
    Message {
        relay_url: String,
        message: Value,
    },
    /// Event received for a subscription
    Event {
        relay_url: String,
        subscription_id: String,
        event: Value,
    },
    /// The client was shut down
    Shutdown,
}

#[derive(Deserialize)]
struct MessagePayload {
    #[serde(default)]
    client: Option<u64>,
    relay_url: String,
    message: Value,
}

#[derive(Deserialize)]
struct EventPayload {
    #[serde(default)]
    client: Option<u64>,
    relay_url: String,
    subscription_id: String,
    event: Value,
}

#[derive(Deserialize, Default)]
struct ShutdownPayload {
    #[serde(default)]
    client: Option<u64>,
}

/// A notification plus the client handle it belongs to, if the core said
#[derive(Debug, Clone, PartialEq)]
pub struct Addressed {
    pub client: Option<u64>,
    pub notification: Notification,
}

impl Addressed {
    /// Parse a raw `(topic, payload)` pair
    pub fn parse(topic: &str, payload: &[u8]) -> Result<Self> {
        let invalid = |e: serde_json::Error| Error::InvalidPayload(format!("`{}` notification: {}", topic, e));

        match topic {
            "message" => {
                let p: MessagePayload = serde_json::from_slice(payload).map_err(invalid)?;
                Ok(Self {
                    client: p.client,
                    notification: Notification::Message {
                        relay_url: p.relay_url,
                        message: p.message,
                    },
                })
            }
            "event" => {
                let p: EventPayload = serde_json::from_slice(payload).map_err(invalid)?;
                Ok(Self {
                    client: p.client,
                    notification: Notification::Event {
                        relay_url: p.relay_url,
                        subscription_id: p.subscription_id,
                        event: p.event,
                    },
                })
            }
            "shutdown" => {
                let p = if payload.iter().all(u8::is_ascii_whitespace) {
                    ShutdownPayload::default()
                } else {
                    serde_json::from_slice::<Option<ShutdownPayload>>(payload)
                        .map_err(invalid)?
                        .unwrap_or_default()
                };
                Ok(Self {
                    client: p.client,
                    notification: Notification::Shutdown,
                })
            }
            other => Err(Error::InvalidPayload(format!("unknown notification topic `{}`", other))),
        }
    }

    /// Whether a listener on `client` should see this
    pub fn is_for(&self, client: u64) -> bool {
        self.client.map_or(true, |c| c == client)
    }
}

impl Notification {
    /// Parse a raw `(topic, payload)` pair, dropping the client address
    pub fn parse(topic: &str, payload: &[u8]) -> Result<Self> {
        Addressed::parse(topic, payload).map(|a| a.notification)
    }
}

/// Host-side notification handler
pub trait HandleNotification: Send + Sync {
    /// A raw relay message
    fn handle_msg(&self, relay_url: &str, message: &Value);

    /// An event matched a subscription
    fn handle(&self, relay_url: &str, subscription_id: &str, event: &Value);

    /// The client shut down
    fn shutdown(&self) {}
}

impl<T: HandleNotification + ?Sized> HandleNotification for std::sync::Arc<T> {
    fn handle_msg(&self, relay_url: &str, message: &Value) {
        (**self).handle_msg(relay_url, message);
    }

    fn handle(&self, relay_url: &str, subscription_id: &str, event: &Value) {
        (**self).handle(relay_url, subscription_id, event);
    }

    fn shutdown(&self) {
        (**self).shutdown();
    }
}

/// Route one notification to the matching handler method
pub(crate) fn deliver(handler: &dyn HandleNotification, notification: &Notification) {
    match notification {
        Notification::Message { relay_url, message } => handler.handle_msg(relay_url, message),
        Notification::Event {
            relay_url,
            subscription_id,
            event,
        } => handler.handle(relay_url, subscription_id, event),
        Notification::Shutdown => handler.shutdown(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl HandleNotification for Recorder {
        fn handle_msg(&self, relay_url: &str, _message: &Value) {
            self.seen.lock().push(format!("msg {}", relay_url));
        }

        fn handle(&self, _relay_url: &str, subscription_id: &str, _event: &Value) {
            self.seen.lock().push(format!("event {}", subscription_id));
        }

        fn shutdown(&self) {
            self.seen.lock().push("shutdown".into());
        }
    }

    #[test]
    fn test_parse_event() {
        let payload = json!({
            "relay_url": "wss://relay.damus.io",
            "subscription_id": "sub-1",
            "event": {"kind": 1}
        });
        let n = Notification::parse("event", payload.to_string().as_bytes()).unwrap();
        assert_eq!(
            n,
            Notification::Event {
                relay_url: "wss://relay.damus.io".into(),
                subscription_id: "sub-1".into(),
                event: json!({"kind": 1}),
            }
        );
    }

    #[test]
    fn test_parse_rejects_unknown_and_malformed() {
        assert!(Notification::parse("gossip", b"null").is_err());
        assert!(matches!(
            Notification::parse("message", b"{}"),
            Err(Error::InvalidPayload(_))
        ));
        assert_eq!(Notification::parse("shutdown", b"").unwrap(), Notification::Shutdown);
    }

    #[test]
    fn test_parse_reads_client_address() {
        let payload = json!({ "client": 7, "relay_url": "wss://a", "message": ["NOTICE", "x"] });
        let addressed = Addressed::parse("message", payload.to_string().as_bytes()).unwrap();
        assert_eq!(addressed.client, Some(7));
        assert!(addressed.is_for(7));
        assert!(!addressed.is_for(8));

        let shutdown = Addressed::parse("shutdown", br#"{"client":3}"#).unwrap();
        assert_eq!(shutdown.client, Some(3));
        assert_eq!(shutdown.notification, Notification::Shutdown);

        let broadcast = Addressed::parse("shutdown", b"null").unwrap();
        assert_eq!(broadcast.client, None);
        assert!(broadcast.is_for(3));
        assert!(Addressed::parse("shutdown", br#""later""#).is_err());
    }

    #[test]
    fn test_deliver_routes_by_variant() {
        let recorder = Recorder::default();
        deliver(
            &recorder,
            &Notification::Message {
                relay_url: "wss://a".into(),
                message: json!(["NOTICE", "hi"]),
            },
        );
        deliver(
            &recorder,
            &Notification::Event {
                relay_url: "wss://a".into(),
                subscription_id: "sub-2".into(),
                event: json!({}),
            },
        );
        deliver(&recorder, &Notification::Shutdown);
        assert_eq!(*recorder.seen.lock(), vec!["msg wss://a", "event sub-2", "shutdown"]);
    }
}
