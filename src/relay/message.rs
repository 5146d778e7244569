//! Relay protocol frames.
//!
//! Client to relay:
//!
//! - `["EVENT", <event>]`
//! - `["REQ", <subscription id>, <filter>...]`
//! - `["CLOSE", <subscription id>]`
//!
//! Relay to client:
//!
//! - `["EVENT", <subscription id>, <event>]`
//! - `["EOSE", <subscription id>]`
//! - `["OK", <event id>, <true|false>, <message>]`
//! - `["NOTICE", <message>]`
//! - `["CLOSED", <subscription id>, <message>]`

use serde::ser::SerializeSeq;
use serde::{Serialize, Serializer};
use serde_json::Value;

use super::error::{RelayError, RelayResult};
use super::filter::Filter;
use crate::nostr::Event;

/// A frame sent from client to relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Publish an event.
    Event(Box<Event>),
    /// Open or replace a subscription.
    Req {
        subscription_id: String,
        filters: Vec<Filter>,
    },
    /// Close a subscription.
    Close(String),
}

impl ClientMessage {
    /// Encodes the frame as JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ProtocolFrame`] if serialization fails.
    pub fn to_json(&self) -> RelayResult<String> {
        serde_json::to_string(self).map_err(|e| RelayError::ProtocolFrame(e.to_string()))
    }

    /// Decodes a client frame. Used by relay-side test doubles.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ProtocolFrame`] for malformed frames.
    pub fn from_json(frame: &str) -> RelayResult<Self> {
        let parts = parse_array(frame)?;
        match frame_type(&parts)? {
            "EVENT" if parts.len() == 2 => Ok(Self::Event(Box::new(parse_event(&parts[1])?))),
            "REQ" if parts.len() >= 2 => {
                let subscription_id = parse_str(&parts[1], "subscription id")?;
                let filters = parts[2..]
                    .iter()
                    .map(|f| {
                        serde_json::from_value(f.clone())
                            .map_err(|e| RelayError::ProtocolFrame(format!("bad filter: {e}")))
                    })
                    .collect::<RelayResult<_>>()?;
                Ok(Self::Req {
                    subscription_id,
                    filters,
                })
            }
            "CLOSE" if parts.len() == 2 => Ok(Self::Close(parse_str(&parts[1], "subscription id")?)),
            other => Err(RelayError::ProtocolFrame(format!(
                "unexpected client frame {other} with {} elements",
                parts.len()
            ))),
        }
    }
}

impl Serialize for ClientMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(None)?;
        match self {
            Self::Event(event) => {
                seq.serialize_element("EVENT")?;
                seq.serialize_element(event)?;
            }
            Self::Req {
                subscription_id,
                filters,
            } => {
                seq.serialize_element("REQ")?;
                seq.serialize_element(subscription_id)?;
                for filter in filters {
                    seq.serialize_element(filter)?;
                }
            }
            Self::Close(subscription_id) => {
                seq.serialize_element("CLOSE")?;
                seq.serialize_element(subscription_id)?;
            }
        }
        seq.end()
    }
}

/// A frame sent from relay to client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayMessage {
    /// An event matching a subscription.
    Event {
        subscription_id: String,
        event: Box<Event>,
    },
    /// End of stored events.
    Eose(String),
    /// Acceptance or rejection of a published event.
    Ok {
        event_id: String,
        accepted: bool,
        message: String,
    },
    /// Human-readable notice.
    Notice(String),
    /// The relay ended a subscription.
    Closed {
        subscription_id: String,
        message: String,
    },
    /// A well-formed frame of a type this client does not handle (e.g. `AUTH`).
    Unknown(String),
}

impl RelayMessage {
    /// Decodes a relay frame.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ProtocolFrame`] if the frame is not a JSON array,
    /// has the wrong arity for its type, or carries mistyped fields.
    ///
    /// # Example
    ///
    /// ```
    /// use driftwood_core::relay::RelayMessage;
    ///
    /// let msg = RelayMessage::from_json(r#"["EOSE","sub1"]"#).unwrap();
    /// assert_eq!(msg, RelayMessage::Eose("sub1".to_string()));
    /// assert!(RelayMessage::from_json(r#"{"not":"an array"}"#).is_err());
    /// ```
    pub fn from_json(frame: &str) -> RelayResult<Self> {
        let parts = parse_array(frame)?;
        let kind = frame_type(&parts)?;
        let arity_error = || {
            RelayError::ProtocolFrame(format!(
                "{kind} frame with {} elements",
                parts.len()
            ))
        };

        match kind {
            "EVENT" => {
                if parts.len() != 3 {
                    return Err(arity_error());
                }
                Ok(Self::Event {
                    subscription_id: parse_str(&parts[1], "subscription id")?,
                    event: Box::new(parse_event(&parts[2])?),
                })
            }
            "EOSE" => {
                if parts.len() != 2 {
                    return Err(arity_error());
                }
                Ok(Self::Eose(parse_str(&parts[1], "subscription id")?))
            }
            "OK" => {
                if !(3..=4).contains(&parts.len()) {
                    return Err(arity_error());
                }
                let accepted = parts[2].as_bool().ok_or_else(|| {
                    RelayError::ProtocolFrame("OK accepted flag is not a boolean".to_string())
                })?;
                Ok(Self::Ok {
                    event_id: parse_str(&parts[1], "event id")?,
                    accepted,
                    message: optional_str(parts.get(3), "message")?,
                })
            }
            "NOTICE" => {
                if parts.len() != 2 {
                    return Err(arity_error());
                }
                Ok(Self::Notice(parse_str(&parts[1], "notice")?))
            }
            "CLOSED" => {
                if !(2..=3).contains(&parts.len()) {
                    return Err(arity_error());
                }
                Ok(Self::Closed {
                    subscription_id: parse_str(&parts[1], "subscription id")?,
                    message: optional_str(parts.get(2), "message")?,
                })
            }
            other => Ok(Self::Unknown(other.to_string())),
        }
    }

    /// Encodes the frame as JSON text. Used by relay-side test doubles.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::ProtocolFrame`] if serialization fails.
    pub fn to_json(&self) -> RelayResult<String> {
        let value = match self {
            Self::Event {
                subscription_id,
                event,
            } => serde_json::json!(["EVENT", subscription_id, event]),
            Self::Eose(subscription_id) => serde_json::json!(["EOSE", subscription_id]),
            Self::Ok {
                event_id,
                accepted,
                message,
            } => serde_json::json!(["OK", event_id, accepted, message]),
            Self::Notice(message) => serde_json::json!(["NOTICE", message]),
            Self::Closed {
                subscription_id,
                message,
            } => serde_json::json!(["CLOSED", subscription_id, message]),
            Self::Unknown(kind) => serde_json::json!([kind]),
        };
        serde_json::to_string(&value).map_err(|e| RelayError::ProtocolFrame(e.to_string()))
    }
}

fn parse_array(frame: &str) -> RelayResult<Vec<Value>> {
    match serde_json::from_str::<Value>(frame) {
        Ok(Value::Array(parts)) => Ok(parts),
        Ok(_) => Err(RelayError::ProtocolFrame("frame is not a JSON array".to_string())),
        Err(e) => Err(RelayError::ProtocolFrame(format!("invalid JSON: {e}"))),
    }
}

fn frame_type(parts: &[Value]) -> RelayResult<&str> {
    parts
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| RelayError::ProtocolFrame("missing frame type".to_string()))
}

fn parse_str(value: &Value, what: &str) -> RelayResult<String> {
    value
        .as_str()
        .map(ToString::to_string)
        .ok_or_else(|| RelayError::ProtocolFrame(format!("{what} is not a string")))
}

fn optional_str(value: Option<&Value>, what: &str) -> RelayResult<String> {
    value.map_or_else(|| Ok(String::new()), |v| parse_str(v, what))
}

fn parse_event(value: &Value) -> RelayResult<Event> {
    serde_json::from_value(value.clone())
        .map_err(|e| RelayError::ProtocolFrame(format!("bad event: {e}")))
}
