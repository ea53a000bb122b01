//! Wire messages exchanged with the home-automation hub's message bus.
//!
//! All frames are JSON, discriminated by a top-level `type` field, mirroring
//! the hub's own event-bus wire format.

use serde::{Deserialize, Serialize};

use crate::model::RawEvent;

/// Client -> hub: authenticate the connection. Sent immediately after the
/// transport opens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequest {
    pub access_token: String,
}

/// Hub -> client: authentication accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthAccepted {
    pub ha_version: String,
}

/// Hub -> client: authentication rejected. The client never logs
/// `access_token`; only a fingerprint derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRejected {
    pub message: String,
}

/// Client -> hub: subscribe to an event type. Default subscription is
/// `state_changed` only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeEvents {
    pub id: u64,
    pub event_type: String,
}

/// Hub -> client: subscription accepted. This is the *only* signal that
/// moves the session from `Subscribing` to `Subscribed`; subscribe
/// requests sent before this frame arrives are not confirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeOk {
    pub id: u64,
}

/// Hub -> client: an event for a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    pub id: u64,
    pub event: RawEvent,
}

/// Bidirectional: keepalive ping. The hub sends these on an interval; the
/// client must reply with `Pong` within the protocol's keepalive window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    pub id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    pub id: u64,
}

/// Hub -> client: protocol-level error not tied to a specific subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubError {
    pub code: String,
    pub message: String,
}

/// All frame kinds exchanged over the hub connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum HubFrame {
    AuthRequest(AuthRequest),
    AuthAccepted(AuthAccepted),
    AuthRejected(AuthRejected),
    SubscribeEvents(SubscribeEvents),
    SubscribeOk(SubscribeOk),
    Event(EventFrame),
    Ping(Ping),
    Pong(Pong),
    Error(HubError),
}
