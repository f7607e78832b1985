//! Wire protocol encoding/decoding
//!
//! Frames are JSON objects tagged with a `type` field:
//! - Outbound control: `{"type":"ping"}`, `{"type":"subscribe","channel":C,"id":ID}`
//! - Inbound control: `{"type":"pong"}`, `{"type":"connection_established","session_id":S}`
//! - Everything else is an application frame and passes through untouched.

use serde_json::{json, Value};
use url::Url;

use crate::error::ConnectionError;

/// Liveness frame sent by the client
pub const PING: &str = "ping";
/// Liveness acknowledgment sent by the server
pub const PONG: &str = "pong";
/// Subscribe/identify frame sent once per open
pub const SUBSCRIBE: &str = "subscribe";
/// Session notice sent by the server after the upgrade
pub const CONNECTION_ESTABLISHED: &str = "connection_established";

/// Query parameter carrying the caller correlator
pub const USER_ID_PARAM: &str = "user_id";
/// Query parameter carrying the session correlator
pub const CONVERSATION_ID_PARAM: &str = "conversation_id";

/// Default subscribe channel
pub const DEFAULT_CHANNEL: &str = "conversation";

/// Remote execution endpoint plus optional correlation fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    base: Url,
    user_id: Option<String>,
    conversation_id: Option<String>,
}

impl Endpoint {
    /// Parse and validate a `ws://` or `wss://` address
    pub fn parse(address: &str) -> Result<Self, ConnectionError> {
        let base = Url::parse(address)
            .map_err(|e| ConnectionError::InvalidEndpoint(format!("{address}: {e}")))?;

        match base.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(ConnectionError::InvalidEndpoint(format!(
                    "unsupported scheme {other:?} (expected ws or wss)"
                )))
            }
        }

        Ok(Self {
            base,
            user_id: None,
            conversation_id: None,
        })
    }

    /// Attach the caller correlator
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Attach the session correlator
    pub fn with_conversation_id(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    /// Build the URL for one connection attempt
    pub fn to_url(&self) -> Url {
        let mut url = self.base.clone();
        if self.user_id.is_some() || self.conversation_id.is_some() {
            // Correlators set here replace any the base URL already carries
            let kept: Vec<(String, String)> = self
                .base
                .query_pairs()
                .filter(|(key, _)| {
                    !((key == USER_ID_PARAM && self.user_id.is_some())
                        || (key == CONVERSATION_ID_PARAM && self.conversation_id.is_some()))
                })
                .map(|(key, value)| (key.into_owned(), value.into_owned()))
                .collect();

            let mut pairs = url.query_pairs_mut();
            pairs.clear();
            pairs.extend_pairs(kept);
            if let Some(user_id) = &self.user_id {
                pairs.append_pair(USER_ID_PARAM, user_id);
            }
            if let Some(conversation_id) = &self.conversation_id {
                pairs.append_pair(CONVERSATION_ID_PARAM, conversation_id);
            }
        }
        url
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.base)
    }
}

/// Encode the liveness frame
pub fn ping_frame() -> String {
    json!({ "type": PING }).to_string()
}

/// Encode the subscribe/identify frame
pub fn subscribe_frame(channel: &str, id: &str) -> String {
    json!({ "type": SUBSCRIBE, "channel": channel, "id": id }).to_string()
}

/// Classified inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Liveness acknowledgment, consumed by the manager
    Pong,
    /// Session notice, consumed by the manager
    SessionEstablished { session_id: Option<String> },
    /// Anything else, forwarded verbatim
    Application(Value),
}

/// Decode and classify one inbound text frame
pub fn decode_inbound(text: &str) -> Result<InboundFrame, ConnectionError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ConnectionError::MalformedFrame(e.to_string()))?;

    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| ConnectionError::MalformedFrame("missing string `type` field".into()))?;

    match kind.as_str() {
        PONG => Ok(InboundFrame::Pong),
        CONNECTION_ESTABLISHED => Ok(InboundFrame::SessionEstablished {
            session_id: value
                .get("session_id")
                .and_then(Value::as_str)
                .map(str::to_owned),
        }),
        _ => Ok(InboundFrame::Application(value)),
    }
}
