//! FMP WebSocket message types.
//!
//! Every frame is a single JSON object. Control frames sent by the client carry
//! an `event` tag and a `data` payload; the server answers with an `event`
//! tagged acknowledgement. Quote frames have no `event` tag.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_with::{TimestampMilliSeconds, serde_as};
use time::OffsetDateTime;

/// Message type tag carried by quote frames.
pub const QUOTE_MESSAGE_TYPE: &str = "Q";


// Request Messages


/// Login payload.
#[derive(Clone, Serialize)]
pub struct LoginData {
    /// API key.
    #[serde(rename = "apiKey")]
    pub api_key: String,
}

impl std::fmt::Debug for LoginData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginData")
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

/// Subscribe/unsubscribe payload.
#[derive(Debug, Clone, Serialize)]
pub struct TickerData {
    /// Symbols to add or remove.
    pub ticker: Vec<String>,
}

/// A client-initiated control frame.
///
/// Serializes as `{"event":"<kind>","data":{...}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum ControlFrame {
    /// Authenticate the session.
    Login(LoginData),
    /// Start streaming quotes for symbols.
    Subscribe(TickerData),
    /// Stop streaming quotes for symbols.
    Unsubscribe(TickerData),
}

impl ControlFrame {
    /// Create a login frame.
    pub fn login(api_key: impl Into<String>) -> Self {
        Self::Login(LoginData {
            api_key: api_key.into(),
        })
    }

    /// Create a subscribe frame.
    pub fn subscribe(symbols: Vec<String>) -> Self {
        Self::Subscribe(TickerData { ticker: symbols })
    }

    /// Create an unsubscribe frame.
    pub fn unsubscribe(symbols: Vec<String>) -> Self {
        Self::Unsubscribe(TickerData { ticker: symbols })
    }

    /// The acknowledgement kind the server answers this frame with.
    pub fn ack_kind(&self) -> AckKind {
        match self {
            Self::Login(_) => AckKind::Login,
            Self::Subscribe(_) => AckKind::Subscribe,
            Self::Unsubscribe(_) => AckKind::Unsubscribe,
        }
    }
}


// Response Messages


/// Event tag of an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckKind {
    /// Login acknowledgement.
    Login,
    /// Subscribe acknowledgement.
    Subscribe,
    /// Unsubscribe acknowledgement.
    Unsubscribe,
    /// Keep-alive from the server.
    Heartbeat,
    /// Any other event tag.
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for AckKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Login => "login",
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::Heartbeat => "heartbeat",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Generic envelope every inbound frame is first decoded into.
///
/// Unknown fields (quote payloads) are ignored at this stage.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InboundEnvelope {
    /// Event tag; absent on quote frames.
    #[serde(default)]
    pub event: Option<AckKind>,
    /// Message type (`"Q"` for quotes).
    #[serde(default, rename = "type")]
    pub message_type: Option<String>,
    /// Server message.
    #[serde(default)]
    pub message: Option<String>,
    /// Numeric status code.
    #[serde(default)]
    pub status: Option<i64>,
    /// Server timestamp.
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// An acknowledgement of a control frame (or a heartbeat).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckEvent {
    /// Which control frame this answers.
    pub kind: AckKind,
    /// Numeric status code, if the server sent one.
    pub status: Option<i64>,
    /// Server-provided message.
    pub message: Option<String>,
    /// Server timestamp.
    pub timestamp: Option<i64>,
}

impl AckEvent {
    /// Build an ack of `kind` from a decoded envelope.
    pub fn from_envelope(kind: AckKind, envelope: InboundEnvelope) -> Self {
        Self {
            kind,
            status: envelope.status,
            message: envelope.message,
            timestamp: envelope.timestamp,
        }
    }

    /// A status in `1..400` is a success; a missing, zero or `>= 400` status is not.
    pub fn is_success(&self) -> bool {
        matches!(self.status, Some(status) if status > 0 && status < 400)
    }

    /// Human readable failure reason.
    ///
    /// The server message when present, otherwise the numeric status.
    pub fn failure_reason(&self) -> String {
        match (&self.message, self.status) {
            (Some(message), _) => message.clone(),
            (None, Some(status)) => format!("unexpected error code: {status}"),
            (None, None) => "unexpected error code: none".to_string(),
        }
    }

    /// `Ok(self)` on success, otherwise the failure reason.
    pub fn into_result(self) -> Result<Self, String> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(self.failure_reason())
        }
    }
}

/// A real-time quote tick.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    /// Ticker symbol.
    #[serde(rename = "s")]
    pub symbol: String,
    /// Best ask price.
    #[serde(rename = "ap", default)]
    pub ask_price: Decimal,
    /// Best ask size.
    #[serde(rename = "as", default)]
    pub ask_size: Decimal,
    /// Best bid price.
    #[serde(rename = "bp", default)]
    pub bid_price: Decimal,
    /// Best bid size.
    #[serde(rename = "bs", default)]
    pub bid_size: Decimal,
    /// Last trade price. Zero for book-only updates.
    #[serde(rename = "lp", default)]
    pub last_price: Decimal,
    /// Exchange timestamp (epoch milliseconds on the wire).
    #[serde(rename = "t")]
    #[serde_as(as = "Option<TimestampMilliSeconds<i64>>")]
    pub timestamp: Option<OffsetDateTime>,
}

impl Quote {
    /// Whether this tick carries a last trade price.
    pub fn has_trade(&self) -> bool {
        !self.last_price.is_zero()
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use time::macros::datetime;

    use super::*;

    #[test]
    fn test_control_frame_shapes() {
        let login = serde_json::to_value(ControlFrame::login("key-123")).unwrap();
        assert_eq!(
            login,
            serde_json::json!({"event": "login", "data": {"apiKey": "key-123"}})
        );

        let subscribe =
            serde_json::to_value(ControlFrame::subscribe(vec!["AAPL".into(), "MSFT".into()]))
                .unwrap();
        assert_eq!(
            subscribe,
            serde_json::json!({"event": "subscribe", "data": {"ticker": ["AAPL", "MSFT"]}})
        );

        let unsubscribe =
            serde_json::to_value(ControlFrame::unsubscribe(vec!["AAPL".into()])).unwrap();
        assert_eq!(
            unsubscribe,
            serde_json::json!({"event": "unsubscribe", "data": {"ticker": ["AAPL"]}})
        );
    }

    #[test]
    fn test_login_debug_redacts_key() {
        let frame = ControlFrame::login("key-123");
        assert!(!format!("{frame:?}").contains("key-123"));
        assert_eq!(frame.ack_kind(), AckKind::Login);
    }

    #[test]
    fn test_envelope_ack() {
        let env: InboundEnvelope = serde_json::from_str(
            r#"{"event":"login","type":null,"message":"Connected","status":200,"timestamp":1706000000000}"#,
        )
        .unwrap();
        assert_eq!(env.event, Some(AckKind::Login));
        assert!(env.message_type.is_none());

        let ack = AckEvent::from_envelope(AckKind::Login, env);
        assert!(ack.is_success());
        assert_eq!(ack.message.as_deref(), Some("Connected"));
    }

    #[test]
    fn test_envelope_unknown_event_and_quote() {
        let env: InboundEnvelope = serde_json::from_str(r#"{"event":"error"}"#).unwrap();
        assert_eq!(env.event, Some(AckKind::Unknown));

        let env: InboundEnvelope =
            serde_json::from_str(r#"{"s":"aapl","type":"Q","lp":150.2}"#).unwrap();
        assert!(env.event.is_none());
        assert_eq!(env.message_type.as_deref(), Some(QUOTE_MESSAGE_TYPE));
    }

    #[test]
    fn test_ack_failure_rules() {
        let ack = |status: Option<i64>, message: Option<&str>| AckEvent {
            kind: AckKind::Subscribe,
            status,
            message: message.map(String::from),
            timestamp: None,
        };

        assert!(ack(Some(200), None).is_success());
        assert!(!ack(Some(400), None).is_success());
        assert!(!ack(Some(0), None).is_success());
        assert!(!ack(None, None).is_success());

        assert_eq!(
            ack(Some(401), Some("Invalid API KEY")).into_result().unwrap_err(),
            "Invalid API KEY"
        );
        assert_eq!(
            ack(Some(500), None).into_result().unwrap_err(),
            "unexpected error code: 500"
        );
        assert_eq!(
            ack(None, None).into_result().unwrap_err(),
            "unexpected error code: none"
        );
    }

    #[test]
    fn test_quote_decodes_all_fields() {
        let quote: Quote = serde_json::from_str(
            r#"{"s":"AAPL","ap":123.5,"as":200,"bp":123.4,"bs":100,"lp":123.45,"t":1706000000123,"type":"Q"}"#,
        )
        .unwrap();

        assert_eq!(quote.symbol, "AAPL");
        assert_eq!(quote.ask_price, Decimal::from_str("123.5").unwrap());
        assert_eq!(quote.ask_size, Decimal::from(200));
        assert_eq!(quote.bid_price, Decimal::from_str("123.4").unwrap());
        assert_eq!(quote.bid_size, Decimal::from(100));
        assert_eq!(quote.last_price, Decimal::from_str("123.45").unwrap());
        assert_eq!(quote.timestamp, Some(datetime!(2024-01-23 08:53:20.123 UTC)));
        assert!(quote.has_trade());
    }

    #[test]
    fn test_quote_without_trade() {
        let quote: Quote =
            serde_json::from_str(r#"{"s":"AAPL","ap":1.5,"bp":1.4,"lp":0}"#).unwrap();
        assert!(!quote.has_trade());

        let quote: Quote = serde_json::from_str(r#"{"s":"AAPL","ap":1.5}"#).unwrap();
        assert!(!quote.has_trade());
        assert!(quote.timestamp.is_none());
    }

    #[test]
    fn test_quote_serializes_wire_names() {
        let quote: Quote =
            serde_json::from_str(r#"{"s":"AAPL","lp":150.2,"t":1706000000123}"#).unwrap();
        let value = serde_json::to_value(&quote).unwrap();

        assert_eq!(value["s"], "AAPL");
        assert_eq!(value["lp"], "150.2");
        assert_eq!(value["t"], 1_706_000_000_123i64);
    }

    #[test]
    fn test_quote_requires_symbol() {
        assert!(serde_json::from_str::<Quote>(r#"{"lp":1.0}"#).is_err());
    }
}
