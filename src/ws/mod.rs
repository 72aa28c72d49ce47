//! FMP real-time quote WebSocket client.
//!
//! ## Features
//!
//! - API key login with acknowledgement
//! - Acknowledged subscribe, fire-and-forget unsubscribe
//! - Quotes delivered on a bounded channel; book-only ticks are dropped
//! - Supervised read loop with bounded restarts and subscription replay
//! - Cancellation of connect and subscribe through `CancellationToken`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fmp_api_client::auth::EnvCredentials;
//! use fmp_api_client::ws::{FmpWsClient, endpoints};
//! use futures_util::StreamExt;
//! use std::sync::Arc;
//!
//! let credentials = Arc::new(EnvCredentials::try_from_env().expect("FMP_API_KEY"));
//! let client = FmpWsClient::new(credentials);
//! client.connect(endpoints::QUOTES).await?;
//! client.subscribe(&["AAPL"]).await?;
//!
//! let mut quotes = client.quotes().expect("stream taken once");
//! while let Some(quote) = quotes.next().await {
//!     println!("{}: {}", quote.symbol, quote.last_price);
//! }
//! ```
//!
//! ## Lifecycle
//!
//! `connect` dials, sends the login frame and waits for its acknowledgement.
//! A background task then owns the read side of the socket. When the socket
//! fails it waits, re-dials, logs in again and replays tracked subscriptions
//! (see [`ResubscribePolicy`]). Once the restart budget in [`WsConfig`] is
//! spent the quote stream ends and the client returns to
//! [`ConnectionState::Disconnected`].

mod client;
mod config;
mod connection;
mod dispatcher;
mod gate;
mod messages;
mod registry;
mod stream;
mod supervisor;

pub use client::FmpWsClient;
pub use config::{ResubscribePolicy, WsConfig, WsConfigBuilder};
pub use connection::ConnectionState;
pub use messages::*;
pub use registry::SubscriptionSet;
pub use stream::QuoteStream;

/// WebSocket endpoint URLs.
pub mod endpoints {
    /// Real-time US stock quotes.
    pub const QUOTES: &str = "wss://websockets.financialmodelingprep.com";
}
