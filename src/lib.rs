//! # FMP Client
//!
//! An async Rust client for the Financial Modeling Prep real-time quote
//! WebSocket feed.
//!
//! ## Features
//!
//! - Persistent, authenticated WebSocket connection
//! - Acknowledged subscriptions with reconnect-time replay
//! - Bounded, supervised restarts of the read loop
//! - Cooperative cancellation via `tokio_util::sync::CancellationToken`
//! - Financial precision with `rust_decimal`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use fmp_api_client::config::Settings;
//! use fmp_api_client::ws::{FmpWsClient, WsConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = Settings::from_env()?;
//!     let client = FmpWsClient::from_settings(&settings, WsConfig::default());
//!
//!     client.connect(settings.endpoint.as_str()).await?;
//!     client.subscribe(&["AAPL", "MSFT"]).await?;
//!
//!     if let Some(mut quotes) = client.quotes() {
//!         while let Some(quote) = quotes.recv().await {
//!             println!("{} {}", quote.symbol, quote.last_price);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod ws;

// Re-export commonly used types at crate root
pub use error::FmpError;
pub use ws::{ConnectionState, FmpWsClient, Quote, QuoteStream, WsConfig};

/// Result type alias using FmpError
pub type Result<T> = std::result::Result<T, FmpError>;
