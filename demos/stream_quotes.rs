//! Example: Streaming real-time quotes.
//!
//! Reads `FMP_API_KEY` (and optionally `FMP_WS_URL`) from the environment or
//! a `.env` file, subscribes to the symbols given on the command line and
//! prints trade quotes until Ctrl+C.
//!
//! Run with: cargo run --example stream_quotes -- AAPL MSFT

use fmp_api_client::config::Settings;
use fmp_api_client::ws::{FmpWsClient, WsConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenv::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut symbols: Vec<String> = std::env::args().skip(1).collect();
    if symbols.is_empty() {
        symbols.push("AAPL".to_string());
    }

    let settings = Settings::from_env()?;
    let client = FmpWsClient::from_settings(&settings, WsConfig::default());

    println!("Connecting to {}...", settings.endpoint);
    client.connect(settings.endpoint.as_str()).await?;
    let mut quotes = client.quotes().ok_or("quote stream already taken")?;

    client.subscribe(symbols.as_slice()).await?;
    println!("Subscribed to {symbols:?}. Press Ctrl+C to exit.\n");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            quote = quotes.recv() => match quote {
                Some(quote) => println!(
                    "[Quote] {} | Last: {} | Bid: {} x {} | Ask: {} x {}",
                    quote.symbol,
                    quote.last_price,
                    quote.bid_price,
                    quote.bid_size,
                    quote.ask_price,
                    quote.ask_size
                ),
                None => {
                    println!("[Closed] Quote stream ended");
                    break;
                }
            },
        }
    }

    client.disconnect().await?;
    println!("Connection closed.");

    Ok(())
}
