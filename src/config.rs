//! Bootstrap settings loaded from the environment.
//!
//! Every key may be namespaced by setting `APP_PREFIX`: with
//! `APP_PREFIX=TRADER` the API key is read from `TRADER_FMP_API_KEY`.
//! Loading a `.env` file is left to the binary.

use std::sync::Arc;

use url::Url;

use crate::auth::{API_KEY_VAR, Credentials, StaticCredentials};
use crate::error::FmpError;
use crate::ws::endpoints;

/// Environment variable holding an optional prefix for every other key.
pub const APP_PREFIX_VAR: &str = "APP_PREFIX";

/// Environment variable overriding the WebSocket endpoint.
pub const WS_URL_VAR: &str = "FMP_WS_URL";

/// Validated connection parameters.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Credentials for the login frame.
    pub credentials: Credentials,
    /// WebSocket endpoint to dial.
    pub endpoint: Url,
}

impl Settings {
    /// Build validated settings from an API key and endpoint.
    pub fn new(api_key: impl Into<String>, endpoint: &str) -> Result<Self, FmpError> {
        let credentials = Credentials::new(api_key);
        if credentials.is_blank() {
            return Err(FmpError::MissingCredentials);
        }

        let endpoint = Url::parse(endpoint)?;
        match endpoint.scheme() {
            "ws" | "wss" => {}
            other => {
                return Err(FmpError::Config(format!(
                    "endpoint scheme must be ws or wss, got {other}"
                )));
            }
        }

        Ok(Self {
            credentials,
            endpoint,
        })
    }

    /// Load settings from the process environment.
    pub fn from_env() -> Result<Self, FmpError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, FmpError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let prefix = lookup(APP_PREFIX_VAR)
            .filter(|p| !p.is_empty())
            .map(|p| format!("{p}_"))
            .unwrap_or_default();

        let api_key =
            lookup(&format!("{prefix}{API_KEY_VAR}")).ok_or(FmpError::MissingCredentials)?;
        let endpoint = lookup(&format!("{prefix}{WS_URL_VAR}"))
            .unwrap_or_else(|| endpoints::QUOTES.to_string());

        Self::new(api_key, &endpoint)
    }

    /// Credentials wrapped as a shareable provider.
    pub fn credentials_provider(&self) -> Arc<StaticCredentials> {
        Arc::new(StaticCredentials::from(self.credentials.clone()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_to_public_endpoint() {
        let settings = Settings::from_lookup(lookup(&[("FMP_API_KEY", "abc")])).unwrap();
        assert_eq!(settings.credentials.expose_api_key(), "abc");
        assert_eq!(settings.endpoint.as_str(), "wss://websockets.financialmodelingprep.com/");
    }

    #[test]
    fn test_prefixed_keys() {
        let settings = Settings::from_lookup(lookup(&[
            ("APP_PREFIX", "TRADER"),
            ("TRADER_FMP_API_KEY", "prefixed"),
            ("TRADER_FMP_WS_URL", "ws://127.0.0.1:9000"),
            ("FMP_API_KEY", "ignored"),
        ]))
        .unwrap();
        assert_eq!(settings.credentials.expose_api_key(), "prefixed");
        assert_eq!(settings.endpoint.port(), Some(9000));
    }

    #[test]
    fn test_missing_key() {
        let err = Settings::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, FmpError::MissingCredentials));

        let err = Settings::from_lookup(lookup(&[("FMP_API_KEY", "  ")])).unwrap_err();
        assert!(matches!(err, FmpError::MissingCredentials));
    }

    #[test]
    fn test_rejects_http_endpoint() {
        let err = Settings::new("abc", "https://financialmodelingprep.com").unwrap_err();
        assert!(matches!(err, FmpError::Config(_)));

        let err = Settings::new("abc", "not a url").unwrap_err();
        assert!(matches!(err, FmpError::Url(_)));
    }
}
