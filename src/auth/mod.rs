//! Authentication module for the FMP quote feed.
//!
//! The feed authenticates a session with a single API key carried in the
//! login frame. This module keeps that key out of logs and lets callers plug
//! in their own credential source.

mod credentials;

pub use credentials::{
    API_KEY_VAR, Credentials, CredentialsProvider, EnvCredentials, StaticCredentials,
};
