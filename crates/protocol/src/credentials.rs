//! Credential payload sent by the client right after the WebSocket upgrade.
//!
//! The payload is a single JSON object:
//!
//! ```json
//! { "ip": "10.0.0.5", "username": "dev", "password": "secret", "port": 2222 }
//! ```
//!
//! `port` is optional; when absent the bridge uses its configured SSH port.

use std::fmt;

use serde::Deserialize;

use crate::error::{ProtocolError, Result};

/// A password that never shows up in `Debug` output or logs.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Password(String);

impl Password {
    pub fn new(password: impl Into<String>) -> Self {
        Self(password.into())
    }

    pub fn expose_secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Password(***)")
    }
}

impl From<String> for Password {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// SSH login details supplied by the client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    /// Remote host name or address.
    pub ip: String,
    /// Remote login name.
    pub username: String,
    /// Remote login password.
    pub password: Password,
    /// Optional SSH port; falls back to the bridge default.
    #[serde(default)]
    pub port: Option<u16>,
}

impl Credentials {
    /// Decodes and validates a credential payload.
    pub fn from_json(payload: &[u8]) -> Result<Self> {
        let credentials: Credentials = serde_json::from_slice(payload)?;
        credentials.validate()?;
        Ok(credentials)
    }

    /// Checks that the payload names a host and a user.
    pub fn validate(&self) -> Result<()> {
        if self.ip.trim().is_empty() {
            return Err(ProtocolError::InvalidCredentials(
                "ip must not be empty".to_string(),
            ));
        }
        if self.username.is_empty() {
            return Err(ProtocolError::InvalidCredentials(
                "username must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the port to dial, using `default_port` when none was sent.
    pub fn port_or(&self, default_port: u16) -> u16 {
        self.port.unwrap_or(default_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_minimal_payload() {
        let creds =
            Credentials::from_json(br#"{"ip":"10.0.0.5","username":"dev","password":"x"}"#)
                .unwrap();
        assert_eq!(creds.ip, "10.0.0.5");
        assert_eq!(creds.username, "dev");
        assert_eq!(creds.password.expose_secret(), "x");
        assert_eq!(creds.port, None);
        assert_eq!(creds.port_or(22), 22);
    }

    #[test]
    fn test_decode_with_port() {
        let creds = Credentials::from_json(
            br#"{"ip":"host.local","username":"root","password":"pw","port":2222}"#,
        )
        .unwrap();
        assert_eq!(creds.port_or(22), 2222);
    }

    #[test]
    fn test_missing_password_fails() {
        let result = Credentials::from_json(br#"{"ip":"10.0.0.5","username":"dev"}"#);
        assert!(matches!(result, Err(ProtocolError::Deserialization(_))));
    }

    #[test]
    fn test_not_json_fails() {
        let result = Credentials::from_json(b"hello");
        assert!(matches!(result, Err(ProtocolError::Deserialization(_))));
    }

    #[test]
    fn test_empty_ip_rejected() {
        let result = Credentials::from_json(br#"{"ip":" ","username":"dev","password":"x"}"#);
        assert!(matches!(result, Err(ProtocolError::InvalidCredentials(_))));
    }

    #[test]
    fn test_empty_username_rejected() {
        let result = Credentials::from_json(br#"{"ip":"10.0.0.5","username":"","password":"x"}"#);
        assert!(matches!(result, Err(ProtocolError::InvalidCredentials(_))));
    }

    #[test]
    fn test_password_redacted_in_debug() {
        let creds = Credentials::from_json(
            br#"{"ip":"10.0.0.5","username":"dev","password":"hunter2"}"#,
        )
        .unwrap();
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("Password(***)"));
    }
}
