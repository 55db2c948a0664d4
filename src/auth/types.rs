// Authentication types

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::{BsnError, Result};

/// Client-credentials pair, validated on construction
#[derive(Clone, PartialEq)]
pub struct Credentials {
    client_id: String,
    client_secret: String,
}

impl Credentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Result<Self> {
        let client_id = client_id.into().trim().to_string();
        let client_secret = client_secret.into().trim().to_string();

        if client_id.is_empty() {
            return Err(BsnError::Configuration(
                "client id is required (set BS_CLIENT_ID)".to_string(),
            ));
        }
        if client_secret.is_empty() {
            return Err(BsnError::Configuration(
                "client secret is required (set BS_SECRET)".to_string(),
            ));
        }

        Ok(Self {
            client_id,
            client_secret,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

/// Cached bearer token
#[derive(Clone, PartialEq)]
pub struct Token {
    pub access_token: String,
    pub token_type: String,
    pub scope: Option<String>,
    /// Expiry with the safety margin already subtracted
    pub expires_at: DateTime<Utc>,
}

impl Token {
    /// Usable until `expires_at`
    pub fn is_valid(&self) -> bool {
        Utc::now() < self.expires_at
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("access_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Client-credentials grant response
#[derive(Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: String,
    pub expires_in: Option<i64>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
}

/// OAuth error body from the token endpoint
#[derive(Deserialize)]
pub struct TokenErrorResponse {
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_credentials_require_both_values() {
        assert!(Credentials::new("id", "secret").is_ok());

        let err = Credentials::new("", "secret").unwrap_err();
        assert!(matches!(err, BsnError::Configuration(ref m) if m.contains("client id")));

        let err = Credentials::new("id", "   ").unwrap_err();
        assert!(matches!(err, BsnError::Configuration(ref m) if m.contains("client secret")));
    }

    #[test]
    fn test_credentials_debug_hides_secret() {
        let creds = Credentials::new("my-client", "super-secret").unwrap();
        let printed = format!("{:?}", creds);
        assert!(printed.contains("my-client"));
        assert!(!printed.contains("super-secret"));
    }

    #[test]
    fn test_token_validity() {
        let mut token = Token {
            access_token: "abc".to_string(),
            token_type: "Bearer".to_string(),
            scope: None,
            expires_at: Utc::now() + Duration::seconds(600),
        };
        assert!(token.is_valid());
        assert!(!format!("{:?}", token).contains("abc"));

        token.expires_at = Utc::now() - Duration::seconds(1);
        assert!(!token.is_valid());
    }
}
