// Client-credentials token exchange

use chrono::{Duration, Utc};
use reqwest::{Client, Url};

use super::types::{Credentials, Token, TokenErrorResponse, TokenResponse};
use crate::error::{BsnError, Result};

/// Lifetime assumed when the token endpoint omits `expires_in`
const DEFAULT_EXPIRES_IN: i64 = 3600;

/// Exchange client credentials for an access token
///
/// The returned expiry already has `margin` subtracted, so a token is
/// replaced before the server starts rejecting it.
pub async fn exchange_client_credentials(
    client: &Client,
    auth_url: &Url,
    creds: &Credentials,
    margin: std::time::Duration,
) -> Result<Token> {
    tracing::info!("Requesting access token via client-credentials grant...");

    let client_id = creds.client_id();
    tracing::debug!(
        "Token request: url={}, client_id={}...",
        auth_url,
        client_id.chars().take(8).collect::<String>()
    );

    let form = [("grant_type", "client_credentials")];

    let response = client
        .post(auth_url.clone())
        .basic_auth(client_id, Some(creds.client_secret()))
        .form(&form)
        .send()
        .await
        .map_err(|e| {
            tracing::error!("Token request could not be sent: {}", e);
            BsnError::network(&e)
        })?;

    let status = response.status();
    let body = response.text().await.map_err(|e| BsnError::network(&e))?;

    if !status.is_success() {
        tracing::error!("Token exchange failed: status={}", status);

        if status.is_client_error() {
            let reason = serde_json::from_str::<TokenErrorResponse>(&body)
                .ok()
                .and_then(|e| match (e.error, e.error_description) {
                    (_, Some(desc)) => Some(desc),
                    (Some(code), None) => Some(code),
                    (None, None) => None,
                })
                .unwrap_or_else(|| status.to_string());
            return Err(BsnError::Authentication(format!(
                "token exchange rejected ({}): {}",
                status.as_u16(),
                reason
            )));
        }

        return Err(BsnError::from_response(status.as_u16(), &body));
    }

    let data: TokenResponse = serde_json::from_str(&body).map_err(|e| {
        BsnError::api(
            status.as_u16(),
            "invalid_response",
            format!("failed to parse token response: {}", e),
        )
    })?;

    if data.access_token.is_empty() {
        return Err(BsnError::Authentication(
            "token endpoint response does not contain access_token".to_string(),
        ));
    }

    let expires_in = data.expires_in.unwrap_or(DEFAULT_EXPIRES_IN).max(0);
    let margin = Duration::from_std(margin).unwrap_or_else(|_| Duration::seconds(expires_in));
    let lifetime = (Duration::seconds(expires_in) - margin).max(Duration::zero());
    let expires_at = Utc::now() + lifetime;

    tracing::info!("Access token obtained, expires: {}", expires_at.to_rfc3339());

    Ok(Token {
        access_token: data.access_token,
        token_type: data.token_type.unwrap_or_else(|| "Bearer".to_string()),
        scope: data.scope,
        expires_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn creds() -> Credentials {
        Credentials::new("client-abc", "s3cret").unwrap()
    }

    fn token_url(server: &mockito::ServerGuard) -> Url {
        Url::parse(&format!("{}/token", server.url())).unwrap()
    }

    #[tokio::test]
    async fn test_exchange_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/token")
            .match_header("authorization", Matcher::Regex("^Basic ".to_string()))
            .match_body(Matcher::UrlEncoded(
                "grant_type".to_string(),
                "client_credentials".to_string(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"tok-1","expires_in":3600,"token_type":"bearer","scope":"bsn"}"#)
            .expect(1)
            .create_async()
            .await;

        let token = exchange_client_credentials(
            &Client::new(),
            &token_url(&server),
            &creds(),
            std::time::Duration::from_secs(60),
        )
        .await
        .unwrap();

        assert_eq!(token.access_token, "tok-1");
        assert_eq!(token.token_type, "bearer");
        assert_eq!(token.scope.as_deref(), Some("bsn"));
        let remaining = token.expires_at - Utc::now();
        assert!(remaining <= Duration::seconds(3540));
        assert!(remaining > Duration::seconds(3500));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_margin_larger_than_lifetime() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(200)
            .with_body(r#"{"access_token":"short","expires_in":30}"#)
            .create_async()
            .await;

        let token = exchange_client_credentials(
            &Client::new(),
            &token_url(&server),
            &creds(),
            std::time::Duration::from_secs(60),
        )
        .await
        .unwrap();

        assert!(!token.is_valid());
        assert_eq!(token.token_type, "Bearer");
    }

    #[tokio::test]
    async fn test_bad_credentials_is_authentication_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(401)
            .with_body(r#"{"error":"invalid_client","error_description":"Invalid client credentials"}"#)
            .create_async()
            .await;

        let err = exchange_client_credentials(
            &Client::new(),
            &token_url(&server),
            &creds(),
            std::time::Duration::from_secs(60),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, BsnError::Authentication(ref m) if m.contains("Invalid client credentials")));
    }

    #[tokio::test]
    async fn test_server_error_is_api_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(502)
            .with_body("bad gateway")
            .create_async()
            .await;

        let err = exchange_client_credentials(
            &Client::new(),
            &token_url(&server),
            &creds(),
            std::time::Duration::from_secs(60),
        )
        .await
        .unwrap_err();

        assert_eq!(err.status(), Some(502));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_missing_access_token() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/token")
            .with_status(200)
            .with_body(r#"{"expires_in":3600}"#)
            .create_async()
            .await;

        let err = exchange_client_credentials(
            &Client::new(),
            &token_url(&server),
            &creds(),
            std::time::Duration::from_secs(60),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, BsnError::Authentication(_)));
    }
}
