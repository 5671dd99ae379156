//! Client-credentials token exchange.
//!
//! Posts `client_id`, `client_secret` and `grant_type=client_credentials` as a
//! form to the credential's token URL. No retries happen here.

use crate::credentials::Credential;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

/// A freshly issued access token and its lifetime in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct IssuedToken {
    pub access_token: String,
    pub expires_in: i64,
}

/// Exchanges a credential for a new access token.
#[async_trait]
pub trait TokenIssuer: Send + Sync {
    async fn issue(&self, credential: &Credential) -> Result<IssuedToken>;
}

/// `expires_in` arrives as a number from most servers and as a numeric
/// string from SatuSehat.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum ExpiresIn {
    Seconds(i64),
    Text(String),
}

impl ExpiresIn {
    fn seconds(&self) -> Result<i64> {
        match self {
            ExpiresIn::Seconds(s) => Ok(*s),
            ExpiresIn::Text(s) => s
                .trim()
                .parse()
                .with_context(|| format!("expires_in is not a number: {:?}", s)),
        }
    }
}

#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    expires_in: ExpiresIn,
}

/// Token issuer backed by an HTTP token endpoint.
pub struct HttpTokenIssuer {
    client: reqwest::Client,
}

impl HttpTokenIssuer {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build token HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl TokenIssuer for HttpTokenIssuer {
    async fn issue(&self, credential: &Credential) -> Result<IssuedToken> {
        let form = [
            ("client_id", credential.client_id.as_str()),
            ("client_secret", credential.client_secret.as_str()),
            ("grant_type", "client_credentials"),
        ];

        tracing::debug!(token_url = %credential.token_url, "Requesting access token");

        let response = self
            .client
            .post(&credential.token_url)
            .header("Accept", "application/json")
            .form(&form)
            .send()
            .await
            .context("Failed to send token request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!(
                "Token request failed with status {}: {}",
                status,
                body
            ));
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .context("Failed to parse token response")?;

        if parsed.access_token.is_empty() {
            return Err(anyhow!("Token response carried an empty access_token"));
        }

        let expires_in = parsed.expires_in.seconds()?;
        if expires_in <= 0 {
            return Err(anyhow!(
                "Token response carried a non-positive expires_in: {}",
                expires_in
            ));
        }

        tracing::debug!(expires_in, "Access token issued");

        Ok(IssuedToken {
            access_token: parsed.access_token,
            expires_in,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn credential(token_url: String) -> Credential {
        Credential {
            client_id: "simrs-client".to_string(),
            client_secret: "simrs-secret".to_string(),
            token_url,
        }
    }

    fn issuer() -> HttpTokenIssuer {
        HttpTokenIssuer::new(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_token_response_numeric_expiry() {
        let json = r#"{"access_token":"abc","expires_in":3599,"token_type":"BearerToken"}"#;
        let response: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.access_token, "abc");
        assert_eq!(response.expires_in.seconds().unwrap(), 3599);
    }

    #[test]
    fn test_token_response_string_expiry() {
        let json = r#"{"access_token":"abc","expires_in":"14399","issued_at":"1700000000000"}"#;
        let response: TokenResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.expires_in.seconds().unwrap(), 14399);
    }

    #[test]
    fn test_token_response_missing_expiry_rejected() {
        let json = r#"{"access_token":"abc"}"#;
        assert!(serde_json::from_str::<TokenResponse>(json).is_err());
    }

    #[tokio::test]
    async fn test_issue_posts_client_credentials_form() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/oauth2/v1/accesstoken")
            .match_header("content-type", "application/x-www-form-urlencoded")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("client_id".into(), "simrs-client".into()),
                Matcher::UrlEncoded("client_secret".into(), "simrs-secret".into()),
                Matcher::UrlEncoded("grant_type".into(), "client_credentials".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"tok-1","expires_in":"3600"}"#)
            .create_async()
            .await;

        let issued = issuer()
            .issue(&credential(format!("{}/oauth2/v1/accesstoken", server.url())))
            .await
            .unwrap();

        assert_eq!(issued.access_token, "tok-1");
        assert_eq!(issued.expires_in, 3600);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_issue_non_success_status_is_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/token")
            .with_status(401)
            .with_body(r#"{"error":"invalid_client"}"#)
            .create_async()
            .await;

        let err = issuer()
            .issue(&credential(format!("{}/token", server.url())))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn test_issue_unparseable_body_is_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/token")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let result = issuer()
            .issue(&credential(format!("{}/token", server.url())))
            .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_issue_non_positive_expiry_rejected() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/token")
            .with_status(200)
            .with_body(r#"{"access_token":"tok-1","expires_in":"-1"}"#)
            .create_async()
            .await;

        let err = issuer()
            .issue(&credential(format!("{}/token", server.url())))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("non-positive expires_in"));
    }

    #[tokio::test]
    async fn test_issue_transport_error() {
        // Nothing listens on port 9 (discard) in the test environment
        let result = issuer()
            .issue(&credential("http://127.0.0.1:9/token".to_string()))
            .await;

        assert!(result.is_err());
    }
}
