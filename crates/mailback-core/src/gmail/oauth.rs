use std::convert::Infallible;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
pub const DEFAULT_REFRESH_BUFFER: Duration = Duration::minutes(5);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl OAuthTokens {
    pub fn needs_refresh(&self, now: DateTime<Utc>, buffer: Duration) -> bool {
        now + buffer >= self.expires_at
    }
}

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("missing refresh token")]
    MissingRefreshToken,
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("token response decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("token endpoint error {status}: {body}")]
    TokenEndpoint { status: u16, body: String },
    #[error("invalid expires_in value: {0}")]
    InvalidExpires(i64),
}

/// Persists tokens after a refresh so the next start can reuse them.
#[async_trait]
pub trait TokenStore: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn save_tokens(&self, tokens: &OAuthTokens) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone, Default)]
pub struct NoopTokenStore;

#[async_trait]
impl TokenStore for NoopTokenStore {
    type Error = Infallible;

    async fn save_tokens(&self, _tokens: &OAuthTokens) -> Result<(), Self::Error> {
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
    #[serde(default)]
    refresh_token: Option<String>,
}

pub async fn refresh_access_token(
    client: &reqwest::Client,
    client_id: &str,
    client_secret: &str,
    tokens: &OAuthTokens,
    endpoint: &str,
) -> Result<OAuthTokens, OAuthError> {
    if tokens.refresh_token.is_empty() {
        return Err(OAuthError::MissingRefreshToken);
    }

    let payload = post_token_form(
        client,
        endpoint,
        &[
            ("grant_type", "refresh_token"),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("refresh_token", tokens.refresh_token.as_str()),
        ],
    )
    .await?;

    // Google omits the refresh token on refresh unless it rotated.
    let refresh_token = payload
        .refresh_token
        .unwrap_or_else(|| tokens.refresh_token.clone());
    Ok(OAuthTokens {
        access_token: payload.access_token,
        refresh_token,
        expires_at: Utc::now() + Duration::seconds(payload.expires_in),
    })
}

/// Trade the code from the consent redirect for an initial token set.
pub async fn exchange_authorization_code(
    client: &reqwest::Client,
    client_id: &str,
    client_secret: &str,
    code: &str,
    redirect_uri: &str,
    endpoint: &str,
) -> Result<OAuthTokens, OAuthError> {
    let payload = post_token_form(
        client,
        endpoint,
        &[
            ("grant_type", "authorization_code"),
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ],
    )
    .await?;

    let refresh_token = payload
        .refresh_token
        .filter(|token| !token.is_empty())
        .ok_or(OAuthError::MissingRefreshToken)?;
    Ok(OAuthTokens {
        access_token: payload.access_token,
        refresh_token,
        expires_at: Utc::now() + Duration::seconds(payload.expires_in),
    })
}

async fn post_token_form(
    client: &reqwest::Client,
    endpoint: &str,
    form: &[(&str, &str)],
) -> Result<TokenResponse, OAuthError> {
    let response = client.post(endpoint).form(form).send().await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(OAuthError::TokenEndpoint {
            status: status.as_u16(),
            body,
        });
    }

    let body = response.text().await?;
    let payload: TokenResponse = serde_json::from_str(&body)?;
    if payload.expires_in <= 0 {
        return Err(OAuthError::InvalidExpires(payload.expires_in));
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn tokens(refresh: &str) -> OAuthTokens {
        OAuthTokens {
            access_token: "old".into(),
            refresh_token: refresh.into(),
            expires_at: Utc::now(),
        }
    }

    #[test]
    fn needs_refresh_respects_buffer() {
        let tokens = OAuthTokens {
            access_token: "a".into(),
            refresh_token: "r".into(),
            expires_at: Utc::now() + Duration::minutes(4),
        };

        assert!(tokens.needs_refresh(Utc::now(), Duration::minutes(5)));
        assert!(!tokens.needs_refresh(Utc::now(), Duration::minutes(1)));
    }

    #[tokio::test]
    async fn refresh_keeps_refresh_token_when_not_rotated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=keep-me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "fresh",
                "expires_in": 3600,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let refreshed = refresh_access_token(
            &reqwest::Client::new(),
            "client",
            "secret",
            &tokens("keep-me"),
            &format!("{}/token", server.uri()),
        )
        .await
        .expect("refresh succeeds");

        assert_eq!(refreshed.access_token, "fresh");
        assert_eq!(refreshed.refresh_token, "keep-me");
        assert!(refreshed.expires_at > Utc::now() + Duration::minutes(59));
    }

    #[tokio::test]
    async fn refresh_without_refresh_token_fails_fast() {
        let err = refresh_access_token(
            &reqwest::Client::new(),
            "client",
            "secret",
            &tokens(""),
            "http://127.0.0.1:9/token",
        )
        .await
        .expect_err("should fail");

        assert!(matches!(err, OAuthError::MissingRefreshToken));
    }

    #[tokio::test]
    async fn token_endpoint_errors_carry_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid_grant"))
            .mount(&server)
            .await;

        let err = refresh_access_token(
            &reqwest::Client::new(),
            "client",
            "secret",
            &tokens("revoked"),
            &format!("{}/token", server.uri()),
        )
        .await
        .expect_err("should fail");

        match err {
            OAuthError::TokenEndpoint { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body, "invalid_grant");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn exchange_code_requires_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "a",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;

        let err = exchange_authorization_code(
            &reqwest::Client::new(),
            "client",
            "secret",
            "code-1",
            "http://127.0.0.1:1/cb",
            &format!("{}/token", server.uri()),
        )
        .await
        .expect_err("should fail");

        assert!(matches!(err, OAuthError::MissingRefreshToken));
    }

    #[tokio::test]
    async fn exchange_code_returns_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("code=code-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "a",
                "refresh_token": "r",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tokens = exchange_authorization_code(
            &reqwest::Client::new(),
            "client",
            "secret",
            "code-1",
            "http://127.0.0.1:1/cb",
            &format!("{}/token", server.uri()),
        )
        .await
        .expect("exchange succeeds");

        assert_eq!(tokens.access_token, "a");
        assert_eq!(tokens.refresh_token, "r");
    }
}
