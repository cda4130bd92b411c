use std::sync::Arc;

use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

use crate::gmail::{
    oauth::{
        DEFAULT_REFRESH_BUFFER, OAuthError, OAuthTokens, TOKEN_ENDPOINT, TokenStore,
        refresh_access_token,
    },
    types::{
        CreateLabelRequest, Label, ListLabelsResponse, ListMessagesResponse, Message,
        ModifyLabelsRequest, Profile, SendMessageRequest, SentMessage,
    },
};

pub const DEFAULT_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users";

#[derive(Debug, Error)]
pub enum GmailClientError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("oauth error: {0}")]
    OAuth(#[from] OAuthError),
    #[error("token persistence error: {0}")]
    TokenStore(String),
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("unauthorized after refresh")]
    Unauthorized,
}

/// Query options for [`GmailClient::list_messages`].
#[derive(Debug, Clone, Default)]
pub struct ListMessagesQuery<'a> {
    pub label_ids: &'a [String],
    pub query: Option<&'a str>,
    pub page_token: Option<&'a str>,
    pub max_results: Option<u32>,
}

pub struct GmailClient<S: TokenStore> {
    http: Client,
    user_id: String,
    client_id: String,
    client_secret: String,
    api_base: String,
    token_endpoint: String,
    tokens: RwLock<OAuthTokens>,
    refresh_lock: Mutex<()>,
    token_store: Arc<S>,
}

impl<S: TokenStore> GmailClient<S> {
    pub fn new(
        http: Client,
        user_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        initial_tokens: OAuthTokens,
        token_store: Arc<S>,
    ) -> Self {
        Self {
            http,
            user_id: user_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            token_endpoint: TOKEN_ENDPOINT.to_string(),
            tokens: RwLock::new(initial_tokens),
            refresh_lock: Mutex::new(()),
            token_store,
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    pub fn with_token_endpoint(mut self, token_endpoint: impl Into<String>) -> Self {
        self.token_endpoint = token_endpoint.into();
        self
    }

    fn url(&self, rest: &str) -> String {
        format!("{}/{}/{}", self.api_base, self.user_id, rest)
    }

    /// Fetches headers, labels and snippet; bodies are not needed to decide on a reply.
    pub async fn get_message(&self, message_id: &str) -> Result<Message, GmailClientError> {
        let url = self.url(&format!("messages/{message_id}"));
        self.send_json(|| self.http.get(&url).query(&[("format", "metadata")]))
            .await
    }

    pub async fn list_messages(
        &self,
        params: &ListMessagesQuery<'_>,
    ) -> Result<ListMessagesResponse, GmailClientError> {
        let url = self.url("messages");
        self.send_json(|| {
            let mut builder = self.http.get(&url);
            for label in params.label_ids {
                builder = builder.query(&[("labelIds", label.as_str())]);
            }
            if let Some(q) = params.query {
                builder = builder.query(&[("q", q)]);
            }
            if let Some(token) = params.page_token {
                builder = builder.query(&[("pageToken", token)]);
            }
            if let Some(max) = params.max_results {
                builder = builder.query(&[("maxResults", max)]);
            }
            builder
        })
        .await
    }

    /// Sends a base64url-encoded RFC 822 message, optionally into an existing thread.
    pub async fn send_message(
        &self,
        raw: String,
        thread_id: Option<String>,
    ) -> Result<SentMessage, GmailClientError> {
        let url = self.url("messages/send");
        let body = SendMessageRequest { raw, thread_id };
        self.send_json(|| self.http.post(&url).json(&body)).await
    }

    pub async fn modify_message(
        &self,
        message_id: &str,
        add_label_ids: Vec<String>,
        remove_label_ids: Vec<String>,
    ) -> Result<(), GmailClientError> {
        let url = self.url(&format!("messages/{message_id}/modify"));
        let body = ModifyLabelsRequest {
            add_label_ids,
            remove_label_ids,
        };
        self.perform_authenticated(|| self.http.post(&url).json(&body))
            .await?;
        Ok(())
    }

    /// Applies the label change to every message in the thread.
    pub async fn modify_thread(
        &self,
        thread_id: &str,
        add_label_ids: Vec<String>,
        remove_label_ids: Vec<String>,
    ) -> Result<(), GmailClientError> {
        let url = self.url(&format!("threads/{thread_id}/modify"));
        let body = ModifyLabelsRequest {
            add_label_ids,
            remove_label_ids,
        };
        self.perform_authenticated(|| self.http.post(&url).json(&body))
            .await?;
        Ok(())
    }

    /// Fetches the user's Gmail profile, including the account address.
    pub async fn get_profile(&self) -> Result<Profile, GmailClientError> {
        let url = self.url("profile");
        self.send_json(|| self.http.get(&url)).await
    }

    pub async fn list_labels(&self) -> Result<ListLabelsResponse, GmailClientError> {
        let url = self.url("labels");
        self.send_json(|| self.http.get(&url)).await
    }

    pub async fn create_label(&self, name: &str) -> Result<Label, GmailClientError> {
        let url = self.url("labels");
        let body = CreateLabelRequest::visible(name);
        self.send_json(|| self.http.post(&url).json(&body)).await
    }

    /// Looks up a label by name (case-insensitive, as Gmail treats them) and
    /// creates it when missing.
    pub async fn ensure_label(&self, name: &str) -> Result<Label, GmailClientError> {
        let existing = self
            .list_labels()
            .await?
            .labels
            .into_iter()
            .find(|label| label.name.eq_ignore_ascii_case(name));
        match existing {
            Some(label) => Ok(label),
            None => self.create_label(name).await,
        }
    }

    async fn send_json<T, B>(&self, build: B) -> Result<T, GmailClientError>
    where
        T: DeserializeOwned,
        B: Fn() -> reqwest::RequestBuilder + Send + Sync,
    {
        let response = self.perform_authenticated(build).await?;
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(GmailClientError::Decode)
    }

    async fn perform_authenticated<B>(
        &self,
        build: B,
    ) -> Result<reqwest::Response, GmailClientError>
    where
        B: Fn() -> reqwest::RequestBuilder + Send + Sync,
    {
        let tokens = self.ensure_fresh_token(false).await?;
        let mut response = build().bearer_auth(&tokens.access_token).send().await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            let tokens = self.ensure_fresh_token(true).await?;
            response = build().bearer_auth(&tokens.access_token).send().await?;
        }

        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(GmailClientError::Unauthorized);
        }

        Ok(response.error_for_status()?)
    }

    async fn ensure_fresh_token(
        &self,
        force_refresh: bool,
    ) -> Result<OAuthTokens, GmailClientError> {
        if !force_refresh {
            let tokens = self.tokens.read().await;
            if !tokens.needs_refresh(Utc::now(), DEFAULT_REFRESH_BUFFER) {
                return Ok(tokens.clone());
            }
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited on the lock.
        let current = self.tokens.read().await.clone();
        if !force_refresh && !current.needs_refresh(Utc::now(), DEFAULT_REFRESH_BUFFER) {
            return Ok(current);
        }

        let refreshed = refresh_access_token(
            &self.http,
            &self.client_id,
            &self.client_secret,
            &current,
            &self.token_endpoint,
        )
        .await?;

        *self.tokens.write().await = refreshed.clone();

        self.token_store
            .save_tokens(&refreshed)
            .await
            .map_err(|err| GmailClientError::TokenStore(err.to_string()))?;

        Ok(refreshed)
    }
}
