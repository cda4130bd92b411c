//! One-time consent flow that writes the token file the agent starts from.
//!
//! Reads `GMAIL_CLIENT_ID` and `GMAIL_CLIENT_SECRET` (prompting when unset),
//! optional `GMAIL_OAUTH_SCOPES`, and saves to `GMAIL_TOKEN_PATH`
//! (default `token.json`).

use std::env;
use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use mailback_core::gmail::oauth::TOKEN_ENDPOINT;
use mailback_core::gmail::{FileTokenStore, exchange_authorization_code};
use mailback_core::init_logging;
use rand::RngCore;
use rand::rngs::OsRng;
use reqwest::{Client, Url};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

type AnyError = Box<dyn Error + Send + Sync>;

const AUTH_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const CALLBACK_PATH: &str = "/oauth2callback";
const DEFAULT_SCOPE: &str = "https://www.googleapis.com/auth/gmail.modify";
const CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);
const MAX_REQUEST_BYTES: usize = 8192;

const DONE_PAGE: &str = "<!doctype html><html><body style=\"font-family: sans-serif;\">\
<h2>Mailback is authorized</h2><p>You can close this tab.</p></body></html>";

/// Why a loopback callback could not yield a code. Each variant maps to the
/// HTTP status shown to the browser.
#[derive(Debug, Error, PartialEq, Eq)]
enum CallbackError {
    #[error("callback request was not a GET")]
    Method,
    #[error("callback request was malformed")]
    Malformed,
    #[error("consent was denied: {0}")]
    Denied(String),
    #[error("callback carried no authorization code")]
    MissingCode,
    #[error("callback state did not match")]
    StateMismatch,
}

impl CallbackError {
    fn status_line(&self) -> &'static str {
        match self {
            CallbackError::Method => "405 Method Not Allowed",
            _ => "400 Bad Request",
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), AnyError> {
    init_logging("dev")?;

    let client_id = env_or_prompt("GMAIL_CLIENT_ID", "OAuth client ID")?;
    let client_secret = env_or_prompt("GMAIL_CLIENT_SECRET", "OAuth client secret")?;
    let scopes = scopes_from_env(env::var("GMAIL_OAUTH_SCOPES").ok().as_deref());
    let token_path =
        PathBuf::from(env::var("GMAIL_TOKEN_PATH").unwrap_or_else(|_| "token.json".to_string()));

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let redirect_uri = format!(
        "http://127.0.0.1:{}{CALLBACK_PATH}",
        listener.local_addr()?.port()
    );
    let state = random_state();
    let consent_url = consent_url(&client_id, &redirect_uri, &scopes, &state)?;

    println!("Open this URL in a browser and approve access:\n\n{consent_url}\n");
    info!(%redirect_uri, "waiting for consent callback");

    let code = tokio::time::timeout(CALLBACK_TIMEOUT, accept_callback(listener, &state))
        .await
        .map_err(|_| "timed out waiting for the consent callback")??;

    let tokens = exchange_authorization_code(
        &Client::new(),
        &client_id,
        &client_secret,
        &code,
        &redirect_uri,
        TOKEN_ENDPOINT,
    )
    .await?;

    let store = FileTokenStore::new(token_path);
    store.save(&tokens).await?;
    info!(path = %store.path().display(), "saved credentials");
    Ok(())
}

fn env_or_prompt(key: &str, label: &str) -> Result<String, AnyError> {
    if let Ok(value) = env::var(key) {
        if !value.trim().is_empty() {
            return Ok(value);
        }
    }

    print!("{label}: ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    match line.trim() {
        "" => Err(format!("{label} is required (or set {key})").into()),
        value => Ok(value.to_string()),
    }
}

fn scopes_from_env(raw: Option<&str>) -> Vec<String> {
    let scopes: Vec<String> = raw
        .unwrap_or_default()
        .split_whitespace()
        .map(str::to_string)
        .collect();
    if scopes.is_empty() {
        vec![DEFAULT_SCOPE.to_string()]
    } else {
        scopes
    }
}

fn random_state() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Offline access with a forced consent prompt so Google issues a refresh token.
fn consent_url(
    client_id: &str,
    redirect_uri: &str,
    scopes: &[String],
    state: &str,
) -> Result<Url, AnyError> {
    let scope = scopes.join(" ");
    let url = Url::parse_with_params(
        AUTH_ENDPOINT,
        [
            ("client_id", client_id),
            ("redirect_uri", redirect_uri),
            ("response_type", "code"),
            ("scope", scope.as_str()),
            ("access_type", "offline"),
            ("prompt", "consent"),
            ("state", state),
        ],
    )?;
    Ok(url)
}

/// Extract the authorization code from the raw head of the redirect request.
fn parse_callback(request: &str, expected_state: &str) -> Result<String, CallbackError> {
    let mut request_line = request
        .lines()
        .next()
        .ok_or(CallbackError::Malformed)?
        .split_whitespace();
    let method = request_line.next().ok_or(CallbackError::Malformed)?;
    let target = request_line.next().ok_or(CallbackError::Malformed)?;
    if method != "GET" {
        return Err(CallbackError::Method);
    }

    let url = Url::parse(&format!("http://127.0.0.1{target}"))
        .map_err(|_| CallbackError::Malformed)?;
    let param = |name: &str| {
        url.query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    };

    if param("state").as_deref() != Some(expected_state) {
        return Err(CallbackError::StateMismatch);
    }
    if let Some(reason) = param("error") {
        return Err(CallbackError::Denied(reason));
    }
    param("code")
        .filter(|code| !code.is_empty())
        .ok_or(CallbackError::MissingCode)
}

async fn accept_callback(listener: TcpListener, expected_state: &str) -> Result<String, AnyError> {
    let (mut stream, peer) = listener.accept().await?;
    let head = read_request_head(&mut stream).await?;

    match parse_callback(&head, expected_state) {
        Ok(code) => {
            respond(&mut stream, "200 OK", DONE_PAGE).await?;
            Ok(code)
        }
        Err(err) => {
            warn!(%peer, error = %err, "rejected consent callback");
            respond(&mut stream, err.status_line(), &err.to_string()).await?;
            Err(err.into())
        }
    }
}

async fn read_request_head(stream: &mut TcpStream) -> io::Result<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while buf.len() < MAX_REQUEST_BYTES {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

async fn respond(stream: &mut TcpStream, status_line: &str, body: &str) -> io::Result<()> {
    let response = format!(
        "HTTP/1.1 {status_line}\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    stream.write_all(response.as_bytes()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn head(target: &str) -> String {
        format!("GET {target} HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n")
    }

    #[test]
    fn consent_url_requests_offline_access() {
        let url = consent_url(
            "client",
            "http://127.0.0.1:9000/oauth2callback",
            &scopes_from_env(None),
            "abc",
        )
        .expect("url builds");

        let params: HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(url.host_str(), Some("accounts.google.com"));
        assert_eq!(params["scope"], DEFAULT_SCOPE);
        assert_eq!(params["access_type"], "offline");
        assert_eq!(params["prompt"], "consent");
        assert_eq!(params["state"], "abc");
    }

    #[test]
    fn scopes_split_on_whitespace() {
        assert_eq!(scopes_from_env(Some("  a  b ")), vec!["a", "b"]);
        assert_eq!(scopes_from_env(Some("   ")), vec![DEFAULT_SCOPE]);
    }

    #[test]
    fn state_is_32_random_bytes() {
        let state = random_state();
        assert_eq!(URL_SAFE_NO_PAD.decode(&state).expect("decodes").len(), 32);
        assert_ne!(state, random_state());
    }

    #[test]
    fn callback_yields_code_for_matching_state() {
        let code = parse_callback(&head("/oauth2callback?code=4%2Fxyz&state=s1"), "s1");
        assert_eq!(code, Ok("4/xyz".to_string()));
    }

    #[test]
    fn callback_rejections() {
        assert_eq!(
            parse_callback(&head("/oauth2callback?code=c&state=other"), "s1"),
            Err(CallbackError::StateMismatch)
        );
        assert_eq!(
            parse_callback(&head("/oauth2callback?state=s1"), "s1"),
            Err(CallbackError::MissingCode)
        );
        assert_eq!(
            parse_callback(&head("/oauth2callback?error=access_denied&state=s1"), "s1"),
            Err(CallbackError::Denied("access_denied".into()))
        );
        assert_eq!(
            parse_callback("POST /oauth2callback HTTP/1.1\r\n\r\n", "s1"),
            Err(CallbackError::Method)
        );
        assert_eq!(parse_callback("", "s1"), Err(CallbackError::Malformed));
    }

    #[tokio::test]
    async fn loopback_listener_answers_browser() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let waiter = tokio::spawn(async move {
            accept_callback(listener, "s1")
                .await
                .map_err(|err| err.to_string())
        });

        let mut browser = TcpStream::connect(addr).await.expect("connect");
        browser
            .write_all(head("/oauth2callback?code=abc&state=s1").as_bytes())
            .await
            .expect("write");
        let mut response = String::new();
        browser.read_to_string(&mut response).await.expect("read");

        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert_eq!(waiter.await.expect("join"), Ok("abc".to_string()));
    }
}
