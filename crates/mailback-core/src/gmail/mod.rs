pub mod client;
pub mod oauth;
mod service;
pub mod token_file;
pub mod types;

pub use client::{GmailClient, GmailClientError};
pub use oauth::{
    DEFAULT_REFRESH_BUFFER, NoopTokenStore, OAuthError, OAuthTokens, TokenStore,
    exchange_authorization_code, refresh_access_token,
};
pub use token_file::{FileTokenStore, TokenFileError};
pub use types::*;
