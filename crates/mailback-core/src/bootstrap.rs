//! Startup wiring between configuration, the Gmail collaborator and the
//! processing core. Every failure here is fatal to the agent.

use std::sync::Arc;

use tracing::info;

use crate::config::{Config, ReplyConfig};
use crate::gmail::{FileTokenStore, GmailClient, TokenStore};
use crate::processor::{MailProcessor, ProcessorConfig};
use crate::scheduler::SchedulerError;

/// Who replies, and which label records that a reply happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyIdentity {
    pub operator_address: String,
    pub from_address: String,
    pub replied_label_id: String,
}

/// Build a Gmail client from the stored token file. There is no interactive
/// fallback; run `gmail-oauth` first.
pub async fn authorize(
    config: &Config,
    http: reqwest::Client,
) -> Result<GmailClient<FileTokenStore>, SchedulerError> {
    let store = FileTokenStore::new(&config.gmail.token_path);
    let tokens = store
        .load()
        .await
        .map_err(|err| SchedulerError::Fatal(err.to_string()))?
        .ok_or_else(|| {
            SchedulerError::Fatal(format!(
                "no stored credentials at {}; run gmail-oauth to authorize",
                store.path().display()
            ))
        })?;

    let client = GmailClient::new(
        http,
        config.gmail.user_id.clone(),
        config.gmail.client_id.clone(),
        config.gmail.client_secret.clone(),
        tokens,
        Arc::new(store),
    );
    Ok(match &config.gmail.api_base {
        Some(base) => client.with_api_base(base.clone()),
        None => client,
    })
}

/// Fill in whatever the config leaves out: the operator address from the
/// profile, and the replied label id by name (creating the label if needed).
pub async fn resolve_reply_identity<S: TokenStore>(
    client: &GmailClient<S>,
    reply: &ReplyConfig,
) -> Result<ReplyIdentity, SchedulerError> {
    let operator_address = match &reply.operator_address {
        Some(address) => address.clone(),
        None => {
            let profile = client
                .get_profile()
                .await
                .map_err(|err| SchedulerError::Fatal(format!("load profile: {err}")))?;
            profile.email_address
        }
    };

    let replied_label_id = match &reply.label_id {
        Some(id) => id.clone(),
        None => {
            let label = client.ensure_label(&reply.label_name).await.map_err(|err| {
                SchedulerError::Fatal(format!("resolve label {:?}: {err}", reply.label_name))
            })?;
            label.id
        }
    };

    let from_address = reply
        .from_address
        .clone()
        .unwrap_or_else(|| operator_address.clone());

    info!(
        operator = %operator_address,
        label_id = %replied_label_id,
        "reply identity resolved"
    );
    Ok(ReplyIdentity {
        operator_address,
        from_address,
        replied_label_id,
    })
}

pub fn build_processor<S: TokenStore>(
    config: &Config,
    client: GmailClient<S>,
    identity: ReplyIdentity,
) -> MailProcessor<GmailClient<S>> {
    let processor_config =
        ProcessorConfig::new(identity.operator_address, identity.replied_label_id)
            .with_from_address(identity.from_address)
            .with_reply_body(config.reply.body.clone());
    MailProcessor::new(client, config.schedule.tune(processor_config))
}
