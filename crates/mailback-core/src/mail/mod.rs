//! The mail-store capability the processing core is written against.
//!
//! Nothing in here knows about HTTP or OAuth; [`crate::gmail`] provides the
//! production implementation and [`mock`] a recording one for tests.

pub mod mock;
mod types;

pub use types::*;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

/// The remote call that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailOperation {
    ListCandidates,
    GetMessage,
    SendRaw,
    LabelThread,
    LabelMessage,
}

impl fmt::Display for MailOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MailOperation::ListCandidates => "list candidates",
            MailOperation::GetMessage => "get message",
            MailOperation::SendRaw => "send raw",
            MailOperation::LabelThread => "label thread",
            MailOperation::LabelMessage => "label message",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{operation} failed: {cause}")]
pub struct RemoteServiceError {
    pub operation: MailOperation,
    pub cause: String,
}

impl RemoteServiceError {
    pub fn new(operation: MailOperation, cause: impl Into<String>) -> Self {
        Self {
            operation,
            cause: cause.into(),
        }
    }

    pub fn timeout(operation: MailOperation, after: Duration) -> Self {
        Self::new(operation, format!("timed out after {}ms", after.as_millis()))
    }
}

/// Operations the processor needs from a mailbox. Implementations are bound to
/// a single account.
#[async_trait]
pub trait MailService: Send + Sync {
    async fn list_candidates(
        &self,
        filter: &CandidateFilter,
    ) -> Result<Vec<MessageRef>, RemoteServiceError>;

    async fn get_message(&self, id: &str) -> Result<MailMessage, RemoteServiceError>;

    async fn send_raw(&self, artifact: &ReplyArtifact) -> Result<SendReceipt, RemoteServiceError>;

    async fn set_labels(
        &self,
        target: &LabelTarget,
        add: &[String],
        remove: &[String],
    ) -> Result<(), RemoteServiceError>;
}
