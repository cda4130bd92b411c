use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream;
use thiserror::Error;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::dedup::DedupGate;
use crate::mail::{
    CandidateFilter, LABEL_UNREAD, LabelTarget, MailMessage, MailOperation, MailService,
    MessageRef, RemoteServiceError, ReplyArtifact,
};
use crate::reply::{DEFAULT_REPLY_BODY, compose, extract_reply_fields};

pub const DEFAULT_LOOKBACK: chrono::Duration = chrono::Duration::hours(1);
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProcessorError {
    #[error(transparent)]
    RemoteService(#[from] RemoteServiceError),
    #[error("message {message_id} is missing required header {header}")]
    MalformedMessage {
        message_id: String,
        header: &'static str,
    },
    #[error("could not compose reply to {message_id}: {cause}")]
    Compose { message_id: String, cause: String },
}

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// The mailbox owner's address; a snippet containing it marks one of our own replies.
    pub operator_address: String,
    pub from_address: String,
    pub replied_label_id: String,
    pub reply_body: String,
    pub lookback: chrono::Duration,
    pub call_timeout: Duration,
    pub concurrency: usize,
}

impl ProcessorConfig {
    pub fn new(operator_address: impl Into<String>, replied_label_id: impl Into<String>) -> Self {
        let operator_address = operator_address.into();
        Self {
            from_address: operator_address.clone(),
            operator_address,
            replied_label_id: replied_label_id.into(),
            reply_body: DEFAULT_REPLY_BODY.to_string(),
            lookback: DEFAULT_LOOKBACK,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_from_address(mut self, from_address: impl Into<String>) -> Self {
        self.from_address = from_address.into();
        self
    }

    pub fn with_reply_body(mut self, body: impl Into<String>) -> Self {
        self.reply_body = body.into();
        self
    }

    pub fn with_lookback(mut self, lookback: chrono::Duration) -> Self {
        self.lookback = lookback;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    SelfReply,
    AlreadyReplied,
    ThreadHandledThisCycle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    Replied { sent_id: String },
    Skipped(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageFailure {
    pub message_id: String,
    pub error: ProcessorError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub replied: usize,
    pub skipped: usize,
    pub errors: Vec<MessageFailure>,
}

impl CycleReport {
    pub fn processed(&self) -> usize {
        self.replied + self.skipped + self.errors.len()
    }

    fn record(&mut self, message_id: String, result: Result<MessageOutcome, ProcessorError>) {
        match result {
            Ok(MessageOutcome::Replied { .. }) => self.replied += 1,
            Ok(MessageOutcome::Skipped(_)) => self.skipped += 1,
            Err(error) => self.errors.push(MessageFailure { message_id, error }),
        }
    }
}

enum Decision {
    Reply(PreparedReply),
    Skip(SkipReason),
}

struct PreparedReply {
    to: String,
    artifact: ReplyArtifact,
}

/// Runs polling cycles against a [`MailService`].
pub struct MailProcessor<M> {
    service: M,
    config: ProcessorConfig,
}

impl<M: MailService> MailProcessor<M> {
    pub fn new(service: M, config: ProcessorConfig) -> Self {
        Self { service, config }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn candidate_filter(&self, now: DateTime<Utc>) -> CandidateFilter {
        CandidateFilter::unread_personal_since(now - self.config.lookback)
    }

    /// One list → decide → act pass. Every candidate has finished processing
    /// when this returns. Only a failed listing is an error; per-message
    /// failures land in the report.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport, ProcessorError> {
        let filter = self.candidate_filter(now);
        let candidates = self
            .call(
                MailOperation::ListCandidates,
                self.service.list_candidates(&filter),
            )
            .await?;

        if candidates.is_empty() {
            info!(after = filter.after_epoch_seconds(), "no new mail");
            return Ok(CycleReport::default());
        }

        info!(candidates = candidates.len(), "processing candidates");
        let gate = Mutex::new(DedupGate::new());
        let results: Vec<(String, Result<MessageOutcome, ProcessorError>)> =
            stream::iter(candidates)
                .map(|candidate| {
                    let gate = &gate;
                    let span = info_span!("message", message_id = %candidate.id);
                    async move {
                        let result = self.process_candidate(&candidate, gate).await;
                        (candidate.id, result)
                    }
                    .instrument(span)
                })
                .buffer_unordered(self.config.concurrency.max(1))
                .collect()
                .await;

        let mut report = CycleReport::default();
        for (message_id, result) in results {
            if let Err(err) = &result {
                warn!(message_id = %message_id, error = %err, "failed to process message");
            }
            report.record(message_id, result);
        }
        Ok(report)
    }

    async fn process_candidate(
        &self,
        candidate: &MessageRef,
        gate: &Mutex<DedupGate>,
    ) -> Result<MessageOutcome, ProcessorError> {
        let message = self
            .call(
                MailOperation::GetMessage,
                self.service.get_message(&candidate.id),
            )
            .await?;

        let outcome = match self.decide(&message, gate)? {
            Decision::Reply(reply) => self.reply_to(&message, reply).await?,
            Decision::Skip(reason) => {
                debug!(thread_id = %message.thread_id, ?reason, "skipping reply");
                MessageOutcome::Skipped(reason)
            }
        };

        self.call(
            MailOperation::LabelMessage,
            self.service.set_labels(
                &LabelTarget::Message(message.id.clone()),
                std::slice::from_ref(&self.config.replied_label_id),
                &[LABEL_UNREAD.to_string()],
            ),
        )
        .await?;

        Ok(outcome)
    }

    // Order matters: a copy of our own reply may lack the label, so the
    // snippet check runs first.
    fn decide(
        &self,
        message: &MailMessage,
        gate: &Mutex<DedupGate>,
    ) -> Result<Decision, ProcessorError> {
        let operator = self.config.operator_address.as_str();
        if !operator.is_empty() && message.snippet.contains(operator) {
            return Ok(Decision::Skip(SkipReason::SelfReply));
        }

        if message.has_label(&self.config.replied_label_id) {
            return Ok(Decision::Skip(SkipReason::AlreadyReplied));
        }

        // Check, build and mark under one lock. A message that cannot be
        // answered must not reserve its thread for a sibling that can.
        let mut gate = gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if gate.seen(&message.thread_id) {
            return Ok(Decision::Skip(SkipReason::ThreadHandledThisCycle));
        }
        let reply = self.prepare_reply(message)?;
        gate.mark(&message.thread_id);
        Ok(Decision::Reply(reply))
    }

    fn prepare_reply(&self, message: &MailMessage) -> Result<PreparedReply, ProcessorError> {
        let fields = extract_reply_fields(message, &self.config.from_address).map_err(|err| {
            ProcessorError::MalformedMessage {
                message_id: message.id.clone(),
                header: err.0,
            }
        })?;
        let artifact = compose(&fields, &self.config.reply_body).map_err(|err| {
            ProcessorError::Compose {
                message_id: message.id.clone(),
                cause: err.to_string(),
            }
        })?;
        Ok(PreparedReply {
            to: fields.to,
            artifact,
        })
    }

    async fn reply_to(
        &self,
        message: &MailMessage,
        reply: PreparedReply,
    ) -> Result<MessageOutcome, ProcessorError> {
        let receipt = self
            .call(MailOperation::SendRaw, self.service.send_raw(&reply.artifact))
            .await?;

        self.call(
            MailOperation::LabelThread,
            self.service.set_labels(
                &LabelTarget::Thread(message.thread_id.clone()),
                std::slice::from_ref(&self.config.replied_label_id),
                &[],
            ),
        )
        .await?;

        info!(
            thread_id = %message.thread_id,
            sent_id = %receipt.id,
            to = %reply.to,
            "sent automatic reply"
        );
        Ok(MessageOutcome::Replied {
            sent_id: receipt.id,
        })
    }

    async fn call<T, F>(&self, operation: MailOperation, fut: F) -> Result<T, RemoteServiceError>
    where
        F: Future<Output = Result<T, RemoteServiceError>>,
    {
        match tokio::time::timeout(self.config.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(RemoteServiceError::timeout(
                operation,
                self.config.call_timeout,
            )),
        }
    }
}
