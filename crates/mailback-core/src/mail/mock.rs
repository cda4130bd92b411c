use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{
    CandidateFilter, LabelTarget, MailMessage, MailOperation, MailService, MessageRef,
    RemoteServiceError, ReplyArtifact, SendReceipt,
};

/// A `set_labels` call as observed by [`MockMailService`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelCall {
    pub target: LabelTarget,
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

#[derive(Debug, Default)]
struct MockState {
    candidates: Vec<MessageRef>,
    messages: HashMap<String, MailMessage>,
    list_error: Option<String>,
    failing_gets: HashSet<String>,
    failing_sends: HashSet<String>,
    failing_labels: HashSet<String>,
    get_delay: Option<Duration>,
    filters: Vec<CandidateFilter>,
    sent: Vec<ReplyArtifact>,
    label_calls: Vec<LabelCall>,
}

/// In-memory mailbox that records every call. Failures are scripted per
/// message id (gets, labels) or per thread id (sends).
#[derive(Debug, Default, Clone)]
pub struct MockMailService {
    state: Arc<Mutex<MockState>>,
    list_calls: Arc<AtomicUsize>,
}

impl MockMailService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a message and lists it as a candidate.
    pub fn add_candidate(&self, message: MailMessage) {
        let mut state = self.state.lock().expect("lock mock state");
        state.candidates.push(MessageRef {
            id: message.id.clone(),
            thread_id: Some(message.thread_id.clone()),
        });
        state.messages.insert(message.id.clone(), message);
    }

    pub fn fail_list(&self, cause: impl Into<String>) {
        self.state.lock().expect("lock mock state").list_error = Some(cause.into());
    }

    pub fn fail_get(&self, message_id: impl Into<String>) {
        let mut state = self.state.lock().expect("lock mock state");
        state.failing_gets.insert(message_id.into());
    }

    pub fn fail_send_for_thread(&self, thread_id: impl Into<String>) {
        let mut state = self.state.lock().expect("lock mock state");
        state.failing_sends.insert(thread_id.into());
    }

    /// Fails any label call whose target id matches.
    pub fn fail_labels_for(&self, target_id: impl Into<String>) {
        let mut state = self.state.lock().expect("lock mock state");
        state.failing_labels.insert(target_id.into());
    }

    pub fn delay_gets(&self, delay: Duration) {
        self.state.lock().expect("lock mock state").get_delay = Some(delay);
    }

    pub fn list_call_count(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn filters(&self) -> Vec<CandidateFilter> {
        self.state.lock().expect("lock mock state").filters.clone()
    }

    pub fn sent(&self) -> Vec<ReplyArtifact> {
        self.state.lock().expect("lock mock state").sent.clone()
    }

    pub fn label_calls(&self) -> Vec<LabelCall> {
        self.state.lock().expect("lock mock state").label_calls.clone()
    }

    pub fn label_calls_for(&self, target: &LabelTarget) -> Vec<LabelCall> {
        self.label_calls()
            .into_iter()
            .filter(|call| &call.target == target)
            .collect()
    }
}

#[async_trait]
impl MailService for MockMailService {
    async fn list_candidates(
        &self,
        filter: &CandidateFilter,
    ) -> Result<Vec<MessageRef>, RemoteServiceError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().expect("lock mock state");
        state.filters.push(filter.clone());
        if let Some(cause) = state.list_error.clone() {
            return Err(RemoteServiceError::new(MailOperation::ListCandidates, cause));
        }
        Ok(state.candidates.clone())
    }

    async fn get_message(&self, id: &str) -> Result<MailMessage, RemoteServiceError> {
        let delay = self.state.lock().expect("lock mock state").get_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.state.lock().expect("lock mock state");
        if state.failing_gets.contains(id) {
            return Err(RemoteServiceError::new(
                MailOperation::GetMessage,
                format!("scripted failure for {id}"),
            ));
        }
        state.messages.get(id).cloned().ok_or_else(|| {
            RemoteServiceError::new(MailOperation::GetMessage, format!("{id} not found"))
        })
    }

    async fn send_raw(&self, artifact: &ReplyArtifact) -> Result<SendReceipt, RemoteServiceError> {
        let mut state = self.state.lock().expect("lock mock state");
        let thread_id = artifact.thread_id.clone().unwrap_or_default();
        if state.failing_sends.contains(&thread_id) {
            return Err(RemoteServiceError::new(
                MailOperation::SendRaw,
                format!("scripted failure for thread {thread_id}"),
            ));
        }
        state.sent.push(artifact.clone());
        Ok(SendReceipt {
            id: format!("sent-{}", state.sent.len()),
            thread_id: artifact.thread_id.clone(),
        })
    }

    async fn set_labels(
        &self,
        target: &LabelTarget,
        add: &[String],
        remove: &[String],
    ) -> Result<(), RemoteServiceError> {
        let mut state = self.state.lock().expect("lock mock state");
        if state.failing_labels.contains(target.id()) {
            let operation = match target {
                LabelTarget::Thread(_) => MailOperation::LabelThread,
                LabelTarget::Message(_) => MailOperation::LabelMessage,
            };
            return Err(RemoteServiceError::new(
                operation,
                format!("scripted failure for {}", target.id()),
            ));
        }
        state.label_calls.push(LabelCall {
            target: target.clone(),
            add: add.to_vec(),
            remove: remove.to_vec(),
        });
        Ok(())
    }
}
