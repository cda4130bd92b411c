use chrono::{DateTime, Utc};

pub const LABEL_INBOX: &str = "INBOX";
pub const LABEL_CATEGORY_PERSONAL: &str = "CATEGORY_PERSONAL";
pub const LABEL_UNREAD: &str = "UNREAD";

/// Identifies a message returned by a listing. The thread id is only a hint;
/// the fetched [`MailMessage`] is authoritative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRef {
    pub id: String,
    pub thread_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub name: String,
    pub value: String,
}

impl MessageHeader {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub id: String,
    pub thread_id: String,
    pub snippet: String,
    pub label_ids: Vec<String>,
    /// Headers in the order the store returned them.
    pub headers: Vec<MessageHeader>,
}

impl MailMessage {
    pub fn has_label(&self, label_id: &str) -> bool {
        self.label_ids.iter().any(|id| id == label_id)
    }
}

/// Which messages a cycle asks the store for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFilter {
    pub label_ids: Vec<String>,
    pub received_after: DateTime<Utc>,
}

impl CandidateFilter {
    /// Unread personal inbox mail received after `received_after`.
    pub fn unread_personal_since(received_after: DateTime<Utc>) -> Self {
        Self {
            label_ids: vec![
                LABEL_INBOX.to_string(),
                LABEL_CATEGORY_PERSONAL.to_string(),
                LABEL_UNREAD.to_string(),
            ],
            received_after,
        }
    }

    pub fn after_epoch_seconds(&self) -> i64 {
        self.received_after.timestamp()
    }

    /// Search query understood by the Gmail `q` parameter.
    pub fn search_query(&self) -> String {
        format!("after:{}", self.after_epoch_seconds())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelTarget {
    Thread(String),
    Message(String),
}

impl LabelTarget {
    pub fn id(&self) -> &str {
        match self {
            LabelTarget::Thread(id) | LabelTarget::Message(id) => id,
        }
    }
}

/// A reply ready to hand to [`super::MailService::send_raw`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyArtifact {
    /// URL-safe base64 of the full MIME message.
    pub raw: String,
    pub thread_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    pub id: String,
    pub thread_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn unread_personal_filter_uses_fixed_labels_and_epoch_query() {
        let after = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let filter = CandidateFilter::unread_personal_since(after);

        assert_eq!(filter.label_ids, vec!["INBOX", "CATEGORY_PERSONAL", "UNREAD"]);
        assert_eq!(filter.after_epoch_seconds(), 1_709_294_400);
        assert_eq!(filter.search_query(), "after:1709294400");
    }

    #[test]
    fn has_label_matches_exact_ids() {
        let message = MailMessage {
            id: "m1".into(),
            thread_id: "t1".into(),
            snippet: String::new(),
            label_ids: vec!["UNREAD".into(), "Label_42".into()],
            headers: vec![],
        };

        assert!(message.has_label("Label_42"));
        assert!(!message.has_label("Label_4"));
        assert!(!message.has_label("unread"));
    }
}
