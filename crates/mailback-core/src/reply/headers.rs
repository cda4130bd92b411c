use std::collections::HashMap;

use thiserror::Error;

use crate::mail::{MailMessage, MessageHeader};

use super::ReplyFields;

/// Case-insensitive header index. When a header repeats, the last value wins.
#[derive(Debug, Clone, Default)]
pub struct HeaderLookup {
    values: HashMap<String, String>,
}

impl HeaderLookup {
    pub fn from_headers(headers: &[MessageHeader]) -> Self {
        let mut values = HashMap::with_capacity(headers.len());
        for header in headers {
            values.insert(header.name.to_ascii_lowercase(), header.value.clone());
        }
        Self { values }
    }

    /// Returns the header value, treating blank values as absent.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values
            .get(&name.to_ascii_lowercase())
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("message is missing required header {0}")]
pub struct MissingHeader(pub &'static str);

/// Pulls the threading and addressing fields for a reply out of `message`.
///
/// From and Message-Id are required; a missing Subject yields an empty one.
pub fn extract_reply_fields(
    message: &MailMessage,
    from_address: &str,
) -> Result<ReplyFields, MissingHeader> {
    let headers = HeaderLookup::from_headers(&message.headers);
    let to = headers.get("From").ok_or(MissingHeader("From"))?;
    let message_id = headers
        .get("Message-Id")
        .ok_or(MissingHeader("Message-Id"))?;

    Ok(ReplyFields {
        references: message_id.to_string(),
        in_reply_to: message_id.to_string(),
        to: to.to_string(),
        from: from_address.to_string(),
        subject: headers.get("Subject").unwrap_or_default().to_string(),
        thread_id: Some(message.thread_id.clone()),
    })
}
