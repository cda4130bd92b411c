use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use mail_builder::headers::Header;
use mail_builder::headers::address::Address;
use mail_builder::headers::text::Text;
use thiserror::Error;

use crate::mail::ReplyArtifact;

pub const DEFAULT_REPLY_BODY: &str =
    "Hey there!\nThank you for reaching out, I will get back to you soon.";

#[derive(Debug, Error)]
pub enum ComposeError {
    #[error("failed to encode {header} header: {source}")]
    Header {
        header: &'static str,
        source: std::io::Error,
    },
}

/// Addressing and threading values for one reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyFields {
    pub references: String,
    pub in_reply_to: String,
    pub to: String,
    pub from: String,
    pub subject: String,
    pub thread_id: Option<String>,
}

#[derive(Clone, Copy)]
enum HeaderKind {
    Raw,
    Address,
    Text,
}

/// Render the plain-text MIME message. Headers are CRLF terminated and kept
/// ASCII: non-ASCII display names and subjects become RFC 2047 encoded-words.
/// The body is written as given and declared `8bit` when it is not ASCII.
pub fn render_message(fields: &ReplyFields, body: &str) -> Result<String, ComposeError> {
    let transfer_encoding = if body.is_ascii() { "7bit" } else { "8bit" };
    let headers = [
        ("Content-Type", "text/plain; charset=\"UTF-8\"", HeaderKind::Raw),
        ("MIME-Version", "1.0", HeaderKind::Raw),
        ("Content-Transfer-Encoding", transfer_encoding, HeaderKind::Raw),
        ("References", fields.references.as_str(), HeaderKind::Raw),
        ("In-Reply-To", fields.in_reply_to.as_str(), HeaderKind::Raw),
        ("To", fields.to.as_str(), HeaderKind::Address),
        ("From", fields.from.as_str(), HeaderKind::Address),
        ("Subject", fields.subject.as_str(), HeaderKind::Text),
    ];

    let mut out = String::with_capacity(256 + body.len());
    for (name, value, kind) in headers {
        out.push_str(name);
        out.push_str(": ");
        out.push_str(&header_value(name, &single_line(value), kind)?);
        out.push_str("\r\n");
    }
    out.push_str("\r\n");
    out.push_str(body);
    Ok(out)
}

/// Build the reply artifact: the rendered message in padded URL-safe base64,
/// which is standard base64 with `+` and `/` swapped for `-` and `_`.
pub fn compose(fields: &ReplyFields, body: &str) -> Result<ReplyArtifact, ComposeError> {
    let message = render_message(fields, body)?;
    Ok(ReplyArtifact {
        raw: URL_SAFE.encode(message.as_bytes()),
        thread_id: fields.thread_id.clone(),
    })
}

/// Reverse of [`compose`]'s encoding.
pub fn decode_raw(raw: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE.decode(raw.as_bytes())
}

// Header values must not carry line breaks into the header block.
fn single_line(value: &str) -> String {
    value.replace(['\r', '\n'], " ")
}

fn header_value(
    name: &'static str,
    value: &str,
    kind: HeaderKind,
) -> Result<String, ComposeError> {
    if value.is_ascii() {
        return Ok(value.to_string());
    }

    let mut buf = Vec::new();
    let written = match kind {
        HeaderKind::Raw => return Ok(value.to_string()),
        HeaderKind::Text => Text::new(value).write_header(&mut buf, name.len() + 2),
        HeaderKind::Address => {
            let (display, email) = split_mailbox(value);
            Address::new_address(display, email).write_header(&mut buf, name.len() + 2)
        }
    };
    written.map_err(|source| ComposeError::Header {
        header: name,
        source,
    })?;

    let encoded = String::from_utf8_lossy(&buf);
    Ok(encoded.trim_end_matches(['\r', '\n']).to_string())
}

/// Splits `Name <addr>` into its display name and address.
fn split_mailbox(value: &str) -> (Option<String>, String) {
    let value = value.trim();
    match (value.rfind('<'), value.ends_with('>')) {
        (Some(open), true) => {
            let email = value[open + 1..value.len() - 1].trim().to_string();
            let display = value[..open].trim().trim_matches('"').trim();
            let display = (!display.is_empty()).then(|| display.to_string());
            (display, email)
        }
        _ => (None, value.to_string()),
    }
}
