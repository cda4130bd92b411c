mod composer;
mod headers;

pub use composer::{
    ComposeError, DEFAULT_REPLY_BODY, ReplyFields, compose, decode_raw, render_message,
};
pub use headers::{HeaderLookup, MissingHeader, extract_reply_fields};
