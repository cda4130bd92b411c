use async_trait::async_trait;
use tracing::{debug, warn};

use crate::gmail::client::{GmailClient, GmailClientError, ListMessagesQuery};
use crate::gmail::oauth::TokenStore;
use crate::gmail::types::Message;
use crate::mail::{
    CandidateFilter, LabelTarget, MailMessage, MailOperation, MailService, MessageHeader,
    MessageRef, RemoteServiceError, ReplyArtifact, SendReceipt,
};

const LIST_PAGE_SIZE: u32 = 100;
// A single cycle only looks back a short window; this bounds a runaway listing.
const MAX_LIST_PAGES: usize = 20;

fn remote(operation: MailOperation) -> impl Fn(GmailClientError) -> RemoteServiceError {
    move |err| RemoteServiceError::new(operation, err.to_string())
}

impl From<Message> for MailMessage {
    fn from(message: Message) -> Self {
        let headers = message
            .payload
            .map(|payload| {
                payload
                    .headers
                    .into_iter()
                    .map(|h| MessageHeader::new(h.name, h.value))
                    .collect()
            })
            .unwrap_or_default();

        // Gmail always threads messages; fall back to a thread of one if the id is absent.
        let thread_id = message.thread_id.unwrap_or_else(|| message.id.clone());

        MailMessage {
            id: message.id,
            thread_id,
            snippet: message.snippet.unwrap_or_default(),
            label_ids: message.label_ids,
            headers,
        }
    }
}

#[async_trait]
impl<S: TokenStore> MailService for GmailClient<S> {
    async fn list_candidates(
        &self,
        filter: &CandidateFilter,
    ) -> Result<Vec<MessageRef>, RemoteServiceError> {
        let query = filter.search_query();
        let mut refs = Vec::new();
        let mut page_token: Option<String> = None;
        let mut pages = 0;

        loop {
            if page_token.is_some() {
                debug!(page = pages + 1, "fetching next candidate page");
            }
            let response = self
                .list_messages(&ListMessagesQuery {
                    label_ids: &filter.label_ids,
                    query: Some(&query),
                    page_token: page_token.as_deref(),
                    max_results: Some(LIST_PAGE_SIZE),
                })
                .await
                .map_err(remote(MailOperation::ListCandidates))?;

            refs.extend(response.messages.into_iter().map(|m| MessageRef {
                id: m.id,
                thread_id: m.thread_id,
            }));

            pages += 1;

            match response.next_page_token {
                Some(token) if !token.is_empty() => {
                    if pages >= MAX_LIST_PAGES {
                        warn!(
                            pages,
                            candidates = refs.len(),
                            "candidate listing truncated at page limit"
                        );
                        break;
                    }
                    page_token = Some(token);
                }
                _ => break,
            }
        }

        Ok(refs)
    }

    async fn get_message(&self, id: &str) -> Result<MailMessage, RemoteServiceError> {
        GmailClient::get_message(self, id)
            .await
            .map(MailMessage::from)
            .map_err(remote(MailOperation::GetMessage))
    }

    async fn send_raw(&self, artifact: &ReplyArtifact) -> Result<SendReceipt, RemoteServiceError> {
        let sent = self
            .send_message(artifact.raw.clone(), artifact.thread_id.clone())
            .await
            .map_err(remote(MailOperation::SendRaw))?;
        Ok(SendReceipt {
            id: sent.id,
            thread_id: sent.thread_id,
        })
    }

    async fn set_labels(
        &self,
        target: &LabelTarget,
        add: &[String],
        remove: &[String],
    ) -> Result<(), RemoteServiceError> {
        match target {
            LabelTarget::Thread(id) => self
                .modify_thread(id, add.to_vec(), remove.to_vec())
                .await
                .map_err(remote(MailOperation::LabelThread)),
            LabelTarget::Message(id) => self
                .modify_message(id, add.to_vec(), remove.to_vec())
                .await
                .map_err(remote(MailOperation::LabelMessage)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gmail::oauth::{NoopTokenStore, OAuthTokens};
    use crate::gmail::types::{Header, MessagePart};
    use chrono::{Duration, Utc};
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> GmailClient<NoopTokenStore> {
        GmailClient::new(
            reqwest::Client::new(),
            "me",
            "client",
            "secret",
            OAuthTokens {
                access_token: "token".into(),
                refresh_token: "refresh".into(),
                expires_at: Utc::now() + Duration::hours(1),
            },
            Arc::new(NoopTokenStore),
        )
        .with_api_base(format!("{}/gmail/v1/users", server.uri()))
    }

    #[tokio::test]
    async fn listing_follows_page_tokens() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages"))
            .and(query_param("pageToken", "next"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [{ "id": "m2", "threadId": "t2" }]
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [{ "id": "m1", "threadId": "t1" }],
                "nextPageToken": "next"
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        let refs = client(&server)
            .list_candidates(&CandidateFilter::unread_personal_since(Utc::now()))
            .await
            .expect("list");

        let ids: Vec<_> = refs.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
    }

    #[tokio::test]
    async fn listing_stops_at_page_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gmail/v1/users/me/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "messages": [{ "id": "m", "threadId": "t" }],
                "nextPageToken": "more"
            })))
            .expect(MAX_LIST_PAGES as u64)
            .mount(&server)
            .await;

        let refs = client(&server)
            .list_candidates(&CandidateFilter::unread_personal_since(Utc::now()))
            .await
            .expect("truncated list is still returned");

        assert_eq!(refs.len(), MAX_LIST_PAGES);
    }

    #[test]
    fn converts_wire_message_keeping_header_order() {
        let wire = Message {
            id: "m1".into(),
            thread_id: Some("t1".into()),
            label_ids: vec!["UNREAD".into()],
            snippet: Some("hello".into()),
            internal_date: None,
            payload: Some(MessagePart {
                mime_type: Some("text/plain".into()),
                headers: vec![
                    Header {
                        name: "Subject".into(),
                        value: "one".into(),
                    },
                    Header {
                        name: "subject".into(),
                        value: "two".into(),
                    },
                ],
            }),
        };

        let message = MailMessage::from(wire);

        assert_eq!(message.thread_id, "t1");
        assert_eq!(message.snippet, "hello");
        assert_eq!(message.headers[0].value, "one");
        assert_eq!(message.headers[1].value, "two");
    }

    #[test]
    fn missing_thread_and_payload_fall_back() {
        let wire = Message {
            id: "solo".into(),
            thread_id: None,
            label_ids: vec![],
            snippet: None,
            internal_date: None,
            payload: None,
        };

        let message = MailMessage::from(wire);

        assert_eq!(message.thread_id, "solo");
        assert_eq!(message.snippet, "");
        assert!(message.headers.is_empty());
    }
}
