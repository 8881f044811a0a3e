//! Email provider: a remote mailbox with a paginated message listing
//!
//! `GET {base}/messages?since=<rfc3339>&page_token=<token>` returns
//! `{"messages": [...], "next_page_token": "..."}`. Messages are keyed by
//! their protocol Message-ID.

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use txsync_common::SourceKind;

use super::{window_start, AdapterError, CredentialProvider, FetchOutcome, SourceAdapter};
use crate::models::{RawRecord, SyncWatermark};

/// High-volume source; first sync covers 90 days
pub const EMAIL_LOOKBACK_DAYS: i64 = 90;

/// Upper bound on pages per fetch, guards against a provider that never ends pagination
const MAX_PAGES: usize = 500;

#[derive(Debug, Deserialize)]
struct MessagePage {
    #[serde(default)]
    messages: Vec<RemoteMessage>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RemoteMessage {
    #[serde(default, alias = "messageId")]
    message_id: Option<String>,
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default, alias = "textBody")]
    text_body: Option<String>,
    #[serde(default)]
    snippet: Option<String>,
    #[serde(alias = "receivedAt")]
    received_at: DateTime<Utc>,
}

impl RemoteMessage {
    fn into_record(self) -> RawRecord {
        let body = self
            .text_body
            .filter(|t| !t.trim().is_empty())
            .or(self.snippet)
            .unwrap_or_default();
        let text = match &self.subject {
            Some(subject) if !subject.is_empty() => format!("Subject: {}\n\n{}", subject, body),
            _ => body,
        };

        RawRecord {
            external_id: self.message_id,
            source: SourceKind::EmailProvider,
            plain_text: Some(text),
            binary_body: None,
            timestamp: self.received_at,
            sender: self.from,
            subject: self.subject,
            attachments: Vec::new(),
        }
    }
}

/// Remote mailbox adapter
pub struct EmailProviderAdapter {
    client: Client,
    base_url: String,
    owner_id: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl EmailProviderAdapter {
    pub fn new(
        base_url: impl Into<String>,
        owner_id: impl Into<String>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self, AdapterError> {
        let client = Client::builder()
            .timeout(StdDuration::from_secs(30))
            .connect_timeout(StdDuration::from_secs(5))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            owner_id: owner_id.into(),
            credentials,
        })
    }

    async fn fetch_page(
        &self,
        token: &str,
        since: &str,
        page_token: Option<&str>,
    ) -> Result<MessagePage, AdapterError> {
        let url = format!("{}/messages", self.base_url);
        let mut request = self
            .client
            .get(&url)
            .bearer_auth(token)
            .query(&[("since", since)]);
        if let Some(page_token) = page_token {
            request = request.query(&[("page_token", page_token)]);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::Api(status.as_u16(), body));
        }

        response
            .json()
            .await
            .map_err(|e| AdapterError::Parse(e.to_string()))
    }
}

#[async_trait]
impl SourceAdapter for EmailProviderAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::EmailProvider
    }

    fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn lookback(&self) -> Duration {
        Duration::days(EMAIL_LOOKBACK_DAYS)
    }

    async fn fetch_since(
        &self,
        watermark: Option<&SyncWatermark>,
    ) -> Result<FetchOutcome, AdapterError> {
        let token = self.credentials.access_token(self.kind()).await?;
        let now = Utc::now();
        let since = window_start(watermark, self.lookback(), now);
        let since_param = since.to_rfc3339_opts(SecondsFormat::Secs, true);

        let mut records = Vec::new();
        let mut page_token: Option<String> = None;
        let mut pages = 0;

        loop {
            let page = self
                .fetch_page(&token, &since_param, page_token.as_deref())
                .await?;
            pages += 1;

            records.extend(
                page.messages
                    .into_iter()
                    .filter(|m| m.received_at >= since)
                    .map(RemoteMessage::into_record),
            );

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) if pages < MAX_PAGES => page_token = Some(next),
                Some(_) => {
                    // Watermark covers only the pages read
                    tracing::warn!(pages, "Mailbox pagination limit reached");
                    let last_sync_at = records.iter().map(|r: &RawRecord| r.timestamp).max();
                    return Ok(FetchOutcome::Records {
                        records,
                        next_watermark: SyncWatermark {
                            source: SourceKind::EmailProvider,
                            owner_id: self.owner_id.clone(),
                            last_sync_at: last_sync_at.or(Some(since)),
                            content_hash: None,
                        },
                    });
                }
                None => break,
            }
        }

        tracing::debug!(pages, count = records.len(), since = %since, "Fetched mailbox");

        Ok(FetchOutcome::Records {
            records,
            next_watermark: SyncWatermark {
                source: SourceKind::EmailProvider,
                owner_id: self.owner_id.clone(),
                last_sync_at: Some(now),
                content_hash: None,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_without_text_uses_snippet() {
        let json = r#"{"messages":[{"messageId":"<m1@shop>","from":"orders@shop.example","subject":"Order confirmed","snippet":"Thanks for your order","receivedAt":"2024-05-01T10:00:00Z"}],"next_page_token":null}"#;
        let page: MessagePage = serde_json::from_str(json).unwrap();
        assert!(page.next_page_token.is_none());

        let record = page.messages.into_iter().next().unwrap().into_record();
        assert_eq!(record.external_id.as_deref(), Some("<m1@shop>"));
        assert_eq!(
            record.plain_text.as_deref(),
            Some("Subject: Order confirmed\n\nThanks for your order")
        );
        assert_eq!(record.sender.as_deref(), Some("orders@shop.example"));
    }
}
