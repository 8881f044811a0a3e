//! Federated contacts: contacts held by a remote account provider

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use txsync_common::SourceKind;

use super::{window_start, AdapterError, CredentialProvider, FetchOutcome, SourceAdapter};
use crate::models::{RawRecord, SyncWatermark};

pub const FEDERATED_CONTACTS_LOOKBACK_DAYS: i64 = 730;

#[derive(Debug, Deserialize)]
struct ContactsResponse {
    #[serde(default)]
    contacts: Vec<RemoteContact>,
}

#[derive(Debug, Deserialize)]
struct RemoteContact {
    id: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    company: Option<String>,
    #[serde(default)]
    emails: Vec<String>,
    #[serde(default)]
    phones: Vec<String>,
    updated_at: DateTime<Utc>,
}

impl RemoteContact {
    fn to_text(&self) -> String {
        let mut lines = vec![format!(
            "Contact: {}",
            self.display_name.as_deref().unwrap_or("(unnamed)")
        )];
        if let Some(company) = &self.company {
            lines.push(format!("Organization: {}", company));
        }
        lines.extend(self.phones.iter().map(|p| format!("Phone: {}", p)));
        lines.extend(self.emails.iter().map(|e| format!("Email: {}", e)));
        lines.join("\n")
    }
}

/// Pulls contacts changed since the watermark from `GET {base}/contacts`
pub struct FederatedContactsAdapter {
    client: Client,
    base_url: String,
    owner_id: String,
    credentials: Arc<dyn CredentialProvider>,
}

impl FederatedContactsAdapter {
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
}

#[async_trait]
impl SourceAdapter for FederatedContactsAdapter {
    fn kind(&self) -> SourceKind {
        SourceKind::FederatedContacts
    }

    fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn lookback(&self) -> Duration {
        Duration::days(FEDERATED_CONTACTS_LOOKBACK_DAYS)
    }

    async fn fetch_since(
        &self,
        watermark: Option<&SyncWatermark>,
    ) -> Result<FetchOutcome, AdapterError> {
        let token = self.credentials.access_token(self.kind()).await?;
        let now = Utc::now();
        let since = window_start(watermark, self.lookback(), now);

        let url = format!("{}/contacts", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .query(&[(
                "updated_since",
                since.to_rfc3339_opts(SecondsFormat::Secs, true),
            )])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AdapterError::Api(status.as_u16(), body));
        }

        let parsed: ContactsResponse = response
            .json()
            .await
            .map_err(|e| AdapterError::Parse(e.to_string()))?;

        let records: Vec<RawRecord> = parsed
            .contacts
            .into_iter()
            .filter(|c| c.updated_at >= since)
            .map(|contact| RawRecord {
                external_id: contact.id.clone(),
                source: SourceKind::FederatedContacts,
                plain_text: Some(contact.to_text()),
                binary_body: None,
                timestamp: contact.updated_at,
                sender: contact.display_name.clone(),
                subject: None,
                attachments: Vec::new(),
            })
            .collect();

        tracing::debug!(url = %url, count = records.len(), "Fetched remote contacts");

        Ok(FetchOutcome::Records {
            records,
            next_watermark: SyncWatermark {
                source: SourceKind::FederatedContacts,
                owner_id: self.owner_id.clone(),
                last_sync_at: Some(now),
                content_hash: None,
            },
        })
    }
}
