//! First sync of a remote mailbox against a local mock server

mod helpers;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use txsync::db::{records, watermarks};
use txsync::models::PhaseOutcome;
use txsync::services::adapters::email_provider::EmailProviderAdapter;
use txsync::services::{SourceAdapter, StaticCredentialProvider};
use txsync_common::SourceKind;

use helpers::{create_test_db, create_test_orchestrator, run_to_completion, EchoProvider};

#[derive(Clone, Default)]
struct MockMailbox {
    requests: Arc<Mutex<Vec<(Option<String>, Option<String>)>>>,
    messages: Arc<Vec<Value>>,
}

async fn list_messages(
    State(mailbox): State<MockMailbox>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Json<Value> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    mailbox
        .requests
        .lock()
        .unwrap()
        .push((query.get("since").cloned(), auth));

    Json(json!({
        "messages": mailbox.messages.as_ref(),
        "next_page_token": null,
    }))
}

async fn start_mailbox(messages: Vec<Value>) -> (String, MockMailbox) {
    let mailbox = MockMailbox {
        requests: Arc::default(),
        messages: Arc::new(messages),
    };
    let app = Router::new()
        .route("/messages", get(list_messages))
        .with_state(mailbox.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), mailbox)
}

fn message(id: &str, subject: &str, body: &str, received_at: DateTime<Utc>) -> Value {
    json!({
        "messageId": id,
        "from": "billing@shop.example",
        "subject": subject,
        "textBody": body,
        "receivedAt": received_at.to_rfc3339(),
    })
}

#[tokio::test]
async fn test_first_mailbox_sync_uses_lookback_and_advances_watermark() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let now = Utc::now();
    let (base_url, mailbox) = start_mailbox(vec![
        message("<inv-1@shop>", "Invoice 1", "Payment due for invoice 1", now - Duration::days(5)),
        message("<news@shop>", "Newsletter", "Spring collection is here", now - Duration::days(2)),
        // Outside the first-sync window; the adapter drops it
        message("<old@shop>", "Old receipt", "Receipt from last year", now - Duration::days(200)),
    ])
    .await;

    let credentials = Arc::new(StaticCredentialProvider::new(HashMap::from([(
        SourceKind::EmailProvider,
        "mail-token".to_string(),
    )])));
    let adapter = Arc::new(EmailProviderAdapter::new(base_url, "tester", credentials).unwrap());
    let (orchestrator, _bus) = create_test_orchestrator(
        &pool,
        vec![adapter as Arc<dyn SourceAdapter>],
        Arc::new(EchoProvider::new()),
        4000,
    );

    let before = Utc::now() - Duration::seconds(1);
    let summary = run_to_completion(&orchestrator, &[SourceKind::EmailProvider]).await;
    let after = Utc::now();

    let phase = summary.source(SourceKind::EmailProvider).unwrap();
    assert_eq!(phase.outcome, PhaseOutcome::Completed);
    assert_eq!(phase.imported, 2);

    let requests = mailbox.requests.lock().unwrap().clone();
    assert_eq!(requests.len(), 1);
    let (since, auth) = &requests[0];
    assert_eq!(auth.as_deref(), Some("Bearer mail-token"));
    let since: DateTime<Utc> = since.as_deref().unwrap().parse().unwrap();
    let expected = now - Duration::days(90);
    assert!((since - expected).num_seconds().abs() <= 60, "since = {}", since);

    let watermark = watermarks::load_watermark(&pool, SourceKind::EmailProvider, "tester")
        .await
        .unwrap()
        .unwrap();
    let last_sync_at = watermark.last_sync_at.unwrap();
    assert!(last_sync_at >= before && last_sync_at <= after);

    let invoice = records::get_record(&pool, SourceKind::EmailProvider, "<inv-1@shop>")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(invoice.subject.as_deref(), Some("Invoice 1"));
    assert_eq!(invoice.is_transaction_related, Some(true));
    assert!(records::get_record(&pool, SourceKind::EmailProvider, "<old@shop>")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_missing_mailbox_token_fails_only_that_phase() {
    let (_dir, pool) = create_test_db().await.unwrap();
    let (base_url, mailbox) = start_mailbox(Vec::new()).await;

    let credentials = Arc::new(StaticCredentialProvider::new(HashMap::new()));
    let adapter = Arc::new(EmailProviderAdapter::new(base_url, "tester", credentials).unwrap());
    let (orchestrator, _bus) = create_test_orchestrator(
        &pool,
        vec![adapter as Arc<dyn SourceAdapter>],
        Arc::new(EchoProvider::new()),
        4000,
    );

    let summary = run_to_completion(&orchestrator, &[SourceKind::EmailProvider]).await;
    let phase = summary.source(SourceKind::EmailProvider).unwrap();
    assert_eq!(phase.outcome, PhaseOutcome::Failed);
    assert!(phase.error.as_deref().unwrap().contains("TXSYNC_EMAIL_PROVIDER_TOKEN"));
    assert!(mailbox.requests.lock().unwrap().is_empty());
    assert!(watermarks::load_watermark(&pool, SourceKind::EmailProvider, "tester")
        .await
        .unwrap()
        .is_none());
}
