//! End-to-end flows: billing through the dispatcher, notification delivery
//! through the HTTP endpoint, processing through the worker.

use axum::http::{header, Request, StatusCode};
use axum::Router;
use billing_core::config::EngineConfig;
use billing_core::store::*;
use billing_core::types::*;
use billing_core::{BlacklistGuard, InMemoryBlacklist};
use billing_engine::{ChargebackProcessor, Dispatcher};
use gateway_client::signature::expected_signature;
use gateway_client::MockGateway;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tower::ServiceExt;
use webhook_service::{
    http::{router, AppState},
    queue::JobQueue,
    WebhookIngestor, WebhookProcessor, Worker,
};

const SECRET: &str = "whsec";

struct World {
    app: Router,
    queue: JobQueue,
    worker: Worker,
    dispatcher: Dispatcher,
    gateway: Arc<MockGateway>,
    accounts: Arc<InMemoryAccountRepo>,
    attempts: Arc<InMemoryAttemptRepo>,
    events: Arc<InMemoryWebhookEventRepo>,
    blacklist: Arc<InMemoryBlacklist>,
}

fn world() -> World {
    let mut config = EngineConfig::default();
    config.gateway.endpoint = "https://gw.test/process".to_string();
    config.gateway.username = "api".to_string();
    config.gateway.password = "secret".to_string();
    config.gateway.notification_url = "https://engine.test/webhooks/gateway".to_string();
    config.webhook.secret = SECRET.to_string();

    let gateway = Arc::new(MockGateway::new());
    let accounts = Arc::new(InMemoryAccountRepo::new());
    let profiles = Arc::new(InMemoryProfileRepo::new());
    let attempts = Arc::new(InMemoryAttemptRepo::new());
    let events = Arc::new(InMemoryWebhookEventRepo::new());
    let blacklist = Arc::new(InMemoryBlacklist::new());

    let chargebacks = Arc::new(ChargebackProcessor::new(
        config.webhook.clone(),
        accounts.clone(),
        profiles.clone(),
        attempts.clone(),
        events.clone(),
        blacklist.clone(),
    ));
    let dispatcher = Dispatcher::new(
        config.clone(),
        gateway.clone(),
        accounts.clone(),
        profiles.clone(),
        attempts.clone(),
        blacklist.clone(),
    );
    let processor = Arc::new(WebhookProcessor::new(
        accounts.clone(),
        profiles.clone(),
        attempts.clone(),
        events.clone(),
        chargebacks,
    ));

    let queue = JobQueue::new();
    let worker = Worker::new(
        0,
        config.webhook.clone(),
        queue.clone(),
        processor,
        None,
        None,
        events.clone(),
    );
    let ingestor = Arc::new(WebhookIngestor::new(
        config.webhook.clone(),
        events.clone(),
        queue.clone(),
    ));
    let app = router(AppState { ingestor });

    World {
        app,
        queue,
        worker,
        dispatcher,
        gateway,
        accounts,
        attempts,
        events,
        blacklist,
    }
}

fn seed_account(iban: &str) -> Account {
    let now = chrono::Utc::now();
    Account {
        id: AccountId::new(),
        upload_id: UploadId::new(),
        first_name: "Ada".to_string(),
        last_name: "Lovelace".to_string(),
        email: Some("ada@example.org".to_string()),
        iban: Iban::new(iban),
        bic: None,
        amount: dec!(150.00),
        validation_status: ValidationStatus::Valid,
        status: AccountStatus::Uploaded,
        created_at: now,
        updated_at: now,
    }
}

async fn deliver(app: &Router, body: String) -> StatusCode {
    app.clone()
        .oneshot(
            Request::post("/webhooks/gateway")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(axum::body::Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap()
        .status()
}

fn signed_form(unique_id: &str, rest: &str) -> String {
    format!(
        "unique_id={}&signature={}&{}",
        unique_id,
        expected_signature(unique_id, SECRET),
        rest
    )
}

async fn drain_one(world: &World) {
    let job = world.queue.recv().await.expect("queued job");
    world.worker.execute(job).await;
}

#[tokio::test]
async fn test_async_approval_settles_through_webhook() {
    let world = world();
    let acct = seed_account("DE89370400440532013000");
    world.accounts.insert(acct.clone()).await.unwrap();

    // The gateway answers pending_async; settlement arrives by webhook
    world
        .gateway
        .push_outcome(MockGateway::response("pending_async", "EMG-1"))
        .await;
    let attempt = world
        .dispatcher
        .bill_one(acct.id, BillingModel::Legacy, None)
        .await
        .unwrap();
    assert_eq!(attempt.status, AttemptStatus::Pending);
    assert_eq!(
        world.accounts.get(acct.id).await.unwrap().status,
        AccountStatus::Billing
    );

    let status = deliver(
        &world.app,
        signed_form("EMG-1", "transaction_type=sdd_sale&status=approved"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    drain_one(&world).await;

    assert_eq!(
        world.attempts.get(attempt.id).await.unwrap().status,
        AttemptStatus::Approved
    );
    assert_eq!(
        world.accounts.get(acct.id).await.unwrap().status,
        AccountStatus::Recovered
    );
}

#[tokio::test]
async fn test_chargeback_webhook_blacklists_debtor() {
    let world = world();
    let acct = seed_account("DE89370400440532013000");
    world.accounts.insert(acct.clone()).await.unwrap();

    let attempt = world
        .dispatcher
        .bill_one(acct.id, BillingModel::Legacy, None)
        .await
        .unwrap();
    assert_eq!(attempt.status, AttemptStatus::Approved);
    let unique_id = attempt.unique_id.clone().unwrap();

    let status = deliver(
        &world.app,
        signed_form(
            &unique_id,
            "notification_type=chargeback&status=chargebacked&reason_code=AC04&reason_description=No+such+account",
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    drain_one(&world).await;

    let attempt = world.attempts.get(attempt.id).await.unwrap();
    assert_eq!(attempt.status, AttemptStatus::Chargebacked);
    assert_eq!(attempt.chargeback_reason_code.as_deref(), Some("AC04"));

    let acct = world.accounts.get(acct.id).await.unwrap();
    assert_eq!(acct.status, AccountStatus::Chargebacked);
    assert!(world.blacklist.is_blacklisted(&acct).await);

    // A blacklisted debtor under a fresh upload is skipped before the wire
    let mut again = seed_account("DE89370400440532013000");
    again.upload_id = UploadId::new();
    world.accounts.insert(again.clone()).await.unwrap();
    let calls_before = world.gateway.call_count();
    let tally = world
        .dispatcher
        .bill_upload(again.upload_id, BillingModel::Legacy, None)
        .await
        .unwrap();
    assert_eq!(tally.skipped, 1);
    assert_eq!(world.gateway.call_count(), calls_before);
}

#[tokio::test]
async fn test_duplicate_delivery_mutates_once() {
    let world = world();
    let acct = seed_account("DE89370400440532013000");
    world.accounts.insert(acct.clone()).await.unwrap();

    world
        .gateway
        .push_outcome(MockGateway::response("pending_async", "EMG-1"))
        .await;
    let attempt = world
        .dispatcher
        .bill_one(acct.id, BillingModel::Legacy, None)
        .await
        .unwrap();

    let body = signed_form("EMG-1", "transaction_type=sdd_sale&status=approved");
    assert_eq!(deliver(&world.app, body.clone()).await, StatusCode::OK);
    assert_eq!(deliver(&world.app, body).await, StatusCode::OK);

    // Both deliveries acknowledged; exactly one job queued
    assert_eq!(world.queue.len(), 1);
    drain_one(&world).await;
    assert!(world.queue.is_empty());

    assert_eq!(
        world.attempts.get(attempt.id).await.unwrap().status,
        AttemptStatus::Approved
    );
}

#[tokio::test]
async fn test_completed_event_records_message() {
    let world = world();
    let acct = seed_account("DE89370400440532013000");
    world.accounts.insert(acct.clone()).await.unwrap();
    world
        .gateway
        .push_outcome(MockGateway::response("pending_async", "EMG-1"))
        .await;
    world
        .dispatcher
        .bill_one(acct.id, BillingModel::Legacy, None)
        .await
        .unwrap();

    deliver(
        &world.app,
        signed_form("EMG-1", "transaction_type=sdd_sale&status=declined"),
    )
    .await;
    let job = world.queue.recv().await.unwrap();
    let event_id = job.event_id.unwrap();
    world.worker.execute(job).await;

    let event = world.events.get(event_id).await.unwrap();
    assert_eq!(event.state, WebhookState::Completed);
    assert_eq!(event.message.as_deref(), Some("status set to declined"));
    assert!(event.processed_at.is_some());
}
