//! HTTP API tests against a live axum server on an ephemeral port

use async_trait::async_trait;
use scholarship_ingest::{
    config::Config,
    daemon::{
        http::{auth::AuthState, create_router, handlers::AppState},
        JobManager, Pipeline, PipelineMetrics,
    },
    scraping::{FetchError, FetchResult, PageFetcher},
    store::Store,
    validation::LinkChecker,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use url::Url;

const KEY: &str = "dashboard-key";

struct Offline;

#[async_trait]
impl PageFetcher for Offline {
    async fn fetch(&self, _url: &Url) -> Result<FetchResult, FetchError> {
        Err(FetchError::Status(503))
    }
}

#[async_trait]
impl LinkChecker for Offline {
    async fn check(&self, _url: &Url) -> Result<u16, FetchError> {
        Ok(200)
    }
}

/// Serve the API without workers, so submitted jobs stay pending
async fn spawn_api() -> String {
    let config = Config::default();
    let store = Arc::new(Store::in_memory());
    let metrics = PipelineMetrics::shared();
    let pipeline = Pipeline::from_config(
        &config,
        Arc::new(Offline),
        Arc::new(Offline),
        store.clone(),
        metrics.clone(),
    )
    .unwrap();
    let (shutdown_tx, _) = broadcast::channel(4);
    let manager = JobManager::new(
        store,
        Arc::new(pipeline),
        config.scheduler.clone(),
        shutdown_tx,
        metrics.clone(),
    );

    let app = create_router(
        AppState {
            manager,
            metrics,
            metrics_enabled: true,
        },
        AuthState::new(vec![KEY.to_string()]),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_job_lifecycle_over_http() {
    let base = spawn_api().await;
    let client = reqwest::Client::new();
    let body = json!({
        "source_url": "https://scholarships.gov.in/public/schemeList",
        "source_name": "National Scholarship Portal",
        "priority": "high",
        "force_update": false
    });

    let resp = client.post(format!("{}/api/v1/jobs", base)).json(&body).send().await.unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .post(format!("{}/api/v1/jobs", base))
        .bearer_auth(KEY)
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let created: Value = resp.json().await.unwrap();
    assert_eq!(created["status"], "pending");
    let job_id = created["job_id"].as_str().unwrap().to_string();

    let job: Value = client
        .get(format!("{}/api/v1/jobs/{}", base, job_id))
        .header("X-API-Key", KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(job["source_name"], "National Scholarship Portal");
    assert_eq!(job["priority"], "high");
    assert_eq!(job["items_saved"], 0);

    let list: Value = client
        .get(format!("{}/api/v1/jobs?status=pending&source=scholarships", base))
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["count"], 1);

    let resp = client
        .post(format!("{}/api/v1/jobs/{}/cancel?reason=duplicate%20request", base, job_id))
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let cancelled: Value = resp.json().await.unwrap();
    assert_eq!(cancelled["status"], "cancelled");
    assert_eq!(cancelled["cancellation_reason"], "duplicate request");

    let resp = client
        .post(format!("{}/api/v1/jobs/{}/cancel", base, job_id))
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);

    let resp = client
        .post(format!("{}/api/v1/jobs/{}/retry", base, job_id))
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let retried: Value = resp.json().await.unwrap();
    assert_eq!(retried["status"], "pending");
}

#[tokio::test]
async fn test_bad_requests() {
    let base = spawn_api().await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/api/v1/jobs/not-a-uuid", base))
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .get(format!("{}/api/v1/jobs/{}", base, uuid::Uuid::new_v4()))
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let resp = client
        .post(format!("{}/api/v1/jobs", base))
        .bearer_auth(KEY)
        .json(&json!({ "source_url": "ftp://files.example.org/list" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_health_endpoints_need_no_key() {
    let base = spawn_api().await;
    let client = reqwest::Client::new();

    let resp = client.get(format!("{}/api/v1/health", base)).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let health: Value = resp.json().await.unwrap();
    assert_eq!(health["database"]["reachable"], true);
    assert_eq!(health["queue"]["queued"], 0);

    let resp = client.get(format!("{}/metrics", base)).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let text = resp.text().await.unwrap();
    assert!(text.contains("scholarship_ingest_items_saved_total"));

    let records: Value = client
        .get(format!("{}/api/v1/records", base))
        .bearer_auth(KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(records["count"], 0);
}
