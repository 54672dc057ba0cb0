mod support;

use std::net::SocketAddr;
use std::sync::Arc;

use draco_replicator::api::create_router;
use draco_replicator::config::{Config, RoleSelection};
use draco_replicator::platform::{LocalPlatform, DEV_PRODUCER_ACCOUNT};
use draco_replicator::state::AppState;
use serde_json::{json, Value};

use support::fast_config;

/// Serves the router on an ephemeral port; returns the base url.
async fn serve(config: Config) -> String {
    let (platform, _messages) = LocalPlatform::build(Arc::new(config));
    let app = create_router(AppState::new(platform));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn seed_body(id: &str) -> Value {
    json!({
        "snapshot_type": "RDS",
        "source_name": "orders",
        "id": id,
        "tags": [{"Key": "Draco_Lifecycle", "Value": "Weekly"}],
    })
}

fn arn(account: &str, id: &str) -> String {
    format!("arn:aws:rds:us-east-1:{account}:snapshot:{id}")
}

fn poll_body(source_arn: &str) -> Value {
    json!({
        "SnapshotType": "RDS",
        "SourceArn": source_arn,
        "iterator": {"count": 0, "maxcount": 5},
    })
}

#[tokio::test]
async fn test_health_endpoints() {
    let base = serve(fast_config()).await;
    let client = reqwest::Client::new();

    let live = client.get(format!("{base}/healthz")).send().await.unwrap();
    assert_eq!(live.status(), 200);
    let body: Value = live.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    let ready = client.get(format!("{base}/readyz")).send().await.unwrap();
    assert_eq!(ready.status(), 200);
    let body: Value = ready.json().await.unwrap();
    assert_eq!(body["components"]["producer"]["status"], "ok");
    assert_eq!(body["components"]["consumer"]["status"], "ok");
}

#[tokio::test]
async fn test_consumer_only_process_refuses_producer_calls() {
    let mut config = fast_config();
    config.role = RoleSelection::Consumer;
    let base = serve(config).await;
    let client = reqwest::Client::new();

    let ready: Value = client
        .get(format!("{base}/readyz"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(ready["components"]["producer"]["status"], "disabled");

    let response = client
        .post(format!("{base}/v1/producer"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    assert_eq!(
        response.headers()["content-type"],
        "application/problem+json"
    );
    let problem: Value = response.json().await.unwrap();
    assert_eq!(problem["code"], "role_not_served");
}

#[tokio::test]
async fn test_seed_and_list_snapshots() {
    let base = serve(fast_config()).await;
    let client = reqwest::Client::new();

    let created = client
        .post(format!("{base}/v1/debug/snapshots"))
        .json(&seed_body("orders-1"))
        .send()
        .await
        .unwrap();
    assert_eq!(created.status(), 201);
    let snapshot: Value = created.json().await.unwrap();
    assert_eq!(snapshot["id"], "orders-1");
    assert_eq!(snapshot["arn"], arn(DEV_PRODUCER_ACCOUNT, "orders-1"));

    let duplicate = client
        .post(format!("{base}/v1/debug/snapshots"))
        .json(&seed_body("orders-1"))
        .send()
        .await
        .unwrap();
    assert_eq!(duplicate.status(), 409);

    let invalid = client
        .post(format!("{base}/v1/debug/snapshots"))
        .json(&seed_body(""))
        .send()
        .await
        .unwrap();
    assert_eq!(invalid.status(), 400);

    let listed: Value = client
        .get(format!("{base}/v1/debug/snapshots"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let items = listed["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["account"], DEV_PRODUCER_ACCOUNT);
    assert_eq!(items[0]["source_name"], "orders");
    assert_eq!(items[0]["status"], "available");
}

#[tokio::test]
async fn test_wait4copy_mirrors_poll_status() {
    let base = serve(fast_config()).await;
    let client = reqwest::Client::new();
    client
        .post(format!("{base}/v1/debug/snapshots"))
        .json(&seed_body("orders-1"))
        .send()
        .await
        .unwrap();

    let found = client
        .post(format!("{base}/v1/wait4copy"))
        .json(&poll_body(&arn(DEV_PRODUCER_ACCOUNT, "orders-1")))
        .send()
        .await
        .unwrap();
    assert_eq!(found.status(), 200);
    let body: Value = found.json().await.unwrap();
    assert_eq!(body["statusCode"], 200);
    assert_eq!(body["status"], "available");
    assert_eq!(body["iterator"]["count"], 1);
    assert_eq!(body["iterator"]["exhausted"], false);

    let missing = client
        .post(format!("{base}/v1/wait4copy"))
        .json(&poll_body(&arn(DEV_PRODUCER_ACCOUNT, "orders-9")))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), 404);

    let no_arn = client
        .post(format!("{base}/v1/wait4copy"))
        .json(&poll_body(""))
        .send()
        .await
        .unwrap();
    assert_eq!(no_arn.status(), 500);
    let body: Value = no_arn.json().await.unwrap();
    assert_eq!(body["error"], "SourceArn not provided");

    let foreign = client
        .post(format!("{base}/v1/wait4copy"))
        .json(&poll_body(&arn("999999999999", "orders-1")))
        .send()
        .await
        .unwrap();
    assert_eq!(foreign.status(), 500);
}

#[tokio::test]
async fn test_producer_endpoint_status_mirrors_handler() {
    let base = serve(fast_config()).await;
    let client = reqwest::Client::new();

    let garbage = client
        .post(format!("{base}/v1/producer"))
        .json(&json!({"hello": "world"}))
        .send()
        .await
        .unwrap();
    assert_eq!(garbage.status(), 500);

    let notice = json!({
        "Records": [{
            "EventSource": "aws:sns",
            "Sns": {
                "Subject": "RDS Notification Message",
                "Message": "This is a test notification",
                "TopicArn": format!("arn:aws:sns:us-east-1:{DEV_PRODUCER_ACCOUNT}:rds-events"),
            }
        }]
    });
    let informational = client
        .post(format!("{base}/v1/producer"))
        .json(&notice)
        .send()
        .await
        .unwrap();
    assert_eq!(informational.status(), 200);
}
