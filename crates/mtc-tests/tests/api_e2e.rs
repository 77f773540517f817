//! The HTTP facade over a live collector

use std::sync::Arc;
use std::time::Duration;

use mtc_api::{router_for_prefix, AppState};
use mtc_client::testing::{MockAgent, MockDevice};
use mtc_collector::Collector;
use mtc_core::MemoryStore;
use mtc_tests::{config, new_cache};
use pretty_assertions::assert_eq;
use reqwest::StatusCode;
use serde_json::{json, Value};
use tokio::net::TcpListener;

const TIMEOUT: Duration = Duration::from_secs(5);

/// Serve the facade under `/mtc` on an ephemeral port; returns its base URL
async fn serve(state: AppState) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = router_for_prefix(state, "/mtc");
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    format!("http://{}/mtc", addr)
}

/// Poll `url` until `check` accepts a 200 body
async fn poll_until(client: &reqwest::Client, url: &str, check: impl Fn(&Value) -> bool) -> Value {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    loop {
        if let Ok(response) = client.get(url).send().await {
            if response.status() == StatusCode::OK {
                let body: Value = response.json().await.unwrap();
                if check(&body) {
                    return body;
                }
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting on {}",
            url
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn test_connection_added_over_http_is_collected() {
    let agent = MockAgent::start(MockDevice::cnc("Mill")).await.unwrap();
    agent.push("avail", "AVAILABLE");
    agent.push("system", "FAULT");

    let cache = new_cache();
    let collector = Collector::new(&config(""), cache.clone(), Arc::new(MemoryStore::new()));
    collector.start().unwrap();
    let base = serve(AppState::new(cache, collector.clone())).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/connections", base))
        .json(&json!({
            "address": "127.0.0.1",
            "port": agent.port(),
            "device_name": "Mill",
            "interval_ms": 50
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created: Value = response.json().await.unwrap();
    let id = created["device_id"].as_str().unwrap().to_string();

    let status = poll_until(&client, &format!("{}/devices/{}/status", base, id), |body| {
        body["connected"] == true && body["available"] == true
    })
    .await;
    assert_eq!(status["agent_instance_id"], 1);

    let alarms = poll_until(&client, &format!("{}/devices/{}/alarms", base, id), |body| {
        body["total_count"] == 1
    })
    .await;
    assert_eq!(alarms["items"][0]["data_item_id"], "system");
    assert_eq!(alarms["items"][0]["state"], "FAULT");

    // Latest value of every data item
    let samples: Value = client
        .get(format!("{}/devices/{}/samples", base, id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let ids: Vec<&str> = samples["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["id"].as_str().unwrap())
        .collect();
    assert!(ids.contains(&"avail"));
    assert!(ids.contains(&"system"));

    let model: Value = client
        .get(format!("{}/devices/{}/model", base, id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(model["data_items"].as_array().map(Vec::len), Some(5));

    let listed = poll_until(&client, &format!("{}/connections", base), |body| {
        body["items"][0]["state"] == "streaming"
    })
    .await;
    assert_eq!(listed["total_count"], 1);

    // Removing stops collection
    let response = client
        .delete(format!("{}/connections/{}", base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(collector.active_count(), 0);
    collector.stop();
}

#[tokio::test]
async fn test_facade_errors() {
    let cache = new_cache();
    let collector = Collector::new(&config(""), cache.clone(), Arc::new(MemoryStore::new()));
    let base = serve(AppState::new(cache, collector)).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/devices/nope/status", base))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "bad_request");

    let response = client
        .post(format!("{}/connections", base))
        .json(&json!({ "address": "" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = client.get(format!("{}/health", base)).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "OK");
}
