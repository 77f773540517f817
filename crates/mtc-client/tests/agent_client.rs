//! Client tests against an in-process agent

use mtc_client::testing::{MockAgent, MockDevice};
use mtc_client::AgentClientError;
use mtc_core::{Category, ConditionState};

#[tokio::test]
async fn test_probe_returns_device_structure() {
    let agent = MockAgent::start(MockDevice::cnc("VMC-3Axis")).await.unwrap();
    let client = agent.client().unwrap();

    let doc = client.probe().await.unwrap();
    assert_eq!(doc.header.instance_id, 1);
    assert_eq!(doc.device_names(), vec!["VMC-3Axis".to_string()]);

    let device = &doc.devices[0];
    assert_eq!(device.data_items[0].type_name, "AVAILABILITY");
    let path = &device.components[0].components[0];
    assert_eq!(path.type_name, "Path");
    assert_eq!(path.data_items.len(), 3);
}

#[tokio::test]
async fn test_current_reports_latest_values() {
    let agent = MockAgent::start(MockDevice::cnc("VMC-3Axis")).await.unwrap();
    agent.push("avail", "AVAILABLE");
    agent.push("exec", "READY");
    agent.push("exec", "ACTIVE");
    agent.push("system", "FAULT");

    let doc = agent.client().unwrap().current().await.unwrap();
    assert_eq!(doc.header.next_sequence, Some(5));

    let stream = doc.stream_for(Some("VMC-3Axis")).unwrap();
    assert_eq!(stream.observations.len(), 3);
    assert_eq!(stream.latest("exec").unwrap().value, "ACTIVE");

    let system = stream.latest("system").unwrap();
    assert_eq!(system.category, Category::Condition);
    assert_eq!(system.condition, Some(ConditionState::Fault));
}

#[tokio::test]
async fn test_sample_follows_next_sequence() {
    let agent = MockAgent::start(MockDevice::cnc("VMC-3Axis")).await.unwrap();
    let client = agent.client().unwrap();
    for value in ["100", "200", "300"] {
        agent.push("Sspeed", value);
    }

    let first = client.sample(1, 2).await.unwrap();
    let values: Vec<_> = first.device_streams[0]
        .observations
        .iter()
        .map(|o| o.value.clone())
        .collect();
    assert_eq!(values, vec!["100", "200"]);

    let next = first.header.next_sequence.unwrap();
    let second = client.sample(next, 2).await.unwrap();
    assert_eq!(second.device_streams[0].observations[0].value, "300");
}

#[tokio::test]
async fn test_sample_after_restart_is_out_of_range() {
    let agent = MockAgent::start(MockDevice::cnc("VMC-3Axis")).await.unwrap();
    let client = agent.client().unwrap();
    for _ in 0..5 {
        agent.push("exec", "ACTIVE");
    }
    agent.restart(2);
    agent.push("exec", "READY");

    let err = client.sample(6, 10).await.unwrap_err();
    assert!(err.is_out_of_range());

    let current = client.current().await.unwrap();
    assert_eq!(current.header.instance_id, 2);
}

#[tokio::test]
async fn test_offline_agent_is_transport_error() {
    let agent = MockAgent::start(MockDevice::cnc("VMC-3Axis")).await.unwrap();
    agent.set_online(false);

    let err = agent.client().unwrap().current().await.unwrap_err();
    assert!(matches!(err, AgentClientError::ServerError { status: 503, .. }));
    assert!(err.is_transport());
}

#[tokio::test]
async fn test_unknown_device_is_agent_error() {
    let agent = MockAgent::start(MockDevice::cnc("VMC-3Axis")).await.unwrap();
    let client =
        mtc_client::AgentClient::new(&agent.base_url(), Some("Lathe")).unwrap();

    let err = client.probe().await.unwrap_err();
    assert!(matches!(err, AgentClientError::AgentError { ref code, .. } if code == "NO_DEVICE"));
}

#[tokio::test]
async fn test_assets() {
    let agent = MockAgent::start(MockDevice::cnc("VMC-3Axis")).await.unwrap();
    agent.add_asset("T1", "CuttingTool");

    let doc = agent.client().unwrap().assets().await.unwrap();
    assert_eq!(doc.assets.len(), 1);
    assert_eq!(doc.assets[0].asset_type, "CuttingTool");
}
