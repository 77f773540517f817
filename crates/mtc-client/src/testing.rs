//! Test utilities for mtc-client
//!
//! [`MockAgent`] is an in-process MTConnect agent serving one device over
//! HTTP on 127.0.0.1. Tests push observations into it, take it offline, or
//! restart it with a new instance id.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, SecondsFormat, Utc};
use mtc_core::{Category, ConditionState};
use parking_lot::RwLock;
use serde::Deserialize;
use tokio::net::TcpListener;

use crate::{AgentClient, Result};

/// A data item served by the mock agent
#[derive(Debug, Clone)]
pub struct MockDataItem {
    pub id: String,
    pub category: Category,
    pub type_name: String,
    pub sub_type: Option<String>,
}

impl MockDataItem {
    pub fn new(id: &str, category: Category, type_name: &str) -> Self {
        Self {
            id: id.into(),
            category,
            type_name: type_name.into(),
            sub_type: None,
        }
    }

    pub fn with_sub_type(mut self, sub_type: &str) -> Self {
        self.sub_type = Some(sub_type.into());
        self
    }
}

/// A component served by the mock agent
#[derive(Debug, Clone)]
pub struct MockComponent {
    pub id: String,
    pub type_name: String,
    pub data_items: Vec<MockDataItem>,
    pub components: Vec<MockComponent>,
}

impl MockComponent {
    pub fn new(id: &str, type_name: &str) -> Self {
        Self {
            id: id.into(),
            type_name: type_name.into(),
            data_items: Vec::new(),
            components: Vec::new(),
        }
    }

    pub fn data_item(mut self, item: MockDataItem) -> Self {
        self.data_items.push(item);
        self
    }

    pub fn component(mut self, component: MockComponent) -> Self {
        self.components.push(component);
        self
    }
}

/// The device description served by `probe`
#[derive(Debug, Clone)]
pub struct MockDevice {
    pub id: String,
    pub name: String,
    pub version: String,
    pub data_items: Vec<MockDataItem>,
    pub components: Vec<MockComponent>,
}

impl MockDevice {
    pub fn new(name: &str) -> Self {
        Self {
            id: "dev".into(),
            name: name.into(),
            version: "1.3.0.17".into(),
            data_items: Vec::new(),
            components: Vec::new(),
        }
    }

    /// A small CNC: availability, a controller with a condition, and a path
    /// with execution, program and spindle speed
    pub fn cnc(name: &str) -> Self {
        Self::new(name)
            .data_item(MockDataItem::new("avail", Category::Event, "AVAILABILITY"))
            .component(
                MockComponent::new("cont", "Controller")
                    .data_item(MockDataItem::new("system", Category::Condition, "SYSTEM"))
                    .component(
                        MockComponent::new("path", "Path")
                            .data_item(MockDataItem::new("exec", Category::Event, "EXECUTION"))
                            .data_item(MockDataItem::new("program", Category::Event, "PROGRAM"))
                            .data_item(
                                MockDataItem::new("Sspeed", Category::Sample, "SPINDLE_SPEED")
                                    .with_sub_type("ACTUAL"),
                            ),
                    ),
            )
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = version.into();
        self
    }

    pub fn data_item(mut self, item: MockDataItem) -> Self {
        self.data_items.push(item);
        self
    }

    pub fn component(mut self, component: MockComponent) -> Self {
        self.components.push(component);
        self
    }

    fn find_item(&self, id: &str) -> Option<MockDataItem> {
        fn walk(components: &[MockComponent], id: &str) -> Option<MockDataItem> {
            components.iter().find_map(|c| {
                c.data_items
                    .iter()
                    .find(|d| d.id == id)
                    .cloned()
                    .or_else(|| walk(&c.components, id))
            })
        }
        self.data_items
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .or_else(|| walk(&self.components, id))
    }
}

#[derive(Debug, Clone)]
struct MockObservation {
    item: MockDataItem,
    sequence: u64,
    timestamp: DateTime<Utc>,
    value: String,
    condition: Option<ConditionState>,
}

struct AgentState {
    device: MockDevice,
    instance_id: u64,
    next_sequence: u64,
    observations: Vec<MockObservation>,
    assets: Vec<(String, String, DateTime<Utc>)>,
    online: bool,
    requests: HashMap<String, usize>,
}

type SharedState = Arc<RwLock<AgentState>>;

/// An MTConnect agent that shuts down when dropped
pub struct MockAgent {
    pub addr: SocketAddr,
    state: SharedState,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl MockAgent {
    /// Start serving `device` with instance id 1
    pub async fn start(device: MockDevice) -> Result<Self> {
        let state = Arc::new(RwLock::new(AgentState {
            device,
            instance_id: 1,
            next_sequence: 1,
            observations: Vec::new(),
            assets: Vec::new(),
            online: true,
            requests: HashMap::new(),
        }));

        let router = Router::new()
            .route("/{verb}", get(root_request))
            .route("/{device}/{verb}", get(device_request))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        // Give server a moment to start
        tokio::time::sleep(Duration::from_millis(10)).await;

        Ok(Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// A client scoped to the served device
    pub fn client(&self) -> Result<AgentClient> {
        let name = self.state.read().device.name.clone();
        AgentClient::with_timeout(&self.base_url(), Some(&name), Duration::from_secs(2))
    }

    pub fn instance_id(&self) -> u64 {
        self.state.read().instance_id
    }

    /// Simulate an agent restart: new instance id, empty buffer, sequence
    /// numbers starting over
    pub fn restart(&self, instance_id: u64) {
        let mut state = self.state.write();
        state.instance_id = instance_id;
        state.next_sequence = 1;
        state.observations.clear();
    }

    /// Replace the served device description
    pub fn set_device(&self, device: MockDevice) {
        self.state.write().device = device;
    }

    /// While offline every request answers 503
    pub fn set_online(&self, online: bool) {
        self.state.write().online = online;
    }

    /// Record an observation timestamped now
    pub fn push(&self, data_item_id: &str, value: &str) -> u64 {
        self.push_at(data_item_id, value, Utc::now())
    }

    /// Record an observation. CONDITION items take the state from `value`.
    /// Returns the assigned sequence number.
    pub fn push_at(&self, data_item_id: &str, value: &str, timestamp: DateTime<Utc>) -> u64 {
        let mut state = self.state.write();
        let item = state
            .device
            .find_item(data_item_id)
            .unwrap_or_else(|| MockDataItem::new(data_item_id, Category::Event, "UNKNOWN"));
        let condition = match item.category {
            Category::Condition => value.parse().ok(),
            _ => None,
        };
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.observations.push(MockObservation {
            item,
            sequence,
            timestamp,
            value: value.to_string(),
            condition,
        });
        sequence
    }

    pub fn add_asset(&self, asset_id: &str, asset_type: &str) {
        self.state
            .write()
            .assets
            .push((asset_id.into(), asset_type.into(), Utc::now()));
    }

    /// Number of requests received for a verb
    pub fn request_count(&self, verb: &str) -> usize {
        self.state.read().requests.get(verb).copied().unwrap_or(0)
    }

    /// Shutdown the server gracefully
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for MockAgent {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Wait for a condition with timeout
pub async fn wait_for<F>(condition: F, timeout: Duration) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;

    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    false
}

// =============================================================================
// Request handlers
// =============================================================================

#[derive(Debug, Deserialize)]
struct SampleQuery {
    from: Option<u64>,
    count: Option<usize>,
}

async fn root_request(
    State(state): State<SharedState>,
    Path(verb): Path<String>,
    Query(query): Query<SampleQuery>,
) -> Response {
    respond(&state, None, &verb, &query)
}

async fn device_request(
    State(state): State<SharedState>,
    Path((device, verb)): Path<(String, String)>,
    Query(query): Query<SampleQuery>,
) -> Response {
    respond(&state, Some(&device), &verb, &query)
}

fn respond(state: &SharedState, device: Option<&str>, verb: &str, query: &SampleQuery) -> Response {
    let mut state = state.write();
    *state.requests.entry(verb.to_string()).or_default() += 1;

    if !state.online {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    if let Some(name) = device {
        if name != state.device.name {
            return xml(render_error(&state, "NO_DEVICE", &format!("Could not find the device '{}'", name)));
        }
    }

    let body = match verb {
        "probe" => render_probe(&state),
        "current" => {
            let mut latest: HashMap<&str, &MockObservation> = HashMap::new();
            for obs in &state.observations {
                latest.insert(obs.item.id.as_str(), obs);
            }
            let mut observations: Vec<&MockObservation> = latest.into_values().collect();
            observations.sort_by_key(|o| o.sequence);
            render_streams(&state, &observations, state.next_sequence)
        }
        "sample" => {
            let first = state.observations.first().map(|o| o.sequence).unwrap_or(state.next_sequence);
            let from = query.from.unwrap_or(first);
            if from < first || from > state.next_sequence {
                render_error(&state, "OUT_OF_RANGE", "'from' is outside the buffer")
            } else {
                let count = query.count.unwrap_or(100);
                let observations: Vec<&MockObservation> = state
                    .observations
                    .iter()
                    .filter(|o| o.sequence >= from)
                    .take(count)
                    .collect();
                let next = observations
                    .last()
                    .map(|o| o.sequence + 1)
                    .unwrap_or(from);
                render_streams(&state, &observations, next)
            }
        }
        "assets" => render_assets(&state),
        other => render_error(&state, "UNSUPPORTED", &format!("'{}' is not supported", other)),
    };
    xml(body)
}

fn xml(body: String) -> Response {
    ([(header::CONTENT_TYPE, "text/xml")], body).into_response()
}

// =============================================================================
// Document rendering
// =============================================================================

fn timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn render_header(state: &AgentState, next_sequence: Option<u64>) -> String {
    let mut header = format!(
        r#"<Header creationTime="{}" sender="mock-agent" instanceId="{}" version="{}" bufferSize="131072""#,
        timestamp(Utc::now()),
        state.instance_id,
        state.device.version
    );
    if let Some(next) = next_sequence {
        let first = state.observations.first().map(|o| o.sequence).unwrap_or(next);
        let _ = write!(
            header,
            r#" nextSequence="{}" firstSequence="{}" lastSequence="{}""#,
            next,
            first,
            state.next_sequence.saturating_sub(1)
        );
    }
    header.push_str("/>");
    header
}

fn render_data_items(items: &[MockDataItem], out: &mut String) {
    if items.is_empty() {
        return;
    }
    out.push_str("<DataItems>");
    for item in items {
        let _ = write!(
            out,
            r#"<DataItem id="{}" category="{}" type="{}""#,
            item.id, item.category, item.type_name
        );
        if let Some(sub_type) = &item.sub_type {
            let _ = write!(out, r#" subType="{}""#, sub_type);
        }
        out.push_str("/>");
    }
    out.push_str("</DataItems>");
}

fn render_components(components: &[MockComponent], out: &mut String) {
    if components.is_empty() {
        return;
    }
    out.push_str("<Components>");
    for c in components {
        let _ = write!(out, r#"<{} id="{}" name="{}">"#, c.type_name, c.id, c.id);
        render_data_items(&c.data_items, out);
        render_components(&c.components, out);
        let _ = write!(out, "</{}>", c.type_name);
    }
    out.push_str("</Components>");
}

fn render_probe(state: &AgentState) -> String {
    let device = &state.device;
    let mut out = String::from(r#"<?xml version="1.0" encoding="UTF-8"?><MTConnectDevices xmlns="urn:mtconnect.org:MTConnectDevices:1.3">"#);
    out.push_str(&render_header(state, None));
    let _ = write!(
        out,
        r#"<Devices><Device id="{}" name="{}" uuid="{}-uuid"><Description manufacturer="Mock"/>"#,
        device.id, device.name, device.name
    );
    render_data_items(&device.data_items, &mut out);
    render_components(&device.components, &mut out);
    out.push_str("</Device></Devices></MTConnectDevices>");
    out
}

fn pascal_case(type_name: &str) -> String {
    type_name
        .split('_')
        .map(|word| {
            let lower = word.to_ascii_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

fn render_streams(state: &AgentState, observations: &[&MockObservation], next: u64) -> String {
    let mut out = String::from(r#"<?xml version="1.0" encoding="UTF-8"?><MTConnectStreams xmlns="urn:mtconnect.org:MTConnectStreams:1.3">"#);
    out.push_str(&render_header(state, Some(next)));
    let _ = write!(
        out,
        r#"<Streams><DeviceStream name="{}" uuid="{}-uuid"><ComponentStream component="Device" name="{}" componentId="{}">"#,
        state.device.name, state.device.name, state.device.name, state.device.id
    );

    for (category, container) in [
        (Category::Sample, "Samples"),
        (Category::Event, "Events"),
        (Category::Condition, "Condition"),
    ] {
        let matching: Vec<_> = observations
            .iter()
            .filter(|o| o.item.category == category)
            .collect();
        if matching.is_empty() {
            continue;
        }
        let _ = write!(out, "<{}>", container);
        for obs in matching {
            let element = match obs.condition {
                Some(state) => pascal_case(&state.to_string()),
                None => pascal_case(&obs.item.type_name),
            };
            let _ = write!(
                out,
                r#"<{el} dataItemId="{}" timestamp="{}" sequence="{}" type="{}">{}</{el}>"#,
                obs.item.id,
                timestamp(obs.timestamp),
                obs.sequence,
                obs.item.type_name,
                obs.value,
                el = element
            );
        }
        let _ = write!(out, "</{}>", container);
    }

    out.push_str("</ComponentStream></DeviceStream></Streams></MTConnectStreams>");
    out
}

fn render_assets(state: &AgentState) -> String {
    let mut out = String::from(r#"<?xml version="1.0" encoding="UTF-8"?><MTConnectAssets xmlns="urn:mtconnect.org:MTConnectAssets:1.3">"#);
    out.push_str(&render_header(state, None));
    out.push_str("<Assets>");
    for (id, asset_type, ts) in &state.assets {
        let _ = write!(
            out,
            r#"<{t} assetId="{}" deviceUuid="{}-uuid" timestamp="{}"/>"#,
            id,
            state.device.name,
            timestamp(*ts),
            t = asset_type
        );
    }
    out.push_str("</Assets></MTConnectAssets>");
    out
}

fn render_error(state: &AgentState, code: &str, message: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><MTConnectError xmlns="urn:mtconnect.org:MTConnectError:1.3">{}<Errors><Error errorCode="{}">{}</Error></Errors></MTConnectError>"#,
        render_header(state, None),
        code,
        message
    )
}
