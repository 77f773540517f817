//! Device finder scans against a scripted network

use std::collections::HashMap;
use std::io;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mtc_client::testing::{MockAgent, MockDevice};
use mtc_discovery::{
    AddressRange, DeviceFinder, DiscoveryError, FinderEvent, NetworkInterfaceScope, NetworkProbe,
    PortRange, SystemNetwork,
};

/// A network where only the listed endpoints serve agents
#[derive(Default)]
struct ScriptedNetwork {
    /// (address, port) -> device names
    agents: HashMap<(IpAddr, u16), Vec<String>>,
    /// Hosts that answer pings; `None` means ICMP is unavailable
    alive: Option<Vec<IpAddr>>,
    probes: AtomicUsize,
}

impl ScriptedNetwork {
    fn with_agent(mut self, address: &str, port: u16, names: &[&str]) -> Self {
        let address: IpAddr = address.parse().unwrap();
        self.agents
            .insert((address, port), names.iter().map(|n| n.to_string()).collect());
        self.alive.get_or_insert_with(Vec::new).push(address);
        self
    }

    fn without_icmp(mut self) -> Self {
        self.alive = None;
        self
    }
}

#[async_trait]
impl NetworkProbe for ScriptedNetwork {
    async fn ping(&self, address: IpAddr, _timeout: Duration) -> io::Result<bool> {
        match &self.alive {
            Some(alive) => Ok(alive.contains(&address)),
            None => Err(io::Error::new(io::ErrorKind::PermissionDenied, "no icmp")),
        }
    }

    async fn port_open(&self, address: IpAddr, port: u16, _timeout: Duration) -> bool {
        self.agents.contains_key(&(address, port))
    }

    async fn probe(&self, address: IpAddr, port: u16, _timeout: Duration) -> Option<Vec<String>> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.agents.get(&(address, port)).cloned()
    }

    async fn mac_address(&self, _address: IpAddr) -> Option<String> {
        Some("001B213A4F9C".into())
    }
}

fn scope(addresses: AddressRange, ports: PortRange) -> NetworkInterfaceScope {
    NetworkInterfaceScope {
        addresses: Some(addresses),
        ports: Some(ports),
        timeout_ms: 200,
        ping_delay_ms: 1,
        ..Default::default()
    }
}

async fn collect(mut rx: tokio::sync::mpsc::Receiver<FinderEvent>) -> Vec<FinderEvent> {
    let mut events = Vec::new();
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_single_address_single_port_finds_one_device() {
    let network = Arc::new(ScriptedNetwork::default().with_agent("10.0.0.5", 5000, &["VMC-3Axis"]));
    let finder = DeviceFinder::with_network(network);

    let rx = finder
        .start(scope(AddressRange::single("10.0.0.5"), PortRange::single(5000)))
        .unwrap();
    let events = collect(rx).await;

    assert_eq!(events.len(), 2);
    match &events[0] {
        FinderEvent::DeviceFound(device) => {
            assert_eq!(device.device_name, "VMC-3Axis");
            assert_eq!(device.port, 5000);
            assert_eq!(device.address, "10.0.0.5".parse::<IpAddr>().unwrap());
            assert_eq!(device.mac_address.as_deref(), Some("001B213A4F9C"));
        }
        other => panic!("expected DeviceFound, got {:?}", other),
    }
    assert!(matches!(
        events[1],
        FinderEvent::SearchCompleted { found_count: 1, .. }
    ));
    assert!(!finder.is_running());
}

#[tokio::test]
async fn test_one_event_per_device_name() {
    let network = Arc::new(
        ScriptedNetwork::default()
            .with_agent("10.0.0.5", 5000, &["Mill", "Lathe"])
            .with_agent("10.0.0.7", 5001, &["Grinder"]),
    );
    let finder = DeviceFinder::with_network(network);

    let rx = finder
        .start(scope(
            AddressRange::between("10.0.0.1", "10.0.0.10"),
            PortRange::between(5000, 5002),
        ))
        .unwrap();
    let events = collect(rx).await;

    let mut names: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            FinderEvent::DeviceFound(d) => Some(d.device_name.clone()),
            _ => None,
        })
        .collect();
    names.sort();
    assert_eq!(names, vec!["Grinder", "Lathe", "Mill"]);
    assert!(matches!(
        events.last(),
        Some(FinderEvent::SearchCompleted { found_count: 3, .. })
    ));
}

#[tokio::test]
async fn test_unpingable_network_still_probes_every_address() {
    let network = Arc::new(
        ScriptedNetwork::default()
            .with_agent("10.0.0.3", 5000, &["Mill"])
            .without_icmp(),
    );
    let finder = DeviceFinder::with_network(network.clone());

    let rx = finder
        .start(scope(
            AddressRange::between("10.0.0.1", "10.0.0.4"),
            PortRange::single(5000),
        ))
        .unwrap();
    let events = collect(rx).await;

    assert!(matches!(
        events.last(),
        Some(FinderEvent::SearchCompleted { found_count: 1, .. })
    ));
    assert_eq!(network.probes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_invalid_range_is_reported_by_start() {
    let finder = DeviceFinder::with_network(Arc::new(ScriptedNetwork::default()));
    let err = finder
        .start(scope(
            AddressRange::between("10.0.0.9", "10.0.0.1"),
            PortRange::single(5000),
        ))
        .unwrap_err();
    assert!(matches!(err, DiscoveryError::InvalidRange(_)));
    assert!(!finder.is_running());
}

#[tokio::test]
async fn test_rescan_until_stopped() {
    let network = Arc::new(ScriptedNetwork::default().with_agent("10.0.0.5", 5000, &["Mill"]));
    let finder = DeviceFinder::with_network(network);

    let mut config = scope(AddressRange::single("10.0.0.5"), PortRange::single(5000));
    config.scan_interval_ms = 20;
    let mut rx = finder.start(config).unwrap();

    let mut completed = 0;
    while completed < 2 {
        if let Some(FinderEvent::SearchCompleted { .. }) = rx.recv().await {
            completed += 1;
        }
    }
    assert!(finder.is_running());
    assert!(matches!(
        finder.start(NetworkInterfaceScope::default()),
        Err(DiscoveryError::AlreadyRunning)
    ));

    finder.stop();
    finder.stop();
    let drained = collect(rx).await;
    assert!(drained.len() <= 2);
    assert!(!finder.is_running());
}

#[tokio::test]
async fn test_finds_real_agent_on_loopback() {
    let agent = MockAgent::start(MockDevice::cnc("VMC-3Axis")).await.unwrap();
    let finder = DeviceFinder::with_network(Arc::new(SystemNetwork));

    let mut config = scope(AddressRange::single("127.0.0.1"), PortRange::single(agent.port()));
    config.ping_enabled = false;
    let events = collect(finder.start(config).unwrap()).await;

    assert!(matches!(
        &events[0],
        FinderEvent::DeviceFound(d) if d.device_name == "VMC-3Axis" && d.port == agent.port()
    ));
    assert!(matches!(
        events.last(),
        Some(FinderEvent::SearchCompleted { found_count: 1, .. })
    ));
}
