//! Command server integration tests
//!
//! A real server on 127.0.0.1:0, driven over TCP, with in-memory
//! collaborators standing in for lsblk, smartctl and the inventory.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use pesto::disks::{scan_for_disks, DiskRegistry, IdentityResolver};
use pesto::domain::ports::DeviceInfo;
use pesto::testing::{FakeDiagnostics, FakeEnumerator, FakeInventory, FakeLogicalDisks};
use pesto::{Server, Services};

const READ_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    addr: std::net::SocketAddr,
    shutdown: CancellationToken,
    server: JoinHandle<pesto::Result<()>>,
    inventory: Arc<FakeInventory>,
    diagnostics: Arc<FakeDiagnostics>,
}

async fn start(max_commands: usize) -> Harness {
    start_with(max_commands, vec![]).await
}

/// Server whose startup scan also finds `extra` devices next to /dev/sda.
async fn start_with(max_commands: usize, extra: Vec<DeviceInfo>) -> Harness {
    let inventory = Arc::new(FakeInventory::new());
    inventory.add_item("AB12", "ABC123");
    inventory.add_item("EF56", "DUP999");
    inventory.add_item("GH78", "DUP999");

    let mut devices = vec![DeviceInfo::new("/dev/sda").with_serial("WD-ABC123")];
    devices.extend(extra);
    let enumerator = Arc::new(FakeEnumerator::new(devices));
    let disks = Arc::new(DiskRegistry::new(
        enumerator,
        IdentityResolver::new(Some(inventory.clone())),
    ));
    scan_for_disks(&disks).await;

    let diagnostics = Arc::new(FakeDiagnostics::new());
    let services = Services {
        disks,
        diagnostics: diagnostics.clone(),
        logical_disks: Arc::new(FakeLogicalDisks::new(&["C:"], &["499512242176"])),
    };

    let server = Server::bind("127.0.0.1:0", services, max_commands)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let shutdown = server.shutdown_token();
    let server = tokio::spawn(server.run());

    Harness {
        addr,
        shutdown,
        server,
        inventory,
        diagnostics,
    }
}

struct Client {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Client {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        let (read_half, writer) = TcpStream::connect(addr).await.unwrap().into_split();
        Self {
            reader: BufReader::new(read_half),
            writer,
        }
    }

    async fn send(&mut self, raw: &[u8]) {
        self.writer.write_all(raw).await.unwrap();
    }

    /// Next raw line, delimiter included; empty at EOF
    async fn recv(&mut self) -> String {
        let mut line = String::new();
        tokio::time::timeout(READ_TIMEOUT, self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for a response")
            .unwrap();
        line
    }
}

/// Split `token {json}\n` into token and parsed payload.
fn parse(line: &str) -> (String, Option<Value>) {
    let line = line.trim_end_matches(['\r', '\n']);
    match line.split_once(' ') {
        Some((token, payload)) => (token.to_string(), Some(serde_json::from_str(payload).unwrap())),
        None => (line.to_string(), None),
    }
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_ping_pong() {
    let harness = start(4).await;
    let mut client = Client::connect(harness.addr).await;

    client.send(b"ping\n").await;
    assert_eq!(client.recv().await, "pong\n");
}

#[tokio::test]
async fn test_ambiguous_disk_reaches_client_as_manual_fix() {
    let harness = start_with(4, vec![DeviceInfo::new("/dev/sdb").with_serial("DUP999")]).await;
    harness.diagnostics.set_output("/dev/sdb", 0, "ok", "");
    let mut client = Client::connect(harness.addr).await;

    for _ in 0..2 {
        client.send(b"get_disks\n").await;
        let (token, payload) = parse(&client.recv().await);
        assert_eq!(token, "error_that_can_be_manually_fixed");
        assert_eq!(
            payload.unwrap(),
            json!({
                "message": "Duplicate codes for /dev/sdb: EF56 GH78, S/N is DUP999",
                "disk": "/dev/sdb"
            })
        );

        let (token, payload) = parse(&client.recv().await);
        assert_eq!(token, "get_disks");
        let disks = payload.unwrap();
        assert_eq!(disks[1]["path"], "/dev/sdb");
        assert_eq!(disks[1]["code"], Value::Null);
    }

    client.send(b"smartctl /dev/sdb\n").await;
    let (token, payload) = parse(&client.recv().await);
    assert_eq!(token, "error_that_can_be_manually_fixed");
    assert_eq!(payload.unwrap()["disk"], "/dev/sdb");

    let (token, payload) = parse(&client.recv().await);
    assert_eq!(token, "smartctl");
    assert_eq!(payload.unwrap()["updated"], false);
    assert_eq!(harness.inventory.feature("EF56", "smart-data"), None);
}

#[tokio::test]
async fn test_get_disks_reports_resolved_code() {
    let harness = start(4).await;
    let mut client = Client::connect(harness.addr).await;

    client.send(b"get_disks\n").await;
    let (token, payload) = parse(&client.recv().await);

    assert_eq!(token, "get_disks");
    assert_eq!(
        payload.unwrap(),
        json!([{
            "path": "/dev/sda",
            "vendor": null,
            "model": null,
            "serial": "WD-ABC123",
            "hotplug": false,
            "rotational": false,
            "mountpoint": [],
            "code": "AB12"
        }])
    );
}

#[tokio::test]
async fn test_smartctl_pushes_status() {
    let harness = start(4).await;
    harness
        .diagnostics
        .set_output("/dev/sda", 0, "SMART overall-health: PASSED\n", "");
    let mut client = Client::connect(harness.addr).await;

    client.send(b"smartctl /dev/sda\n").await;
    let (token, payload) = parse(&client.recv().await);

    assert_eq!(token, "smartctl");
    assert_eq!(
        payload.unwrap(),
        json!({
            "disk": "/dev/sda",
            "status": "old",
            "updated": true,
            "exitcode": 0,
            "output": "SMART overall-health: PASSED\n",
            "stderr": ""
        })
    );
    assert_eq!(
        harness.inventory.feature("AB12", "smart-data").as_deref(),
        Some("old")
    );
}

#[tokio::test]
async fn test_unrecognized_command() {
    let harness = start(4).await;
    let mut client = Client::connect(harness.addr).await;

    client.send(b"frobnicate\n").await;
    assert_eq!(
        client.recv().await,
        "error {\"message\":\"Unrecognized command\",\"command\":\"frobnicate\"}\n"
    );
}

#[tokio::test]
async fn test_get_disks_win() {
    let harness = start(4).await;
    let mut client = Client::connect(harness.addr).await;

    client.send(b"get_disks_win\n").await;
    let (token, payload) = parse(&client.recv().await);
    assert_eq!(token, "get_disks_win");
    assert_eq!(payload.unwrap(), json!([["C:", "499512242176"]]));
}

// =============================================================================
// Protocol behaviour
// =============================================================================

#[tokio::test]
async fn test_delimiter_fixed_by_first_line() {
    let harness = start(4).await;
    let mut client = Client::connect(harness.addr).await;

    client.send(b"ping\r\n").await;
    assert_eq!(client.recv().await, "pong\r\n");

    client.send(b"ping\n").await;
    assert_eq!(client.recv().await, "pong\r\n");

    client.send(b"nope\n").await;
    assert!(client.recv().await.ends_with("}\r\n"));
}

#[tokio::test]
async fn test_connections_have_independent_delimiters() {
    let harness = start(4).await;
    let mut unix = Client::connect(harness.addr).await;
    let mut dos = Client::connect(harness.addr).await;

    dos.send(b"ping\r\n").await;
    unix.send(b"ping\n").await;

    assert_eq!(dos.recv().await, "pong\r\n");
    assert_eq!(unix.recv().await, "pong\n");
}

#[tokio::test]
async fn test_invalid_utf8_line_is_dropped() {
    let harness = start(4).await;
    let mut client = Client::connect(harness.addr).await;

    client.send(b"\xff\xfe\r\n").await;
    client.send(b"ping\n").await;
    assert_eq!(client.recv().await, "pong\n");
}

#[tokio::test]
async fn test_empty_line_is_unrecognized() {
    let harness = start(4).await;
    let mut client = Client::connect(harness.addr).await;

    client.send(b"\n").await;
    let (token, payload) = parse(&client.recv().await);
    assert_eq!(token, "error");
    assert_eq!(payload.unwrap()["command"], "");
}

#[tokio::test]
async fn test_exit_closes_connection() {
    let harness = start(4).await;
    let mut client = Client::connect(harness.addr).await;

    client.send(b"ping\n").await;
    assert_eq!(client.recv().await, "pong\n");

    client.send(b"exit\n").await;
    assert_eq!(client.recv().await, "");
}

#[tokio::test]
async fn test_ping_not_blocked_by_slow_command() {
    let harness = start(1).await;
    harness
        .diagnostics
        .set_output("/dev/sda", 0, "ok", "");
    harness
        .diagnostics
        .set_delay("/dev/sda", Duration::from_millis(500));
    let mut client = Client::connect(harness.addr).await;

    client.send(b"smartctl /dev/sda\n").await;
    client.send(b"smartctl /dev/sda\n").await;
    client.send(b"ping\n").await;

    assert_eq!(client.recv().await, "pong\n");
    let (first, _) = parse(&client.recv().await);
    let (second, _) = parse(&client.recv().await);
    assert_eq!((first.as_str(), second.as_str()), ("smartctl", "smartctl"));
}

// =============================================================================
// Shutdown
// =============================================================================

#[tokio::test]
async fn test_shutdown_waits_for_outstanding_commands() {
    let harness = start(4).await;
    harness
        .diagnostics
        .set_output("/dev/sda", 0, "ok", "");
    harness
        .diagnostics
        .set_delay("/dev/sda", Duration::from_millis(300));
    let mut client = Client::connect(harness.addr).await;

    client.send(b"smartctl /dev/sda\n").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    harness.shutdown.cancel();

    let (token, _) = parse(&client.recv().await);
    assert_eq!(token, "smartctl");
    assert_eq!(client.recv().await, "");

    tokio::time::timeout(READ_TIMEOUT, harness.server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_bind_failure_is_reported() {
    let harness = start(4).await;
    let services = Services {
        disks: Arc::new(DiskRegistry::new(
            Arc::new(FakeEnumerator::new(vec![])),
            IdentityResolver::disabled(),
        )),
        diagnostics: Arc::new(FakeDiagnostics::new()),
        logical_disks: Arc::new(FakeLogicalDisks::new(&[], &[])),
    };

    let err = Server::bind(&harness.addr.to_string(), services, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, pesto::Error::Bind { .. }));
}
