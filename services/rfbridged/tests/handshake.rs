//! Control-plane handshake tests.
//!
//! Tests:
//! 1. accept & config: `client gui` → accept, `request config` → config object
//! 2. liveness: HEART → BEAT
//! 3. unclassified sessions sending anything else are rejected and closed
//! 4. node handshakes without a uuid are re-rejected
//! 5. malformed frames are rejected

use rfbridged::config;
use rfbridged::{spawn_daemon, DaemonHandle};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

const CONFIG: &str = r#"
    [server]
    standalone = true

    [[locations]]
    id = "living"
    name = "Living room"

    [[locations.devices]]
    id = "lamp"
    name = "Corner lamp"
    protocol = ["kaku_switch"]
    state = "off"

    [locations.devices.ids]
    id = 4
    unit = 1
"#;

async fn spawn(config_text: &str) -> DaemonHandle {
    let mut settings = config::resolve(config_text).expect("config parses");
    settings.server.port = 0;
    spawn_daemon(settings).await.expect("daemon spawns")
}

async fn connect(handle: &DaemonHandle) -> (Lines<BufReader<OwnedReadHalf>>, OwnedWriteHalf) {
    let stream = TcpStream::connect(handle.addr.expect("server mode"))
        .await
        .expect("connect failed");
    let (read, write) = stream.into_split();
    (BufReader::new(read).lines(), write)
}

async fn send_line(write: &mut OwnedWriteHalf, line: &str) {
    write
        .write_all(format!("{line}\n").as_bytes())
        .await
        .expect("write failed");
}

async fn read_line(lines: &mut Lines<BufReader<OwnedReadHalf>>) -> String {
    timeout(Duration::from_secs(5), lines.next_line())
        .await
        .expect("timeout waiting for line")
        .expect("read failed")
        .expect("connection closed")
}

async fn read_eof(lines: &mut Lines<BufReader<OwnedReadHalf>>) {
    let next = timeout(Duration::from_secs(5), lines.next_line())
        .await
        .expect("timeout waiting for close")
        .expect("read failed");
    assert!(next.is_none(), "expected the session to be closed, got {next:?}");
}

#[tokio::test]
async fn gui_accept_and_request_config() {
    let handle = spawn(CONFIG).await;
    let (mut lines, mut write) = connect(&handle).await;

    send_line(&mut write, r#"{"message":"client gui"}"#).await;
    assert_eq!(read_line(&mut lines).await, r#"{"message":"accept client"}"#);

    send_line(&mut write, r#"{"message":"request config"}"#).await;
    let reply = read_line(&mut lines).await;
    let value: serde_json::Value = serde_json::from_str(&reply).expect("config is JSON");
    let lamp = &value["config"]["living"]["lamp"];
    assert_eq!(lamp["state"], serde_json::json!("off"));
    assert_eq!(lamp["protocol"], serde_json::json!(["kaku_switch"]));

    handle.shutdown();
}

#[tokio::test]
async fn heart_gets_beat() {
    let handle = spawn(CONFIG).await;
    let (mut lines, mut write) = connect(&handle).await;

    send_line(&mut write, "HEART").await;
    assert_eq!(read_line(&mut lines).await, "BEAT");

    handle.shutdown();
}

#[tokio::test]
async fn unclassified_frame_is_rejected_and_closed() {
    let handle = spawn(CONFIG).await;
    let (mut lines, mut write) = connect(&handle).await;

    send_line(&mut write, r#"{"something":"else"}"#).await;
    assert_eq!(read_line(&mut lines).await, r#"{"message":"reject client"}"#);
    read_eof(&mut lines).await;

    handle.shutdown();
}

#[tokio::test]
async fn unknown_role_is_rejected() {
    let handle = spawn(CONFIG).await;
    let (mut lines, mut write) = connect(&handle).await;

    send_line(&mut write, r#"{"message":"client overlord"}"#).await;
    assert_eq!(read_line(&mut lines).await, r#"{"message":"reject client"}"#);
    read_eof(&mut lines).await;

    handle.shutdown();
}

#[tokio::test]
async fn node_without_uuid_is_rerejected() {
    let handle = spawn(CONFIG).await;
    let (mut lines, mut write) = connect(&handle).await;

    send_line(&mut write, r#"{"message":"client node"}"#).await;
    // The accept goes out on the role match, then the missing uuid voids it.
    assert_eq!(read_line(&mut lines).await, r#"{"message":"accept client"}"#);
    assert_eq!(read_line(&mut lines).await, r#"{"message":"reject client"}"#);
    read_eof(&mut lines).await;

    handle.shutdown();
}

#[tokio::test]
async fn node_with_uuid_is_accepted() {
    let handle = spawn(CONFIG).await;
    let (mut lines, mut write) = connect(&handle).await;

    send_line(
        &mut write,
        r#"{"message":"client node","uuid":"0000-d0-63-00-000000"}"#,
    )
    .await;
    assert_eq!(read_line(&mut lines).await, r#"{"message":"accept client"}"#);

    handle.shutdown();
}

#[tokio::test]
async fn malformed_frame_is_rejected() {
    let handle = spawn(CONFIG).await;
    let (mut lines, mut write) = connect(&handle).await;

    send_line(&mut write, "not json at all").await;
    assert_eq!(read_line(&mut lines).await, r#"{"message":"reject client"}"#);
    read_eof(&mut lines).await;

    handle.shutdown();
}
