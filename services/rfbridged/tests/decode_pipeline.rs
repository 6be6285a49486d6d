//! End-to-end decode pipeline tests: pulses fed to the loopback radio must
//! surface as broadcasts on receiver sessions.
//!
//! Tests:
//! 1. repeat gating: rxrpt 2 × receive_repeats 3 → exactly one broadcast
//!    after the sixth matching burst, with `repeats: 6`
//! 2. plslen tolerance: a footer deriving plslen 276 never matches a
//!    protocol declaring 270; 265 does
//! 3. receive queue overflow drops the newest segment

use rfbridged::config;
use rfbridged::protocols::KakuSwitch;
use rfbridged::registry::Protocol;
use rfbridged::{spawn_daemon, DaemonHandle};
use pulse_core::{HwType, PulseSegment};
use serde_json::json;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;

const CONFIG: &str = r#"
    [server]
    standalone = true

    [pipeline]
    receive_repeats = 3

    [[hardware]]
    kind = "loopback"
    hwtype = "rf433"
"#;

async fn spawn() -> DaemonHandle {
    let mut settings = config::resolve(CONFIG).expect("config parses");
    settings.server.port = 0;
    spawn_daemon(settings).await.expect("daemon spawns")
}

async fn receiver_session(
    handle: &DaemonHandle,
) -> (Lines<BufReader<OwnedReadHalf>>, OwnedWriteHalf) {
    let stream = TcpStream::connect(handle.addr.expect("server mode"))
        .await
        .expect("connect failed");
    let (read, write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    let mut write_half = write;
    write_half
        .write_all(b"{\"message\":\"client receiver\"}\n")
        .await
        .expect("handshake write");
    let accept = timeout(Duration::from_secs(5), lines.next_line())
        .await
        .expect("timeout on accept")
        .expect("read failed")
        .expect("closed during handshake");
    assert_eq!(accept, r#"{"message":"accept client"}"#);
    (lines, write_half)
}

fn switch_burst(footer: u32) -> Vec<u32> {
    let encoded = KakuSwitch::new()
        .create_code(&json!({"id": 4, "unit": 1, "on": 1}))
        .expect("encode");
    let mut raw = encoded.raw;
    *raw.last_mut().unwrap() = footer;
    raw
}

async fn feed_bursts(handle: &DaemonHandle, burst: &[u32], count: usize) {
    let tx = &handle.loopbacks[0].pulse_tx;
    for _ in 0..count {
        for &pulse in burst {
            tx.send(pulse).await.expect("loopback feed");
        }
    }
}

#[tokio::test]
async fn six_repeats_yield_exactly_one_broadcast() {
    let handle = spawn().await;
    let (mut lines, _write) = receiver_session(&handle).await;

    // Footer 9180 → plslen 270, the descriptor's reference exactly.
    feed_bursts(&handle, &switch_burst(9180), 6).await;

    let line = timeout(Duration::from_secs(5), lines.next_line())
        .await
        .expect("timeout waiting for broadcast")
        .expect("read failed")
        .expect("closed");
    let value: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(value["origin"], json!("receiver"));
    assert_eq!(value["protocol"], json!("kaku_switch"));
    assert_eq!(value["repeats"], json!(6));
    assert_eq!(value["code"], json!({"id": 4, "unit": 1, "state": "on"}));

    // No second broadcast for the same six bursts.
    let extra = timeout(Duration::from_millis(300), lines.next_line()).await;
    assert!(extra.is_err(), "expected exactly one broadcast, got {extra:?}");

    handle.shutdown();
}

#[tokio::test]
async fn plslen_outside_tolerance_never_matches() {
    let handle = spawn().await;
    let (mut lines, _write) = receiver_session(&handle).await;

    // 276·34 = 9384 → plslen 276, one past the ±5 band around 270.
    feed_bursts(&handle, &switch_burst(9384), 6).await;
    let silent = timeout(Duration::from_millis(500), lines.next_line()).await;
    assert!(silent.is_err(), "plslen 276 must not decode, got {silent:?}");

    // 265·34 = 9010 → plslen 265, the inclusive lower edge.
    feed_bursts(&handle, &switch_burst(9010), 6).await;
    let line = timeout(Duration::from_secs(5), lines.next_line())
        .await
        .expect("timeout waiting for broadcast")
        .expect("read failed")
        .expect("closed");
    let value: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(value["protocol"], json!("kaku_switch"));

    handle.shutdown();
}

#[tokio::test]
async fn receive_queue_overflow_drops_newest() {
    // The bounded queue drops the 1025th segment; nothing downstream sees it.
    let (tx, mut rx) = rfbridged::queue::bounded::<PulseSegment>("receiver");
    let segment = |plslen| PulseSegment {
        raw: vec![270, 9180],
        plslen,
        hwtype: HwType::Rf433,
    };
    for i in 0..1024 {
        assert!(tx.push(segment(i)), "push {i} must be accepted");
    }
    assert!(!tx.push(segment(9999)), "the 1025th push must be dropped");

    let mut drained = 0;
    while let Ok(seg) = rx.try_recv() {
        assert_ne!(seg.plslen, 9999);
        drained += 1;
    }
    assert_eq!(drained, 1024);
}
