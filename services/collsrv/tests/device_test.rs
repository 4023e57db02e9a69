//! End-to-end engine scenarios against a scripted IEC-104 peer

mod support;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use collsrv::api::build_router;
use collsrv::config::Iec104Params;
use collsrv::gateway::{CommandGateway, RequestKind};
use collsrv::supervisor::DeviceSupervisor;
use datacoll_rtdb::model::{PointRequest, SampleEvent};
use datacoll_rtdb::{Inventory, MemoryRtdb, Rtdb};

use support::{memory_inventory, seed_inventory, wait_for_status, MockPeer, MockPeerConfig};

struct TestEnv {
    rtdb: Arc<MemoryRtdb>,
    inventory: Inventory,
    peer: MockPeer,
    cancel: CancellationToken,
    supervisor: tokio::task::JoinHandle<collsrv::Result<()>>,
}

impl TestEnv {
    async fn start(config: MockPeerConfig, coll_interval: u64) -> Self {
        let (rtdb, inventory) = memory_inventory();
        let peer = MockPeer::start(config).await;
        seed_inventory(&inventory, &peer.addr).await;

        let params = Iec104Params {
            k: 12,
            w: 8,
            t0: 2,
            t1: 2,
            t2: 1,
            t3: 5,
            coll_interval,
            log_frame: true,
        };
        let cancel = CancellationToken::new();
        let supervisor = tokio::spawn(
            DeviceSupervisor::new(inventory.clone(), params).run(cancel.clone()),
        );
        Self {
            rtdb,
            inventory,
            peer,
            cancel,
            supervisor,
        }
    }

    async fn stop(self) {
        self.cancel.cancel();
        let _ = self.supervisor.await;
        self.peer.stop();
    }
}

async fn wait_until<F, Fut>(what: &str, deadline: Duration, mut probe: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let begun = tokio::time::Instant::now();
    loop {
        if probe().await {
            return;
        }
        if begun.elapsed() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[tokio::test]
async fn handshake_brings_device_online() {
    let env = TestEnv::start(MockPeerConfig::default(), 900).await;

    wait_for_status(&env.rtdb, "d1", "on", Duration::from_secs(3)).await;

    // The frame log carries the exact handshake bytes
    let rtdb = env.rtdb.clone();
    wait_until("handshake frames in log", Duration::from_secs(3), || {
        let rtdb = rtdb.clone();
        async move {
            let log = rtdb.list_range("LST:FRAME:d1", 0, -1).await.unwrap();
            log.iter().any(|e| e.contains(",send,680407000000"))
                && log.iter().any(|e| e.contains(",recv,68040b000000"))
        }
    })
    .await;

    env.stop().await;
}

#[tokio::test]
async fn poll_cycle_persists_and_publishes_interrogated_samples() {
    let config = MockPeerConfig {
        counters: vec![(300, 42)],
        ..MockPeerConfig::default()
    };
    let env = TestEnv::start(config, 1).await;

    let mut samples = env
        .rtdb
        .subscribe(&["CHANNEL:DEVICE_DATA:d1:t1:i1".to_string()])
        .await
        .unwrap();

    // One full cycle: clock sync, general interrogation (100/200/300),
    // counter interrogation (300)
    let rtdb = env.rtdb.clone();
    wait_until("all bindings sampled", Duration::from_secs(10), || {
        let rtdb = rtdb.clone();
        async move {
            for item in ["i1", "i2", "i3"] {
                let key = format!("HS:DATA:d1:t1:{item}");
                if rtdb.hash_get_all(&key).await.unwrap().is_empty() {
                    return false;
                }
            }
            true
        }
    })
    .await;

    let event_raw = tokio::time::timeout(Duration::from_secs(3), samples.recv())
        .await
        .expect("no sample published")
        .unwrap();
    let event: SampleEvent = serde_json::from_str(&event_raw.payload).unwrap();
    assert_eq!(event.value, 1.5);
    assert_eq!((event.device_id.as_str(), event.term_id.as_str()), ("d1", "t1"));

    // Publish-after-store: the published timestamp is already in the series
    let times = env.rtdb.list_range("LST:DATA_TIME:d1:t1:i1", 0, -1).await.unwrap();
    assert!(times.contains(&event.time));
    let stored = env.rtdb.hash_get("HS:DATA:d1:t1:i1", &event.time).await.unwrap();
    assert_eq!(stored.as_deref(), Some("1.5"));

    // The counter interrogation eventually lands the reading for i3
    let rtdb = env.rtdb.clone();
    wait_until("counter sample stored", Duration::from_secs(10), || {
        let rtdb = rtdb.clone();
        async move {
            rtdb.hash_get_all("HS:DATA:d1:t1:i3")
                .await
                .unwrap()
                .values()
                .any(|v| v == "42")
        }
    })
    .await;

    env.stop().await;
}

#[tokio::test]
async fn read_command_returns_current_value() {
    let env = TestEnv::start(MockPeerConfig::default(), 900).await;
    wait_for_status(&env.rtdb, "d1", "on", Duration::from_secs(3)).await;

    let gateway = CommandGateway::new(env.inventory.clone(), Duration::from_secs(5));
    let reply = gateway
        .execute(
            RequestKind::Call,
            &PointRequest {
                device_id: "d1".into(),
                term_id: "t1".into(),
                item_id: "i1".into(),
                value: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(reply.value, 102.0);
    assert_eq!(reply.item_id, "i1");

    env.stop().await;
}

#[tokio::test]
async fn control_runs_select_then_execute() {
    let env = TestEnv::start(MockPeerConfig::default(), 900).await;
    wait_for_status(&env.rtdb, "d1", "on", Duration::from_secs(3)).await;

    let gateway = CommandGateway::new(env.inventory.clone(), Duration::from_secs(5));
    let router = build_router(env.inventory.clone(), gateway);

    let body = serde_json::json!({
        "device_id": "d1",
        "term_id": "t1",
        "item_id": "i4",
        "value": 123.4,
    });
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/device_ctrl")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let reply: SampleEvent = serde_json::from_slice(&bytes).unwrap();
    assert!((reply.value - 123.4).abs() < 1e-3);

    // Two frames on the wire: select first, then execute
    let selects = env.peer.command_selects.lock().clone();
    assert_eq!(selects, vec![Some(true), Some(false)]);

    env.stop().await;
}

#[tokio::test]
async fn reconnects_after_peer_drop() {
    let config = MockPeerConfig {
        drop_first_connection: true,
        ..MockPeerConfig::default()
    };
    let env = TestEnv::start(config, 900).await;

    // First connection is dropped right after the handshake; the actor
    // re-establishes the link after the initial backoff
    let connections = env.peer.connections.clone();
    wait_until("second connection", Duration::from_secs(6), || {
        let connections = connections.clone();
        async move { connections.load(Ordering::SeqCst) >= 2 }
    })
    .await;
    wait_for_status(&env.rtdb, "d1", "on", Duration::from_secs(3)).await;

    env.stop().await;
}
