//! End-to-end broker tests against a fake worker on a loopback socket.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use flowlink_core::{
    Broker, BrokerConfig, BrokerError, ConnectionSlot, Frame, FrameDecoder, MessageKind,
    MethodTable, ShutdownToken, UiSink,
};

const POLL: Duration = Duration::from_millis(20);

/// Records every published UI event for assertions.
#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<(String, Value)>>,
}

impl RecordingSink {
    fn events(&self) -> Vec<(String, Value)> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl UiSink for RecordingSink {
    async fn publish(&self, event: &str, payload: Value) {
        self.events.lock().unwrap().push((event.to_string(), payload));
    }
}

/// A worker-side endpoint speaking the broker wire protocol.
struct FakeWorker {
    stream: TcpStream,
    decoder: FrameDecoder,
}

impl FakeWorker {
    async fn attach(broker: &Broker) -> Self {
        let addr = wait_for(|| broker.slot().local_addr()).await;
        let stream = TcpStream::connect(addr).await.unwrap();
        Self {
            stream,
            decoder: FrameDecoder::new(),
        }
    }

    async fn send(&mut self, frame: &Frame) {
        self.stream.write_all(&frame.encode().unwrap()).await.unwrap();
        self.stream.flush().await.unwrap();
    }

    async fn send_json(&mut self, kind: MessageKind, value: Value) {
        let frame = Frame::new(kind, serde_json::to_vec(&value).unwrap());
        self.send(&frame).await;
    }

    async fn recv(&mut self) -> Frame {
        let mut buf = [0u8; 4096];
        loop {
            let n = self.stream.read(&mut buf).await.unwrap();
            assert!(n > 0, "broker closed the connection unexpectedly");
            let mut frames = self.decoder.feed(&buf[..n]).unwrap();
            if let Some(frame) = frames.pop() {
                return frame;
            }
        }
    }

    async fn recv_json(&mut self) -> (MessageKind, Value) {
        let frame = self.recv().await;
        let value = serde_json::from_slice(&frame.payload).unwrap();
        (frame.kind, value)
    }
}

async fn wait_for<T>(mut probe: impl FnMut() -> Option<T>) -> T {
    for _ in 0..200 {
        if let Some(v) = probe() {
            return v;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

struct TestHarness {
    broker: Arc<Broker>,
    sink: Arc<RecordingSink>,
    runner: tokio::task::JoinHandle<flowlink_core::Result<()>>,
}

impl TestHarness {
    async fn start(methods: MethodTable) -> Self {
        let config = BrokerConfig {
            poll_interval: POLL,
            ..BrokerConfig::default()
        };
        let sink = Arc::new(RecordingSink::default());
        let broker = Arc::new(Broker::new(
            config,
            Arc::new(ConnectionSlot::new()),
            Arc::new(methods),
            sink.clone(),
            ShutdownToken::new(),
        ));
        let runner = tokio::spawn({
            let broker = broker.clone();
            async move { broker.run().await }
        });
        Self {
            broker,
            sink,
            runner,
        }
    }

    async fn stop(self) {
        self.broker.shutdown();
        self.runner.await.unwrap().unwrap();
    }

    async fn wait_connected(&self) {
        let sink = self.sink.clone();
        wait_for(move || {
            sink.events()
                .iter()
                .find(|(e, p)| e == "status" && p["connected"] == json!(true))
                .map(|_| ())
        })
        .await;
    }
}

#[tokio::test]
async fn test_call_roundtrip_through_running_broker() {
    let harness = TestHarness::start(MethodTable::new()).await;
    let mut worker = FakeWorker::attach(&harness.broker).await;
    harness.wait_connected().await;

    let broker = harness.broker.clone();
    let call = tokio::spawn(async move {
        broker
            .call(MessageKind::Run, "run_graph", json!({"graph": "g1"}))
            .await
    });

    let (kind, request) = worker.recv_json().await;
    assert_eq!(kind, MessageKind::Run);
    assert_eq!(request["method"], "run_graph");
    let id = request["id"].as_u64().unwrap();

    worker
        .send_json(MessageKind::Ok, json!({"id": id, "result": {"ok": true}}))
        .await;

    let result = call.await.unwrap().unwrap();
    assert_eq!(result, json!({"ok": true}));

    harness.stop().await;
}

#[tokio::test]
async fn test_inbound_echo_request_gets_correlated_reply() {
    let mut methods = MethodTable::new();
    methods.register("echo", |params| async move { Ok(params) });
    let harness = TestHarness::start(methods).await;
    let mut worker = FakeWorker::attach(&harness.broker).await;
    harness.wait_connected().await;

    worker
        .send_json(
            MessageKind::Run,
            json!({"id": 1, "method": "echo", "params": {"x": 5}}),
        )
        .await;

    let (kind, reply) = worker.recv_json().await;
    assert_eq!(kind, MessageKind::Ok);
    assert_eq!(reply, json!({"id": 1, "result": {"x": 5}}));

    harness.stop().await;
}

#[tokio::test]
async fn test_unsolicited_push_reaches_ui_sink() {
    let harness = TestHarness::start(MethodTable::new()).await;
    let mut worker = FakeWorker::attach(&harness.broker).await;
    harness.wait_connected().await;

    worker
        .send_json(MessageKind::Specification, json!({"nodes": [1, 2, 3]}))
        .await;

    let sink = harness.sink.clone();
    wait_for(move || {
        sink.events()
            .iter()
            .find(|(e, p)| e == "specification" && p["nodes"] == json!([1, 2, 3]))
            .map(|_| ())
    })
    .await;

    harness.stop().await;
}

#[tokio::test]
async fn test_status_events_on_attach_and_loss() {
    let harness = TestHarness::start(MethodTable::new()).await;
    let worker = FakeWorker::attach(&harness.broker).await;
    harness.wait_connected().await;

    drop(worker);
    let sink = harness.sink.clone();
    wait_for(move || {
        sink.events()
            .iter()
            .find(|(e, p)| e == "status" && p["connected"] == json!(false))
            .map(|_| ())
    })
    .await;

    harness.stop().await;
}

#[tokio::test]
async fn test_pending_call_resolves_when_peer_disconnects() {
    let harness = TestHarness::start(MethodTable::new()).await;
    let mut worker = FakeWorker::attach(&harness.broker).await;
    harness.wait_connected().await;

    let broker = harness.broker.clone();
    let call = tokio::spawn(async move { broker.call(MessageKind::Run, "ping", json!({})).await });

    // Take the request off the wire, then vanish without replying.
    let _ = worker.recv_json().await;
    drop(worker);

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, BrokerError::ConnectionLost));

    harness.stop().await;
}

#[tokio::test]
async fn test_supervisor_resumes_accepting_after_peer_loss() {
    let mut methods = MethodTable::new();
    methods.register("echo", |params| async move { Ok(params) });
    let harness = TestHarness::start(methods).await;

    let first = FakeWorker::attach(&harness.broker).await;
    harness.wait_connected().await;
    drop(first);

    let sink = harness.sink.clone();
    wait_for(move || {
        sink.events()
            .iter()
            .find(|(e, p)| e == "status" && p["connected"] == json!(false))
            .map(|_| ())
    })
    .await;

    // A second worker attaches on the same listener and is fully served.
    let mut second = FakeWorker::attach(&harness.broker).await;
    second
        .send_json(
            MessageKind::Run,
            json!({"id": 7, "method": "echo", "params": {"again": true}}),
        )
        .await;
    let (kind, reply) = second.recv_json().await;
    assert_eq!(kind, MessageKind::Ok);
    assert_eq!(reply["id"], 7);
    assert_eq!(reply["result"]["again"], true);

    harness.stop().await;
}

#[tokio::test]
async fn test_handler_may_call_back_before_replying() {
    // An inbound request whose handler itself calls a method on the worker
    // must not starve the read path that delivers the inner response.
    let broker_cell: Arc<std::sync::OnceLock<Arc<Broker>>> = Arc::new(std::sync::OnceLock::new());

    let mut methods = MethodTable::new();
    let cell = broker_cell.clone();
    methods.register("prepare_run", move |params| {
        let cell = cell.clone();
        async move {
            let broker = cell.get().expect("broker wired before any dispatch");
            let validated = broker
                .call(MessageKind::Validate, "validate", params)
                .await?;
            Ok(json!({"validated": validated}))
        }
    });

    let harness = TestHarness::start(methods).await;
    broker_cell.set(harness.broker.clone()).ok().unwrap();
    let mut worker = FakeWorker::attach(&harness.broker).await;
    harness.wait_connected().await;

    worker
        .send_json(
            MessageKind::Run,
            json!({"id": 10, "method": "prepare_run", "params": {"graph": "g"}}),
        )
        .await;

    // The broker turns around with its own validate call first.
    let (kind, inner) = worker.recv_json().await;
    assert_eq!(kind, MessageKind::Validate);
    assert_eq!(inner["method"], "validate");
    let inner_id = inner["id"].as_u64().unwrap();
    worker
        .send_json(MessageKind::Ok, json!({"id": inner_id, "result": {"valid": true}}))
        .await;

    // Only then does the original request resolve.
    let (kind, reply) = worker.recv_json().await;
    assert_eq!(kind, MessageKind::Ok);
    assert_eq!(reply["id"], 10);
    assert_eq!(reply["result"]["validated"]["valid"], true);

    harness.stop().await;
}

#[tokio::test]
async fn test_shutdown_unblocks_inflight_call() {
    let harness = TestHarness::start(MethodTable::new()).await;
    let mut worker = FakeWorker::attach(&harness.broker).await;
    harness.wait_connected().await;

    let broker = harness.broker.clone();
    let call = tokio::spawn(async move { broker.call(MessageKind::Run, "ping", json!({})).await });
    let _ = worker.recv_json().await;

    harness.broker.shutdown();
    let err = tokio::time::timeout(Duration::from_secs(1), call)
        .await
        .expect("call should unblock on shutdown")
        .unwrap()
        .unwrap_err();
    assert!(matches!(
        err,
        BrokerError::Shutdown | BrokerError::ConnectionLost
    ));

    harness.runner.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_stale_response_does_not_disturb_broker() {
    let mut methods = MethodTable::new();
    methods.register("echo", |params| async move { Ok(params) });
    let harness = TestHarness::start(methods).await;
    let mut worker = FakeWorker::attach(&harness.broker).await;
    harness.wait_connected().await;

    // A response nobody asked for is dropped silently.
    worker
        .send_json(MessageKind::Ok, json!({"id": 424242, "result": {}}))
        .await;

    // The broker still serves requests afterwards.
    worker
        .send_json(
            MessageKind::Run,
            json!({"id": 2, "method": "echo", "params": {}}),
        )
        .await;
    let (_kind, reply) = worker.recv_json().await;
    assert_eq!(reply["id"], 2);

    harness.stop().await;
}
