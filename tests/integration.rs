//! Integration tests for funcwire.
//!
//! Each test plays the host: it binds the Unix sockets, starts a worker
//! against them and drives the wire protocol by hand.

use std::path::PathBuf;
use std::time::Duration;

use funcwire::dispatch::LoopExit;
use funcwire::control::{kinds, ControlMessage};
use funcwire::protocol::{decode_tagged, encode_length_prefixed, Tag};
use funcwire::response::{BodyEncoding, EncodedResponse, NO_ACK_HEADER};
use funcwire::{Context, Event, HandlerRegistry, Output, QualifiedOffset, Response, Worker, WorkerConfig, WorkerError};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixListener;
use tokio::task::JoinHandle;

fn registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();

    registry
        .module("main")
        .handler("handler", |ctx: Context, event: Event| async move {
            match event.body_text().as_ref() {
                "boom" => Err(anyhow::anyhow!("boom")),
                "created" => Ok(Output::from((201u16, json!({"a": 1})))),
                "binary" => Ok(Output::from(vec![0xffu8, 0x00, 0x10])),
                "greeting" => {
                    let greeting = ctx.user_data::<String>().map(|g| g.to_string()).unwrap_or_default();
                    Ok(Output::Text(greeting))
                }
                "ok" => Ok(Output::from("ok")),
                other => Ok(Output::Text(format!("echo:{other}"))),
            }
        })
        .init_context_sync(|ctx| {
            ctx.set_user_data(String::from("hello from init"));
            Ok(())
        });

    registry
        .module("streams.kafka")
        .handler("ack_later", |ctx: Context, event: Event| async move {
            ctx.platform().explicit_ack(&QualifiedOffset::from_event(&event)).await?;

            let mut response = Response::new("acked");
            response.ensure_no_ack();
            Ok(response)
        });

    registry
        .module("broken")
        .handler_sync("handler", |_ctx, _event| Ok("unreachable"))
        .init_context(|_ctx| async { Err::<(), _>(anyhow::anyhow!("cannot reach database")) });

    registry
}

fn event_frame(body: &str) -> Vec<u8> {
    let event = Event {
        id: format!("id-{body}"),
        body: body.to_string().into(),
        content_type: "text/plain".into(),
        path: "orders".into(),
        shard_id: 3,
        offset: 41,
        ..Default::default()
    };
    encode_length_prefixed(&event.encode().unwrap()).unwrap()
}

async fn next_line(lines: &mut Lines<BufReader<OwnedReadHalf>>) -> (Tag, Value) {
    let line = tokio::time::timeout(Duration::from_secs(10), lines.next_line())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let (tag, payload) = decode_tagged(line.as_bytes()).unwrap();
    let value = if payload.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(payload).unwrap()
    };
    (tag, value)
}

async fn next_response(lines: &mut Lines<BufReader<OwnedReadHalf>>) -> EncodedResponse {
    let (tag, metric) = next_line(lines).await;
    assert_eq!(tag, Tag::Metric);
    assert!(metric["duration"].as_f64().unwrap() > 0.0);

    let (tag, response) = next_line(lines).await;
    assert_eq!(tag, Tag::Response);
    serde_json::from_value(response).unwrap()
}

struct Host {
    _dir: TempDir,
    lines: Lines<BufReader<OwnedReadHalf>>,
    events: OwnedWriteHalf,
    control: Option<(OwnedReadHalf, OwnedWriteHalf)>,
    worker: Option<JoinHandle<funcwire::Result<LoopExit>>>,
}

impl Host {
    async fn start(handler: &str, with_control: bool) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let event_path = dir.path().join("event.sock");
        let control_path: Option<PathBuf> = with_control.then(|| dir.path().join("control.sock"));

        let event_listener = UnixListener::bind(&event_path).unwrap();
        let control_listener = control_path.as_ref().map(|path| UnixListener::bind(path).unwrap());

        let mut config = WorkerConfig::new(handler, &event_path).with_worker_id("0");
        config.connect_attempts = 5;
        config.connect_interval_ms = 10;
        config.control_socket_path = control_path;

        let worker = tokio::spawn(
            Worker::builder(config, registry())
                .signal_handlers(false)
                .build()
                .run(),
        );

        let (event_stream, _) = event_listener.accept().await.unwrap();
        let (event_read, events) = event_stream.into_split();

        let control = match control_listener {
            Some(listener) => Some(listener.accept().await.unwrap().0.into_split()),
            None => None,
        };

        Self {
            _dir: dir,
            lines: BufReader::new(event_read).lines(),
            events,
            control,
            worker: Some(worker),
        }
    }

    async fn ready(handler: &str, with_control: bool) -> Self {
        let mut host = Self::start(handler, with_control).await;
        assert_eq!(host.next_line().await, (Tag::Start, Value::Null));
        if with_control {
            assert_eq!(host.next_control().await, ControlMessage::wrapper_initialized());
        }
        host
    }

    async fn send(&mut self, body: &str) {
        self.events.write_all(&event_frame(body)).await.unwrap();
    }

    async fn next_line(&mut self) -> (Tag, Value) {
        next_line(&mut self.lines).await
    }

    async fn next_response(&mut self) -> EncodedResponse {
        next_response(&mut self.lines).await
    }

    async fn send_control(&mut self, message: ControlMessage) {
        let (_, write) = self.control.as_mut().unwrap();
        write.write_all(&message.encode().unwrap()).await.unwrap();
    }

    async fn next_control(&mut self) -> ControlMessage {
        let (read, _) = self.control.as_mut().unwrap();
        let mut prefix = [0u8; 4];
        read.read_exact(&mut prefix).await.unwrap();
        let mut body = vec![0u8; u32::from_be_bytes(prefix) as usize];
        read.read_exact(&mut body).await.unwrap();
        ControlMessage::decode(&body).unwrap()
    }

    async fn exit(&mut self) -> funcwire::Result<LoopExit> {
        tokio::time::timeout(Duration::from_secs(10), self.worker.take().unwrap())
            .await
            .unwrap()
            .unwrap()
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

#[tokio::test]
async fn test_text_response() {
    let mut host = Host::ready("main:handler", false).await;
    host.send("ok").await;

    let response = host.next_response().await;
    assert_eq!(response.body, "ok");
    assert_eq!(response.body_encoding, BodyEncoding::Text);
    assert_eq!(response.content_type, "text/plain");
    assert_eq!(response.status_code, 200);
}

#[tokio::test]
async fn test_status_with_json_body() {
    let mut host = Host::ready("main:handler", false).await;
    host.send("created").await;

    let response = host.next_response().await;
    assert_eq!(response.status_code, 201);
    assert_eq!(response.body, r#"{"a": 1}"#);
    assert_eq!(response.content_type, "application/json");
}

#[tokio::test]
async fn test_binary_body_is_base64() {
    let mut host = Host::ready("main:handler", false).await;
    host.send("binary").await;

    let response = host.next_response().await;
    assert_eq!(response.body_encoding, BodyEncoding::Base64);
    assert_eq!(response.body, "/wAQ");
}

#[tokio::test]
async fn test_handler_error_becomes_500() {
    let mut host = Host::ready("main:handler", false).await;
    host.send("boom").await;

    let response = host.next_response().await;
    assert_eq!(response.status_code, 500);
    assert_eq!(response.content_type, "text/plain");
    assert!(response.body.contains("boom"));

    host.send("after").await;
    assert_eq!(host.next_response().await.body, "echo:after");
}

#[tokio::test]
async fn test_init_context_runs_before_first_event() {
    let mut host = Host::ready("main:handler", false).await;
    host.send("greeting").await;

    assert_eq!(host.next_response().await.body, "hello from init");
}

#[tokio::test]
async fn test_failing_init_context_is_fatal() {
    let mut host = Host::start("broken:handler", false).await;

    let err = host.exit().await.unwrap_err();
    assert!(matches!(err, WorkerError::Init(_)));
    assert!(err.to_string().contains("cannot reach database"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ten_thousand_events_in_order() {
    const COUNT: usize = 10_000;
    let Host { _dir, mut lines, mut events, worker, .. } = Host::ready("main:handler", false).await;

    let sender = tokio::spawn(async move {
        for i in 0..COUNT {
            events.write_all(&event_frame(&i.to_string())).await.unwrap();
        }
        events
    });

    for i in 0..COUNT {
        let response = next_response(&mut lines).await;
        assert_eq!(response.body, format!("echo:{i}"));
    }

    drop(sender.await.unwrap());
    assert!(worker.is_some());
}

#[tokio::test]
async fn test_malformed_event_does_not_affect_next() {
    let mut host = Host::ready("main:handler", false).await;

    let garbage = encode_length_prefixed(&[0x93, 0xc1, 0xc1, 0xc1]).unwrap();
    host.events.write_all(&garbage).await.unwrap();
    host.send("next").await;

    let (tag, response) = host.next_line().await;
    assert_eq!(tag, Tag::Response);
    assert_eq!(response["status_code"], 500);

    assert_eq!(host.next_response().await.body, "echo:next");
}

#[tokio::test]
async fn test_zero_length_prefix_is_fatal() {
    let mut host = Host::ready("main:handler", false).await;
    host.events.write_all(&[0, 0, 0, 0]).await.unwrap();

    let err = host.exit().await.unwrap_err();
    assert!(matches!(err, WorkerError::IllegalFrameSize { size: 0, .. }));
}

#[tokio::test]
async fn test_disconnect_without_terminate_is_fatal() {
    let mut host = Host::ready("main:handler", false).await;
    host.events.shutdown().await.unwrap();

    let err = host.exit().await.unwrap_err();
    assert!(matches!(err, WorkerError::ConnectionClosed));
}

#[tokio::test]
async fn test_drain_and_continue_over_control_channel() {
    let mut host = Host::ready("main:handler", true).await;

    host.send_control(ControlMessage::new(kinds::DRAIN)).await;
    settle().await;
    host.send("dropped").await;
    settle().await;

    host.send_control(ControlMessage::new(kinds::CONTINUE)).await;
    settle().await;
    host.send("served").await;

    assert_eq!(host.next_response().await.body, "echo:served");
}

#[tokio::test]
async fn test_terminate_then_disconnect_exits_cleanly() {
    let mut host = Host::ready("main:handler", true).await;

    host.send_control(ControlMessage::new(kinds::TERMINATE)).await;
    settle().await;
    host.send("ignored").await;
    host.events.shutdown().await.unwrap();

    assert_eq!(host.exit().await.unwrap(), LoopExit::Shutdown);
}

#[tokio::test]
async fn test_explicit_ack() {
    let mut host = Host::ready("streams.kafka:ack_later", true).await;
    host.send("record").await;

    let ack = host.next_control().await;
    assert_eq!(ack, ControlMessage::stream_message_ack("orders", 3, 41));

    let response = host.next_response().await;
    assert_eq!(response.body, "acked");
    assert_eq!(response.headers.get(NO_ACK_HEADER), Some(&Value::Bool(true)));
}
