use std::{
    pin::Pin,
    sync::{Arc, Mutex},
    task::{Context, Poll},
    time::Duration,
};

use futures_util::{Sink, Stream};
use hrana_client::{ws::WsStream, BrokenReason, Connection, HranaError, Transport};
use serde_json::{json, Value as JsonValue};
use tokio::sync::mpsc;

/// In-memory stand-in for a websocket carrying text frames.
struct MemoryChannel {
    outgoing: mpsc::UnboundedSender<String>,
    incoming: mpsc::UnboundedReceiver<String>,
}

impl Sink<String> for MemoryChannel {
    type Error = String;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), String>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: String) -> Result<(), String> {
        self.outgoing.send(item).map_err(|err| err.to_string())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), String>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), String>> {
        Poll::Ready(Ok(()))
    }
}

impl Stream for MemoryChannel {
    type Item = Result<String, String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().incoming.poll_recv(cx).map(|frame| frame.map(Ok))
    }
}

struct TestServer {
    frames: Arc<Mutex<Vec<JsonValue>>>,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl TestServer {
    fn frames(&self) -> Vec<JsonValue> {
        self.frames
            .lock()
            .expect("frame log mutex must not be poisoned")
            .clone()
    }

    async fn wait_for_frames(&self, count: usize) -> Vec<JsonValue> {
        for _ in 0..100 {
            let frames = self.frames();
            if frames.len() >= count {
                return frames;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("server saw only {} frames", self.frames().len());
    }
}

fn spawn_server<F>(respond: F) -> (MemoryChannel, TestServer)
where
    F: Fn(&JsonValue) -> Option<JsonValue> + Send + 'static,
{
    let (client_tx, mut server_rx) = mpsc::unbounded_channel::<String>();
    let (server_tx, client_rx) = mpsc::unbounded_channel::<String>();
    let frames = Arc::new(Mutex::new(Vec::new()));

    let log = frames.clone();
    let task = tokio::spawn(async move {
        while let Some(text) = server_rx.recv().await {
            let frame: JsonValue = serde_json::from_str(&text).expect("client frames are JSON");
            log.lock()
                .expect("frame log mutex must not be poisoned")
                .push(frame.clone());
            if let Some(reply) = respond(&frame) {
                if server_tx.send(reply.to_string()).is_err() {
                    break;
                }
            }
        }
    });

    let channel = MemoryChannel {
        outgoing: client_tx,
        incoming: client_rx,
    };
    (channel, TestServer { frames, task })
}

fn standard_reply(frame: &JsonValue) -> Option<JsonValue> {
    match frame["type"].as_str()? {
        "hello" => Some(json!({ "type": "hello_ok" })),
        "request" => {
            let request = &frame["request"];
            let response = match request["type"].as_str()? {
                "open_stream" => json!({ "type": "open_stream" }),
                "close_stream" => json!({ "type": "close_stream" }),
                "execute" => json!({
                    "type": "execute",
                    "result": {
                        "cols": [{ "name": "one" }],
                        "rows": [[{ "type": "integer", "value": "1" }]],
                        "affected_row_count": 0,
                        "replication_index": "12"
                    }
                }),
                "batch" => {
                    let steps = request["batch"]["steps"].as_array()?.len();
                    json!({
                        "type": "batch",
                        "result": {
                            "step_results": vec![json!({ "affected_row_count": 1 }); steps],
                            "step_errors": vec![JsonValue::Null; steps]
                        }
                    })
                }
                _ => return None,
            };
            Some(json!({
                "type": "response_ok",
                "request_id": frame["request_id"],
                "response": response
            }))
        }
        _ => None,
    }
}

#[tokio::test]
async fn handshake_opens_stream_and_queries() {
    let (channel, server) = spawn_server(standard_reply);

    let stream = WsStream::connect(channel, Some("token"))
        .await
        .expect("handshake must succeed");
    let mut db = Connection::from_transport(stream);

    let mut rows = db.query("SELECT 1 AS one", ()).await.expect("query");
    let row = rows.next_row().expect("one row");
    assert_eq!(row.get_i64("one"), Some(1));
    assert_eq!(db.session().replication_index(), Some(12));

    let frames = server.frames();
    assert_eq!(frames[0], json!({ "type": "hello", "jwt": "token" }));
    assert_eq!(
        frames[1],
        json!({
            "type": "request",
            "request_id": 0,
            "request": { "type": "open_stream", "stream_id": 0 }
        })
    );
    assert_eq!(frames[2]["request_id"], 1);
    assert_eq!(frames[2]["request"]["type"], "execute");
    assert_eq!(frames[2]["request"]["stream_id"], 0);
    assert_eq!(frames[2]["request"]["stmt"]["sql"], "SELECT 1 AS one");
}

#[tokio::test]
async fn hello_error_fails_the_handshake() {
    let (channel, _server) = spawn_server(|frame| match frame["type"].as_str()? {
        "hello" => Some(json!({ "type": "hello_error", "error": { "message": "invalid jwt" } })),
        _ => None,
    });

    let err = WsStream::connect(channel, Some("bad"))
        .await
        .err()
        .expect("handshake must fail");
    match err {
        HranaError::ConnectionBroken { reason, message } => {
            assert_eq!(reason, BrokenReason::Handshake);
            assert_eq!(message, "invalid jwt");
        }
        other => panic!("expected handshake error, got {other:?}"),
    }
}

#[tokio::test]
async fn statement_errors_keep_the_stream_open() {
    let (channel, _server) = spawn_server(|frame| {
        if frame["request"]["stmt"]["sql"] == "SELECT * FROM missing" {
            return Some(json!({
                "type": "response_error",
                "request_id": frame["request_id"],
                "error": { "message": "no such table: missing", "code": "SQLITE_ERROR" }
            }));
        }
        standard_reply(frame)
    });
    let stream = WsStream::connect(channel, None).await.expect("handshake");
    let mut db = Connection::from_transport(stream);

    let err = db
        .query("SELECT * FROM missing", ())
        .await
        .expect_err("must fail");
    match err.root() {
        HranaError::Server { message, code } => {
            assert_eq!(message, "no such table: missing");
            assert_eq!(code.as_deref(), Some("SQLITE_ERROR"));
        }
        other => panic!("expected server error, got {other:?}"),
    }
    assert!(!db.session().is_closed());

    db.query("SELECT 1 AS one", ()).await.expect("stream still usable");
}

#[tokio::test]
async fn script_is_sent_as_one_transactional_batch() {
    let (channel, server) = spawn_server(standard_reply);
    let stream = WsStream::connect(channel, None).await.expect("handshake");
    let mut db = Connection::from_transport(stream);

    let result = db
        .execute_script("INSERT INTO t VALUES(1); INSERT INTO t VALUES(2);")
        .await
        .expect("script");
    assert_eq!(result.affected_row_count, 2);

    let frames = server.frames();
    let request = &frames[2]["request"];
    assert_eq!(request["type"], "batch");
    assert_eq!(request["stream_id"], 0);
    assert_eq!(request["batch"]["steps"].as_array().map(Vec::len), Some(5));
    assert_eq!(request["batch"]["steps"][0]["stmt"]["sql"], "BEGIN");
}

#[tokio::test]
async fn close_sends_close_stream_and_ends_the_session() {
    let (channel, server) = spawn_server(standard_reply);
    let stream = WsStream::connect(channel, None).await.expect("handshake");
    let mut db = Connection::from_transport(stream);

    db.close();
    assert!(db.transport().session().is_closed());

    let frames = server.wait_for_frames(3).await;
    assert_eq!(
        frames[2]["request"],
        json!({ "type": "close_stream", "stream_id": 0 })
    );

    let err = db.execute("SELECT 1", ()).await.expect_err("stream is closed");
    assert!(matches!(err.root(), HranaError::StreamClosed));
}

#[tokio::test]
async fn malformed_server_frames_break_the_connection() {
    let bad_replies: [fn(&JsonValue) -> JsonValue; 2] = [
        |_| JsonValue::String("not a server message".to_owned()),
        |_| json!({ "type": "response_ok", "request_id": 999, "response": { "type": "execute", "result": {} } }),
    ];
    for bad_reply in bad_replies {
        let (channel, _server) = spawn_server(move |frame| {
            if frame["request"]["type"] == "execute" {
                return Some(bad_reply(frame));
            }
            standard_reply(frame)
        });
        let stream = WsStream::connect(channel, None).await.expect("handshake");
        let mut db = Connection::from_transport(stream);

        let err = db.execute("SELECT 1", ()).await.expect_err("must fail");
        assert!(err.is_bad_connection(), "error {err:?}");
        assert!(matches!(
            err.root(),
            HranaError::ConnectionBroken {
                reason: BrokenReason::Protocol,
                ..
            }
        ));
        assert!(db.session().is_closed());
    }
}
