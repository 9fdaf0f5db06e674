use async_trait::async_trait;
use futures_util::stream;
use futures_util::StreamExt;
use jrx_protocol::{CallRequest, CallResult, OutboundSet};
use jrx_transport::{
    run_polling, run_push, ByteStream, CloseReason, Cursor, Generation, HttpBackend, Mode,
    RequestQueue, Result, TransportError, TransportEvent,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Default)]
struct FakeBackend {
    log: Mutex<Vec<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    /// `None` makes the poll fail
    polls: Mutex<VecDeque<Option<String>>>,
    push_chunks: Mutex<Vec<Vec<u8>>>,
}

impl FakeBackend {
    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    async fn busy(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl HttpBackend for FakeBackend {
    async fn call(&self, qualified: &str, request: &CallRequest) -> CallResult {
        self.busy().await;
        self.record(format!("call {qualified} {}", json!(request.args)));
        CallResult::from_response(200, json!({"ok": true, "result": request.args.len()}))
    }

    async fn set(&self, route: &str, edit: &OutboundSet) -> Result<()> {
        self.busy().await;
        self.record(format!("set {route} {}={}", edit.k, edit.v));
        Ok(())
    }

    async fn fetch_partial(&self, route: &str) -> Result<String> {
        self.record(format!("partial {route}"));
        Ok("<p>partial</p>".to_string())
    }

    async fn poll(&self, route: &str, since: u64) -> Result<String> {
        self.record(format!("poll {route} {since}"));
        match self.polls.lock().unwrap().pop_front() {
            Some(Some(body)) => Ok(body),
            Some(None) => Err(TransportError::Status {
                status: 503,
                url: format!("/jrx/poll?path={route}"),
            }),
            None => Ok(r#"{"batch":[]}"#.to_string()),
        }
    }

    async fn push_stream(&self, _route: &str, _since: u64) -> Result<ByteStream> {
        let chunks = std::mem::take(&mut *self.push_chunks.lock().unwrap());
        Ok(stream::iter(chunks.into_iter().map(Ok)).boxed())
    }
}

async fn drain(mut rx: mpsc::Receiver<TransportEvent>) -> Vec<TransportEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        events.push(event);
    }
    events
}

#[tokio::test(start_paused = true)]
async fn queue_runs_jobs_in_submission_order_one_at_a_time() {
    let backend = Arc::new(FakeBackend::default());
    let queue = RequestQueue::spawn(backend.clone());

    let first = queue.submit_set("/form", OutboundSet::new("name", json!("a")));
    let second = queue.submit_set("/form", OutboundSet::new("name", json!("ab")));
    let call = queue.submit_call("Form#1.save", CallRequest { args: vec![json!(1)] });

    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();
    let result = call.await.unwrap();

    assert!(result.ok);
    assert_eq!(result.payload, json!(1));
    assert_eq!(
        backend.log(),
        vec![
            r#"set /form name="a""#,
            r#"set /form name="ab""#,
            "call Form#1.save [1]",
        ]
    );
    assert_eq!(backend.max_active.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn queue_handles_are_shared() {
    let backend = Arc::new(FakeBackend::default());
    let queue = RequestQueue::spawn(backend.clone());
    let other = queue.clone();

    let a = queue.submit_set("/", OutboundSet::new("x", json!(1)));
    let b = other.submit_set("/", OutboundSet::new("x", json!(2)));
    let (a, b) = tokio::join!(a, b);
    assert!(a.unwrap().is_ok() && b.unwrap().is_ok());
    assert_eq!(backend.log(), vec!["set / x=1", "set / x=2"]);
    assert!(other.set("/", OutboundSet::new("x", json!(3))).await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn polling_leaves_forwarded_batches_to_the_consumer_cursor() {
    let backend = Arc::new(FakeBackend::default());
    backend.polls.lock().unwrap().extend([
        Some(r#"{"seq":3,"batch":[{"k":"a","v":1}]}"#.to_string()),
        Some(r#"{"seq":3,"batch":[]}"#.to_string()),
        None,
    ]);
    let generation = Generation::new();
    let cursor = Cursor::new();
    let (tx, rx) = mpsc::channel(16);
    let token = generation.advance();
    let id = token.id();

    tokio::spawn(run_polling(
        backend.clone(),
        "/feed".to_string(),
        cursor.clone(),
        Duration::from_millis(1500),
        token,
        tx,
    ));
    let events = drain(rx).await;

    assert_eq!(events.len(), 3);
    assert_eq!(
        events[0],
        TransportEvent::Opened {
            mode: Mode::Polling,
            generation: id
        }
    );
    assert!(matches!(&events[1], TransportEvent::Message { raw, .. } if raw.contains("\"seq\":3")));
    assert!(matches!(
        &events[2],
        TransportEvent::Closed { clean: false, reason: CloseReason::Other(_), .. }
    ));
    assert_eq!(cursor.get(), 3);
    assert_eq!(
        backend.log(),
        vec!["poll /feed 0", "poll /feed 0", "poll /feed 3"]
    );
}

#[tokio::test(start_paused = true)]
async fn superseded_polling_loop_exits_quietly() {
    let backend = Arc::new(FakeBackend::default());
    let generation = Generation::new();
    let (tx, mut rx) = mpsc::channel(16);

    tokio::spawn(run_polling(
        backend,
        "/".to_string(),
        Cursor::new(),
        Duration::from_millis(1500),
        generation.advance(),
        tx,
    ));
    let opened = rx.recv().await.unwrap();
    assert_eq!(opened.mode(), Mode::Polling);

    generation.advance();
    assert_eq!(rx.recv().await, None);
}

#[tokio::test]
async fn push_stream_forwards_only_batch_events() {
    let backend = Arc::new(FakeBackend::default());
    *backend.push_chunks.lock().unwrap() = vec![
        b"event: jrx\ndata: {\"k\":\"a\",".to_vec(),
        b"\"v\":1}\n\nevent: ping\ndata: x\n\n".to_vec(),
        b"data: {\"k\":\"b\",\"v\":2}\n\n".to_vec(),
    ];
    let generation = Generation::new();
    let (tx, rx) = mpsc::channel(16);

    tokio::spawn(run_push(
        backend,
        "/".to_string(),
        Cursor::new(),
        generation.advance(),
        tx,
    ));
    let events = drain(rx).await;

    assert_eq!(events.len(), 3);
    assert_eq!(events[0].mode(), Mode::Push);
    assert!(matches!(&events[1], TransportEvent::Message { raw, .. } if raw == r#"{"k":"a","v":1}"#));
    assert!(matches!(
        &events[2],
        TransportEvent::Closed { clean: false, reason: CloseReason::Other(r), .. } if r == "stream ended"
    ));
}
