use async_trait::async_trait;
use futures_util::stream;
use futures_util::StreamExt;
use jrx_client::{Client, ClientCommand, ClientUpdate};
use jrx_protocol::{CallRequest, CallResult, OutboundSet};
use jrx_runtime::{Runtime, RuntimeConfig};
use jrx_transport::{
    ByteStream, FallbackMode, HttpBackend, Mode, Result, TransportConfig, TransportError,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use jrx_runtime::{EventKind, LifecycleEvent};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Scripted server: per-route poll bodies and partials, every request logged.
#[derive(Default)]
struct FakeServer {
    log: Mutex<Vec<String>>,
    polls: Mutex<HashMap<String, VecDeque<String>>>,
    partials: Mutex<HashMap<String, String>>,
    calls_in_flight: AtomicUsize,
    peak_calls: AtomicUsize,
}

impl FakeServer {
    fn record(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }

    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn script_poll(&self, route: &str, body: &str) {
        self.polls
            .lock()
            .unwrap()
            .entry(route.to_string())
            .or_default()
            .push_back(body.to_string());
    }

    fn script_partial(&self, route: &str, html: &str) {
        self.partials
            .lock()
            .unwrap()
            .insert(route.to_string(), html.to_string());
    }
}

#[async_trait]
impl HttpBackend for FakeServer {
    async fn call(&self, qualified: &str, request: &CallRequest) -> CallResult {
        let running = self.calls_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_calls.fetch_max(running, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.record(format!("call {qualified} {}", json!(request.args)));
        self.calls_in_flight.fetch_sub(1, Ordering::SeqCst);
        CallResult::from_response(200, json!({"ok": true, "result": null}))
    }

    async fn set(&self, route: &str, edit: &OutboundSet) -> Result<()> {
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.record(format!("set {route} {}={}", edit.k, edit.v));
        Ok(())
    }

    async fn fetch_partial(&self, route: &str) -> Result<String> {
        self.record(format!("partial {route}"));
        self.partials
            .lock()
            .unwrap()
            .get(route)
            .cloned()
            .ok_or(TransportError::Status {
                status: 404,
                url: route.to_string(),
            })
    }

    async fn poll(&self, route: &str, since: u64) -> Result<String> {
        self.record(format!("poll {route} {since}"));
        let body = self
            .polls
            .lock()
            .unwrap()
            .get_mut(route)
            .and_then(VecDeque::pop_front);
        Ok(body.unwrap_or_else(|| format!(r#"{{"seq":{since},"batch":[]}}"#)))
    }

    async fn push_stream(&self, _route: &str, _since: u64) -> Result<ByteStream> {
        Ok(stream::empty().boxed())
    }
}

fn polling_only() -> TransportConfig {
    TransportConfig {
        socket_enabled: false,
        fallback: FallbackMode::Polling,
        poll_interval_ms: 1000,
        ..Default::default()
    }
}

fn runtime(html: &str, config: RuntimeConfig) -> Runtime {
    let mut rt = Runtime::from_html(html, config).unwrap();
    rt.hydrate();
    rt
}

async fn next_rendered(updates: &mut mpsc::UnboundedReceiver<ClientUpdate>) -> (Option<u64>, String) {
    loop {
        match updates.recv().await {
            Some(ClientUpdate::Rendered { seq, html }) => return (seq, html),
            Some(_) => continue,
            None => panic!("client stopped before rendering"),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn polled_batches_are_rendered() {
    let server = Arc::new(FakeServer::default());
    server.script_poll("/", r#"{"seq":2,"batch":[{"k":"count","v":5}]}"#);
    let rt = runtime(
        r#"<div id="app"><p>{{count}}</p></div>"#,
        RuntimeConfig::for_headless(),
    );

    let mut client = Client::new(rt, polling_only(), server.clone());
    let mut updates = client.subscribe();
    client.open("/");
    assert!(!client.is_realtime());
    let (commands, rx) = mpsc::channel(8);
    let task = tokio::spawn(client.run(rx));

    assert_eq!(
        updates.recv().await,
        Some(ClientUpdate::Connection {
            mode: Mode::Polling,
            open: true
        })
    );
    let (seq, html) = next_rendered(&mut updates).await;
    assert_eq!(seq, Some(2));
    assert!(html.contains(">5<"), "{html}");

    commands.send(ClientCommand::Shutdown).await.unwrap();
    let rt = task.await.unwrap().unwrap();
    assert_eq!(rt.state()["count"], json!(5));
    assert_eq!(server.log()[0], "poll / 0");
}

#[tokio::test(start_paused = true)]
async fn degraded_edits_are_queued_and_resynced() {
    let markup = r#"<input name="q" @input="Page#1.preview(q)">"#;
    let server = Arc::new(FakeServer::default());
    server.script_partial("/", markup);
    let mut config = RuntimeConfig::for_headless();
    config.input_debounce_ms = 100;
    let rt = runtime(&format!(r#"<div id="app">{markup}</div>"#), config);
    let input = rt.document().elements_by_tag(rt.app_root(), "input")[0];

    let mut client = Client::new(rt, polling_only(), server.clone());
    client.open("/");
    let (commands, rx) = mpsc::channel(8);
    let task = tokio::spawn(client.run(rx));

    for value in ["a", "ab"] {
        commands
            .send(ClientCommand::Edit {
                target: input,
                value: value.to_string(),
            })
            .await
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(800)).await;
    commands.send(ClientCommand::Shutdown).await.unwrap();
    let rt = task.await.unwrap().unwrap();

    let log = server.log();
    let writes: Vec<&String> = log
        .iter()
        .filter(|entry| entry.starts_with("set") || entry.starts_with("call"))
        .collect();
    assert_eq!(
        writes,
        [
            r#"set / q="a""#,
            r#"set / q="ab""#,
            r#"call Page#1.preview ["ab"]"#,
        ]
    );
    assert!(log.iter().any(|entry| entry == "partial /"));
    assert_eq!(rt.document().focused(), Some(input));
    assert_eq!(rt.document().value(input), "ab");
}

#[tokio::test(start_paused = true)]
async fn navigation_swaps_the_page_and_polls_the_new_route() {
    let server = Arc::new(FakeServer::default());
    server.script_partial("/about", "<h1>{{title}}</h1>");
    server.script_poll("/about", r#"{"seq":1,"batch":[{"k":"title","v":"About us"}]}"#);
    let rt = runtime(
        r#"<div id="app"><p>{{count}}</p></div>"#,
        RuntimeConfig::for_headless(),
    );

    let mut client = Client::new(rt, polling_only(), server.clone());
    let mut updates = client.subscribe();
    client.open("/");
    let (commands, rx) = mpsc::channel(8);
    let task = tokio::spawn(client.run(rx));

    commands
        .send(ClientCommand::Navigate("/about".to_string()))
        .await
        .unwrap();
    loop {
        if let Some(ClientUpdate::Navigated { route }) = updates.recv().await {
            assert_eq!(route, "/about");
            break;
        }
    }
    let (seq, html) = next_rendered(&mut updates).await;
    assert_eq!(seq, None);
    assert!(html.starts_with("<h1"), "{html}");
    let (seq, html) = next_rendered(&mut updates).await;
    assert_eq!(seq, Some(1));
    assert!(html.contains("About us"), "{html}");

    drop(commands);
    let rt = task.await.unwrap().unwrap();
    assert_eq!(rt.state().get("count"), None);
    let log = server.log();
    assert!(log.contains(&"partial /about".to_string()));
    assert!(log.contains(&"poll /about 0".to_string()));
}

/// Accepts socket connections and keeps them open without sending anything.
async fn silent_socket_server() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let Ok(mut socket) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(_)) = socket.next().await {}
            });
        }
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn realtime_calls_are_serialized() {
    let server = Arc::new(FakeServer::default());
    let rt = runtime(
        r#"<div id="app"><button @click="Page#1.save()">Save</button><button @click="Page#1.undo()">Undo</button></div>"#,
        RuntimeConfig::for_headless(),
    );
    let buttons = rt.document().elements_by_tag(rt.app_root(), "button");
    let config = TransportConfig {
        fallback: FallbackMode::Polling,
        ..TransportConfig::with_base_url(silent_socket_server().await)
    };

    let mut client = Client::new(rt, config, server.clone());
    let mut updates = client.subscribe();
    client.open("/");
    let (commands, rx) = mpsc::channel(8);
    let task = tokio::spawn(client.run(rx));

    let opened = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match updates.recv().await {
                Some(ClientUpdate::Connection { mode, open: true }) => return mode,
                Some(_) => continue,
                None => panic!("client stopped before connecting"),
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(opened, Mode::Socket);

    for target in buttons {
        commands
            .send(ClientCommand::Event {
                target,
                kind: EventKind::Click,
            })
            .await
            .unwrap();
    }
    let mut completed = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        while completed.len() < 2 {
            match updates.recv().await {
                Some(ClientUpdate::Lifecycle(LifecycleEvent::Call { qualified, ok, .. })) => {
                    assert!(ok);
                    completed.push(qualified);
                }
                Some(_) => continue,
                None => panic!("client stopped before both calls finished"),
            }
        }
    })
    .await
    .unwrap();

    commands.send(ClientCommand::Shutdown).await.unwrap();
    task.await.unwrap().unwrap();
    assert_eq!(completed, ["Page#1.save", "Page#1.undo"]);
    assert_eq!(server.peak_calls.load(Ordering::SeqCst), 1);
    assert!(!server.log().iter().any(|entry| entry.starts_with("partial")));
}
