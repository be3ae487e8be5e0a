//! Client Session (C8): a reconnecting WebSocket actor with generic
//! requestId-keyed request/response correlation plus server-initiated
//! notifications.

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::events::ClientEvent;
use crate::state::ClientState;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use kvb_protocol::{Envelope, Notification, RequestType, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, oneshot, watch, Mutex as AsyncMutex};
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tokio_tungstenite::MaybeTlsStream;
use tracing::{debug, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const EVENT_BUS_CAPACITY: usize = 256;
const CLEAN_CLOSE_CODE: u16 = 1000;

type WsStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;
type WriteHalf = SplitSink<WsStream, Message>;
type ReadHalf = SplitStream<WsStream>;

type UpdateCallback = Box<dyn Fn(&str, &str, &str, Option<&Value>) + Send + Sync>;

struct Inner {
    config: ClientConfig,
    state_tx: watch::Sender<ClientState>,
    events_tx: broadcast::Sender<ClientEvent>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Result<Value, String>>>>,
    next_id: AtomicU64,
    write: AsyncMutex<Option<WriteHalf>>,
    callbacks: Mutex<HashMap<(String, String), Vec<UpdateCallback>>>,
    intentional_close: AtomicBool,
}

/// A handle to a live (or reconnecting) broker connection. Cloning shares the
/// same underlying session; dropping every handle does not itself close the
/// connection — call [`BrokerClient::close`] explicitly.
#[derive(Clone)]
pub struct BrokerClient {
    inner: Arc<Inner>,
}

impl BrokerClient {
    /// Connects and waits for the transport to reach `Open`, per the
    /// contract `connect()` resolves when open, or fails with
    /// `ClientError::ConnectTimeout` after 10 s with no transition.
    pub async fn connect(config: ClientConfig) -> Result<Self, ClientError> {
        let (state_tx, mut state_rx) = watch::channel(ClientState::Idle);
        let (events_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        let inner = Arc::new(Inner {
            config,
            state_tx,
            events_tx,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            write: AsyncMutex::new(None),
            callbacks: Mutex::new(HashMap::new()),
            intentional_close: AtomicBool::new(false),
        });

        let run_inner = inner.clone();
        tokio::spawn(async move { run(run_inner).await });

        tokio::time::timeout(CONNECT_TIMEOUT, async {
            loop {
                if *state_rx.borrow() == ClientState::Open {
                    return;
                }
                if state_rx.changed().await.is_err() {
                    return;
                }
            }
        })
        .await
        .map_err(|_| ClientError::ConnectTimeout)?;

        Ok(Self { inner })
    }

    pub fn state(&self) -> ClientState {
        *self.inner.state_tx.borrow()
    }

    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Registers a callback invoked on `SUBSCRIPTION_UPDATE` for this exact
    /// `(collection, pattern)` pair — purely local dispatch, independent of
    /// whether the broker-side `SUBSCRIBE` has been sent.
    pub fn on_update(
        &self,
        collection: impl Into<String>,
        pattern: impl Into<String>,
        callback: impl Fn(&str, &str, &str, Option<&Value>) + Send + Sync + 'static,
    ) {
        self.inner
            .callbacks
            .lock()
            .unwrap()
            .entry((collection.into(), pattern.into()))
            .or_default()
            .push(Box::new(callback));
    }

    pub async fn request(&self, request_type: RequestType, payload: Value) -> Result<Value, ClientError> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().unwrap().insert(id, tx);

        let envelope = Envelope::request(request_type, id, payload);
        let json = serde_json::to_string(&envelope).expect("envelope always serializes");
        {
            let mut write = self.inner.write.lock().await;
            let Some(sink) = write.as_mut() else {
                self.inner.pending.lock().unwrap().remove(&id);
                return Err(ClientError::Disconnected);
            };
            if sink.send(Message::Text(json.into())).await.is_err() {
                self.inner.pending.lock().unwrap().remove(&id);
                return Err(ClientError::Disconnected);
            }
        }

        let inner = self.inner.clone();
        tokio::spawn(async move {
            tokio::time::sleep(REQUEST_TIMEOUT).await;
            if let Some(tx) = inner.pending.lock().unwrap().remove(&id) {
                let _ = tx.send(Err("Request timeout".to_owned()));
            }
        });

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) if message == "Request timeout" => Err(ClientError::RequestTimeout),
            Ok(Err(message)) => Err(ClientError::Server(message)),
            Err(_) => Err(ClientError::Disconnected),
        }
    }

    pub async fn get(&self, collection: &str, key: &str) -> Result<Value, ClientError> {
        self.request(
            RequestType::Get,
            Value::from(serde_json::json!({"collection": collection, "key": key})),
        )
        .await
    }

    pub async fn set(&self, collection: &str, key: &str, value: Value) -> Result<Value, ClientError> {
        let value: serde_json::Value = value.into();
        self.request(
            RequestType::Set,
            Value::from(serde_json::json!({"collection": collection, "key": key, "value": value})),
        )
        .await
    }

    pub async fn delete(&self, collection: &str, key: &str) -> Result<Value, ClientError> {
        self.request(
            RequestType::Delete,
            Value::from(serde_json::json!({"collection": collection, "key": key})),
        )
        .await
    }

    pub async fn subscribe(&self, collection: &str, pattern: &str) -> Result<(), ClientError> {
        self.request(
            RequestType::Subscribe,
            Value::from(serde_json::json!({"collection": collection, "pattern": pattern})),
        )
        .await?;
        Ok(())
    }

    pub async fn unsubscribe(&self, collection: &str, pattern: &str) -> Result<(), ClientError> {
        self.request(
            RequestType::Unsubscribe,
            Value::from(serde_json::json!({"collection": collection, "pattern": pattern})),
        )
        .await?;
        Ok(())
    }

    /// Round-trip latency of a `PING`, measured locally in milliseconds.
    pub async fn ping(&self) -> Result<u64, ClientError> {
        let started = Instant::now();
        self.request(RequestType::Ping, Value::Object(Default::default())).await?;
        Ok(started.elapsed().as_millis() as u64)
    }

    /// Application-initiated clean close (code 1000): does not trigger the
    /// reconnect loop.
    pub async fn close(&self) {
        self.inner.intentional_close.store(true, Ordering::SeqCst);
        self.inner.state_tx.send_replace(ClientState::Closing);
        let mut write = self.inner.write.lock().await;
        if let Some(sink) = write.as_mut() {
            let frame = CloseFrame { code: CLEAN_CLOSE_CODE.into(), reason: "".into() };
            let _ = sink.send(Message::Close(Some(frame))).await;
        }
    }
}

enum ConnectionOutcome {
    CleanClose,
    UncleanClose,
    ConnectFailed,
}

/// Builds the WS handshake request, attaching `x-platform` when the caller
/// overrode the platform — the broker otherwise falls back to sniffing
/// `User-Agent`, which a library client has no reason to set.
fn build_request(
    config: &ClientConfig,
) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request, tokio_tungstenite::tungstenite::Error> {
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;
    let mut request = config.server_url.as_str().into_client_request()?;
    if let Some(platform) = &config.platform {
        request.headers_mut().insert(
            "x-platform",
            platform
                .as_str()
                .parse()
                .expect("platform strings are valid header values"),
        );
    }
    Ok(request)
}

async fn run(inner: Arc<Inner>) {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        inner.state_tx.send_replace(ClientState::Connecting);

        let outcome = connect_and_serve(&inner, &mut attempt).await;
        fail_all_pending(&inner, "WebSocket disconnected");

        match outcome {
            ConnectionOutcome::CleanClose => {
                inner.state_tx.send_replace(ClientState::Closed);
                break;
            }
            ConnectionOutcome::UncleanClose | ConnectionOutcome::ConnectFailed => {
                let _ = inner.events_tx.send(ClientEvent::Disconnected);
                if attempt >= inner.config.max_reconnect_attempts {
                    warn!("max reconnect attempts reached, giving up");
                    let _ = inner.events_tx.send(ClientEvent::MaxReconnectAttemptsReached);
                    inner.state_tx.send_replace(ClientState::Closed);
                    break;
                }
                let delay = inner.config.backoff_delay_ms(attempt);
                debug!(attempt, delay_ms = delay, "reconnecting after backoff");
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }
    }
}

async fn connect_and_serve(inner: &Arc<Inner>, attempt: &mut u32) -> ConnectionOutcome {
    let request = match build_request(&inner.config) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "invalid server url");
            return ConnectionOutcome::ConnectFailed;
        }
    };
    let connected = tokio::time::timeout(
        CONNECT_TIMEOUT,
        tokio_tungstenite::connect_async(request),
    )
    .await;

    let (stream, _response) = match connected {
        Ok(Ok(pair)) => pair,
        Ok(Err(e)) => {
            warn!(error = %e, "connect failed");
            return ConnectionOutcome::ConnectFailed;
        }
        Err(_) => {
            warn!("connect timed out");
            return ConnectionOutcome::ConnectFailed;
        }
    };

    let (write, read) = stream.split();
    *inner.write.lock().await = Some(write);
    inner.state_tx.send_replace(ClientState::Open);
    let _ = inner.events_tx.send(ClientEvent::Connected);
    info!("broker connection established");
    // A successful connect closes out this disconnection episode: the next
    // drop restarts the backoff schedule at `reconnect_interval_ms` rather
    // than continuing the lifetime-accumulated attempt count.
    *attempt = 0;

    let outcome = read_loop(inner, read).await;
    *inner.write.lock().await = None;
    outcome
}

async fn read_loop(inner: &Arc<Inner>, mut read: ReadHalf) -> ConnectionOutcome {
    loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => handle_incoming(inner, &text),
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
            Some(Ok(Message::Close(frame))) => {
                let clean = inner.intentional_close.load(Ordering::SeqCst)
                    || frame.as_ref().is_some_and(|f| u16::from(f.code) == CLEAN_CLOSE_CODE);
                return if clean { ConnectionOutcome::CleanClose } else { ConnectionOutcome::UncleanClose };
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!(error = %e, "WS read error");
                return ConnectionOutcome::UncleanClose;
            }
            None => {
                return if inner.intentional_close.load(Ordering::SeqCst) {
                    ConnectionOutcome::CleanClose
                } else {
                    ConnectionOutcome::UncleanClose
                };
            }
        }
    }
}

fn handle_incoming(inner: &Arc<Inner>, text: &str) {
    let raw: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "invalid JSON from broker");
            return;
        }
    };
    let kind = raw.get("type").and_then(|v| v.as_str()).unwrap_or_default();

    match kind {
        "CONNECTION_ESTABLISHED" => {
            if serde_json::from_value::<Notification>(raw).is_ok() {
                inner.state_tx.send_replace(ClientState::Ready);
                let _ = inner.events_tx.send(ClientEvent::Ready);
            }
        }
        "SUBSCRIPTION_UPDATE" => match serde_json::from_value::<Notification>(raw) {
            Ok(Notification::SubscriptionUpdate { collection, key, operation, value, .. }) => {
                dispatch_update(inner, &collection, &key, &operation, value.as_ref());
            }
            _ => warn!("malformed SUBSCRIPTION_UPDATE"),
        },
        _ => match serde_json::from_value::<Envelope>(raw) {
            Ok(envelope) => complete_pending(inner, envelope),
            Err(e) => warn!(error = %e, "unrecognised envelope from broker"),
        },
    }
}

fn dispatch_update(inner: &Arc<Inner>, collection: &str, key: &str, operation: &str, value: Option<&Value>) {
    let _ = inner.events_tx.send(ClientEvent::DataUpdate {
        collection: collection.to_owned(),
        key: key.to_owned(),
        operation: operation.to_owned(),
        value: value.cloned(),
    });

    let callbacks = inner.callbacks.lock().unwrap();
    if let Some(list) = callbacks.get(&(collection.to_owned(), key.to_owned())) {
        for cb in list {
            cb(collection, key, operation, value);
        }
    }
    if let Some(list) = callbacks.get(&(collection.to_owned(), "*".to_owned())) {
        for cb in list {
            cb(collection, key, operation, value);
        }
    }
}

fn complete_pending(inner: &Arc<Inner>, envelope: Envelope) {
    let Some(request_id) = envelope.request_id else {
        return;
    };
    let Some(tx) = inner.pending.lock().unwrap().remove(&request_id) else {
        debug!(request_id, "response for unknown or already-resolved request, ignoring");
        return;
    };
    let result = if envelope.success == Some(false) {
        Err(envelope.error.unwrap_or_else(|| "request failed".to_owned()))
    } else {
        Ok(envelope.data.unwrap_or(Value::Null))
    };
    let _ = tx.send(result);
}

fn fail_all_pending(inner: &Arc<Inner>, message: &str) {
    let mut pending = inner.pending.lock().unwrap();
    for (_, tx) in pending.drain() {
        let _ = tx.send(Err(message.to_owned()));
    }
}
