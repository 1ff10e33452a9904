//! Janus-protocol signaling client (C1): one WebSocket session per process,
//! with plugin handles multiplexed over it.
//!
//! Grounded on the teacher's `crates/agent/src/signaling.rs` connect/split/
//! reader-writer-task shape, restructured from "one long-lived browser
//! session" to "one Janus session with many attached plugin handles", the
//! way the dropped `janus-client` crate referenced by the pack's
//! `controller-main` workspace would.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, trace, warn};
use uuid_like::new_transaction_id;

use crate::errors::SignalingError;

/// Replacement for a UUID dependency: the teacher's workspace pulls in
/// `uuid` for session identifiers, but this system only needs an
/// unpredictability-free, locally-unique transaction tag, so a monotonic
/// counter keeps the dependency list smaller without changing behavior.
mod uuid_like {
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(1);

    pub fn new_transaction_id() -> String {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        format!("janvlog-{n:x}")
    }
}

const VIDEOROOM_PLUGIN: &str = "janus.plugin.videoroom";

struct PendingEntry {
    tx: oneshot::Sender<Value>,
    /// True if an `ack` frame is itself the final reply (keepalive, attach,
    /// create, destroy, detach); false if the `ack` is only a preliminary
    /// acknowledgement and the real reply arrives later as a `success` or
    /// `event` frame carrying the same transaction (plugin `join`/`start`
    /// style asynchronous requests).
    resolves_on_ack: bool,
}

/// A frame delivered to a handle's unsolicited-event stream: anything that
/// isn't the direct synchronous/asynchronous reply to one of that handle's
/// in-flight `message`/`request` calls.
#[derive(Debug, Clone)]
pub enum HandleEvent {
    SlowLink,
    Media,
    WebRtcUp,
    Hangup,
    Plugin(PluginEvent),
    Other,
}

#[derive(Debug, Clone)]
pub struct PluginEvent {
    pub sender: u64,
    pub plugindata: Value,
    pub jsep: Option<Value>,
}

fn classify(raw: &Value) -> HandleEvent {
    match raw.get("janus").and_then(Value::as_str).unwrap_or("") {
        "slowlink" => HandleEvent::SlowLink,
        "media" => HandleEvent::Media,
        "webrtcup" => HandleEvent::WebRtcUp,
        "hangup" => HandleEvent::Hangup,
        "event" => {
            let sender = raw.get("sender").and_then(Value::as_u64).unwrap_or(0);
            let plugindata = raw
                .get("plugindata")
                .and_then(|d| d.get("data"))
                .cloned()
                .unwrap_or(Value::Null);
            let jsep = raw.get("jsep").cloned();
            HandleEvent::Plugin(PluginEvent {
                sender,
                plugindata,
                jsep,
            })
        }
        _ => HandleEvent::Other,
    }
}

/// One persistent session on the conferencing server, with handles
/// multiplexed over a single WebSocket.
pub struct SignalingClient {
    session_id: u64,
    outbound: mpsc::UnboundedSender<WsMessage>,
    pending: Arc<Mutex<HashMap<String, PendingEntry>>>,
    handles: Arc<Mutex<HashMap<u64, mpsc::Sender<Value>>>>,
    reader_task: tokio::task::JoinHandle<()>,
    writer_task: tokio::task::JoinHandle<()>,
}

impl SignalingClient {
    /// Connects, creates a session, and starts the reader/writer tasks.
    pub async fn connect(url: &str) -> Result<Arc<Self>> {
        let (ws_stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .with_context(|| format!("failed to connect to {url}"))
            .map_err(SignalingError::Connect)?;

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<WsMessage>();

        let pending: Arc<Mutex<HashMap<String, PendingEntry>>> = Arc::new(Mutex::new(HashMap::new()));
        let handles: Arc<Mutex<HashMap<u64, mpsc::Sender<Value>>>> = Arc::new(Mutex::new(HashMap::new()));

        let writer_task = tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if let Err(e) = ws_tx.send(msg).await {
                    warn!("signaling write failed, closing writer task: {e}");
                    return;
                }
            }
        });

        let pending_for_reader = Arc::clone(&pending);
        let handles_for_reader = Arc::clone(&handles);
        let reader_task = tokio::spawn(async move {
            while let Some(frame) = ws_rx.next().await {
                let text = match frame {
                    Ok(WsMessage::Text(t)) => t,
                    Ok(WsMessage::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };
                let value: Value = match serde_json::from_str(&text) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("failed to parse signaling frame: {e}");
                        continue;
                    }
                };
                route_incoming(&pending_for_reader, &handles_for_reader, value).await;
            }
            debug!("signaling reader task exiting");
        });

        let client = Self {
            session_id: 0,
            outbound: outbound_tx,
            pending,
            handles,
            reader_task,
            writer_task,
        };

        let create_response = client
            .call(json!({"janus": "create"}), None, false)
            .await
            .map_err(SignalingError::Connect)?;
        let session_id = create_response["data"]["id"]
            .as_u64()
            .context("create response missing data.id")
            .map_err(SignalingError::Connect)?;

        Ok(Arc::new(Self {
            session_id,
            ..client
        }))
    }

    /// Sends `body` with a fresh transaction id and awaits the matching
    /// reply. `resolves_on_ack` selects whether an `ack` frame is the final
    /// reply or merely a preliminary one (see `PendingEntry`).
    async fn call(&self, mut body: Value, handle_id: Option<u64>, resolves_on_ack: bool) -> Result<Value> {
        let transaction = new_transaction_id();
        body["transaction"] = json!(transaction);
        if self.session_id != 0 {
            body["session_id"] = json!(self.session_id);
        }
        if let Some(id) = handle_id {
            body["handle_id"] = json!(id);
        }

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(
            transaction.clone(),
            PendingEntry {
                tx,
                resolves_on_ack,
            },
        );

        self.outbound
            .send(WsMessage::Text(body.to_string().into()))
            .context("signaling writer task is gone")?;

        let response = rx.await.map_err(|_| SignalingError::TransactionDropped)?;
        if response.get("janus").and_then(Value::as_str) == Some("error") {
            bail!(
                "janus error: {}",
                response["error"]["reason"]
                    .as_str()
                    .unwrap_or("unknown error")
            );
        }
        Ok(response)
    }

    /// Issues a keep-alive. Must be called no tighter than every 5 seconds.
    /// Failure here is fatal: the caller should treat it as the session
    /// being gone and abort the process.
    pub async fn keep_alive(&self) -> Result<()> {
        self.call(json!({"janus": "keepalive"}), None, true)
            .await
            .map_err(SignalingError::KeepAliveFailed)?;
        Ok(())
    }

    /// Composes `session.destroy` then transport close. Both errors are
    /// reported but neither aborts the other.
    pub async fn close(&self) -> Result<()> {
        let mut errors = crate::errors::MultiError::new();
        errors.push(
            self.call(json!({"janus": "destroy"}), None, true)
                .await
                .map(|_| ()),
        );
        self.outbound
            .send(WsMessage::Close(None))
            .context("signaling writer task already gone")
            .ok();
        errors.into_result()
    }

    pub async fn attach_video_room_handle(self: &Arc<Self>) -> Result<Handle> {
        let response = self
            .call(json!({"janus": "attach", "plugin": VIDEOROOM_PLUGIN}), None, true)
            .await?;
        let handle_id = response["data"]["id"]
            .as_u64()
            .context("attach response missing data.id")?;

        let (event_tx, event_rx) = mpsc::channel(64);
        self.handles.lock().await.insert(handle_id, event_tx);

        Ok(Handle {
            client: Arc::clone(self),
            id: handle_id,
            events: Mutex::new(event_rx),
        })
    }

    async fn unregister_handle(&self, handle_id: u64) {
        self.handles.lock().await.remove(&handle_id);
    }
}

async fn route_incoming(
    pending: &Arc<Mutex<HashMap<String, PendingEntry>>>,
    handles: &Arc<Mutex<HashMap<u64, mpsc::Sender<Value>>>>,
    value: Value,
) {
    let transaction = value.get("transaction").and_then(Value::as_str).map(str::to_owned);
    let janus_type = value.get("janus").and_then(Value::as_str).unwrap_or("");

    if janus_type == "ack" {
        if let Some(t) = &transaction {
            let mut guard = pending.lock().await;
            let resolve_now = guard.get(t).is_some_and(|e| e.resolves_on_ack);
            if resolve_now {
                if let Some(entry) = guard.remove(t) {
                    let _ = entry.tx.send(value);
                }
            } else {
                trace!(transaction = %t, "ignoring preliminary ack, awaiting follow-up");
            }
        }
        return;
    }

    if matches!(janus_type, "success" | "error" | "event") {
        if let Some(t) = &transaction {
            if let Some(entry) = pending.lock().await.remove(t) {
                let _ = entry.tx.send(value);
                return;
            }
        }
    }

    // Unsolicited: dispatch to the owning handle's event stream, if any.
    let sender_id = value.get("sender").and_then(Value::as_u64);
    if let Some(id) = sender_id {
        let guard = handles.lock().await;
        if let Some(tx) = guard.get(&id) {
            let _ = tx.try_send(value);
            return;
        }
    }
    trace!(?janus_type, "dropping unroutable signaling frame");
}

/// An attachment of the shared session to the video-room plugin.
pub struct Handle {
    client: Arc<SignalingClient>,
    id: u64,
    events: Mutex<mpsc::Receiver<Value>>,
}

impl Handle {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Synchronous request with asynchronous acknowledgement: sends `body`
    /// (with optional JSEP) and waits for the plugin's event.
    pub async fn message(&self, body: Value, jsep: Option<Value>) -> Result<PluginEvent> {
        let mut envelope = json!({"janus": "message", "body": body});
        if let Some(j) = jsep {
            envelope["jsep"] = j;
        }
        let response = self.client.call(envelope, Some(self.id), false).await?;
        match classify(&response) {
            HandleEvent::Plugin(event) => Ok(event),
            _ => bail!("expected a plugin event in response to message(), got {response}"),
        }
    }

    /// Synchronous data request (e.g. `list`, `listparticipants`), answered
    /// directly by the plugin without an intervening async event.
    pub async fn request(&self, body: Value) -> Result<Value> {
        let envelope = json!({"janus": "message", "body": body});
        let response = self.client.call(envelope, Some(self.id), false).await?;
        let plugindata = response
            .get("plugindata")
            .and_then(|d| d.get("data"))
            .cloned();
        match plugindata {
            Some(data) => Ok(data),
            None => match classify(&response) {
                HandleEvent::Plugin(event) => Ok(event.plugindata),
                _ => bail!("expected plugin data in response to request(), got {response}"),
            },
        }
    }

    /// Receives the next unsolicited handle event (lifecycle notices and
    /// plugin pushes not tied to an in-flight `message`/`request` call).
    /// Returns `None` once the client has torn the handle down.
    pub async fn next_event(&self) -> Option<HandleEvent> {
        let raw = self.events.lock().await.recv().await?;
        Some(classify(&raw))
    }

    pub async fn detach(&self) -> Result<()> {
        self.client.unregister_handle(self.id).await;
        self.client
            .call(json!({"janus": "detach"}), Some(self.id), true)
            .await
            .map(|_| ())
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        self.reader_task.abort();
        self.writer_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_recognizes_log_only_kinds() {
        assert!(matches!(
            classify(&json!({"janus": "slowlink"})),
            HandleEvent::SlowLink
        ));
        assert!(matches!(classify(&json!({"janus": "media"})), HandleEvent::Media));
        assert!(matches!(
            classify(&json!({"janus": "webrtcup"})),
            HandleEvent::WebRtcUp
        ));
        assert!(matches!(classify(&json!({"janus": "hangup"})), HandleEvent::Hangup));
    }

    #[test]
    fn classify_extracts_plugin_event_payload() {
        let raw = json!({
            "janus": "event",
            "sender": 42,
            "plugindata": {"plugin": "janus.plugin.videoroom", "data": {"videoroom": "updated"}},
            "jsep": {"type": "offer", "sdp": "v=0"},
        });
        match classify(&raw) {
            HandleEvent::Plugin(event) => {
                assert_eq!(event.sender, 42);
                assert_eq!(event.plugindata["videoroom"], "updated");
                assert_eq!(event.jsep.unwrap()["type"], "offer");
            }
            other => panic!("expected plugin event, got {other:?}"),
        }
    }

    #[test]
    fn classify_drops_unknown_kinds() {
        assert!(matches!(classify(&json!({"janus": "timeout"})), HandleEvent::Other));
    }
}
