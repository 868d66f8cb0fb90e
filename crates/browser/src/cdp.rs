//! Low-level Chrome DevTools Protocol client over a single WebSocket.
//!
//! Connects to one page target and exposes the handful of commands the
//! outline/action layers need. Commands are multiplexed by request id;
//! protocol events from the browser are ignored.

use pagelens_core::{Error, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, warn};

const COMMAND_TIMEOUT_SECS: u64 = 30;

pub struct CdpClient {
    /// Sender to write messages to the WebSocket.
    ws_tx: mpsc::Sender<String>,
    /// Pending command responses, keyed by request ID.
    pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>,
    /// Auto-incrementing command ID.
    next_id: AtomicU64,
    _reader_handle: tokio::task::JoinHandle<()>,
    _writer_handle: tokio::task::JoinHandle<()>,
}

impl CdpClient {
    /// Connect to a page target's WebSocket debugger URL.
    pub async fn connect(ws_url: &str) -> Result<Self> {
        use futures::{SinkExt, StreamExt};
        use tokio_tungstenite::connect_async;
        use tokio_tungstenite::tungstenite::Message;

        let (ws_stream, _) = connect_async(ws_url)
            .await
            .map_err(|e| Error::Transport(format!("connect to {}: {}", ws_url, e)))?;

        let (mut ws_sink, mut ws_stream_read) = ws_stream.split();

        let (ws_tx, mut ws_rx) = mpsc::channel::<String>(256);

        let pending: Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let pending_clone = pending.clone();

        // Writer task: owns the sink, forwards messages from the channel.
        let writer_handle = tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if let Err(e) = ws_sink.send(Message::Text(msg)).await {
                    error!("CDP WebSocket write error: {}", e);
                    break;
                }
            }
        });

        // Reader task: dispatches responses to their oneshot waiters.
        let reader_handle = tokio::spawn(async move {
            while let Some(msg_result) = ws_stream_read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        if let Ok(val) = serde_json::from_str::<Value>(&text) {
                            if let Some(id) = val.get("id").and_then(|v| v.as_u64()) {
                                let mut pending = pending_clone.lock().await;
                                if let Some(tx) = pending.remove(&id) {
                                    let _ = tx.send(val);
                                }
                            } else if let Some(method) = val.get("method").and_then(|v| v.as_str()) {
                                debug!(method = method, "unhandled CDP event");
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("CDP WebSocket closed by server");
                        break;
                    }
                    Err(e) => {
                        warn!("CDP WebSocket read error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        });

        Ok(Self {
            ws_tx,
            pending,
            next_id: AtomicU64::new(1),
            _reader_handle: reader_handle,
            _writer_handle: writer_handle,
        })
    }

    /// Send a CDP command and wait for its response.
    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let msg = json!({
            "id": id,
            "method": method,
            "params": params,
        });

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id, tx);
        }

        self.ws_tx
            .send(msg.to_string())
            .await
            .map_err(|e| Error::Transport(format!("send {}: {}", method, e)))?;

        let timeout =
            tokio::time::timeout(std::time::Duration::from_secs(COMMAND_TIMEOUT_SECS), rx);
        match timeout.await {
            Ok(Ok(response)) => {
                if let Some(protocol_error) = response.get("error") {
                    Err(Error::Transport(format!("{}: {}", method, protocol_error)))
                } else {
                    Ok(response.get("result").cloned().unwrap_or(Value::Null))
                }
            }
            Ok(Err(_)) => Err(Error::Transport("CDP response channel closed".to_string())),
            Err(_) => {
                let mut pending = self.pending.lock().await;
                pending.remove(&id);
                Err(Error::Transport(format!(
                    "{} timed out after {}s",
                    method, COMMAND_TIMEOUT_SECS
                )))
            }
        }
    }

    pub async fn enable_domain(&self, domain: &str) -> Result<()> {
        self.send_command(&format!("{}.enable", domain), json!({}))
            .await?;
        Ok(())
    }

    pub async fn navigate(&self, url: &str) -> Result<Value> {
        self.send_command("Page.navigate", json!({"url": url})).await
    }

    /// Evaluate an expression in the page. Script exceptions surface as
    /// `Error::Evaluation`.
    pub async fn evaluate(&self, expression: &str) -> Result<Value> {
        let result = self
            .send_command(
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;
        if let Some(exc) = result.get("exceptionDetails") {
            let text = exc
                .get("exception")
                .and_then(|e| e.get("description"))
                .and_then(|v| v.as_str())
                .unwrap_or("script threw");
            return Err(Error::Evaluation(text.to_string()));
        }
        Ok(result.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Call a function with `this` bound to a remote object.
    pub async fn call_function_on(
        &self,
        object_id: &str,
        function_declaration: &str,
        arguments: Vec<Value>,
    ) -> Result<Value> {
        let args: Vec<Value> = arguments.into_iter().map(|v| json!({"value": v})).collect();
        let result = self
            .send_command(
                "Runtime.callFunctionOn",
                json!({
                    "objectId": object_id,
                    "functionDeclaration": function_declaration,
                    "arguments": args,
                    "returnByValue": true,
                }),
            )
            .await?;
        if let Some(exc) = result.get("exceptionDetails") {
            let text = exc
                .get("exception")
                .and_then(|e| e.get("description"))
                .and_then(|v| v.as_str())
                .unwrap_or("script threw");
            return Err(Error::Evaluation(text.to_string()));
        }
        Ok(result.get("result").cloned().unwrap_or(Value::Null))
    }

    /// Resolve a backend DOM node to a remote object id.
    pub async fn resolve_backend_node(&self, backend_node_id: i64) -> Result<String> {
        let result = self
            .send_command(
                "DOM.resolveNode",
                json!({"backendNodeId": backend_node_id}),
            )
            .await?;
        result
            .get("object")
            .and_then(|o| o.get("objectId"))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Transport("DOM.resolveNode returned no objectId".to_string()))
    }

    /// Content quad of a node's box model: `[x1,y1, x2,y2, x3,y3, x4,y4]`.
    /// Returns `None` when the browser has no box for the node (detached,
    /// display:none), letting callers fall back to a script measurement.
    pub async fn get_content_quad(&self, backend_node_id: i64) -> Result<Option<Vec<f64>>> {
        let result = self
            .send_command(
                "DOM.getBoxModel",
                json!({"backendNodeId": backend_node_id}),
            )
            .await;
        let result = match result {
            Ok(v) => v,
            // getBoxModel reports "Could not compute box model" as a
            // protocol error rather than an empty result.
            Err(Error::Transport(msg)) if msg.contains("box model") => return Ok(None),
            Err(e) => return Err(e),
        };
        let quad = result
            .get("model")
            .and_then(|m| m.get("content"))
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_f64()).collect::<Vec<f64>>());
        Ok(quad.filter(|q| q.len() == 8))
    }

    /// Full accessibility tree of the page.
    pub async fn get_full_ax_tree(&self) -> Result<Value> {
        self.send_command("Accessibility.getFullAXTree", json!({}))
            .await
    }

    /// PNG screenshot, base64-encoded.
    pub async fn capture_screenshot(&self) -> Result<String> {
        let result = self
            .send_command("Page.captureScreenshot", json!({"format": "png"}))
            .await?;
        result
            .get("data")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| Error::Transport("no screenshot data returned".to_string()))
    }

    pub async fn dispatch_mouse_event(
        &self,
        event_type: &str,
        x: f64,
        y: f64,
        button: &str,
        click_count: i32,
    ) -> Result<()> {
        self.send_command(
            "Input.dispatchMouseEvent",
            json!({
                "type": event_type,
                "x": x,
                "y": y,
                "button": button,
                "clickCount": click_count,
            }),
        )
        .await?;
        Ok(())
    }

    pub async fn dispatch_mouse_wheel(&self, x: f64, y: f64, delta_y: f64) -> Result<()> {
        self.send_command(
            "Input.dispatchMouseEvent",
            json!({
                "type": "mouseWheel",
                "x": x,
                "y": y,
                "deltaX": 0,
                "deltaY": delta_y,
            }),
        )
        .await?;
        Ok(())
    }

    /// keyDown followed by keyUp for one key.
    pub async fn dispatch_key(&self, key: &KeySpec) -> Result<()> {
        for event_type in ["keyDown", "keyUp"] {
            let mut params = json!({
                "type": event_type,
                "key": key.key,
                "code": key.code,
                "windowsVirtualKeyCode": key.windows_virtual_key_code,
            });
            if event_type == "keyDown" {
                if let Some(text) = &key.text {
                    params["text"] = json!(text);
                }
            }
            self.send_command("Input.dispatchKeyEvent", params).await?;
        }
        Ok(())
    }
}

impl Drop for CdpClient {
    fn drop(&mut self) {
        self._reader_handle.abort();
        self._writer_handle.abort();
    }
}

/// One key press as the Input domain wants it.
#[derive(Debug, Clone)]
pub struct KeySpec {
    pub key: String,
    pub code: String,
    pub windows_virtual_key_code: i32,
    pub text: Option<String>,
}

impl KeySpec {
    /// The named keys the tool schema exposes.
    pub fn named(name: &str) -> Option<Self> {
        let (key, code, vk, text) = match name {
            "Enter" => ("Enter", "Enter", 13, Some("\r")),
            "Tab" => ("Tab", "Tab", 9, None),
            "Escape" => ("Escape", "Escape", 27, None),
            "Backspace" => ("Backspace", "Backspace", 8, None),
            _ => return None,
        };
        Some(Self {
            key: key.to_string(),
            code: code.to_string(),
            windows_virtual_key_code: vk,
            text: text.map(|s| s.to_string()),
        })
    }

    /// A printable character, as fill types it one at a time.
    pub fn printable(ch: char) -> Self {
        Self {
            key: ch.to_string(),
            code: format!("Key{}", ch.to_ascii_uppercase()),
            windows_virtual_key_code: ch.to_ascii_uppercase() as i32,
            text: Some(ch.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_keys_cover_the_schema_enum() {
        for (name, vk) in [("Enter", 13), ("Tab", 9), ("Escape", 27), ("Backspace", 8)] {
            let key = KeySpec::named(name).unwrap();
            assert_eq!(key.windows_virtual_key_code, vk);
        }
        assert!(KeySpec::named("F13").is_none());
    }

    #[test]
    fn enter_carries_carriage_return_text() {
        assert_eq!(KeySpec::named("Enter").unwrap().text.as_deref(), Some("\r"));
        assert_eq!(KeySpec::named("Tab").unwrap().text, None);
    }

    #[test]
    fn printable_keys_carry_their_char() {
        let key = KeySpec::printable('a');
        assert_eq!(key.text.as_deref(), Some("a"));
        assert_eq!(key.code, "KeyA");
    }
}
