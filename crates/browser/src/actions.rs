//! Reference-addressed actions against the live page.
//!
//! The resolver owns the handle map minted with the current outline and
//! turns `click e5`-style requests into CDP input dispatches. The map is
//! replaced wholesale whenever a new outline is taken; refs never survive
//! that replacement.

use pagelens_core::{Error, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

use crate::cdp::{CdpClient, KeySpec};
use crate::outline::HandleMap;
use crate::session::BrowserEvent;

/// Pause after scrollIntoView before measuring the box model.
const SCROLL_SETTLE: Duration = Duration::from_millis(200);
/// Pause between pointing at an element and pressing it.
const PRE_CLICK_SETTLE: Duration = Duration::from_millis(50);
/// Pause after a click or page scroll for the page to react.
const POST_CLICK_SETTLE: Duration = Duration::from_millis(500);
/// Pause after focusing an input before typing into it.
const FOCUS_SETTLE: Duration = Duration::from_millis(100);

const SELECTOR_POLL: Duration = Duration::from_millis(200);
pub const DEFAULT_SELECTOR_TIMEOUT_MS: u64 = 5000;

pub struct ActionResolver {
    cdp: Arc<CdpClient>,
    handles: HandleMap,
    events: broadcast::Sender<BrowserEvent>,
}

impl ActionResolver {
    pub fn new(cdp: Arc<CdpClient>, events: broadcast::Sender<BrowserEvent>) -> Self {
        Self {
            cdp,
            handles: HandleMap::new(),
            events,
        }
    }

    /// Swap in the handle map of a freshly taken outline. The old map is
    /// gone in the same assignment; there is no window where both are
    /// visible.
    pub fn replace_handles(&mut self, handles: HandleMap) {
        self.handles = handles;
    }

    pub fn known_refs(&self) -> Vec<String> {
        self.handles.keys().cloned().collect()
    }

    fn resolve(&self, reference: &str) -> Result<i64> {
        lookup(&self.handles, reference)
    }

    fn emit(&self, action: Value) {
        let _ = self.events.send(BrowserEvent::Action(action));
    }

    /// Scroll the element to center and return the geometric center of its
    /// content quad, falling back to a bounding-rect query when the
    /// browser has no box model for the node.
    async fn center_of(&self, reference: &str) -> Result<(f64, f64, i64, String)> {
        let backend = self.resolve(reference)?;
        let object_id = self.cdp.resolve_backend_node(backend).await?;
        self.cdp
            .call_function_on(
                &object_id,
                "function() { this.scrollIntoView({block: 'center', inline: 'center'}); }",
                vec![],
            )
            .await?;
        tokio::time::sleep(SCROLL_SETTLE).await;

        if let Some(quad) = self.cdp.get_content_quad(backend).await? {
            let (x, y) = quad_center(&quad);
            return Ok((x, y, backend, object_id));
        }

        debug!(reference = reference, "no box model, using bounding rect");
        let rect = self
            .cdp
            .call_function_on(
                &object_id,
                "function() { const r = this.getBoundingClientRect(); \
                 return { x: r.left + r.width / 2, y: r.top + r.height / 2 }; }",
                vec![],
            )
            .await?;
        let value = rect.get("value").cloned().unwrap_or(Value::Null);
        let x = value.get("x").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let y = value.get("y").and_then(|v| v.as_f64()).unwrap_or(0.0);
        Ok((x, y, backend, object_id))
    }

    pub async fn click(&self, reference: &str) -> Result<String> {
        let (x, y, _, _) = self.center_of(reference).await?;
        tokio::time::sleep(PRE_CLICK_SETTLE).await;
        self.cdp.dispatch_mouse_event("mouseMoved", x, y, "none", 0).await?;
        self.cdp.dispatch_mouse_event("mousePressed", x, y, "left", 1).await?;
        self.cdp.dispatch_mouse_event("mouseReleased", x, y, "left", 1).await?;
        self.emit(json!({"type": "click", "ref": reference, "x": x, "y": y}));
        tokio::time::sleep(POST_CLICK_SETTLE).await;
        Ok(format!("Clicked at ({}, {})", x.round(), y.round()))
    }

    pub async fn hover(&self, reference: &str) -> Result<String> {
        let (x, y, _, _) = self.center_of(reference).await?;
        self.cdp.dispatch_mouse_event("mouseMoved", x, y, "none", 0).await?;
        self.emit(json!({"type": "hover", "ref": reference, "x": x, "y": y}));
        Ok(format!("Hovered at ({}, {})", x.round(), y.round()))
    }

    /// Focus, clear by direct assignment plus an input event, then type
    /// the text character by character so framework listeners fire.
    pub async fn fill(&self, reference: &str, text: &str) -> Result<String> {
        let (_, _, _, object_id) = self.center_of(reference).await?;
        self.cdp
            .call_function_on(&object_id, "function() { this.focus(); }", vec![])
            .await?;
        tokio::time::sleep(FOCUS_SETTLE).await;
        self.cdp
            .call_function_on(
                &object_id,
                "function() { this.value = ''; \
                 this.dispatchEvent(new Event('input', { bubbles: true })); }",
                vec![],
            )
            .await?;
        for ch in text.chars() {
            self.cdp.dispatch_key(&KeySpec::printable(ch)).await?;
        }
        self.emit(json!({"type": "fill", "ref": reference, "text": text}));
        Ok(format!("Filled {} with \"{}\"", reference, text))
    }

    /// Select an option by exact value or trimmed visible text.
    pub async fn select_option(&self, reference: &str, value: &str) -> Result<String> {
        let backend = self.resolve(reference)?;
        let object_id = self.cdp.resolve_backend_node(backend).await?;
        let result = self
            .cdp
            .call_function_on(
                &object_id,
                "function(wanted) { \
                 const options = Array.from(this.options || []); \
                 const hit = options.find(o => o.value === wanted || o.textContent.trim() === wanted); \
                 if (!hit) { return { ok: false, labels: options.map(o => o.textContent.trim()) }; } \
                 this.value = hit.value; \
                 this.dispatchEvent(new Event('change', { bubbles: true })); \
                 return { ok: true, label: hit.textContent.trim() }; }",
                vec![json!(value)],
            )
            .await?;
        let payload = result.get("value").cloned().unwrap_or(Value::Null);
        let ok = payload.get("ok").and_then(|v| v.as_bool()).unwrap_or(false);
        if !ok {
            let labels: Vec<String> = payload
                .get("labels")
                .and_then(|v| v.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|v| v.as_str())
                        .map(|s| s.to_string())
                        .collect()
                })
                .unwrap_or_default();
            return Err(Error::option_not_found(value, labels));
        }
        let label = payload
            .get("label")
            .and_then(|v| v.as_str())
            .unwrap_or(value);
        self.emit(json!({"type": "select_option", "ref": reference, "value": value}));
        Ok(format!("Selected \"{}\" in {}", label, reference))
    }

    pub async fn press_key(&self, key: &str) -> Result<String> {
        let key_spec = KeySpec::named(key)
            .ok_or_else(|| Error::Tool(format!("Unsupported key: {}", key)))?;
        self.cdp.dispatch_key(&key_spec).await?;
        self.emit(json!({"type": "press_key", "text": key}));
        Ok(format!("Pressed {}", key))
    }

    /// Wheel-scroll the viewport around its center.
    pub async fn scroll(&self, direction: &str, viewport: (f64, f64)) -> Result<String> {
        let delta = match direction {
            "up" => -600.0,
            _ => 600.0,
        };
        let (x, y) = (viewport.0 / 2.0, viewport.1 / 2.0);
        self.cdp.dispatch_mouse_wheel(x, y, delta).await?;
        self.emit(json!({"type": "scroll", "x": x, "y": y, "value": delta}));
        tokio::time::sleep(POST_CLICK_SETTLE).await;
        Ok(format!("Scrolled {}", if delta < 0.0 { "up" } else { "down" }))
    }

    pub async fn extract_text(&self) -> Result<String> {
        let result = self
            .cdp
            .evaluate("document.body ? document.body.innerText : ''")
            .await?;
        Ok(result
            .get("value")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string())
    }

    /// Poll for a selector until it appears or the timeout elapses.
    pub async fn wait_for_selector(&self, selector: &str, timeout_ms: Option<u64>) -> Result<String> {
        let timeout = Duration::from_millis(timeout_ms.unwrap_or(DEFAULT_SELECTOR_TIMEOUT_MS));
        let started = tokio::time::Instant::now();
        let escaped = selector.replace('\\', "\\\\").replace('\'', "\\'");
        let expression = format!("document.querySelector('{}') !== null", escaped);
        loop {
            let found = self
                .cdp
                .evaluate(&expression)
                .await?
                .get("value")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            if found {
                return Ok(format!("Selector {} appeared", selector));
            }
            if started.elapsed() >= timeout {
                return Err(Error::Timeout(format!(
                    "selector {} not found after {}ms",
                    selector,
                    timeout.as_millis()
                )));
            }
            tokio::time::sleep(SELECTOR_POLL).await;
        }
    }
}

/// Look a ref up in a handle map, naming live refs on a miss.
fn lookup(handles: &HandleMap, reference: &str) -> Result<i64> {
    handles
        .get(reference)
        .copied()
        .ok_or_else(|| Error::unknown_ref(reference, handles.keys().cloned().collect()))
}

/// Center of a content quad `[x1,y1, x2,y2, x3,y3, x4,y4]`.
pub fn quad_center(quad: &[f64]) -> (f64, f64) {
    let xs = (quad[0] + quad[2] + quad[4] + quad[6]) / 4.0;
    let ys = (quad[1] + quad[3] + quad[5] + quad[7]) / 4.0;
    (xs, ys)
}
