//! One browser session: the subprocess, its CDP socket, the current
//! outline and handle map, and the temp profile directory. All three
//! resources are acquired in `launch` and released unconditionally in
//! `close`, including on error paths.

use pagelens_core::{BrowserConfig, Config, Error, Result};
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::{Child, Command};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::actions::ActionResolver;
use crate::cdp::CdpClient;
use crate::outline::{parse_ax_nodes, HandleMap, OutlineBuilder, RoleTables};
use crate::reduce::{self, ReduceOptions};

/// Debugger-ready probe: 30 tries, 200 ms apart.
const READY_TRIES: u32 = 30;
const READY_POLL_MS: u64 = 200;

/// What a session broadcasts while it runs.
#[derive(Debug, Clone)]
pub enum BrowserEvent {
    Launch,
    Navigate(String),
    Action(Value),
    Snapshot(String),
    Close,
    Error(String),
}

pub struct Session {
    cdp: Arc<CdpClient>,
    process: Child,
    resolver: ActionResolver,
    tables: RoleTables,
    reduce_opts: ReduceOptions,
    outline: String,
    url: String,
    events: broadcast::Sender<BrowserEvent>,
    profile_dir: Option<PathBuf>,
    viewport: (f64, f64),
    closed: bool,
}

impl Session {
    /// Launch the browser, wait for its debugger, connect to the first
    /// page target and enable the protocol domains.
    pub async fn launch(config: &Config) -> Result<Session> {
        let binary = match &config.browser.binary {
            Some(path) => path.clone(),
            None => find_browser_binary()
                .ok_or_else(|| Error::Launch("no Chrome/Chromium binary found".to_string()))?,
        };

        let port = config
            .browser
            .debug_port
            .unwrap_or_else(|| 9222 + rand::random::<u16>() % 999);

        let profile_dir = if config.browser.temp_profile {
            let dir = pagelens_core::Paths::new()
                .temp_profile_dir(&uuid::Uuid::new_v4().to_string());
            std::fs::create_dir_all(&dir)?;
            Some(dir)
        } else {
            None
        };

        let args = build_browser_args(&config.browser, port, profile_dir.as_deref());

        info!(binary = %binary, port = port, "launching browser");
        let process = Command::new(&binary)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Launch(format!("{}: {}", binary, e)))?;

        let ws_url = wait_for_page_target(port).await?;
        let cdp = Arc::new(CdpClient::connect(&ws_url).await?);

        for domain in ["Page", "Runtime", "DOM", "Accessibility"] {
            cdp.enable_domain(domain).await?;
        }

        let (events, _) = broadcast::channel(64);
        let _ = events.send(BrowserEvent::Launch);

        let tables = RoleTables::new(&config.snapshot);
        let reduce_opts = ReduceOptions {
            max_items: config.snapshot.max_items,
            max_name_len: config.snapshot.max_name_len,
            viewport_refs: None,
            interactive_only: false,
        };

        Ok(Session {
            resolver: ActionResolver::new(cdp.clone(), events.clone()),
            cdp,
            process,
            tables,
            reduce_opts,
            outline: String::new(),
            url: "about:blank".to_string(),
            events,
            profile_dir,
            viewport: (
                config.browser.window_width as f64,
                config.browser.window_height as f64,
            ),
            closed: false,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BrowserEvent> {
        self.events.subscribe()
    }

    pub fn outline(&self) -> &str {
        &self.outline
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn tables(&self) -> &RoleTables {
        &self.tables
    }

    pub async fn navigate(&mut self, url: &str) -> Result<String> {
        self.cdp.navigate(url).await?;
        self.url = url.to_string();
        let _ = self.events.send(BrowserEvent::Navigate(url.to_string()));
        Ok(format!("Navigated to {}", url))
    }

    /// Take a fresh outline through the reducer pipeline and atomically
    /// replace the handle map with the refs that survived reduction.
    pub async fn take_outline(&mut self) -> Result<String> {
        self.refresh_url().await;
        let tree = self.cdp.get_full_ax_tree().await?;
        let nodes = parse_ax_nodes(&tree);
        let snapshot = OutlineBuilder::new(&self.tables).build(&nodes);
        let reduced = reduce::optimize(&snapshot.outline, &self.tables, &self.reduce_opts);
        self.resolver
            .replace_handles(filter_handles(snapshot.handles, &reduced));
        self.outline = reduced.clone();
        let _ = self.events.send(BrowserEvent::Snapshot(reduced.clone()));
        Ok(reduced)
    }

    /// The raw-to-tagged variant: refs assigned, no reducer pipeline.
    pub async fn take_baseline_outline(&mut self) -> Result<String> {
        self.refresh_url().await;
        let tree = self.cdp.get_full_ax_tree().await?;
        let nodes = parse_ax_nodes(&tree);
        let snapshot = OutlineBuilder::new(&self.tables).build(&nodes);
        let baseline = reduce::baseline(&snapshot.outline);
        self.resolver
            .replace_handles(filter_handles(snapshot.handles, &baseline));
        self.outline = baseline.clone();
        let _ = self.events.send(BrowserEvent::Snapshot(baseline.clone()));
        Ok(baseline)
    }

    async fn refresh_url(&mut self) {
        if let Ok(value) = self.cdp.evaluate("location.href").await {
            if let Some(url) = value.get("value").and_then(|v| v.as_str()) {
                self.url = url.to_string();
            }
        }
    }

    pub async fn screenshot(&self) -> Result<String> {
        self.cdp.capture_screenshot().await
    }

    // Reference-addressed actions, delegated to the resolver.

    pub async fn click(&self, reference: &str) -> Result<String> {
        self.resolver.click(reference).await
    }

    pub async fn fill(&self, reference: &str, text: &str) -> Result<String> {
        self.resolver.fill(reference, text).await
    }

    pub async fn hover(&self, reference: &str) -> Result<String> {
        self.resolver.hover(reference).await
    }

    pub async fn select_option(&self, reference: &str, value: &str) -> Result<String> {
        self.resolver.select_option(reference, value).await
    }

    pub async fn press_key(&self, key: &str) -> Result<String> {
        self.resolver.press_key(key).await
    }

    pub async fn scroll(&self, direction: &str) -> Result<String> {
        self.resolver.scroll(direction, self.viewport).await
    }

    pub async fn extract_text(&self) -> Result<String> {
        self.resolver.extract_text().await
    }

    pub async fn wait_for_selector(&self, selector: &str, timeout_ms: Option<u64>) -> Result<String> {
        self.resolver.wait_for_selector(selector, timeout_ms).await
    }

    /// Broadcast a terminal error to subscribers before teardown.
    pub fn emit_error(&self, message: &str) {
        let _ = self.events.send(BrowserEvent::Error(message.to_string()));
    }

    /// Release the subprocess, the socket and the profile directory.
    /// Safe to call more than once.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.events.send(BrowserEvent::Close);
        if let Err(e) = self.cdp.send_command("Browser.close", serde_json::json!({})).await {
            debug!("Browser.close failed (may already be gone): {}", e);
        }
        let _ = self.process.kill().await;
        if let Some(dir) = self.profile_dir.take() {
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                warn!(dir = %dir.display(), "failed to remove temp profile: {}", e);
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.process.start_kill();
        if let Some(dir) = self.profile_dir.take() {
            let _ = std::fs::remove_dir_all(&dir);
        }
    }
}

/// Keep only the handles whose ref still appears in the reduced outline,
/// so the agent's menu and its reachable elements stay equal.
fn filter_handles(handles: HandleMap, outline: &str) -> HandleMap {
    handles
        .into_iter()
        .filter(|(reference, _)| outline.contains(&format!("[ref={}]", reference)))
        .collect()
}

fn build_browser_args(
    config: &BrowserConfig,
    port: u16,
    profile_dir: Option<&std::path::Path>,
) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", port),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-background-timer-throttling".to_string(),
        "--disable-backgrounding-occluded-windows".to_string(),
        "--disable-renderer-backgrounding".to_string(),
        format!("--window-size={},{}", config.window_width, config.window_height),
    ];
    if config.headless {
        args.push("--headless=new".to_string());
    }
    if let Some(dir) = profile_dir {
        args.push(format!("--user-data-dir={}", dir.display()));
    }
    args.push("about:blank".to_string());
    args
}

/// Probe `GET /json` until the first page target shows up, then hand back
/// its WebSocket debugger URL.
async fn wait_for_page_target(port: u16) -> Result<String> {
    let url = format!("http://127.0.0.1:{}/json", port);
    for _ in 0..READY_TRIES {
        if let Ok(resp) = reqwest::get(&url).await {
            if let Ok(targets) = resp.json::<Vec<Value>>().await {
                for target in &targets {
                    if target.get("type").and_then(|v| v.as_str()) == Some("page") {
                        if let Some(ws_url) =
                            target.get("webSocketDebuggerUrl").and_then(|v| v.as_str())
                        {
                            return Ok(ws_url.to_string());
                        }
                    }
                }
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(READY_POLL_MS)).await;
    }
    Err(Error::Launch(format!(
        "debugger not ready on port {} after {}ms",
        port,
        READY_TRIES as u64 * READY_POLL_MS
    )))
}

/// Probe well-known Chrome/Chromium locations, then $PATH.
pub fn find_browser_binary() -> Option<String> {
    let candidates: Vec<&str> = if cfg!(target_os = "macos") {
        vec![
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ]
    } else if cfg!(target_os = "linux") {
        vec![
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium",
        ]
    } else {
        vec![
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    };

    for candidate in candidates {
        if std::path::Path::new(candidate).exists() {
            return Some(candidate.to_string());
        }
        if !candidate.contains('/') && !candidate.contains('\\') && which::which(candidate).is_ok()
        {
            return Some(candidate.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_args_carry_the_required_flags() {
        let config = BrowserConfig::default();
        let args = build_browser_args(&config, 9300, None);
        assert_eq!(args[0], "--remote-debugging-port=9300");
        assert!(args.contains(&"--no-first-run".to_string()));
        assert!(args.contains(&"--disable-background-timer-throttling".to_string()));
        assert!(args.contains(&"--disable-backgrounding-occluded-windows".to_string()));
        assert!(args.contains(&"--disable-renderer-backgrounding".to_string()));
        assert!(args.contains(&"--window-size=1280,900".to_string()));
        assert!(args.contains(&"--headless=new".to_string()));
        assert_eq!(args.last().unwrap(), "about:blank");
        assert!(!args.iter().any(|a| a.starts_with("--user-data-dir")));
    }

    #[test]
    fn headed_mode_and_profile_dir_are_optional_flags() {
        let config = BrowserConfig {
            headless: false,
            ..Default::default()
        };
        let dir = std::path::PathBuf::from("/tmp/lens-profile");
        let args = build_browser_args(&config, 9300, Some(&dir));
        assert!(!args.contains(&"--headless=new".to_string()));
        assert!(args.contains(&"--user-data-dir=/tmp/lens-profile".to_string()));
    }

    #[test]
    fn filter_handles_drops_refs_reduced_away() {
        let mut handles = HandleMap::new();
        handles.insert("e1".to_string(), 10);
        handles.insert("e2".to_string(), 20);
        handles.insert("e3".to_string(), 30);
        let outline = "- button \"Go\" [ref=e1]\n- text \"... and 2 more listitems (2 refs hidden: e2,e3...)\"\n";
        let filtered = filter_handles(handles, outline);
        assert_eq!(filtered.len(), 1);
        assert!(filtered.contains_key("e1"));
        // Refs named inside a summary line are informational, not handles.
        assert!(!filtered.contains_key("e2"));
    }
}
