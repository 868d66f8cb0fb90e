use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::Result;
use crate::paths::Paths;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserConfig {
    /// Explicit browser binary. When unset, well-known Chrome/Chromium
    /// locations are probed.
    #[serde(default)]
    pub binary: Option<String>,
    #[serde(default = "default_headless")]
    pub headless: bool,
    /// Remote debugging port. When unset, `9222 + rand(0..999)` is used so
    /// parallel sessions do not collide.
    #[serde(default)]
    pub debug_port: Option<u16>,
    #[serde(default = "default_window_width")]
    pub window_width: u32,
    #[serde(default = "default_window_height")]
    pub window_height: u32,
    /// Launch with a throwaway profile directory under the system temp dir,
    /// removed when the session closes.
    #[serde(default)]
    pub temp_profile: bool,
}

fn default_headless() -> bool {
    true
}

fn default_window_width() -> u32 {
    1280
}

fn default_window_height() -> u32 {
    900
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            binary: None,
            headless: default_headless(),
            debug_port: None,
            window_width: default_window_width(),
            window_height: default_window_height(),
            temp_profile: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    /// Completion cap per model call.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Delay after each action before the page is re-snapshotted.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

fn default_model() -> String {
    "anthropic/claude-sonnet-4-20250514".to_string()
}

fn default_max_steps() -> u32 {
    25
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_settle_ms() -> u64 {
    300
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_steps: default_max_steps(),
            max_tokens: default_max_tokens(),
            settle_ms: default_settle_ms(),
        }
    }
}

/// Knobs for the outline reducer pipeline. The role tables live in
/// `pagelens-browser`; the extension maps here are merged on top so new
/// ARIA roles can be wired in from the config file alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotConfig {
    /// Siblings kept per listitem/row/article run before smart truncation.
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    /// Name length limit before word-boundary truncation.
    #[serde(default = "default_max_name_len")]
    pub max_name_len: usize,
    /// Extra raw-role → ARIA-role mappings, merged over the built-in table.
    #[serde(default)]
    pub extra_role_map: HashMap<String, String>,
    /// Extra roles treated as interactive (ref-worthy and click-safe).
    #[serde(default)]
    pub extra_interactive_roles: Vec<String>,
    /// Extra roles filtered from diff added/removed noise.
    #[serde(default)]
    pub extra_noise_roles: Vec<String>,
}

fn default_max_items() -> usize {
    5
}

fn default_max_name_len() -> usize {
    120
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            max_items: default_max_items(),
            max_name_len: default_max_name_len(),
            extra_role_map: HashMap::new(),
            extra_interactive_roles: Vec::new(),
            extra_noise_roles: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub snapshot: SnapshotConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn get_provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }

    /// First provider with a key, in preference order. Used when the model
    /// string does not name one.
    pub fn get_api_key(&self) -> Option<(&str, &ProviderConfig)> {
        let priority = ["anthropic", "openai", "openrouter"];
        for name in priority {
            if let Some(provider) = self.providers.get(name) {
                if !provider.api_key.is_empty() {
                    return Some((name, provider));
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_limits() {
        let cfg = Config::default();
        assert_eq!(cfg.agent.max_steps, 25);
        assert_eq!(cfg.agent.max_tokens, 1024);
        assert_eq!(cfg.snapshot.max_items, 5);
        assert_eq!(cfg.snapshot.max_name_len, 120);
        assert_eq!(cfg.browser.window_width, 1280);
        assert_eq!(cfg.browser.window_height, 900);
    }

    #[test]
    fn partial_config_fills_in_defaults() {
        let raw = r#"{
  "agent": { "maxSteps": 10 },
  "providers": { "openai": { "apiKey": "sk-test" } }
}"#;
        let cfg: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(cfg.agent.max_steps, 10);
        assert_eq!(cfg.agent.max_tokens, 1024);
        let (name, provider) = cfg.get_api_key().unwrap();
        assert_eq!(name, "openai");
        assert_eq!(provider.api_key, "sk-test");
    }
}
