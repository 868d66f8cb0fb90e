pub mod config;
pub mod error;
pub mod paths;
pub mod types;

pub use config::{AgentConfig, BrowserConfig, Config, ProviderConfig, SnapshotConfig};
pub use error::{Error, Result};
pub use paths::Paths;
pub use types::{BrowseOutcome, ChatMessage, LLMResponse, StepEntry, ToolCallRequest, Usage};
