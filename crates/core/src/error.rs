use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Browser launch failed: {0}")]
    Launch(String),

    #[error("CDP transport error: {0}")]
    Transport(String),

    /// The ref is not in the current handle map. The message lists up to
    /// ten live refs so the model can recover without another snapshot.
    #[error("Unknown ref: {reference}{known}")]
    UnknownRef { reference: String, known: String },

    #[error("Option not found: {wanted}{available}")]
    OptionNotFound { wanted: String, available: String },

    #[error("Evaluation error: {0}")]
    Evaluation(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Tool error: {0}")]
    Tool(String),
}

impl Error {
    /// Build an UnknownRef error listing up to ten candidates.
    pub fn unknown_ref(reference: &str, mut candidates: Vec<String>) -> Self {
        candidates.sort_by_key(|r| r.trim_start_matches('e').parse::<u64>().unwrap_or(u64::MAX));
        candidates.truncate(10);
        let known = if candidates.is_empty() {
            String::new()
        } else {
            format!(" (known refs: {})", candidates.join(", "))
        };
        Error::UnknownRef {
            reference: reference.to_string(),
            known,
        }
    }

    /// Build an OptionNotFound error listing up to ten option labels.
    pub fn option_not_found(wanted: &str, mut labels: Vec<String>) -> Self {
        labels.truncate(10);
        let available = if labels.is_empty() {
            String::new()
        } else {
            format!(" (available: {})", labels.join(", "))
        };
        Error::OptionNotFound {
            wanted: wanted.to_string(),
            available,
        }
    }

    /// Whether the agent loop should surface this to the model and keep
    /// going, as opposed to tearing the session down. Only ref misses,
    /// option misses and tool-level failures continue the loop; every
    /// other kind closes the browser and propagates.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::UnknownRef { .. } | Error::OptionNotFound { .. } | Error::Tool(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
