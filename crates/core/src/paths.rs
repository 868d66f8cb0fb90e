use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Paths {
    pub fn new() -> Self {
        let base = dirs::home_dir()
            .map(|h| h.join(".pagelens"))
            .unwrap_or_else(|| PathBuf::from(".pagelens"));
        Self { base }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    pub fn screenshots_dir(&self) -> PathBuf {
        self.base.join("screenshots")
    }

    /// Throwaway browser profile directory for one session.
    pub fn temp_profile_dir(&self, session_id: &str) -> PathBuf {
        std::env::temp_dir().join(format!("pagelens-profile-{}", session_id))
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}
