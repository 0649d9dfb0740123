use crate::credentials::ENV_KEY_SOURCES;
use crate::gemini::transport::endpoint_for_model;
use std::env;
use std::path::PathBuf;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_base: String,
    pub model: String,
    pub timeout_secs: u64,
    pub credential_file: PathBuf,
    pub output_dir: PathBuf,
    pub optimize_for_avatar: bool,
    /// Environment variables consulted, in order, when no explicit key is given.
    pub credential_sources: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            credential_file: default_credential_file(),
            output_dir: PathBuf::from("."),
            optimize_for_avatar: true,
            credential_sources: ENV_KEY_SOURCES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        let mut config = Config::default();

        if let Some(base) = non_empty_var("HATGEN_API_BASE") {
            config.api_base = base.trim_end_matches('/').to_string();
        }
        if let Some(model) = non_empty_var("HATGEN_MODEL") {
            config.model = model;
        }
        if let Some(timeout) = non_empty_var("HATGEN_TIMEOUT_SECS").and_then(|s| s.parse().ok()) {
            config.timeout_secs = timeout;
        }
        if let Some(path) = non_empty_var("HATGEN_CREDENTIAL_FILE") {
            config.credential_file = PathBuf::from(path);
        }
        if let Some(dir) = non_empty_var("HATGEN_OUTPUT_DIR") {
            config.output_dir = PathBuf::from(dir);
        }
        if let Some(flag) = non_empty_var("HATGEN_OPTIMIZE") {
            config.optimize_for_avatar = !matches!(flag.as_str(), "false" | "0" | "no" | "off");
        }

        config
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    pub fn with_credential_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.credential_file = path.into();
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_optimize_for_avatar(mut self, enabled: bool) -> Self {
        self.optimize_for_avatar = enabled;
        self
    }

    pub fn with_credential_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.credential_sources = sources.into_iter().map(Into::into).collect();
        self
    }

    /// Endpoint for a single `generateContent` call against the configured model.
    pub fn endpoint(&self) -> String {
        endpoint_for_model(&self.api_base, &self.model)
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn default_credential_file() -> PathBuf {
    let base = non_empty_var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| non_empty_var("HOME").map(|home| PathBuf::from(home).join(".config")))
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("hatgen").join("credentials.json")
}
