use crate::error::{HatError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Environment variables that may carry the API key, highest priority first.
pub const ENV_KEY_SOURCES: &[&str] = &["API_KEY", "VITE_API_KEY", "REACT_APP_API_KEY"];

/// Where a resolved key came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    Explicit,
    Env(String),
    None,
}

#[derive(Debug, Clone)]
pub struct CredentialResolver {
    sources: Vec<String>,
}

impl Default for CredentialResolver {
    fn default() -> Self {
        Self::new(ENV_KEY_SOURCES.iter().map(|s| s.to_string()).collect())
    }
}

impl CredentialResolver {
    pub fn new(sources: Vec<String>) -> Self {
        Self { sources }
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    /// Resolves against the live process environment.
    pub fn resolve(&self, explicit_key: &str) -> String {
        self.resolve_with(explicit_key, |name| std::env::var(name).ok())
    }

    /// Resolves against an injected environment lookup. An empty string means no key.
    pub fn resolve_with<F>(&self, explicit_key: &str, lookup: F) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        self.resolve_source_with(explicit_key, lookup).0
    }

    pub fn resolve_source_with<F>(&self, explicit_key: &str, lookup: F) -> (String, KeySource)
    where
        F: Fn(&str) -> Option<String>,
    {
        let explicit = explicit_key.trim();
        if !explicit.is_empty() {
            return (explicit.to_string(), KeySource::Explicit);
        }

        self.sources
            .iter()
            .find_map(|name| {
                lookup(name)
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty())
                    .map(|value| (value, KeySource::Env(name.clone())))
            })
            .unwrap_or_else(|| (String::new(), KeySource::None))
    }
}

/// Shows only enough of a key to recognize it in logs.
pub fn mask_key(key: &str) -> String {
    let prefix: String = key.chars().take(4).collect();
    if key.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("{}****", prefix)
    }
}

/// The single persisted credential value. Last write wins; writing an empty
/// value removes it.
pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<Option<String>>;
    fn save(&self, key: &str) -> Result<()>;

    fn clear(&self) -> Result<()> {
        self.save("")
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CredentialFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    gemini_api_key: Option<String>,
}

/// JSON file holding `{"gemini_api_key": "..."}`.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_file(&self) -> Result<CredentialFile> {
        match fs::read_to_string(&self.path) {
            Ok(contents) if contents.trim().is_empty() => Ok(CredentialFile::default()),
            Ok(contents) => serde_json::from_str(&contents).map_err(|e| {
                HatError::Config(format!(
                    "credential file {} is corrupt: {}",
                    self.path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(CredentialFile::default()),
            Err(e) => Err(e.into()),
        }
    }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<String>> {
        Ok(self
            .read_file()?
            .gemini_api_key
            .filter(|key| !key.trim().is_empty()))
    }

    fn save(&self, key: &str) -> Result<()> {
        let key = key.trim();
        if key.is_empty() {
            if self.path.exists() {
                fs::remove_file(&self.path)?;
                log::info!("Removed stored credential at {}", self.path.display());
            }
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let contents = serde_json::to_string_pretty(&CredentialFile {
            gemini_api_key: Some(key.to_string()),
        })
        .map_err(|e| HatError::Config(e.to_string()))?;
        fs::write(&self.path, contents)?;
        log::info!(
            "Stored credential {} at {}",
            mask_key(key),
            self.path.display()
        );
        Ok(())
    }
}

/// Process-local store, for embedding and tests.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    value: Mutex<Option<String>>,
}

impl MemoryCredentialStore {
    pub fn new(initial: Option<&str>) -> Self {
        Self {
            value: Mutex::new(initial.map(str::to_string)),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<String>> {
        let value = self
            .value
            .lock()
            .map_err(|_| HatError::Config("credential store lock poisoned".into()))?;
        Ok(value.clone().filter(|key| !key.trim().is_empty()))
    }

    fn save(&self, key: &str) -> Result<()> {
        let mut value = self
            .value
            .lock()
            .map_err(|_| HatError::Config("credential store lock poisoned".into()))?;
        let key = key.trim();
        *value = (!key.is_empty()).then(|| key.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn explicit_key_wins_over_environment() {
        let resolver = CredentialResolver::default();
        assert_eq!(resolver.resolve_with("abc", env_of(&[("API_KEY", "env1")])), "abc");
    }

    #[test]
    fn empty_explicit_key_falls_back_to_environment() {
        let resolver = CredentialResolver::default();
        assert_eq!(resolver.resolve_with("", env_of(&[("API_KEY", "env1")])), "env1");
        assert_eq!(
            resolver.resolve_with("   ", env_of(&[("API_KEY", "env1")])),
            "env1"
        );
    }

    #[test]
    fn nothing_configured_resolves_empty() {
        let resolver = CredentialResolver::default();
        assert_eq!(resolver.resolve_with("", env_of(&[])), "");
        assert_eq!(
            resolver.resolve_source_with("", env_of(&[("API_KEY", "  ")])),
            (String::new(), KeySource::None)
        );
    }

    #[test]
    fn sources_are_checked_in_order() {
        let resolver = CredentialResolver::default();
        let env = env_of(&[("VITE_API_KEY", "vite"), ("REACT_APP_API_KEY", "react")]);
        assert_eq!(
            resolver.resolve_source_with("", env),
            ("vite".to_string(), KeySource::Env("VITE_API_KEY".into()))
        );

        let env = env_of(&[("API_KEY", ""), ("REACT_APP_API_KEY", "react")]);
        assert_eq!(resolver.resolve_with("", env), "react");
    }

    #[test]
    fn explicit_key_is_trimmed() {
        let resolver = CredentialResolver::default();
        assert_eq!(resolver.resolve_with("  abc \n", env_of(&[])), "abc");
    }

    #[test]
    fn masks_keys() {
        assert_eq!(mask_key("AIzaSyExample"), "AIza****");
        assert_eq!(mask_key("abc"), "****");
    }

    #[test]
    fn file_store_last_write_wins_and_empty_clears() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("nested").join("creds.json"));

        assert_eq!(store.load().unwrap(), None);

        store.save("first").unwrap();
        store.save("second").unwrap();
        assert_eq!(store.load().unwrap(), Some("second".to_string()));

        store.save("").unwrap();
        assert_eq!(store.load().unwrap(), None);
        assert!(!store.path().exists());

        store.save("third").unwrap();
        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn memory_store_mirrors_file_semantics() {
        let store = MemoryCredentialStore::new(Some("seed"));
        assert_eq!(store.load().unwrap(), Some("seed".to_string()));
        store.save(" next ").unwrap();
        assert_eq!(store.load().unwrap(), Some("next".to_string()));
        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn corrupt_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("creds.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = FileCredentialStore::new(&path);
        assert!(matches!(store.load(), Err(HatError::Config(_))));
    }
}
