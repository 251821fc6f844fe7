//! Durable storage for the two session credentials.
//!
//! Tokens are opaque strings; nothing here decodes or validates them.
//! A missing key is a valid logged-out state.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Mutex, RwLock};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

pub const ACCESS_TOKEN_KEY: &str = "authToken";
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Token file name in cache directory
const TOKEN_FILE: &str = "tokens.json";

/// Synchronous key-value persistence for session tokens.
///
/// Callers read the store every time they need a token instead of caching,
/// so a refreshed token is visible to the very next request.
pub trait TokenStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;

    fn access_token(&self) -> Result<Option<String>> {
        self.get(ACCESS_TOKEN_KEY)
    }

    fn refresh_token(&self) -> Result<Option<String>> {
        self.get(REFRESH_TOKEN_KEY)
    }

    fn set_access_token(&self, token: &str) -> Result<()> {
        self.set(ACCESS_TOKEN_KEY, token)
    }

    fn save_tokens(&self, access_token: &str, refresh_token: &str) -> Result<()> {
        self.set(ACCESS_TOKEN_KEY, access_token)?;
        self.set(REFRESH_TOKEN_KEY, refresh_token)
    }

    /// Remove both tokens. Both removals are attempted even if one fails.
    fn clear(&self) -> Result<()> {
        let access = self.remove(ACCESS_TOKEN_KEY);
        let refresh = self.remove(REFRESH_TOKEN_KEY);
        access.and(refresh)
    }
}

/// Process-local store. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryTokenStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TokenStore for MemoryTokenStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self
            .entries
            .read()
            .map_err(|_| anyhow!("Token store lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| anyhow!("Token store lock poisoned"))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| anyhow!("Token store lock poisoned"))?;
        entries.remove(key);
        Ok(())
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct TokenFile {
    #[serde(default)]
    entries: BTreeMap<String, String>,
    updated_at: Option<DateTime<Utc>>,
}

/// JSON file in the cache directory, re-read on every access.
pub struct FileTokenStore {
    cache_dir: PathBuf,
    /// Serializes read-modify-write cycles within this process
    write_lock: Mutex<()>,
}

impl FileTokenStore {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            write_lock: Mutex::new(()),
        }
    }

    fn token_path(&self) -> PathBuf {
        self.cache_dir.join(TOKEN_FILE)
    }

    fn load(&self) -> Result<TokenFile> {
        let path = self.token_path();
        if !path.exists() {
            return Ok(TokenFile::default());
        }
        let contents = std::fs::read_to_string(&path).context("Failed to read token file")?;
        serde_json::from_str(&contents).context("Failed to parse token file")
    }

    fn save(&self, mut file: TokenFile) -> Result<()> {
        let path = self.token_path();
        if file.entries.is_empty() {
            if path.exists() {
                std::fs::remove_file(&path).context("Failed to remove token file")?;
            }
            return Ok(());
        }

        std::fs::create_dir_all(&self.cache_dir).context("Failed to create cache directory")?;
        file.updated_at = Some(Utc::now());
        let contents = serde_json::to_string_pretty(&file)?;
        std::fs::write(&path, contents).context("Failed to write token file")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    fn update(&self, apply: impl FnOnce(&mut TokenFile)) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow!("Token file lock poisoned"))?;
        let mut file = self.load().unwrap_or_else(|e| {
            warn!(error = %e, "Discarding unreadable token file");
            TokenFile::default()
        });
        apply(&mut file);
        self.save(file)
    }
}

impl TokenStore for FileTokenStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.load()?.entries.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.update(|file| {
            file.entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.update(|file| {
            file.entries.remove(key);
        })
    }
}
