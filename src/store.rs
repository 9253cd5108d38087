//! Settings and forward counters
//!
//! The relay reads a `ForwardConfig` snapshot per batch and bumps the
//! counters after each confirmed delivery. Both stores serialize access
//! through a mutex held only for the duration of one read or update.
//! Counter changes stay in memory until `persist`, so the file write can
//! run on a blocking thread.

use crate::config::{Config, ForwardConfig};
use crate::delivery::is_valid_webhook_url;
use crate::error::{Error, Result};
use chrono::{DateTime, Local, TimeZone};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tempfile::NamedTempFile;
use tracing::warn;

/// Everything persisted between runs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub webhook_url: String,
    pub enabled: bool,
    pub only_verification_codes: bool,
    pub total_forward_count: u64,
    /// Epoch milliseconds of the last confirmed forward
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_forward_time: Option<i64>,
}

impl Settings {
    pub fn forward_config(&self) -> ForwardConfig {
        ForwardConfig {
            destination_url: self.webhook_url.clone(),
            enabled: self.enabled,
            verification_only_mode: self.only_verification_codes,
        }
    }

    pub fn last_forward(&self) -> Option<DateTime<Local>> {
        self.last_forward_time
            .and_then(|ms| Local.timestamp_millis_opt(ms).single())
    }
}

/// User-editable subset used for export/import (no counters)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportedConfig {
    pub webhook_url: String,
    pub enabled: bool,
    pub only_verification_codes: bool,
}

/// Counter summary for status output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForwardStats {
    pub total_forwarded: u64,
    pub last_forward_time: Option<DateTime<Local>>,
    pub enabled: bool,
    pub config_complete: bool,
}

/// Config store collaborator; safe to call from background tasks
pub trait ConfigStore: Send + Sync {
    fn get(&self) -> ForwardConfig;

    /// Bump the count and stamp `at` in one critical section; returns the new count
    fn increment_forward_count(&self, at: DateTime<Local>) -> u64;

    fn last_forward_timestamp(&self) -> Option<DateTime<Local>>;

    fn set_last_forward_timestamp(&self, at: DateTime<Local>);

    fn stats(&self) -> ForwardStats;

    /// Flush pending counter changes to durable storage; may block on I/O
    fn persist(&self) -> Result<()> {
        Ok(())
    }
}

fn stats_of(settings: &Settings) -> ForwardStats {
    ForwardStats {
        total_forwarded: settings.total_forward_count,
        last_forward_time: settings.last_forward(),
        enabled: settings.enabled,
        config_complete: settings.forward_config().is_complete(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicked writer leaves plain data behind; keep serving it.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-process store, nothing persisted
#[derive(Debug, Default)]
pub struct MemoryStore {
    settings: Mutex<Settings>,
}

impl MemoryStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: Mutex::new(settings),
        }
    }

    pub fn snapshot(&self) -> Settings {
        lock(&self.settings).clone()
    }
}

impl ConfigStore for MemoryStore {
    fn get(&self) -> ForwardConfig {
        lock(&self.settings).forward_config()
    }

    fn increment_forward_count(&self, at: DateTime<Local>) -> u64 {
        let mut settings = lock(&self.settings);
        settings.total_forward_count += 1;
        settings.last_forward_time = Some(at.timestamp_millis());
        settings.total_forward_count
    }

    fn last_forward_timestamp(&self) -> Option<DateTime<Local>> {
        lock(&self.settings).last_forward()
    }

    fn set_last_forward_timestamp(&self, at: DateTime<Local>) {
        lock(&self.settings).last_forward_time = Some(at.timestamp_millis());
    }

    fn stats(&self) -> ForwardStats {
        stats_of(&lock(&self.settings))
    }
}

/// JSON-file store. `update`, `import_config` and `clear` save right away;
/// counter changes are saved by `persist`.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    settings: Mutex<Settings>,
    /// Bumped on every in-memory change
    generation: AtomicU64,
    /// Generation last written to disk; held for the whole write
    written: Mutex<u64>,
}

impl FileStore {
    pub fn new(config: &Config) -> Self {
        Self::at(&config.settings_file)
    }

    pub fn at(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            settings: Mutex::new(Settings::default()),
            generation: AtomicU64::new(0),
            written: Mutex::new(0),
        }
    }

    /// Open and load in one step
    pub fn open(config: &Config) -> Result<Self> {
        let store = Self::new(config);
        store.load()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load settings from disk; a missing file means defaults
    pub fn load(&self) -> Result<()> {
        let loaded = if self.path.exists() {
            let content = fs::read_to_string(&self.path)?;
            serde_json::from_str(&content)?
        } else {
            Settings::default()
        };
        *lock(&self.settings) = loaded;
        Ok(())
    }

    pub fn snapshot(&self) -> Settings {
        lock(&self.settings).clone()
    }

    /// Apply a change and persist it
    pub fn update<F>(&self, change: F) -> Result<Settings>
    where
        F: FnOnce(&mut Settings),
    {
        let updated = {
            let mut settings = lock(&self.settings);
            change(&mut settings);
            self.generation.fetch_add(1, Ordering::SeqCst);
            settings.clone()
        };
        self.persist()?;
        Ok(updated)
    }

    pub fn export_config(&self) -> ExportedConfig {
        let settings = lock(&self.settings);
        ExportedConfig {
            webhook_url: settings.webhook_url.clone(),
            enabled: settings.enabled,
            only_verification_codes: settings.only_verification_codes,
        }
    }

    /// Replace user settings, keeping counters. A non-empty URL must be a
    /// recognized webhook endpoint.
    pub fn import_config(&self, imported: &ExportedConfig) -> Result<Settings> {
        let url = imported.webhook_url.trim();
        if !url.is_empty() && !is_valid_webhook_url(url) {
            return Err(Error::Config(format!(
                "Not a recognized webhook URL: {}",
                url
            )));
        }
        self.update(|s| {
            s.webhook_url = url.to_string();
            s.enabled = imported.enabled;
            s.only_verification_codes = imported.only_verification_codes;
        })
    }

    /// Reset everything, counters included
    pub fn clear(&self) -> Result<()> {
        self.update(|s| *s = Settings::default()).map(|_| ())
    }

    fn touch(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

impl ConfigStore for FileStore {
    fn get(&self) -> ForwardConfig {
        lock(&self.settings).forward_config()
    }

    fn increment_forward_count(&self, at: DateTime<Local>) -> u64 {
        let mut settings = lock(&self.settings);
        settings.total_forward_count += 1;
        settings.last_forward_time = Some(at.timestamp_millis());
        self.touch();
        settings.total_forward_count
    }

    fn last_forward_timestamp(&self) -> Option<DateTime<Local>> {
        lock(&self.settings).last_forward()
    }

    fn set_last_forward_timestamp(&self, at: DateTime<Local>) {
        let mut settings = lock(&self.settings);
        settings.last_forward_time = Some(at.timestamp_millis());
        self.touch();
    }

    fn stats(&self) -> ForwardStats {
        stats_of(&lock(&self.settings))
    }

    /// Write the newest in-memory state unless a later write already covered it
    fn persist(&self) -> Result<()> {
        let mut written = lock(&self.written);
        let (generation, snapshot) = {
            let settings = lock(&self.settings);
            (self.generation.load(Ordering::SeqCst), settings.clone())
        };
        if generation <= *written && self.path.exists() {
            return Ok(());
        }
        if let Err(e) = write_atomic(&self.path, &snapshot) {
            warn!("Failed to save settings to {}: {}", self.path.display(), e);
            return Err(e);
        }
        *written = generation;
        Ok(())
    }
}

/// Write to a temp file in the same directory, then rename over the target
fn write_atomic(path: &Path, settings: &Settings) -> Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(parent)?;

    let mut temp = NamedTempFile::new_in(parent)?;
    let json = serde_json::to_string_pretty(settings)?;
    temp.write_all(json.as_bytes())?;
    temp.as_file().sync_all()?;

    temp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}
