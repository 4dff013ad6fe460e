//! Engine configuration loaded from environment variables.
//!
//! All settings have defaults so the engine runs with zero configuration.

use std::path::PathBuf;
use std::time::Duration;

use classpet_shared::constants::DEFAULT_EMOTION_CHECKIN_EXP;
use classpet_store::{Database, StoreError};

/// Sync engine configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// How long to wait for the remote adapter to initialize before treating
    /// it as unavailable.
    /// Env: `CLASSPET_ADAPTER_WAIT_MS`
    /// Default: 3000 ms
    pub adapter_wait: Duration,

    /// Poll interval while waiting for the adapter.
    /// Env: `CLASSPET_ADAPTER_POLL_MS`
    /// Default: 100 ms
    pub adapter_poll: Duration,

    /// Exp a student earns for an emotion check-in.
    /// Env: `CLASSPET_EMOTION_EXP`
    /// Default: 10
    pub emotion_checkin_exp: u32,

    /// Cap on the total size of cached values (0 = unlimited).
    /// Env: `CLASSPET_CACHE_QUOTA_BYTES`
    /// Default: 5 MiB
    pub cache_quota_bytes: u64,

    /// Cache database file.  `None` uses the platform data directory.
    /// Env: `CLASSPET_DB_PATH`
    pub db_path: Option<PathBuf>,

    /// Attempts at drawing an unused class code.
    /// Env: `CLASSPET_CODE_ATTEMPTS`
    /// Default: 5
    pub class_code_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            adapter_wait: Duration::from_millis(3_000),
            adapter_poll: Duration::from_millis(100),
            emotion_checkin_exp: DEFAULT_EMOTION_CHECKIN_EXP,
            cache_quota_bytes: 5 * 1024 * 1024, // 5 MiB
            db_path: None,
            class_code_attempts: 5,
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(ms) = env_number::<u64>("CLASSPET_ADAPTER_WAIT_MS") {
            config.adapter_wait = Duration::from_millis(ms);
        }

        if let Some(ms) = env_number::<u64>("CLASSPET_ADAPTER_POLL_MS") {
            if ms > 0 {
                config.adapter_poll = Duration::from_millis(ms);
            }
        }

        if let Some(exp) = env_number::<u32>("CLASSPET_EMOTION_EXP") {
            config.emotion_checkin_exp = exp;
        }

        if let Some(bytes) = env_number::<u64>("CLASSPET_CACHE_QUOTA_BYTES") {
            config.cache_quota_bytes = bytes;
        }

        if let Ok(path) = std::env::var("CLASSPET_DB_PATH") {
            if !path.is_empty() {
                config.db_path = Some(PathBuf::from(path));
            }
        }

        if let Some(n) = env_number::<u32>("CLASSPET_CODE_ATTEMPTS") {
            config.class_code_attempts = n.max(1);
        }

        config
    }

    /// Open the cache database this configuration points at, with the quota
    /// applied.
    pub fn open_database(&self) -> Result<Database, StoreError> {
        let db = match &self.db_path {
            Some(path) => Database::open_at(path)?,
            None => Database::new()?,
        };
        Ok(db.with_quota(self.cache_quota_bytes))
    }
}

fn env_number<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(n) => Some(n),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "Invalid number, using default");
            None
        }
    }
}
