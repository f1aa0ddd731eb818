//! # Sync Configuration
//!
//! Configuration for the synchronization engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     CONCORD_DB_PATH=/var/lib/concord/concord.db                        │
//! │     CONCORD_CONCURRENCY=pessimistic                                    │
//! │     CONCORD_CONFLICT_STRATEGY=client_wins                              │
//! │     CONCORD_RESULT_TIME_DELAY_MS=120000                                │
//! │     CONCORD_LOCK_TTL_SECS=300                                          │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/concord/config.toml (Linux)                              │
//! │     ~/Library/Application Support/dev.concord.concord/config.toml      │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The loaded config is validated once and then shared read-only behind an
//! `Arc`; nothing mutates it after startup.
//!
//! ## Configuration File Format
//! ```toml
//! [database]
//! path = "concord.db"
//! max_connections = 5
//! busy_timeout_ms = 5000
//!
//! [sync]
//! result_time_delay_ms = 120000
//! concurrency = "optimistic"          # optimistic | pessimistic
//! conflict_strategy = "client_resolving"  # client_resolving | client_wins
//! lock_ttl_secs = 300
//! ```

use concord_core::{
    ClientResolving, ClientWins, ConflictResolutionStrategy, Millis, SyncError, SyncResult,
    DEFAULT_LOCK_TTL_SECS, RESULT_TIME_DELAY_MS,
};
use concord_db::DbConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

// =============================================================================
// Concurrency Mode
// =============================================================================

/// Which concurrency policy guards reads and writes.
///
/// ```text
/// OPTIMISTIC (Default)                 PESSIMISTIC
/// ────────────────────                 ───────────
/// • Compare declared lastModified      • Version check as in optimistic
///   with the server's                  • Plus: a live lock held by another
/// • Stale write → UpdateConflict         token blocks reads and writes
/// • No lock rows                       • Clients lock before editing
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyMode {
    #[default]
    Optimistic,
    Pessimistic,
}

impl std::fmt::Display for ConcurrencyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConcurrencyMode::Optimistic => write!(f, "optimistic"),
            ConcurrencyMode::Pessimistic => write!(f, "pessimistic"),
        }
    }
}

impl std::str::FromStr for ConcurrencyMode {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "optimistic" => Ok(ConcurrencyMode::Optimistic),
            "pessimistic" | "lock" | "token" => Ok(ConcurrencyMode::Pessimistic),
            other => Err(SyncError::InvalidConfig(format!(
                "Unknown concurrency mode: '{}'. Valid options: optimistic, pessimistic",
                other
            ))),
        }
    }
}

// =============================================================================
// Conflict Strategy
// =============================================================================

/// Which conflict resolution strategy handles rejected writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategyKind {
    /// Server state always wins; the client resolves.
    #[default]
    ClientResolving,

    /// A stale write overwrites the server for version conflicts.
    ClientWins,
}

impl ConflictStrategyKind {
    /// Builds the strategy this kind names.
    pub fn build(&self) -> Arc<dyn ConflictResolutionStrategy> {
        match self {
            ConflictStrategyKind::ClientResolving => Arc::new(ClientResolving),
            ConflictStrategyKind::ClientWins => Arc::new(ClientWins),
        }
    }
}

impl std::fmt::Display for ConflictStrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictStrategyKind::ClientResolving => write!(f, "client_resolving"),
            ConflictStrategyKind::ClientWins => write!(f, "client_wins"),
        }
    }
}

impl std::str::FromStr for ConflictStrategyKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "client_resolving" | "default" => Ok(ConflictStrategyKind::ClientResolving),
            "client_wins" => Ok(ConflictStrategyKind::ClientWins),
            other => Err(SyncError::InvalidConfig(format!(
                "Unknown conflict strategy: '{}'. Valid options: client_resolving, client_wins",
                other
            ))),
        }
    }
}

// =============================================================================
// Database Settings
// =============================================================================

/// Where and how the engine stores its bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    /// Maximum pooled connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long an upload waits for the write lock (milliseconds).
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("concord.db")
}

fn default_max_connections() -> u32 {
    5
}

fn default_busy_timeout() -> u64 {
    5_000
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Engine behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// How far a download watermark is shifted back (milliseconds).
    #[serde(default = "default_result_time_delay")]
    pub result_time_delay_ms: Millis,

    #[serde(default)]
    pub concurrency: ConcurrencyMode,

    #[serde(default)]
    pub conflict_strategy: ConflictStrategyKind,

    /// Lifetime of a pessimistic lock (seconds).
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_secs: u64,
}

fn default_result_time_delay() -> Millis {
    RESULT_TIME_DELAY_MS
}

fn default_lock_ttl() -> u64 {
    DEFAULT_LOCK_TTL_SECS
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            result_time_delay_ms: default_result_time_delay(),
            concurrency: ConcurrencyMode::default(),
            conflict_strategy: ConflictStrategyKind::default(),
            lock_ttl_secs: default_lock_ttl(),
        }
    }
}

// =============================================================================
// Main Sync Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub sync: SyncSettings,
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (`config.toml`)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading sync config from file");
                let contents = std::fs::read_to_string(&path)
                    .map_err(|e| SyncError::ConfigLoadFailed(format!("{}: {}", path.display(), e)))?;
                config = toml::from_str(&contents)
                    .map_err(|e| SyncError::ConfigLoadFailed(format!("{}: {}", path.display(), e)))?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();

        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load sync config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file as pretty TOML.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents =
            toml::to_string_pretty(self).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;
        std::fs::write(&path, contents).map_err(|e| SyncError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Sync config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.sync.result_time_delay_ms < 0 {
            return Err(SyncError::InvalidConfig(
                "result_time_delay_ms must not be negative".into(),
            ));
        }

        if self.sync.lock_ttl_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "lock_ttl_secs must be greater than 0".into(),
            ));
        }

        if self.database.max_connections == 0 {
            return Err(SyncError::InvalidConfig(
                "max_connections must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from any key lookup. Unparseable values are logged
    /// and ignored.
    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("CONCORD_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Some(mode) = lookup("CONCORD_CONCURRENCY") {
            match mode.parse() {
                Ok(parsed) => {
                    debug!(mode = %mode, "Overriding concurrency mode from environment");
                    self.sync.concurrency = parsed;
                }
                Err(_) => warn!(mode = %mode, "Unknown concurrency mode in environment"),
            }
        }

        if let Some(strategy) = lookup("CONCORD_CONFLICT_STRATEGY") {
            match strategy.parse() {
                Ok(parsed) => self.sync.conflict_strategy = parsed,
                Err(_) => warn!(strategy = %strategy, "Unknown conflict strategy in environment"),
            }
        }

        if let Some(delay) = lookup("CONCORD_RESULT_TIME_DELAY_MS") {
            match delay.parse::<Millis>() {
                Ok(d) => self.sync.result_time_delay_ms = d,
                Err(_) => warn!(delay = %delay, "Invalid result time delay in environment"),
            }
        }

        if let Some(ttl) = lookup("CONCORD_LOCK_TTL_SECS") {
            match ttl.parse::<u64>() {
                Ok(t) => self.sync.lock_ttl_secs = t,
                Err(_) => warn!(ttl = %ttl, "Invalid lock ttl in environment"),
            }
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "concord", "concord")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Builds the database configuration for the engine's pool.
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(&self.database.path)
            .max_connections(self.database.max_connections)
            .busy_timeout(Duration::from_millis(self.database.busy_timeout_ms))
    }

    pub fn result_time_delay(&self) -> Millis {
        self.sync.result_time_delay_ms
    }

    pub fn concurrency(&self) -> ConcurrencyMode {
        self.sync.concurrency
    }

    /// Lock lifetime in milliseconds.
    pub fn lock_ttl_millis(&self) -> Millis {
        Millis::try_from(self.sync.lock_ttl_secs.saturating_mul(1_000)).unwrap_or(Millis::MAX)
    }

    /// Builder used by tests and embedders that configure in code.
    pub fn with_concurrency(mut self, mode: ConcurrencyMode) -> Self {
        self.sync.concurrency = mode;
        self
    }

    pub fn with_conflict_strategy(mut self, kind: ConflictStrategyKind) -> Self {
        self.sync.conflict_strategy = kind;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_concurrency_mode_parsing() {
        assert_eq!("optimistic".parse::<ConcurrencyMode>().unwrap(), ConcurrencyMode::Optimistic);
        assert_eq!("PESSIMISTIC".parse::<ConcurrencyMode>().unwrap(), ConcurrencyMode::Pessimistic);
        assert!("eventual".parse::<ConcurrencyMode>().is_err());

        assert_eq!(
            "client-wins".parse::<ConflictStrategyKind>().unwrap(),
            ConflictStrategyKind::ClientWins
        );
        assert!("merge".parse::<ConflictStrategyKind>().is_err());
    }

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.result_time_delay(), 120_000);
        assert_eq!(config.concurrency(), ConcurrencyMode::Optimistic);
        assert_eq!(config.sync.conflict_strategy, ConflictStrategyKind::ClientResolving);
        assert_eq!(config.lock_ttl_millis(), 300_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = SyncConfig::default();

        config.sync.result_time_delay_ms = -1;
        assert!(matches!(config.validate(), Err(SyncError::InvalidConfig(_))));

        config.sync.result_time_delay_ms = 0;
        config.sync.lock_ttl_secs = 0;
        assert!(config.validate().is_err());

        config.sync.lock_ttl_secs = 1;
        config.database.max_connections = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CONCORD_CONCURRENCY", "pessimistic"),
            ("CONCORD_CONFLICT_STRATEGY", "client_wins"),
            ("CONCORD_RESULT_TIME_DELAY_MS", "5000"),
            ("CONCORD_LOCK_TTL_SECS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = SyncConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.concurrency(), ConcurrencyMode::Pessimistic);
        assert_eq!(config.sync.conflict_strategy, ConflictStrategyKind::ClientWins);
        assert_eq!(config.result_time_delay(), 5_000);
        // Invalid value ignored
        assert_eq!(config.sync.lock_ttl_secs, 300);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = SyncConfig::default().with_concurrency(ConcurrencyMode::Pessimistic);
        config.save(Some(path.clone())).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("[database]"));
        assert!(contents.contains("[sync]"));

        let loaded: SyncConfig = toml::from_str(&contents).unwrap();
        assert_eq!(loaded.concurrency(), ConcurrencyMode::Pessimistic);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: SyncConfig = toml::from_str("[sync]\nlock_ttl_secs = 60\n").unwrap();
        assert_eq!(config.sync.lock_ttl_secs, 60);
        assert_eq!(config.result_time_delay(), 120_000);
        assert_eq!(config.database.max_connections, 5);
    }

    #[test]
    fn test_malformed_file_fails_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[sync\nbroken").unwrap();

        assert!(matches!(
            SyncConfig::load(Some(path)),
            Err(SyncError::ConfigLoadFailed(_))
        ));
    }
}
