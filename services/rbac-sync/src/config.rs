use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_CONFIG_PATH: &str = "./config";
pub const DEFAULT_SYSTEM_PREFIX: &str = "system_";
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_DB_TIMEOUT_MS: u64 = 5_000;

/// Which directions run automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    #[default]
    None,
    Import,
    Export,
    Full,
}

impl SyncMode {
    pub fn imports_on_start(self) -> bool {
        matches!(self, SyncMode::Import | SyncMode::Full)
    }

    pub fn exports_on_change(self) -> bool {
        matches!(self, SyncMode::Export | SyncMode::Full)
    }
}

impl FromStr for SyncMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "NONE" | "" => Ok(SyncMode::None),
            "IMPORT" => Ok(SyncMode::Import),
            "EXPORT" => Ok(SyncMode::Export),
            "FULL" => Ok(SyncMode::Full),
            other => bail!("unknown sync mode {other:?} (expected NONE, IMPORT, EXPORT or FULL)"),
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncMode::None => "NONE",
            SyncMode::Import => "IMPORT",
            SyncMode::Export => "EXPORT",
            SyncMode::Full => "FULL",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageBackend {
    #[default]
    Memory,
    Postgres,
}

impl FromStr for StorageBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "postgres" | "postgresql" => Ok(StorageBackend::Postgres),
            other => bail!("unknown storage backend {other:?} (expected memory or postgres)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostgresConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_ms: u64,
    pub acquire_timeout_ms: u64,
}

// Service configuration sourced from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    // Base path of roles.yaml and permissions/.
    pub config_path: PathBuf,
    pub mode: SyncMode,
    pub storage: StorageBackend,
    // Present when a database URL is configured.
    pub postgres: Option<PostgresConfig>,
    // Collections with this prefix are skipped by export unless asked for.
    pub system_prefix: String,
    pub metrics_bind: Option<SocketAddr>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            mode: SyncMode::None,
            storage: StorageBackend::Memory,
            postgres: None,
            system_prefix: DEFAULT_SYSTEM_PREFIX.to_string(),
            metrics_bind: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct SyncConfigOverride {
    config_path: Option<String>,
    mode: Option<String>,
    storage: Option<String>,
    database_url: Option<String>,
    db_max_connections: Option<u32>,
    db_connect_timeout_ms: Option<u64>,
    db_acquire_timeout_ms: Option<u64>,
    system_prefix: Option<String>,
    metrics_bind: Option<String>,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self> {
        let config_path = std::env::var("RBAC_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        let mode = match std::env::var("RBAC_SYNC_MODE") {
            Ok(value) => value.parse().with_context(|| "parse RBAC_SYNC_MODE")?,
            Err(_) => SyncMode::default(),
        };
        let storage = match std::env::var("RBAC_SYNC_STORAGE") {
            Ok(value) => value.parse().with_context(|| "parse RBAC_SYNC_STORAGE")?,
            Err(_) => StorageBackend::default(),
        };
        let max_connections = env_number("RBAC_SYNC_DB_MAX_CONNECTIONS")?
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS);
        let connect_timeout_ms =
            env_number("RBAC_SYNC_DB_CONNECT_TIMEOUT_MS")?.unwrap_or(DEFAULT_DB_TIMEOUT_MS);
        let acquire_timeout_ms =
            env_number("RBAC_SYNC_DB_ACQUIRE_TIMEOUT_MS")?.unwrap_or(DEFAULT_DB_TIMEOUT_MS);
        let postgres = std::env::var("RBAC_SYNC_DATABASE_URL")
            .ok()
            .map(|url| PostgresConfig {
                url,
                max_connections,
                connect_timeout_ms,
                acquire_timeout_ms,
            });
        let system_prefix = std::env::var("RBAC_SYNC_SYSTEM_PREFIX")
            .unwrap_or_else(|_| DEFAULT_SYSTEM_PREFIX.to_string());
        let metrics_bind = match std::env::var("RBAC_SYNC_METRICS_BIND") {
            Ok(value) => Some(value.parse().with_context(|| "parse RBAC_SYNC_METRICS_BIND")?),
            Err(_) => None,
        };
        Ok(Self {
            config_path,
            mode,
            storage,
            postgres,
            system_prefix,
            metrics_bind,
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("RBAC_SYNC_CONFIG") {
            // YAML overrides allow ops-friendly config files.
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("read RBAC_SYNC_CONFIG: {path}"))?;
            config.apply_yaml(&contents)?;
        }
        Ok(config)
    }

    fn apply_yaml(&mut self, contents: &str) -> Result<()> {
        let override_cfg: SyncConfigOverride =
            serde_yaml::from_str(contents).with_context(|| "parse rbac-sync config yaml")?;
        if let Some(value) = override_cfg.config_path {
            self.config_path = PathBuf::from(value);
        }
        if let Some(value) = override_cfg.mode {
            self.mode = value.parse().with_context(|| "parse mode")?;
        }
        if let Some(value) = override_cfg.storage {
            self.storage = value.parse().with_context(|| "parse storage")?;
        }
        if let Some(url) = override_cfg.database_url {
            let postgres = self.postgres.get_or_insert_with(|| PostgresConfig {
                url: String::new(),
                max_connections: DEFAULT_DB_MAX_CONNECTIONS,
                connect_timeout_ms: DEFAULT_DB_TIMEOUT_MS,
                acquire_timeout_ms: DEFAULT_DB_TIMEOUT_MS,
            });
            postgres.url = url;
        }
        if let Some(postgres) = self.postgres.as_mut() {
            if let Some(value) = override_cfg.db_max_connections
                && value > 0
            {
                postgres.max_connections = value;
            }
            if let Some(value) = override_cfg.db_connect_timeout_ms {
                postgres.connect_timeout_ms = value;
            }
            if let Some(value) = override_cfg.db_acquire_timeout_ms {
                postgres.acquire_timeout_ms = value;
            }
        }
        if let Some(value) = override_cfg.system_prefix {
            self.system_prefix = value;
        }
        if let Some(value) = override_cfg.metrics_bind {
            self.metrics_bind = Some(value.parse().with_context(|| "parse metrics_bind")?);
        }
        Ok(())
    }
}

fn env_number<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("parse {key}")),
        Err(_) => Ok(None),
    }
}
