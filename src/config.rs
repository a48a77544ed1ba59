use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::clienv::{self, EnvVar};
use crate::error::{Result, ServiceError};

pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_NAMESPACE: &str = "altair";
pub const DEFAULT_DATABASE: &str = "main";
pub const SERVICE_NAME: &str = "altair-db";

const CONFIG_FILE: &str = "database.toml";
const CREDENTIALS_FILE: &str = ".altair_credentials";

/// Where the shared database service listens and keeps its data.
///
/// Built once per process. Environment variables win over
/// `<config_dir>/database.toml`, which wins over defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub bind_address: String,
    pub port: u16,
    pub namespace: String,
    pub database: String,
    pub storage_dir: PathBuf,
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub service_name: String,
}

/// Optional overrides read from `database.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileOverrides {
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub namespace: Option<String>,
    pub database: Option<String>,
    pub storage_dir: Option<PathBuf>,
}

impl FileOverrides {
    pub fn load(path: &Path) -> Result<Self> {
        tracing::trace!(path = %path.display(), "Loading database config");

        if !path.exists() {
            tracing::trace!("Config file does not exist, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| ServiceError::fs(path, e))?;
        toml::from_str(&content)
            .map_err(|e| ServiceError::Config(format!("{}: {}", path.display(), e)))
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        let data_dir = clienv::data_dir();
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            namespace: DEFAULT_NAMESPACE.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            storage_dir: data_dir.join("db"),
            config_dir: clienv::config_dir(),
            data_dir,
            service_name: SERVICE_NAME.to_string(),
        }
    }
}

impl ServiceConfig {
    /// Resolve the configuration from defaults, `database.toml` and the environment.
    pub fn load() -> Result<Self> {
        let mut config = Self::default();
        let overrides = FileOverrides::load(&config.config_dir.join(CONFIG_FILE))?;
        config.apply_file(overrides);
        config.apply_env();
        tracing::debug!(
            bind = %config.bind_address,
            port = config.port,
            ns = %config.namespace,
            db = %config.database,
            storage = %config.storage_dir.display(),
            "Resolved service config"
        );
        Ok(config)
    }

    /// Config rooted at explicit directories, ignoring file and environment.
    pub fn with_dirs(config_dir: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            storage_dir: data_dir.join("db"),
            config_dir: config_dir.into(),
            data_dir,
            ..Self::default()
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    fn apply_file(&mut self, file: FileOverrides) {
        if let Some(bind) = file.bind_address {
            self.bind_address = bind;
        }
        if let Some(port) = file.port {
            self.port = port;
        }
        if let Some(ns) = file.namespace {
            self.namespace = ns;
        }
        if let Some(db) = file.database {
            self.database = db;
        }
        if let Some(dir) = file.storage_dir {
            self.storage_dir = dir;
        }
    }

    fn apply_env(&mut self) {
        if let Some(bind) = clienv::env_opt(EnvVar::DbBind) {
            self.bind_address = bind;
        }
        if let Some(port) = clienv::db_port() {
            self.port = port;
        }
        if let Some(ns) = clienv::env_opt(EnvVar::DbNamespace) {
            self.namespace = ns;
        }
        if let Some(db) = clienv::env_opt(EnvVar::DbDatabase) {
            self.database = db;
        }
        if let Some(dir) = clienv::env_opt(EnvVar::DbStorageDir) {
            self.storage_dir = PathBuf::from(dir);
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.address())
    }

    pub fn health_url(&self) -> String {
        format!("{}/health", self.base_url())
    }

    pub fn version_url(&self) -> String {
        format!("{}/version", self.base_url())
    }

    /// Client endpoint for the database SDK
    pub fn connection_uri(&self) -> String {
        format!("ws://{}", self.address())
    }

    /// Storage argument handed to `surreal start`
    pub fn storage_uri(&self) -> String {
        format!("rocksdb://{}", self.storage_dir.join("altair.db").display())
    }

    /// Bundled executables shipped with the application
    pub fn bin_dir(&self) -> PathBuf {
        self.data_dir.join("bin")
    }

    pub fn credentials_file(&self) -> PathBuf {
        self.config_dir.join(CREDENTIALS_FILE)
    }

    pub fn pid_file(&self) -> PathBuf {
        self.data_dir.join(format!("{}.pid", self.service_name))
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn log_file(&self) -> PathBuf {
        self.log_dir().join(format!("{}.log", self.service_name))
    }
}
