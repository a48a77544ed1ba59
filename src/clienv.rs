use std::path::PathBuf;

/// Environment variables recognised by altair-db.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvVar {
    ConfigDir,
    DataDir,
    DbBind,
    DbPort,
    DbNamespace,
    DbDatabase,
    DbStorageDir,
    DbBinary,
    Log,
}

impl EnvVar {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvVar::ConfigDir => "ALTAIR_CONFIG_DIR",
            EnvVar::DataDir => "ALTAIR_DATA_DIR",
            EnvVar::DbBind => "ALTAIR_DB_BIND",
            EnvVar::DbPort => "ALTAIR_DB_PORT",
            EnvVar::DbNamespace => "ALTAIR_DB_NAMESPACE",
            EnvVar::DbDatabase => "ALTAIR_DB_DATABASE",
            EnvVar::DbStorageDir => "ALTAIR_DB_STORAGE_DIR",
            EnvVar::DbBinary => "ALTAIR_DB_BINARY",
            EnvVar::Log => "ALTAIR_LOG",
        }
    }
}

const FALLBACK_CONFIG_DIR: &str = "~/.config";
const FALLBACK_DATA_DIR: &str = "~/.local/share";
const ALTAIR_SUBDIR: &str = "altair";

/// Non-empty value of an environment variable
pub fn env_opt(var: EnvVar) -> Option<String> {
    std::env::var(var.as_str())
        .ok()
        .filter(|v| !v.trim().is_empty())
}

/// Altair config directory ($ALTAIR_CONFIG_DIR or ~/.config/altair)
pub fn config_dir() -> PathBuf {
    let dir = env_opt(EnvVar::ConfigDir)
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from(FALLBACK_CONFIG_DIR))
                .join(ALTAIR_SUBDIR)
        });
    tracing::trace!(dir = %dir.display(), "Resolved config directory");
    dir
}

/// Altair data directory ($ALTAIR_DATA_DIR or the platform data dir)
///
/// `~/.local/share/altair` on Linux, `~/Library/Application Support/altair`
/// on macOS, `%APPDATA%\altair` on Windows.
pub fn data_dir() -> PathBuf {
    let dir = env_opt(EnvVar::DataDir)
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from(FALLBACK_DATA_DIR))
                .join(ALTAIR_SUBDIR)
        });
    tracing::trace!(dir = %dir.display(), "Resolved data directory");
    dir
}

/// Explicit database executable ($ALTAIR_DB_BINARY)
pub fn db_binary_override() -> Option<PathBuf> {
    let val = env_opt(EnvVar::DbBinary).map(PathBuf::from);
    tracing::trace!(value = ?val, "ALTAIR_DB_BINARY env var");
    val
}

/// Log filter directive ($ALTAIR_LOG)
pub fn log_filter() -> Option<String> {
    env_opt(EnvVar::Log)
}

/// Port override ($ALTAIR_DB_PORT); unparsable values are ignored
pub fn db_port() -> Option<u16> {
    let val = env_opt(EnvVar::DbPort).and_then(|s| match s.parse() {
        Ok(port) => Some(port),
        Err(_) => {
            tracing::warn!(value = %s, "Ignoring invalid ALTAIR_DB_PORT");
            None
        }
    });
    tracing::trace!(value = ?val, "ALTAIR_DB_PORT env var");
    val
}
