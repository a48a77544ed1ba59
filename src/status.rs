use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Lifecycle state of the shared database service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    /// Not registered with the OS service manager
    NotInstalled,
    Stopped,
    Starting,
    Running,
    /// Status could not be determined (see `ServiceInfo::error`)
    Error,
    /// No probe has run yet
    #[default]
    Unknown,
}

impl ServiceStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, ServiceStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::NotInstalled => "not_installed",
            ServiceStatus::Stopped => "stopped",
            ServiceStatus::Starting => "starting",
            ServiceStatus::Running => "running",
            ServiceStatus::Error => "error",
            ServiceStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the service, computed on demand
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServiceInfo {
    pub status: ServiceStatus,
    pub version: Option<String>,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub port: Option<u16>,
}

impl ServiceInfo {
    pub fn new(status: ServiceStatus) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ServiceStatus::Error,
            error: Some(message.into()),
            ..Self::default()
        }
    }
}
