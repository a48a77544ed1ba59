use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use super::{run_checked, unsupported, CommandRunner, ServiceDefinition, ServiceInstaller, SystemCommandRunner};
use crate::config::ServiceConfig;
use crate::error::Result;

const SC: &str = "sc.exe";
const REG: &str = "reg.exe";
pub const DEFAULT_SERVICE_NAME: &str = "AltairDB";
const DISPLAY_NAME: &str = "Altair Database";

/// Windows Service Control Manager via `sc.exe`.
///
/// The SCM has no per-service environment file; credentials go into the
/// service's `Environment` registry value, which only administrators can read.
pub struct WindowsServiceInstaller {
    name: String,
    runner: Arc<dyn CommandRunner>,
}

impl WindowsServiceInstaller {
    pub fn new(_config: &ServiceConfig) -> Result<Self> {
        if !cfg!(target_os = "windows") {
            return Err(unsupported());
        }
        Ok(Self::with_runner(DEFAULT_SERVICE_NAME, Arc::new(SystemCommandRunner)))
    }

    /// Explicit service name and runner, no platform check.
    pub fn with_runner(name: &str, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            name: name.to_string(),
            runner,
        }
    }

    fn registry_key(&self) -> String {
        format!(r"HKLM\SYSTEM\CurrentControlSet\Services\{}", self.name)
    }

    async fn sc(&self, args: &[&str]) -> Result<()> {
        run_checked(self.runner.as_ref(), SC, args).await?;
        Ok(())
    }
}

/// `binPath=` value: quoted program followed by its arguments.
fn bin_path(definition: &ServiceDefinition) -> String {
    let mut parts = vec![format!("\"{}\"", definition.program.display())];
    parts.extend(definition.args.iter().map(|arg| {
        if arg.contains(' ') {
            format!("\"{arg}\"")
        } else {
            arg.clone()
        }
    }));
    parts.join(" ")
}

/// `REG_MULTI_SZ` data for `reg.exe add`, entries separated by a literal `\0`.
fn environment_value(definition: &ServiceDefinition) -> String {
    definition
        .env()
        .into_iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("\\0")
}

#[async_trait]
impl ServiceInstaller for WindowsServiceInstaller {
    fn platform(&self) -> &'static str {
        "windows-service"
    }

    async fn is_installed(&self) -> Result<bool> {
        let args = vec!["query".to_string(), self.name.clone()];
        let output = self.runner.run(SC, &args).await?;
        Ok(output.success())
    }

    async fn install(&self, definition: &ServiceDefinition) -> Result<()> {
        let bin = bin_path(definition);
        self.sc(&[
            "create",
            &self.name,
            "binPath=",
            &bin,
            "start=",
            "auto",
            "DisplayName=",
            DISPLAY_NAME,
        ])
        .await?;
        self.sc(&["description", &self.name, &definition.description])
            .await?;

        let key = self.registry_key();
        let env = environment_value(definition);
        run_checked(
            self.runner.as_ref(),
            REG,
            &["add", &key, "/v", "Environment", "/t", "REG_MULTI_SZ", "/d", &env, "/f"],
        )
        .await?;

        info!(service = %self.name, "Registered Windows service");
        Ok(())
    }

    async fn uninstall(&self) -> Result<()> {
        if !self.is_installed().await? {
            return Ok(());
        }
        if let Err(e) = self.sc(&["stop", &self.name]).await {
            warn!("Stopping {} before uninstall failed: {}", self.name, e);
        }
        self.sc(&["delete", &self.name]).await?;
        info!(service = %self.name, "Deleted Windows service");
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        self.sc(&["start", &self.name]).await
    }

    async fn stop(&self) -> Result<()> {
        self.sc(&["stop", &self.name]).await
    }

    async fn enable(&self) -> Result<()> {
        self.sc(&["config", &self.name, "start=", "auto"]).await
    }

    async fn disable(&self) -> Result<()> {
        self.sc(&["config", &self.name, "start=", "demand"]).await
    }
}
