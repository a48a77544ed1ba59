use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use super::{run_checked, unsupported, CommandRunner, ServiceDefinition, ServiceInstaller, SystemCommandRunner};
use crate::config::ServiceConfig;
use crate::credentials::{restrict_permissions, write_owner_only};
use crate::error::{Result, ServiceError};

const LAUNCHCTL: &str = "launchctl";
pub const DEFAULT_LABEL: &str = "com.altair.db";

/// Per-user launch agent under `~/Library/LaunchAgents`.
pub struct LaunchdInstaller {
    label: String,
    agents_dir: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl LaunchdInstaller {
    pub fn new(_config: &ServiceConfig) -> Result<Self> {
        if !cfg!(target_os = "macos") {
            return Err(unsupported());
        }
        let agents_dir = dirs::home_dir()
            .ok_or_else(|| ServiceError::Config("no home directory".to_string()))?
            .join("Library")
            .join("LaunchAgents");
        Ok(Self::with_layout(
            DEFAULT_LABEL,
            agents_dir,
            Arc::new(SystemCommandRunner),
        ))
    }

    /// Explicit label, directory and runner, no platform check.
    pub fn with_layout(label: &str, agents_dir: PathBuf, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            label: label.to_string(),
            agents_dir,
            runner,
        }
    }

    pub fn plist_path(&self) -> PathBuf {
        self.agents_dir.join(format!("{}.plist", self.label))
    }

    pub fn render_plist(&self, definition: &ServiceDefinition) -> String {
        let program_args: String = std::iter::once(definition.program.display().to_string())
            .chain(definition.args.iter().cloned())
            .map(|arg| format!("        <string>{}</string>\n", xml_escape(&arg)))
            .collect();
        let env: String = definition
            .env()
            .into_iter()
            .map(|(key, value)| {
                format!(
                    "        <key>{}</key>\n        <string>{}</string>\n",
                    key,
                    xml_escape(&value)
                )
            })
            .collect();
        let log = xml_escape(&definition.log_file.display().to_string());

        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>Label</key>
    <string>{label}</string>
    <key>ProgramArguments</key>
    <array>
{program_args}    </array>
    <key>EnvironmentVariables</key>
    <dict>
{env}    </dict>
    <key>WorkingDirectory</key>
    <string>{workdir}</string>
    <key>RunAtLoad</key>
    <true/>
    <key>KeepAlive</key>
    <dict>
        <key>SuccessfulExit</key>
        <false/>
    </dict>
    <key>StandardOutPath</key>
    <string>{log}</string>
    <key>StandardErrorPath</key>
    <string>{log}</string>
</dict>
</plist>
"#,
            label = xml_escape(&self.label),
            workdir = xml_escape(&definition.working_dir.display().to_string()),
        )
    }

    async fn launchctl(&self, args: &[&str]) -> Result<()> {
        run_checked(self.runner.as_ref(), LAUNCHCTL, args).await?;
        Ok(())
    }

    fn plist_arg(&self) -> String {
        self.plist_path().display().to_string()
    }
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[async_trait]
impl ServiceInstaller for LaunchdInstaller {
    fn platform(&self) -> &'static str {
        "launchd"
    }

    async fn is_installed(&self) -> Result<bool> {
        Ok(self.plist_path().exists())
    }

    async fn install(&self, definition: &ServiceDefinition) -> Result<()> {
        std::fs::create_dir_all(&self.agents_dir)
            .map_err(|e| ServiceError::fs(&self.agents_dir, e))?;
        let path = self.plist_path();
        // plist embeds the password
        write_owner_only(&path, self.render_plist(definition).as_bytes())
            .map_err(|e| ServiceError::fs(&path, e))?;
        restrict_permissions(&path)?;

        self.launchctl(&["load", "-w", &self.plist_arg()]).await?;
        info!(plist = %path.display(), "Installed launch agent");
        Ok(())
    }

    async fn uninstall(&self) -> Result<()> {
        if !self.is_installed().await? {
            return Ok(());
        }
        if let Err(e) = self.launchctl(&["unload", "-w", &self.plist_arg()]).await {
            warn!("Unloading {} failed: {}", self.label, e);
        }
        let path = self.plist_path();
        std::fs::remove_file(&path).map_err(|e| ServiceError::fs(&path, e))?;
        info!(label = %self.label, "Removed launch agent");
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        self.launchctl(&["start", &self.label]).await
    }

    async fn stop(&self) -> Result<()> {
        self.launchctl(&["stop", &self.label]).await
    }

    async fn enable(&self) -> Result<()> {
        self.launchctl(&["load", "-w", &self.plist_arg()]).await
    }

    async fn disable(&self) -> Result<()> {
        self.launchctl(&["unload", "-w", &self.plist_arg()]).await
    }
}
