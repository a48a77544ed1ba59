use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use super::{run_checked, unsupported, CommandRunner, ServiceDefinition, ServiceInstaller, SystemCommandRunner};
use crate::config::ServiceConfig;
use crate::credentials::{restrict_permissions, write_owner_only};
use crate::error::{Result, ServiceError};

const SYSTEMCTL: &str = "systemctl";

/// `systemd --user` unit with a 0600 environment file for credentials.
pub struct SystemdInstaller {
    unit: String,
    unit_dir: PathBuf,
    env_file: PathBuf,
    runner: Arc<dyn CommandRunner>,
}

impl SystemdInstaller {
    pub fn new(config: &ServiceConfig) -> Result<Self> {
        if !cfg!(target_os = "linux") {
            return Err(unsupported());
        }
        let unit_dir = dirs::config_dir()
            .ok_or_else(|| ServiceError::Config("no user config directory".to_string()))?
            .join("systemd")
            .join("user");
        Ok(Self::with_layout(
            &config.service_name,
            unit_dir,
            config.config_dir.join(format!("{}.env", config.service_name)),
            Arc::new(SystemCommandRunner),
        ))
    }

    /// Explicit paths and runner, no platform check.
    pub fn with_layout(
        unit: &str,
        unit_dir: PathBuf,
        env_file: PathBuf,
        runner: Arc<dyn CommandRunner>,
    ) -> Self {
        Self {
            unit: unit.to_string(),
            unit_dir,
            env_file,
            runner,
        }
    }

    pub fn unit_path(&self) -> PathBuf {
        self.unit_dir.join(format!("{}.service", self.unit))
    }

    pub fn render_unit(&self, definition: &ServiceDefinition) -> String {
        let exec = std::iter::once(definition.program.display().to_string())
            .chain(definition.args.iter().cloned())
            .map(|arg| quote_exec_arg(&arg))
            .collect::<Vec<_>>()
            .join(" ");
        let log = definition.log_file.display();

        format!(
            "[Unit]\n\
             Description={description}\n\
             After=network.target\n\
             \n\
             [Service]\n\
             Type=simple\n\
             ExecStart={exec}\n\
             EnvironmentFile={env}\n\
             WorkingDirectory={workdir}\n\
             Restart=on-failure\n\
             RestartSec=5\n\
             StandardOutput=append:{log}\n\
             StandardError=append:{log}\n\
             \n\
             [Install]\n\
             WantedBy=default.target\n",
            description = definition.description,
            env = self.env_file.display(),
            workdir = definition.working_dir.display(),
        )
    }

    pub fn render_env(definition: &ServiceDefinition) -> String {
        definition
            .env()
            .into_iter()
            .map(|(key, value)| format!("{key}={value}\n"))
            .collect()
    }

    async fn systemctl(&self, args: &[&str]) -> Result<()> {
        let mut full = vec!["--user"];
        full.extend_from_slice(args);
        run_checked(self.runner.as_ref(), SYSTEMCTL, &full).await?;
        Ok(())
    }
}

/// systemd splits ExecStart on whitespace and honours double quotes.
fn quote_exec_arg(arg: &str) -> String {
    if arg.chars().any(char::is_whitespace) || arg.contains('"') {
        format!("\"{}\"", arg.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        arg.to_string()
    }
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    create_parent(path)?;
    std::fs::write(path, contents).map_err(|e| ServiceError::fs(path, e))
}

/// For files holding the password
fn write_secret(path: &Path, contents: &str) -> Result<()> {
    create_parent(path)?;
    write_owner_only(path, contents.as_bytes()).map_err(|e| ServiceError::fs(path, e))?;
    // an existing file keeps its old mode through the truncate
    restrict_permissions(path)
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ServiceError::fs(parent, e))?;
    }
    Ok(())
}

#[async_trait]
impl ServiceInstaller for SystemdInstaller {
    fn platform(&self) -> &'static str {
        "systemd"
    }

    async fn is_installed(&self) -> Result<bool> {
        Ok(self.unit_path().exists())
    }

    async fn install(&self, definition: &ServiceDefinition) -> Result<()> {
        write_secret(&self.env_file, &Self::render_env(definition))?;
        write_file(&self.unit_path(), &self.render_unit(definition))?;

        let unit = format!("{}.service", self.unit);
        self.systemctl(&["daemon-reload"]).await?;
        self.systemctl(&["enable", &unit]).await?;

        info!(unit = %self.unit_path().display(), "Installed systemd user unit");
        Ok(())
    }

    async fn uninstall(&self) -> Result<()> {
        if !self.is_installed().await? {
            return Ok(());
        }

        let unit = format!("{}.service", self.unit);
        if let Err(e) = self.systemctl(&["stop", &unit]).await {
            warn!("Stopping {} before uninstall failed: {}", unit, e);
        }
        if let Err(e) = self.systemctl(&["disable", &unit]).await {
            warn!("Disabling {} before uninstall failed: {}", unit, e);
        }

        let unit_path = self.unit_path();
        std::fs::remove_file(&unit_path).map_err(|e| ServiceError::fs(&unit_path, e))?;
        if self.env_file.exists() {
            std::fs::remove_file(&self.env_file).map_err(|e| ServiceError::fs(&self.env_file, e))?;
        }
        self.systemctl(&["daemon-reload"]).await?;

        info!(unit = %unit, "Removed systemd user unit");
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        self.systemctl(&["start", &format!("{}.service", self.unit)]).await
    }

    async fn stop(&self) -> Result<()> {
        self.systemctl(&["stop", &format!("{}.service", self.unit)]).await
    }

    async fn enable(&self) -> Result<()> {
        self.systemctl(&["enable", &format!("{}.service", self.unit)]).await
    }

    async fn disable(&self) -> Result<()> {
        self.systemctl(&["disable", &format!("{}.service", self.unit)]).await
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{definition, RecordingRunner};
    use super::*;
    use tempfile::TempDir;

    fn installer(dir: &Path, runner: Arc<RecordingRunner>) -> SystemdInstaller {
        SystemdInstaller::with_layout(
            "altair-db",
            dir.join("systemd/user"),
            dir.join("config/altair-db.env"),
            runner,
        )
    }

    #[tokio::test]
    async fn install_writes_unit_and_env_then_enables() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::default());
        let installer = installer(dir.path(), runner.clone());
        let def = definition(dir.path());

        assert!(!installer.is_installed().await.unwrap());
        installer.install(&def).await.unwrap();
        assert!(installer.is_installed().await.unwrap());

        let unit = std::fs::read_to_string(installer.unit_path()).unwrap();
        assert!(unit.contains("ExecStart=/usr/local/bin/surreal start --bind 127.0.0.1:8000"));
        assert!(unit.contains("EnvironmentFile="));
        assert!(!unit.contains("S3cret"));

        let env = std::fs::read_to_string(dir.path().join("config/altair-db.env")).unwrap();
        assert!(env.contains("SURREAL_PASS=S3cret-pass_word#1"));

        assert_eq!(
            runner.calls(),
            vec![
                "systemctl --user daemon-reload",
                "systemctl --user enable altair-db.service",
            ]
        );
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn env_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let installer = installer(dir.path(), Arc::new(RecordingRunner::default()));
        installer.install(&definition(dir.path())).await.unwrap();

        let mode = std::fs::metadata(dir.path().join("config/altair-db.env"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn reinstall_tightens_a_loose_env_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let env_file = dir.path().join("config/altair-db.env");
        std::fs::create_dir_all(env_file.parent().unwrap()).unwrap();
        std::fs::write(&env_file, "SURREAL_PASS=old\n").unwrap();
        std::fs::set_permissions(&env_file, std::fs::Permissions::from_mode(0o644)).unwrap();

        let installer = installer(dir.path(), Arc::new(RecordingRunner::default()));
        installer.install(&definition(dir.path())).await.unwrap();

        let meta = std::fs::metadata(&env_file).unwrap();
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);
        assert!(!std::fs::read_to_string(&env_file).unwrap().contains("=old"));
    }

    #[tokio::test]
    async fn uninstall_tolerates_stop_failure() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::failing_on(&["stop"]));
        let installer = installer(dir.path(), runner.clone());
        installer.install(&definition(dir.path())).await.unwrap();

        installer.uninstall().await.unwrap();
        assert!(!installer.is_installed().await.unwrap());
        assert!(!dir.path().join("config/altair-db.env").exists());
        assert!(runner
            .calls()
            .contains(&"systemctl --user disable altair-db.service".to_string()));
    }

    #[tokio::test]
    async fn uninstall_when_absent_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::default());
        installer(dir.path(), runner.clone()).uninstall().await.unwrap();
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn lifecycle_commands_surface_failures() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::failing_on(&["start"]));
        let installer = installer(dir.path(), runner);

        let err = installer.start().await.unwrap_err();
        assert!(matches!(err, ServiceError::Command { .. }));
        installer.stop().await.unwrap();
    }

    #[tokio::test]
    async fn default_restart_stops_then_starts() {
        let dir = TempDir::new().unwrap();
        let runner = Arc::new(RecordingRunner::default());
        installer(dir.path(), runner.clone()).restart().await.unwrap();
        assert_eq!(
            runner.calls(),
            vec![
                "systemctl --user stop altair-db.service",
                "systemctl --user start altair-db.service",
            ]
        );
    }

    #[test]
    fn exec_args_with_spaces_are_quoted() {
        assert_eq!(quote_exec_arg("plain"), "plain");
        assert_eq!(
            quote_exec_arg("rocksdb:///home/a b/db"),
            "\"rocksdb:///home/a b/db\""
        );
    }

    #[test]
    #[cfg(not(target_os = "linux"))]
    fn refuses_other_platforms() {
        let dir = TempDir::new().unwrap();
        let config = ServiceConfig::with_dirs(dir.path(), dir.path());
        assert!(matches!(
            SystemdInstaller::new(&config),
            Err(ServiceError::UnsupportedPlatform(_))
        ));
    }
}
