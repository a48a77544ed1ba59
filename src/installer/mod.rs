//! OS service registration for the database process
//!
//! One contract, three adapters:
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │             dyn ServiceInstaller             │
//! ├───────────────┬───────────────┬──────────────┤
//! │ systemd --user│ launchd agent │ sc.exe (SCM) │
//! │    (linux)    │    (macos)    │  (windows)   │
//! └───────────────┴───────────────┴──────────────┘
//! ```
//!
//! [`platform_installer`] picks the adapter once at startup; nothing above
//! this module branches on the operating system.

mod launchd;
mod systemd;
mod windows;

pub use launchd::LaunchdInstaller;
pub use systemd::SystemdInstaller;
pub use windows::WindowsServiceInstaller;

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::config::ServiceConfig;
use crate::credentials::Credentials;
use crate::error::{Result, ServiceError};

/// Pause between stop and start on restart, lets the port be released
pub const RESTART_DELAY: Duration = Duration::from_secs(1);

pub const USER_ENV: &str = "SURREAL_USER";
pub const PASS_ENV: &str = "SURREAL_PASS";

/// Everything an adapter needs to register the database process.
#[derive(Debug, Clone)]
pub struct ServiceDefinition {
    pub name: String,
    pub description: String,
    pub program: PathBuf,
    /// `surreal start` arguments, without credentials
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub log_file: PathBuf,
    pub credentials: Credentials,
}

impl ServiceDefinition {
    pub fn for_database(program: PathBuf, config: &ServiceConfig, credentials: Credentials) -> Self {
        Self {
            name: config.service_name.clone(),
            description: "Altair local database".to_string(),
            program,
            args: vec![
                "start".to_string(),
                "--bind".to_string(),
                config.address(),
                "--log".to_string(),
                "info".to_string(),
                config.storage_uri(),
            ],
            working_dir: config.data_dir.clone(),
            log_file: config.log_file(),
            credentials,
        }
    }

    /// Credentials as environment variables, for OS-managed services
    pub fn env(&self) -> Vec<(&'static str, String)> {
        vec![
            (USER_ENV, self.credentials.username.clone()),
            (PASS_ENV, self.credentials.password.clone()),
        ]
    }

    /// Full argument list with credentials as flags, for a direct spawn
    pub fn args_with_credentials(&self) -> Vec<String> {
        let mut args = self.args.clone();
        args.extend([
            "--user".to_string(),
            self.credentials.username.clone(),
            "--pass".to_string(),
            self.credentials.password.clone(),
        ]);
        args
    }
}

/// Uniform lifecycle contract over the platform service manager.
#[async_trait]
pub trait ServiceInstaller: Send + Sync {
    /// Name of the native mechanism, for logs and status output
    fn platform(&self) -> &'static str;

    async fn is_installed(&self) -> Result<bool>;

    async fn install(&self, definition: &ServiceDefinition) -> Result<()>;

    async fn uninstall(&self) -> Result<()>;

    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    async fn restart(&self) -> Result<()> {
        self.stop().await?;
        tokio::time::sleep(RESTART_DELAY).await;
        self.start().await
    }

    /// Start at boot/login
    async fn enable(&self) -> Result<()>;

    async fn disable(&self) -> Result<()>;
}

/// Adapter for the running platform.
#[allow(unreachable_code)]
pub fn platform_installer(config: &ServiceConfig) -> Result<Arc<dyn ServiceInstaller>> {
    #[cfg(target_os = "linux")]
    {
        return Ok(Arc::new(SystemdInstaller::new(config)?));
    }

    #[cfg(target_os = "macos")]
    {
        return Ok(Arc::new(LaunchdInstaller::new(config)?));
    }

    #[cfg(target_os = "windows")]
    {
        return Ok(Arc::new(WindowsServiceInstaller::new(config)?));
    }

    let _ = config;
    Err(unsupported())
}

pub(crate) fn unsupported() -> ServiceError {
    ServiceError::UnsupportedPlatform(std::env::consts::OS.to_string())
}

#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs native service tools (`systemctl`, `launchctl`, `sc.exe`).
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput>;
}

pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        debug!("Running command: {} {:?}", program, args);

        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| ServiceError::Command {
                program: program.to_string(),
                detail: e.to_string(),
            })?;

        debug!(
            "Command finished with exit code: {:?}",
            output.status.code()
        );
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Run and turn a non-zero exit into `ServiceError::Command`.
pub(crate) async fn run_checked(
    runner: &dyn CommandRunner,
    program: &str,
    args: &[&str],
) -> Result<CommandOutput> {
    let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
    let output = runner.run(program, &args).await?;
    if !output.success() {
        let detail = if output.stderr.trim().is_empty() {
            format!("exit code {:?}", output.code)
        } else {
            output.stderr.trim().to_string()
        };
        return Err(ServiceError::Command {
            program: format!("{} {}", program, args.join(" ")),
            detail,
        });
    }
    Ok(output)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Records invocations; any command carrying an arg listed in `failing` exits 1.
    #[derive(Default)]
    pub struct RecordingRunner {
        pub calls: Mutex<Vec<String>>,
        pub failing: Vec<String>,
    }

    impl RecordingRunner {
        pub fn failing_on(subcommands: &[&str]) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                failing: subcommands.iter().map(|s| s.to_string()).collect(),
            }
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for RecordingRunner {
        async fn run(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{} {}", program, args.join(" ")));
            let fails = args.iter().any(|a| self.failing.contains(a));
            Ok(CommandOutput {
                code: Some(if fails { 1 } else { 0 }),
                stdout: String::new(),
                stderr: if fails { "boom".to_string() } else { String::new() },
            })
        }
    }

    pub fn definition(dir: &std::path::Path) -> ServiceDefinition {
        let config = ServiceConfig::with_dirs(dir.join("config"), dir.join("data"));
        ServiceDefinition::for_database(
            PathBuf::from("/usr/local/bin/surreal"),
            &config,
            Credentials::new("altair", "S3cret-pass_word#1"),
        )
    }
}
