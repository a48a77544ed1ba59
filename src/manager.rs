//! Lifecycle of the shared database service
//!
//! ```text
//! not_installed ──install──▶ stopped ──start──▶ starting ──probe ok──▶ running
//!                               ▲                                        │
//!                               └────────────────stop────────────────────┘
//! ```
//!
//! When the service is registered with the OS, `start`/`stop` go through the
//! platform installer. Otherwise the database binary is spawned directly and
//! supervised by this process. Once it answers its health check its PID and
//! start marker are recorded so a later invocation can still stop it, and a
//! PID that has since been reused is never signalled.
//!
//! Only one process can bind the configured port. If two applications race to
//! spawn the service, the loser's child exits on bind failure and its
//! readiness loop succeeds against the winner; the loser records nothing.
//! There is no cross-process lock.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::clienv;
use crate::config::ServiceConfig;
use crate::credentials::{self, CredentialManager, Credentials, DEFAULT_USERNAME};
use crate::db::{Connector, DbConnection, RemoteConnector};
use crate::error::{Result, ServiceError};
use crate::health::{HealthProbe, HttpHealthProbe, ProbeOutcome};
use crate::installer::{self, ServiceDefinition, ServiceInstaller, RESTART_DELAY};
use crate::log_buffer::LogBuffer;
use crate::process::{self, ProcessOutput, SupervisedProcess, STOP_GRACE};
use crate::status::{ServiceInfo, ServiceStatus};

pub const POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const MAX_START_ATTEMPTS: u32 = 30;

#[cfg(windows)]
const DB_BINARY: &str = "surreal.exe";
#[cfg(not(windows))]
const DB_BINARY: &str = "surreal";

pub struct ServiceManager {
    config: ServiceConfig,
    credentials: CredentialManager,
    installer: Option<Arc<dyn ServiceInstaller>>,
    probe: Arc<dyn HealthProbe>,
    connector: Arc<dyn Connector>,
    log_buffer: Arc<LogBuffer>,
    output: ProcessOutput,
    binary: Option<PathBuf>,
    poll_interval: Duration,
    max_attempts: u32,
    restart_delay: Duration,
    process: Mutex<Option<SupervisedProcess>>,
    connection: Mutex<Option<DbConnection>>,
    /// Serializes start/stop within this process
    lifecycle: Mutex<()>,
    starting: AtomicBool,
}

/// Contents of the PID file: the process and its start marker.
#[derive(Debug, PartialEq, Eq)]
struct PidRecord {
    pid: u32,
    marker: Option<String>,
}

impl PidRecord {
    fn parse(contents: &str) -> Option<Self> {
        let mut lines = contents.lines();
        let pid = lines.next()?.trim().parse().ok()?;
        let marker = lines
            .next()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty());
        Some(Self { pid, marker })
    }

    /// Still the process that was written down, not a reused PID
    fn is_current(&self) -> bool {
        self.marker.is_some() && process::process_start_marker(self.pid) == self.marker
    }
}

impl ServiceManager {
    /// Manager wired to the real platform installer, HTTP probe and client.
    pub fn new(config: ServiceConfig) -> Self {
        let installer = match installer::platform_installer(&config) {
            Ok(installer) => Some(installer),
            Err(e) => {
                debug!("No OS service integration: {}", e);
                None
            }
        };

        Self {
            credentials: CredentialManager::new(&config),
            installer,
            probe: Arc::new(HttpHealthProbe::new()),
            connector: Arc::new(RemoteConnector),
            log_buffer: Arc::new(LogBuffer::default()),
            output: ProcessOutput::default(),
            binary: clienv::db_binary_override(),
            poll_interval: POLL_INTERVAL,
            max_attempts: MAX_START_ATTEMPTS,
            restart_delay: RESTART_DELAY,
            process: Mutex::new(None),
            connection: Mutex::new(None),
            lifecycle: Mutex::new(()),
            starting: AtomicBool::new(false),
            config,
        }
    }

    pub fn with_credentials(mut self, credentials: CredentialManager) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_installer(mut self, installer: Option<Arc<dyn ServiceInstaller>>) -> Self {
        self.installer = installer;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = connector;
        self
    }

    pub fn with_output(mut self, output: ProcessOutput) -> Self {
        self.output = output;
        self
    }

    pub fn with_binary(mut self, binary: PathBuf) -> Self {
        self.binary = Some(binary);
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn credentials(&self) -> &CredentialManager {
        &self.credentials
    }

    /// Native mechanism in use, if any (`systemd`, `launchd`, `windows-service`)
    pub fn platform(&self) -> Option<&'static str> {
        self.installer.as_ref().map(|i| i.platform())
    }

    /// Detailed result of one health probe.
    pub async fn probe(&self) -> ProbeOutcome {
        self.probe.probe(&self.config.health_url()).await
    }

    /// Never fails: every probe failure reads as "not running".
    pub async fn is_running(&self) -> bool {
        self.probe().await.is_healthy()
    }

    pub async fn is_installed(&self) -> Result<bool> {
        match &self.installer {
            Some(installer) => installer.is_installed().await,
            None => Ok(false),
        }
    }

    fn require_installer(&self) -> Result<&Arc<dyn ServiceInstaller>> {
        self.installer.as_ref().ok_or_else(installer::unsupported)
    }

    pub async fn get_status(&self) -> ServiceInfo {
        match self.collect_status().await {
            Ok(info) => info,
            Err(e) => {
                warn!("Failed to determine service status: {}", e);
                let mut info = ServiceInfo::error(e.to_string());
                info.data_dir = Some(self.config.data_dir.clone());
                info.port = Some(self.config.port);
                info
            }
        }
    }

    async fn collect_status(&self) -> Result<ServiceInfo> {
        let mut info = if self.is_running().await {
            let mut info = ServiceInfo::new(ServiceStatus::Running);
            info.version = self.probe.version(&self.config.version_url()).await;

            let process = self.process.lock().await;
            match process.as_ref().filter(|p| !p.has_exited()) {
                Some(p) => {
                    info.pid = p.pid();
                    info.started_at = Some(p.started_at());
                }
                None => {
                    info.pid = self
                        .read_pid_file()
                        .filter(PidRecord::is_current)
                        .map(|r| r.pid)
                }
            }
            info
        } else if self.starting.load(Ordering::SeqCst) {
            ServiceInfo::new(ServiceStatus::Starting)
        } else if self.is_installed().await? {
            ServiceInfo::new(ServiceStatus::Stopped)
        } else {
            ServiceInfo::new(ServiceStatus::NotInstalled)
        };

        info.data_dir = Some(self.config.data_dir.clone());
        info.port = Some(self.config.port);
        Ok(info)
    }

    /// Bring the service up and wait until it answers its health check.
    pub async fn start(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;

        if self.is_running().await {
            debug!("Database service already running");
            return Ok(());
        }

        self.starting.store(true, Ordering::SeqCst);
        let result = self.bring_up().await;
        self.starting.store(false, Ordering::SeqCst);
        result
    }

    async fn bring_up(&self) -> Result<()> {
        if self.is_installed().await? {
            info!("Starting database through {}", self.platform().unwrap_or("os service"));
            self.require_installer()?.start().await?;
            return self.wait_for_service(self.max_attempts).await;
        }

        self.spawn_direct().await?;
        self.wait_for_service(self.max_attempts).await?;
        self.record_spawned().await
    }

    /// Record the PID of a child that is serving; forget one that lost the port.
    async fn record_spawned(&self) -> Result<()> {
        let mut tracked = self.process.lock().await;
        match tracked.as_ref() {
            Some(process) if process.has_exited() => {
                info!("Another instance is serving the database, releasing exited process");
                *tracked = None;
            }
            Some(process) => {
                if let Some(pid) = process.pid() {
                    self.write_pid_file(pid)?;
                }
            }
            None => {}
        }
        Ok(())
    }

    async fn spawn_direct(&self) -> Result<()> {
        let program = self.resolve_binary()?;
        let credentials = self.credentials.resolve()?;
        self.ensure_dirs()?;

        let definition = ServiceDefinition::for_database(program, &self.config, credentials);
        info!(
            program = %definition.program.display(),
            address = %self.config.address(),
            "Spawning database process"
        );
        let process = SupervisedProcess::spawn(
            &definition.program,
            &definition.args_with_credentials(),
            &self.output,
            &self.log_buffer,
        )?;

        if let Some(pid) = process.pid() {
            self.write_pid_file(pid)?;
        }
        *self.process.lock().await = Some(process);
        Ok(())
    }

    /// Poll the health endpoint until it succeeds or `max_attempts` polls fail.
    pub async fn wait_for_service(&self, max_attempts: u32) -> Result<()> {
        let mut exit_reported = false;

        for attempt in 1..=max_attempts {
            if self.is_running().await {
                info!(attempt, "Database service is ready");
                return Ok(());
            }

            if !exit_reported {
                if let Some(exit) = self.process.lock().await.as_ref().and_then(|p| p.exit()) {
                    // may have lost the port to another instance; keep polling
                    warn!("Database process exited early: {:?}", exit);
                    exit_reported = true;
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(self.poll_interval).await;
            }
        }

        Err(ServiceError::Timeout {
            attempts: max_attempts,
        })
    }

    pub async fn stop(&self) -> Result<()> {
        self.close_connection().await;
        let _lifecycle = self.lifecycle.lock().await;

        if self.is_installed().await? {
            info!("Stopping database through {}", self.platform().unwrap_or("os service"));
            return self.require_installer()?.stop().await;
        }

        let tracked = self.process.lock().await.take();
        if let Some(mut process) = tracked {
            let exit = process.stop(STOP_GRACE).await;
            info!(?exit, "Database process stopped");
        } else if let Some(record) = self.read_pid_file() {
            if !record.is_current() {
                warn!(pid = record.pid, "Recorded PID no longer belongs to the database, not signalling it");
            } else if process::terminate_pid(record.pid) {
                info!(pid = record.pid, "Sent stop signal to database process");
            } else {
                debug!(pid = record.pid, "Recorded database process is already gone");
            }
        } else {
            debug!("No database process to stop");
        }

        self.remove_pid_file();
        Ok(())
    }

    /// Replace the root password with a freshly generated one.
    ///
    /// `surreal start` only creates the root user on an empty store, so when
    /// the database already holds data the password is changed inside it
    /// first, signed in with the current credentials. Only then is the new
    /// pair stored.
    pub async fn rotate_credentials(&self, password_length: usize) -> Result<Credentials> {
        let password = credentials::generate_secure_password(password_length)?;
        let username = match self.credentials.get_credentials()? {
            Some(current) => current.username,
            None => DEFAULT_USERNAME.to_string(),
        };

        if self.config.storage_dir.exists() {
            let db = self.get_connection().await?;
            // generated passwords never contain quotes or backslashes
            db.execute(&format!(
                "DEFINE USER OVERWRITE `{username}` ON ROOT PASSWORD '{password}' ROLES OWNER;"
            ))
            .await?;
            self.close_connection().await;
            info!(username = %username, "Root password changed in the database");
        }

        self.credentials.store_credentials(&username, &password)
    }

    pub async fn restart(&self) -> Result<()> {
        self.stop().await?;
        tokio::time::sleep(self.restart_delay).await;
        self.start().await
    }

    /// Register the database as an OS service using the stored credentials.
    pub async fn install(&self) -> Result<()> {
        let installer = self.require_installer()?;
        let program = self.resolve_binary()?;
        let credentials = self.credentials.resolve()?;
        self.ensure_dirs()?;

        let definition = ServiceDefinition::for_database(program, &self.config, credentials);
        installer.install(&definition).await?;
        info!(platform = installer.platform(), "Database service installed");
        Ok(())
    }

    pub async fn uninstall(&self) -> Result<()> {
        self.close_connection().await;
        self.require_installer()?.uninstall().await
    }

    pub async fn enable(&self) -> Result<()> {
        self.require_installer()?.enable().await
    }

    pub async fn disable(&self) -> Result<()> {
        self.require_installer()?.disable().await
    }

    /// Cached connection, starting the service and signing in on first use.
    pub async fn get_connection(&self) -> Result<DbConnection> {
        let mut cached = self.connection.lock().await;
        if let Some(connection) = cached.as_ref() {
            return Ok(connection.clone());
        }

        if !self.is_running().await {
            info!("Database service not running, starting it");
            self.start().await?;
        }

        let credentials = self.credentials.resolve()?;
        let connection = self.connector.open(&self.config, &credentials).await?;
        *cached = Some(connection.clone());
        Ok(connection)
    }

    pub async fn close_connection(&self) {
        if self.connection.lock().await.take().is_some() {
            debug!("Closed cached database connection");
        }
    }

    /// Last `n` lines captured from a directly spawned process.
    pub fn logs(&self, n: usize) -> Vec<String> {
        self.log_buffer.tail(n)
    }

    /// Database executable: explicit override, then PATH, then the bundled copy.
    pub fn resolve_binary(&self) -> Result<PathBuf> {
        if let Some(path) = &self.binary {
            if !path.is_file() {
                return Err(ServiceError::fs(path, "database executable not found"));
            }
            return Ok(path.clone());
        }

        if let Ok(path) = which::which(DB_BINARY) {
            debug!(path = %path.display(), "Using database executable from PATH");
            return Ok(path);
        }

        let bundled = self.config.bin_dir().join(DB_BINARY);
        if !bundled.is_file() {
            return Err(ServiceError::fs(
                &bundled,
                "database executable not found on PATH or in the bundled location",
            ));
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;

            let mode = std::fs::metadata(&bundled)
                .map_err(|e| ServiceError::fs(&bundled, e))?
                .permissions()
                .mode();
            if mode & 0o111 == 0 {
                std::fs::set_permissions(&bundled, std::fs::Permissions::from_mode(0o755))
                    .map_err(|e| ServiceError::fs(&bundled, e))?;
            }
        }

        debug!(path = %bundled.display(), "Using bundled database executable");
        Ok(bundled)
    }

    fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            &self.config.data_dir,
            &self.config.storage_dir,
            &self.config.log_dir(),
        ] {
            std::fs::create_dir_all(dir).map_err(|e| ServiceError::fs(dir, e))?;
        }
        Ok(())
    }

    fn write_pid_file(&self, pid: u32) -> Result<()> {
        let path = self.config.pid_file();
        let marker = process::process_start_marker(pid).unwrap_or_default();
        std::fs::write(&path, format!("{pid}\n{marker}\n")).map_err(|e| ServiceError::fs(&path, e))
    }

    fn read_pid_file(&self) -> Option<PidRecord> {
        std::fs::read_to_string(self.config.pid_file())
            .ok()
            .and_then(|s| PidRecord::parse(&s))
    }

    fn remove_pid_file(&self) {
        let path = self.config.pid_file();
        if let Err(e) = std::fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::db::Vars;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    fn with_fakes(dir: &TempDir) -> (ServiceManager, Arc<FakeProbe>, Arc<FakeInstaller>) {
        let probe = Arc::new(FakeProbe::default());
        let installer = Arc::new(FakeInstaller::installed(probe.running.clone()));
        let manager = manager(dir.path())
            .with_probe(probe.clone())
            .with_installer(Some(installer.clone()));
        (manager, probe, installer)
    }

    #[tokio::test]
    async fn concurrent_starts_delegate_once() {
        let dir = TempDir::new().unwrap();
        let (manager, _probe, installer) = with_fakes(&dir);

        let (a, b) = tokio::join!(manager.start(), manager.start());
        a.unwrap();
        b.unwrap();
        assert_eq!(installer.starts(), 1);

        manager.start().await.unwrap();
        assert_eq!(installer.starts(), 1);
    }

    #[tokio::test]
    async fn get_connection_auto_starts_and_waits_for_readiness() {
        let dir = TempDir::new().unwrap();
        let probe = Arc::new(FakeProbe::healthy_from(3));
        let installer = Arc::new(FakeInstaller::installed(Arc::new(AtomicBool::new(false))));
        let manager = manager(dir.path())
            .with_probe(probe.clone())
            .with_installer(Some(installer.clone()));

        let connection = manager.get_connection().await.unwrap();
        connection.execute("INFO FOR DB;").await.unwrap();

        assert_eq!(installer.starts(), 1);
        assert_eq!(probe.calls(), 3);
    }

    #[tokio::test]
    async fn connection_is_cached_until_closed() {
        let dir = TempDir::new().unwrap();
        let (manager, probe, _installer) = with_fakes(&dir);
        probe.running.store(true, Ordering::SeqCst);

        let first = manager.get_connection().await.unwrap();
        let second = manager.get_connection().await.unwrap();
        assert!(first.same_handle(&second));

        manager.close_connection().await;
        let third = manager.get_connection().await.unwrap();
        assert!(!first.same_handle(&third));
    }

    #[tokio::test]
    async fn wait_for_service_times_out() {
        let dir = TempDir::new().unwrap();
        let manager = manager(dir.path()).with_probe(Arc::new(FakeProbe::default()));

        let err = manager.wait_for_service(3).await.unwrap_err();
        assert!(matches!(err, ServiceError::Timeout { attempts: 3 }));
    }

    #[tokio::test]
    async fn is_running_is_false_against_closed_port() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let dir = TempDir::new().unwrap();
        let config = ServiceConfig::with_dirs(dir.path(), dir.path()).with_port(port);
        let manager = ServiceManager::new(config).with_installer(None);
        assert!(!manager.is_running().await);
    }

    #[tokio::test]
    async fn status_reflects_probe_and_registration() {
        let dir = TempDir::new().unwrap();
        let (manager, probe, installer) = with_fakes(&dir);

        let info = manager.get_status().await;
        assert_eq!(info.status, ServiceStatus::Stopped);
        assert_eq!(info.port, Some(8000));

        probe.running.store(true, Ordering::SeqCst);
        let info = manager.get_status().await;
        assert_eq!(info.status, ServiceStatus::Running);
        assert_eq!(info.version.as_deref(), Some("surrealdb-2.3.7"));

        probe.running.store(false, Ordering::SeqCst);
        installer.installed.store(false, Ordering::SeqCst);
        assert_eq!(manager.get_status().await.status, ServiceStatus::NotInstalled);
    }

    #[tokio::test]
    async fn status_errors_are_reported_not_raised() {
        let dir = TempDir::new().unwrap();
        let installer = FakeInstaller {
            broken: true,
            ..FakeInstaller::default()
        };
        let manager = manager(dir.path())
            .with_probe(Arc::new(FakeProbe::default()))
            .with_installer(Some(Arc::new(installer)));

        let info = manager.get_status().await;
        assert_eq!(info.status, ServiceStatus::Error);
        assert!(info.error.unwrap().contains("bus unavailable"));
    }

    #[tokio::test]
    async fn stop_delegates_and_drops_connection() {
        let dir = TempDir::new().unwrap();
        let (manager, probe, installer) = with_fakes(&dir);
        probe.running.store(true, Ordering::SeqCst);

        let before = manager.get_connection().await.unwrap();
        manager.stop().await.unwrap();
        assert_eq!(installer.stops.load(Ordering::SeqCst), 1);
        assert!(!manager.is_running().await);

        manager.restart().await.unwrap();
        let after = manager.get_connection().await.unwrap();
        assert!(!before.same_handle(&after));
    }

    #[tokio::test]
    async fn install_requires_an_installer() {
        let dir = TempDir::new().unwrap();
        let manager = manager(dir.path());
        assert!(matches!(
            manager.install().await,
            Err(ServiceError::UnsupportedPlatform(_))
        ));
        assert!(matches!(
            manager.enable().await,
            Err(ServiceError::UnsupportedPlatform(_))
        ));
    }

    #[tokio::test]
    async fn install_stores_credentials_and_registers() {
        let dir = TempDir::new().unwrap();
        let binary = dir.path().join("surreal");
        std::fs::write(&binary, "").unwrap();
        let (manager, _probe, installer) = with_fakes(&dir);
        installer.installed.store(false, Ordering::SeqCst);
        let manager = manager.with_binary(binary);

        manager.install().await.unwrap();
        assert!(manager.is_installed().await.unwrap());
        assert!(manager.credentials().get_credentials().unwrap().is_some());
    }

    #[tokio::test]
    async fn status_reports_a_start_in_flight() {
        let dir = TempDir::new().unwrap();
        let (manager, _probe, _installer) = with_fakes(&dir);

        let (during, started) = tokio::join!(
            async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                manager.get_status().await.status
            },
            manager.start()
        );
        started.unwrap();
        assert_eq!(during, ServiceStatus::Starting);
        assert_eq!(manager.get_status().await.status, ServiceStatus::Running);
    }

    #[tokio::test]
    async fn rotation_changes_the_password_inside_an_existing_database() {
        let dir = TempDir::new().unwrap();
        let (manager, probe, _installer) = with_fakes(&dir);
        probe.running.store(true, Ordering::SeqCst);
        std::fs::create_dir_all(&manager.config().storage_dir).unwrap();

        let old = manager.credentials().resolve().unwrap();
        let db = manager.get_connection().await.unwrap();
        let rotated = manager.rotate_credentials(24).await.unwrap();

        assert_eq!(rotated.username, old.username);
        assert_ne!(rotated.password, old.password);
        assert_eq!(rotated.password.len(), 24);
        assert_eq!(
            manager.credentials().get_credentials().unwrap(),
            Some(rotated)
        );

        let root: Vec<serde_json::Value> = db.query("INFO FOR ROOT;", Vars::new()).await.unwrap();
        assert!(root[0]["users"].get("altair").is_some());
        // signed in with the old password, so it is not reused
        assert!(!manager.get_connection().await.unwrap().same_handle(&db));
    }

    #[tokio::test]
    async fn rotation_without_data_only_stores() {
        let dir = TempDir::new().unwrap();
        // not running and no executable: any connect attempt would fail
        let manager = manager(dir.path())
            .with_probe(Arc::new(FakeProbe::default()))
            .with_binary(dir.path().join("missing/surreal"));

        let rotated = manager.rotate_credentials(32).await.unwrap();
        assert_eq!(rotated.username, DEFAULT_USERNAME);
        assert_eq!(
            manager.credentials().get_credentials().unwrap(),
            Some(rotated)
        );
        assert!(!manager.config().storage_dir.exists());
    }

    #[test]
    #[cfg(unix)]
    fn bundled_binary_lives_under_the_configured_data_dir() {
        use std::os::unix::fs::PermissionsExt;

        if which::which(DB_BINARY).is_ok() {
            // PATH wins; nothing to check here
            return;
        }
        let dir = TempDir::new().unwrap();
        let manager = manager(dir.path());
        let bundled = manager.config().bin_dir().join(DB_BINARY);
        std::fs::create_dir_all(bundled.parent().unwrap()).unwrap();
        std::fs::write(&bundled, "").unwrap();
        std::fs::set_permissions(&bundled, std::fs::Permissions::from_mode(0o644)).unwrap();

        assert_eq!(manager.resolve_binary().unwrap(), bundled);
        let mode = std::fs::metadata(&bundled).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }

    #[test]
    fn pid_record_parses_marker_line() {
        assert_eq!(
            PidRecord::parse("4242\n98765\n"),
            Some(PidRecord {
                pid: 4242,
                marker: Some("98765".into())
            })
        );
        let bare = PidRecord::parse("4242").unwrap();
        assert_eq!(bare.marker, None);
        assert!(!bare.is_current());
        assert!(PidRecord::parse("garbage").is_none());
    }

    #[test]
    fn missing_override_binary_is_a_filesystem_error() {
        let dir = TempDir::new().unwrap();
        let manager = manager(dir.path()).with_binary(dir.path().join("nope/surreal"));
        assert!(matches!(
            manager.resolve_binary(),
            Err(ServiceError::FileSystem { .. })
        ));
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn direct_spawn_is_supervised_and_stoppable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let binary = dir.path().join("surreal");
        std::fs::write(&binary, "#!/bin/sh\necho \"listening $2\"\nexec sleep 30\n").unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();

        let manager = manager(dir.path())
            .with_probe(Arc::new(FakeProbe::healthy_from(2)))
            .with_binary(binary);

        manager.start().await.unwrap();
        let pid_file = manager.config().pid_file();

        for _ in 0..50 {
            if !manager.logs(10).is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(manager.logs(10)[0].starts_with("[stdout] listening --bind"));
        assert!(pid_file.exists());

        let info = manager.get_status().await;
        assert_eq!(info.status, ServiceStatus::Running);
        assert!(info.pid.is_some());
        assert!(info.started_at.is_some());

        manager.stop().await.unwrap();
        assert!(!pid_file.exists());
        assert!(manager.process.lock().await.is_none());
    }

    #[cfg(unix)]
    fn script(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.path().join(name).join("surreal");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn losing_spawn_keeps_the_winner_recorded_and_stoppable() {
        let dir = TempDir::new().unwrap();

        let winner = manager(dir.path())
            .with_probe(Arc::new(FakeProbe::healthy_from(2)))
            .with_binary(script(&dir, "winner", "exec sleep 30"));
        winner.start().await.unwrap();
        let winner_pid = winner.process.lock().await.as_ref().unwrap().pid().unwrap();

        // child exits at once, as on a taken port; the winner answers later polls
        let loser = manager(dir.path())
            .with_probe(Arc::new(FakeProbe::healthy_from(10)))
            .with_binary(script(&dir, "loser", "exit 1"));
        loser.start().await.unwrap();

        assert!(loser.process.lock().await.is_none());
        let record = loser.read_pid_file().unwrap();
        assert_eq!(record.pid, winner_pid);
        assert!(record.is_current());

        // a later invocation holding no handle stops the real service
        let later = manager(dir.path()).with_probe(Arc::new(FakeProbe::default()));
        later.stop().await.unwrap();

        let mut process = winner.process.lock().await.take().unwrap();
        let exit = tokio::time::timeout(Duration::from_secs(5), process.wait())
            .await
            .unwrap();
        assert_ne!(exit, crate::process::ProcessExit::Exited(Some(0)));
        assert!(!later.config().pid_file().exists());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn reused_pid_is_never_signalled() {
        let dir = TempDir::new().unwrap();
        let manager = manager(dir.path());
        let mut bystander = std::process::Command::new("sleep").arg("30").spawn().unwrap();

        std::fs::create_dir_all(&manager.config().data_dir).unwrap();
        std::fs::write(
            manager.config().pid_file(),
            format!("{}\nnot-its-start-time\n", bystander.id()),
        )
        .unwrap();

        manager.stop().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(bystander.try_wait().unwrap().is_none());
        assert!(!manager.config().pid_file().exists());
        bystander.kill().unwrap();
        bystander.wait().unwrap();
    }
}
