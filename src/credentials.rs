//! Service credentials: generation and storage
//!
//! The database runs with a root user whose password is generated on first
//! start and reused afterwards. Credentials live in OS secure storage when it
//! is available (Keychain, Windows Credential Manager, Secret Service) and
//! otherwise in a JSON file with owner-only permissions:
//!
//! ```json
//! { "username": "altair", "password": "…", "created_at": "2026-01-01T00:00:00Z" }
//! ```
//!
//! The fallback file is re-checked on every read. If its mode is no longer
//! `0o600` the read fails with [`ServiceError::Security`] instead of trusting
//! the contents.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::ServiceConfig;
use crate::error::{Result, ServiceError};

pub const DEFAULT_USERNAME: &str = "altair";
pub const DEFAULT_PASSWORD_LENGTH: usize = 32;
pub const MIN_PASSWORD_LENGTH: usize = 16;

/// Owner read/write only
pub const CREDENTIAL_FILE_MODE: u32 = 0o600;

const UPPERCASE: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const LOWERCASE: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const DIGITS: &[u8] = b"0123456789";
// Safe inside unit files, plists and sc.exe command lines without quoting.
const SYMBOLS: &[u8] = b"-_.+=@#*?~";

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub created_at: DateTime<Utc>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            created_at: Utc::now(),
        }
    }

    pub fn masked_password(&self) -> &'static str {
        "********"
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.masked_password())
            .field("created_at", &self.created_at)
            .finish()
    }
}

impl fmt::Display for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.username, self.masked_password())
    }
}

/// Generate a password of `length` characters from a CSPRNG.
///
/// One character from each class (upper, lower, digit, symbol) is placed
/// first, the rest is drawn from the combined alphabet, and the whole buffer
/// is Fisher-Yates shuffled so the guaranteed characters have no fixed
/// position.
pub fn generate_secure_password(length: usize) -> Result<String> {
    if length < MIN_PASSWORD_LENGTH {
        return Err(ServiceError::InvalidPasswordLength {
            min: MIN_PASSWORD_LENGTH,
            actual: length,
        });
    }

    // ThreadRng is a ChaCha CSPRNG reseeded from the OS
    let mut rng = rand::rng();
    let classes = [UPPERCASE, LOWERCASE, DIGITS, SYMBOLS];
    let alphabet: Vec<u8> = classes.concat();

    let mut chars: Vec<u8> = Vec::with_capacity(length);
    for class in classes {
        chars.push(class[rng.random_range(0..class.len())]);
    }
    while chars.len() < length {
        chars.push(alphabet[rng.random_range(0..alphabet.len())]);
    }

    for i in (1..chars.len()).rev() {
        let j = rng.random_range(0..=i);
        chars.swap(i, j);
    }

    // every byte comes from an ASCII table
    Ok(chars.into_iter().map(char::from).collect())
}

/// Permission-restricted JSON credential file
pub struct CredentialFile {
    path: PathBuf,
}

impl CredentialFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> Result<Option<Credentials>> {
        if !self.path.exists() {
            return Ok(None);
        }

        self.verify_permissions()?;

        let content =
            fs::read_to_string(&self.path).map_err(|e| ServiceError::fs(&self.path, e))?;
        let credentials = serde_json::from_str(&content)?;
        Ok(Some(credentials))
    }

    pub fn write(&self, credentials: &Credentials) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| ServiceError::fs(parent, e))?;
        }

        let json = serde_json::to_string_pretty(credentials)?;
        write_owner_only(&self.path, json.as_bytes())
            .map_err(|e| ServiceError::fs(&self.path, e))?;
        restrict_permissions(&self.path)?;

        debug!(path = %self.path.display(), "Credentials written to fallback file");
        Ok(())
    }

    pub fn remove(&self) -> Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ServiceError::fs(&self.path, e)),
        }
    }

    #[cfg(unix)]
    fn verify_permissions(&self) -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let mode = fs::metadata(&self.path)
            .map_err(|e| ServiceError::fs(&self.path, e))?
            .permissions()
            .mode()
            & 0o777;
        if mode != CREDENTIAL_FILE_MODE {
            return Err(ServiceError::Security {
                path: self.path.clone(),
                mode,
                expected: CREDENTIAL_FILE_MODE,
            });
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn verify_permissions(&self) -> Result<()> {
        Ok(())
    }
}

/// Create or truncate `path` with mode 0600 from the start, so the secret is
/// never readable under the umask default.
#[cfg(unix)]
pub(crate) fn write_owner_only(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(CREDENTIAL_FILE_MODE)
        .open(path)?;
    file.write_all(bytes)
}

#[cfg(not(unix))]
pub(crate) fn write_owner_only(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    fs::write(path, bytes)
}

/// chmod 600, also applied to files that existed before the write
#[cfg(unix)]
pub(crate) fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(CREDENTIAL_FILE_MODE))
        .map_err(|e| ServiceError::fs(path, e))
}

/// Drop inherited ACEs and grant the current user read/write only
#[cfg(windows)]
pub(crate) fn restrict_permissions(path: &Path) -> Result<()> {
    let user = std::env::var("USERNAME")
        .map_err(|_| ServiceError::fs(path, "USERNAME is not set, cannot restrict ACL"))?;
    let output = std::process::Command::new("icacls")
        .arg(path)
        .args(["/inheritance:r", "/grant:r"])
        .arg(format!("{user}:(R,W)"))
        .output()
        .map_err(|e| ServiceError::fs(path, e))?;
    if !output.status.success() {
        return Err(ServiceError::fs(
            path,
            String::from_utf8_lossy(&output.stderr).trim(),
        ));
    }
    Ok(())
}

#[cfg(not(any(unix, windows)))]
pub(crate) fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

/// OS-level secret storage consulted before the fallback file.
pub trait SecretStore: Send + Sync {
    fn get(&self) -> Result<Option<Credentials>>;
    fn set(&self, credentials: &Credentials) -> Result<()>;
    /// True if an entry existed
    fn remove(&self) -> Result<bool>;
}

/// OS secure storage, one JSON entry per service
///
/// Keychain on macOS, Credential Manager on Windows and the Secret Service
/// (GNOME Keyring, KWallet) on Linux. All three persist across reboots.
#[cfg(feature = "keyring")]
pub struct KeyringStore {
    service: String,
}

#[cfg(feature = "keyring")]
impl KeyringStore {
    const ACCOUNT: &'static str = "credentials";

    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, Self::ACCOUNT)
            .map_err(|e| ServiceError::Io(std::io::Error::other(e)))
    }
}

#[cfg(feature = "keyring")]
impl SecretStore for KeyringStore {
    fn get(&self) -> Result<Option<Credentials>> {
        match self.entry()?.get_password() {
            Ok(secret) => Ok(Some(serde_json::from_str(&secret)?)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(ServiceError::Io(std::io::Error::other(e))),
        }
    }

    fn set(&self, credentials: &Credentials) -> Result<()> {
        let secret = serde_json::to_string(credentials)?;
        self.entry()?
            .set_password(&secret)
            .map_err(|e| ServiceError::Io(std::io::Error::other(e)))
    }

    fn remove(&self) -> Result<bool> {
        match self.entry()?.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(ServiceError::Io(std::io::Error::other(e))),
        }
    }
}

#[cfg(feature = "keyring")]
fn platform_store(config: &ServiceConfig) -> Option<Box<dyn SecretStore>> {
    Some(Box::new(KeyringStore::new(config.service_name.clone())))
}

#[cfg(not(feature = "keyring"))]
fn platform_store(_config: &ServiceConfig) -> Option<Box<dyn SecretStore>> {
    None
}

/// Secure storage first, permission-restricted file second.
pub struct CredentialManager {
    file: CredentialFile,
    secure: Option<Box<dyn SecretStore>>,
}

impl CredentialManager {
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            file: CredentialFile::new(config.credentials_file()),
            secure: platform_store(config),
        }
    }

    /// Manager that never touches OS secure storage
    pub fn file_only(path: PathBuf) -> Self {
        Self {
            file: CredentialFile::new(path),
            secure: None,
        }
    }

    pub fn with_secret_store(mut self, store: Box<dyn SecretStore>) -> Self {
        self.secure = Some(store);
        self
    }

    pub fn file_path(&self) -> &Path {
        self.file.path()
    }

    pub fn store_credentials(&self, username: &str, password: &str) -> Result<Credentials> {
        let credentials = Credentials::new(username, password);

        if let Some(secure) = &self.secure {
            match secure.set(&credentials) {
                Ok(()) => {
                    debug!("Credentials stored in OS secure storage");
                    // a stale file must not shadow the new entry if the store is later unreachable
                    if let Err(e) = self.file.remove() {
                        warn!("Failed to remove old credential file: {}", e);
                    }
                    return Ok(credentials);
                }
                Err(e) => debug!("Secure store failed, falling back to file: {}", e),
            }
        }

        self.file.write(&credentials)?;
        Ok(credentials)
    }

    pub fn get_credentials(&self) -> Result<Option<Credentials>> {
        if let Some(secure) = &self.secure {
            match secure.get() {
                Ok(Some(credentials)) => return Ok(Some(credentials)),
                Ok(None) => {}
                Err(e) => debug!("Secure store read failed, falling back to file: {}", e),
            }
        }

        self.file.read()
    }

    pub fn generate_and_store_credentials(
        &self,
        username: &str,
        password_length: usize,
    ) -> Result<Credentials> {
        let password = generate_secure_password(password_length)?;
        let credentials = self.store_credentials(username, &password)?;
        info!(username = %credentials.username, "Generated new service credentials");
        Ok(credentials)
    }

    /// Stored credentials, generating the default pair on first use.
    pub fn resolve(&self) -> Result<Credentials> {
        match self.get_credentials()? {
            Some(credentials) => Ok(credentials),
            None => self.generate_and_store_credentials(DEFAULT_USERNAME, DEFAULT_PASSWORD_LENGTH),
        }
    }

    /// Best-effort removal from every backend. Returns true if anything was removed.
    pub fn delete_credentials(&self) -> bool {
        let mut removed = false;

        if let Some(secure) = &self.secure {
            match secure.remove() {
                Ok(existed) => removed |= existed,
                Err(e) => debug!("Secure store delete failed: {}", e),
            }
        }

        match self.file.remove() {
            Ok(existed) => removed |= existed,
            Err(e) => warn!("Failed to remove credential file: {}", e),
        }

        removed
    }
}
