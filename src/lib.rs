pub mod clienv;
pub mod completions;
pub mod config;
pub mod connection;
pub mod credentials;
pub mod db;
pub mod error;
pub mod health;
pub mod installer;
pub mod links;
pub mod log_buffer;
pub mod manager;
pub mod process;
pub mod schema;
pub mod search;
pub mod status;

pub use config::ServiceConfig;
pub use connection::ConnectionManager;
pub use credentials::{CredentialManager, Credentials};
pub use db::DbConnection;
pub use error::{Result, ServiceError};
pub use installer::{platform_installer, ServiceInstaller};
pub use links::{Link, LinkedResource};
pub use manager::ServiceManager;
pub use search::SearchHit;
pub use status::{ServiceInfo, ServiceStatus};
