pub(crate) mod completions;
pub(crate) mod credentials;
pub(crate) mod link;
pub(crate) mod search;
pub(crate) mod service;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use altair_db::config::ServiceConfig;
use altair_db::connection::ConnectionManager;
use altair_db::manager::ServiceManager;
use altair_db::process::ProcessOutput;
use indicatif::{ProgressBar, ProgressStyle};

/// Manager for CLI use. A process spawned here must outlive the CLI, so its
/// output goes to the service log file instead of a pipe.
pub(crate) fn service_manager() -> anyhow::Result<ServiceManager> {
    let config = ServiceConfig::load()?;
    let log_file = config.log_file();
    Ok(ServiceManager::new(config).with_output(ProcessOutput::File(log_file)))
}

pub(crate) async fn connection_manager() -> anyhow::Result<Arc<ConnectionManager>> {
    let service = Arc::new(service_manager()?);
    with_spinner(
        "Connecting to database...",
        "Connected",
        ConnectionManager::open(service),
    )
    .await
}

/// Run `work`, then close the connection whether or not it succeeded.
pub(crate) async fn closing<T, F>(connections: &ConnectionManager, work: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    let result = work.await;
    connections.close().await;
    result
}

fn create_progress_bar(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Drive `fut` behind a spinner, leaving `done` or the error on screen.
pub(crate) async fn with_spinner<T, F>(message: &str, done: &str, fut: F) -> anyhow::Result<T>
where
    F: Future<Output = altair_db::Result<T>>,
{
    let pb = create_progress_bar(message);
    match fut.await {
        Ok(value) => {
            pb.finish_with_message(done.to_string());
            Ok(value)
        }
        Err(e) => {
            pb.abandon_with_message(format!("Failed: {e}"));
            if e.is_offline() {
                eprintln!("The database service is unreachable. Try `altair-db start` or `altair-db status`.");
            }
            Err(e.into())
        }
    }
}
