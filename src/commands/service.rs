use altair_db::status::ServiceInfo;

use super::{service_manager, with_spinner};

pub(crate) async fn cmd_status(json: bool) -> anyhow::Result<()> {
    tracing::trace!(json, "cmd_status invoked");
    let manager = service_manager()?;
    let info = manager.get_status().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    print_info(&info, manager.config().address(), manager.platform());
    println!("Log file:  {}", manager.config().log_file().display());
    Ok(())
}

fn print_info(info: &ServiceInfo, address: String, platform: Option<&str>) {
    println!("Status:    {}", info.status);
    println!("Address:   {address}");
    if let Some(version) = &info.version {
        println!("Version:   {version}");
    }
    if let Some(pid) = info.pid {
        println!("PID:       {pid}");
    }
    if let Some(started_at) = info.started_at {
        println!("Started:   {}", started_at.to_rfc3339());
    }
    if let Some(dir) = &info.data_dir {
        println!("Data dir:  {}", dir.display());
    }
    println!("Platform:  {}", platform.unwrap_or("direct process"));
    if let Some(error) = &info.error {
        println!("Error:     {error}");
    }
}

pub(crate) async fn cmd_start() -> anyhow::Result<()> {
    tracing::trace!("cmd_start invoked");
    let manager = service_manager()?;
    with_spinner(
        "Starting database service...",
        "Database service is running",
        manager.start(),
    )
    .await?;
    println!("Listening on {}", manager.config().base_url());
    Ok(())
}

pub(crate) async fn cmd_stop() -> anyhow::Result<()> {
    tracing::trace!("cmd_stop invoked");
    let manager = service_manager()?;
    with_spinner(
        "Stopping database service...",
        "Database service stopped",
        manager.stop(),
    )
    .await
}

pub(crate) async fn cmd_restart() -> anyhow::Result<()> {
    tracing::trace!("cmd_restart invoked");
    let manager = service_manager()?;
    with_spinner(
        "Restarting database service...",
        "Database service restarted",
        manager.restart(),
    )
    .await
}

pub(crate) async fn cmd_install() -> anyhow::Result<()> {
    tracing::trace!("cmd_install invoked");
    let manager = service_manager()?;
    with_spinner(
        "Installing database service...",
        "Database service installed",
        manager.install(),
    )
    .await?;
    println!(
        "Registered with {}. Credentials: {}",
        manager.platform().unwrap_or("the OS"),
        manager.credentials().file_path().display()
    );
    Ok(())
}

pub(crate) async fn cmd_uninstall() -> anyhow::Result<()> {
    tracing::trace!("cmd_uninstall invoked");
    let manager = service_manager()?;
    with_spinner(
        "Removing database service...",
        "Database service removed",
        manager.uninstall(),
    )
    .await
}

pub(crate) async fn cmd_enable() -> anyhow::Result<()> {
    tracing::trace!("cmd_enable invoked");
    let manager = service_manager()?;
    with_spinner(
        "Enabling autostart...",
        "Autostart enabled",
        manager.enable(),
    )
    .await
}

pub(crate) async fn cmd_disable() -> anyhow::Result<()> {
    tracing::trace!("cmd_disable invoked");
    let manager = service_manager()?;
    with_spinner(
        "Disabling autostart...",
        "Autostart disabled",
        manager.disable(),
    )
    .await
}
