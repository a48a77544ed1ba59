use altair_db::credentials::CredentialManager;
use altair_db::manager::ServiceManager;
use anyhow::bail;

use crate::args::CredentialCommands;

use super::{service_manager, with_spinner};

pub(crate) async fn cmd_credentials(command: CredentialCommands) -> anyhow::Result<()> {
    tracing::trace!("cmd_credentials invoked");
    let manager = service_manager()?;

    match command {
        CredentialCommands::Show => show(manager.credentials()),
        CredentialCommands::Generate { force, length } => generate(&manager, force, length).await,
        CredentialCommands::Delete => delete(&manager),
    }
}

fn show(credentials: &CredentialManager) -> anyhow::Result<()> {
    match credentials.get_credentials()? {
        Some(stored) => {
            println!("Username:  {}", stored.username);
            println!("Password:  {}", stored.masked_password());
            println!("Created:   {}", stored.created_at.to_rfc3339());
            println!("Fallback:  {}", credentials.file_path().display());
        }
        None => println!("No stored credentials"),
    }
    Ok(())
}

async fn generate(manager: &ServiceManager, force: bool, length: usize) -> anyhow::Result<()> {
    if !force && manager.credentials().get_credentials()?.is_some() {
        bail!("credentials already exist; pass --force to replace them");
    }

    let stored = with_spinner(
        "Rotating database password...",
        "Password rotated",
        manager.rotate_credentials(length),
    )
    .await?;
    println!("New credentials stored for {}", stored.username);
    Ok(())
}

fn delete(manager: &ServiceManager) -> anyhow::Result<()> {
    let storage = &manager.config().storage_dir;
    if storage.exists() {
        bail!(
            "the database in {} was created with the stored password; \
             use `credentials generate --force` to rotate it instead",
            storage.display()
        );
    }

    if manager.credentials().delete_credentials() {
        println!("Credentials deleted. New ones are generated on next start.");
    } else {
        println!("No stored credentials");
    }
    Ok(())
}
