use altair_db::connection::ConnectionManager;
use altair_db::links::{Direction, Metadata};
use anyhow::Context;

use crate::args::LinkCommands;

use super::{closing, connection_manager};

pub(crate) async fn cmd_link(command: LinkCommands) -> anyhow::Result<()> {
    tracing::trace!("cmd_link invoked");

    // parse before connecting so bad input fails fast
    let metadata = match &command {
        LinkCommands::Add {
            metadata: Some(raw),
            ..
        } => Some(parse_metadata(raw)?),
        _ => None,
    };

    let connections = connection_manager().await?;
    closing(&connections, run(&connections, command, metadata)).await
}

async fn run(
    connections: &ConnectionManager,
    command: LinkCommands,
    metadata: Option<Metadata>,
) -> anyhow::Result<()> {
    match command {
        LinkCommands::Add {
            source,
            target,
            link_type,
            created_by,
            ..
        } => {
            let link = connections
                .create_link(&source, &target, &link_type, metadata, created_by.as_deref())
                .await?;
            println!("Linked {} -[{}]-> {} ({})", link.source, link.link_type, link.target, link.id);
        }
        LinkCommands::Remove {
            source,
            target,
            link_type,
        } => {
            let removed = connections.remove_link(&source, &target, &link_type).await?;
            if removed == 0 {
                println!("No such link");
            } else {
                println!("Removed {removed} link(s)");
            }
        }
        LinkCommands::List { resource, json } => {
            let linked = connections.linked_resources(&resource).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&linked)?);
            } else if linked.is_empty() {
                println!("Nothing linked to {resource}");
            } else {
                for entry in &linked {
                    let arrow = match entry.direction {
                        Direction::Outgoing => "->",
                        Direction::Incoming => "<-",
                    };
                    println!(
                        "{arrow} {}  [{}]  {}",
                        entry.resource_id,
                        entry.link_type,
                        entry.created_at.to_rfc3339()
                    );
                }
            }
        }
    }
    Ok(())
}

fn parse_metadata(raw: &str) -> anyhow::Result<Metadata> {
    let value: serde_json::Value =
        serde_json::from_str(raw).context("--metadata must be valid JSON")?;
    match value {
        serde_json::Value::Object(map) => Ok(map),
        _ => anyhow::bail!("--metadata must be a JSON object"),
    }
}
