//! Typed, directed edges between otherwise unrelated entities
//!
//! Any module can link its records to any other module's records by id
//! (`quest:abc -[references]-> note:xyz`) without knowing the other schema.
//! The `(source, target, link_type)` triple is unique; a duplicate insert is
//! rejected by the `link_unique` index and reported as
//! [`ServiceError::LinkExists`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::{DbConnection, Vars};
use crate::error::{Result, ServiceError};

pub type Metadata = serde_json::Map<String, serde_json::Value>;

const LINK_FIELDS: &str = "<string> id AS id, source, target, link_type, metadata, \
                           <string> created_at AS created_at, created_by";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub id: String,
    pub source: String,
    pub target: String,
    pub link_type: String,
    pub metadata: Option<Metadata>,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// The queried resource is the link's source
    Outgoing,
    Incoming,
}

/// The far end of a link, seen from one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedResource {
    pub resource_id: String,
    pub direction: Direction,
    pub link_type: String,
    pub metadata: Option<Metadata>,
    pub created_at: DateTime<Utc>,
    pub created_by: Option<String>,
    pub link_id: String,
}

impl LinkedResource {
    fn from_link(link: Link, resource_id: &str) -> Self {
        let (other, direction) = if link.source == resource_id {
            (link.target, Direction::Outgoing)
        } else {
            (link.source, Direction::Incoming)
        };
        Self {
            resource_id: other,
            direction,
            link_type: link.link_type,
            metadata: link.metadata,
            created_at: link.created_at,
            created_by: link.created_by,
            link_id: link.id,
        }
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(ServiceError::InvalidLink(format!("{field} must not be empty")));
    }
    Ok(())
}

fn triple_vars(source: &str, target: &str, link_type: &str) -> Vars {
    let mut vars = Vars::new();
    vars.insert("source".into(), source.into());
    vars.insert("target".into(), target.into());
    vars.insert("link_type".into(), link_type.into());
    vars
}

/// Insert a link row, rejecting an existing `(source, target, link_type)`.
pub async fn create_link(
    db: &DbConnection,
    source: &str,
    target: &str,
    link_type: &str,
    metadata: Option<Metadata>,
    created_by: Option<&str>,
) -> Result<Link> {
    require("source", source)?;
    require("target", target)?;
    require("link_type", link_type)?;

    let mut vars = triple_vars(source, target, link_type);
    // Unset optionals are left out of SET so they stay NONE, not NULL.
    let mut assignments = vec![
        "source = $source",
        "target = $target",
        "link_type = $link_type",
    ];
    if let Some(metadata) = metadata {
        vars.insert("metadata".into(), serde_json::Value::Object(metadata));
        assignments.push("metadata = $metadata");
    }
    if let Some(created_by) = created_by {
        vars.insert("created_by".into(), created_by.into());
        assignments.push("created_by = $created_by");
    }

    let sql = format!(
        "CREATE link SET {} RETURN NONE;
         SELECT {LINK_FIELDS} FROM link
         WHERE source = $source AND target = $target AND link_type = $link_type;",
        assignments.join(", ")
    );

    let links: Vec<Link> = db.query(&sql, vars).await.map_err(|e| match e {
        ServiceError::Database(msg) if msg.contains("already contains") => {
            ServiceError::LinkExists {
                from: source.to_string(),
                to: target.to_string(),
                link_type: link_type.to_string(),
            }
        }
        other => other,
    })?;

    let link = links.into_iter().next().ok_or_else(|| {
        ServiceError::Database(format!("link {source} -> {target} not readable after create"))
    })?;
    debug!(source, target, link_type, id = %link.id, "Created link");
    Ok(link)
}

/// Delete the link(s) matching the triple. Returns how many were removed.
pub async fn remove_link(
    db: &DbConnection,
    source: &str,
    target: &str,
    link_type: &str,
) -> Result<usize> {
    let removed = db
        .count(
            "LET $rows = DELETE link
                 WHERE source = $source AND target = $target AND link_type = $link_type
                 RETURN BEFORE;
             RETURN array::len($rows);",
            triple_vars(source, target, link_type),
        )
        .await?;
    debug!(source, target, link_type, removed, "Removed link");
    Ok(removed)
}

/// Everything linked to `resource_id` in either direction, newest first.
pub async fn linked_resources(db: &DbConnection, resource_id: &str) -> Result<Vec<LinkedResource>> {
    let mut vars = Vars::new();
    vars.insert("resource".into(), resource_id.into());

    let mut links: Vec<Link> = db
        .query(
            &format!(
                "SELECT {LINK_FIELDS} FROM link WHERE source = $resource OR target = $resource"
            ),
            vars,
        )
        .await?;
    links.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    Ok(links
        .into_iter()
        .map(|link| LinkedResource::from_link(link, resource_id))
        .collect())
}
