//! Federated full-text search across the core entity tables
//!
//! Each table names its columns differently (`title`/`description`,
//! `name`/`description`, `title`/`content`). One query fans out to all of
//! them in a single request and the hits come back in one shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::db::{DbConnection, Vars};
use crate::error::Result;
use crate::schema::{SearchTable, SEARCH_TABLES};

pub const DEFAULT_SEARCH_LIMIT: usize = 50;
const SNIPPET_CHARS: usize = 160;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    /// Originating table, e.g. `quest` or `note`
    pub entity_type: String,
    pub title: String,
    pub snippet: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct Row {
    id: String,
    title: String,
    snippet: Option<String>,
    updated_at: DateTime<Utc>,
}

fn select_for(t: &SearchTable) -> String {
    format!(
        "SELECT <string> id AS id, \
                <string> ({title} ?? '') AS title, \
                (IF type::is::string({body}) THEN {body} ELSE NONE END) AS snippet, \
                <string> (updated_at ?? created_at ?? d'1970-01-01T00:00:00Z') AS updated_at \
         FROM {table} WHERE {title} @0@ $query OR {body} @1@ $query;",
        table = t.table,
        title = t.title_field,
        body = t.body_field,
    )
}

fn snippet(text: String) -> Option<String> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if text.chars().count() <= SNIPPET_CHARS {
        return Some(text.to_string());
    }
    let cut: String = text.chars().take(SNIPPET_CHARS).collect();
    Some(format!("{}…", cut.trim_end()))
}

/// Hits for `query` from every searchable table, most recently updated first.
pub async fn search_all(db: &DbConnection, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
    let query = query.trim();
    if query.is_empty() || limit == 0 {
        return Ok(Vec::new());
    }

    let sql: String = SEARCH_TABLES.iter().map(select_for).collect();
    let mut vars = Vars::new();
    vars.insert("query".into(), query.into());

    let per_table: Vec<Vec<Row>> = db.query_each(&sql, vars).await?;

    let mut hits: Vec<SearchHit> = SEARCH_TABLES
        .iter()
        .zip(per_table)
        .flat_map(|(t, rows)| {
            rows.into_iter().map(move |row| SearchHit {
                id: row.id,
                entity_type: t.table.to_string(),
                title: row.title,
                snippet: row.snippet.and_then(snippet),
                updated_at: row.updated_at,
            })
        })
        .collect();

    hits.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
    hits.truncate(limit);

    debug!(query, hits = hits.len(), "Search finished");
    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::credentials::Credentials;
    use crate::db::{Connector, MemoryConnector};
    use crate::schema::bootstrap_script;
    use serde_json::json;

    async fn seeded() -> DbConnection {
        let config = ServiceConfig::with_dirs("/cfg", "/data");
        let db = MemoryConnector
            .open(&config, &Credentials::new("altair", "unused"))
            .await
            .unwrap();
        db.execute(&bootstrap_script()).await.unwrap();

        db.create("quest", json!({ "title": "Water the garden", "description": "tomatoes first" }))
            .await
            .unwrap();
        db.create("note", json!({ "title": "Seeds", "content": "Garden plan for spring" }))
            .await
            .unwrap();
        db.create("item", json!({ "name": "Garden hose", "description": "20m" }))
            .await
            .unwrap();
        db.create("routine", json!({ "name": "Morning run", "description": "5k" }))
            .await
            .unwrap();
        db
    }

    #[tokio::test]
    async fn matches_across_tables_with_normalized_shape() {
        let db = seeded().await;
        let hits = search_all(&db, "garden", DEFAULT_SEARCH_LIMIT).await.unwrap();

        let mut types: Vec<&str> = hits.iter().map(|h| h.entity_type.as_str()).collect();
        types.sort();
        assert_eq!(types, vec!["item", "note", "quest"]);

        let note = hits.iter().find(|h| h.entity_type == "note").unwrap();
        assert_eq!(note.title, "Seeds");
        assert_eq!(note.snippet.as_deref(), Some("Garden plan for spring"));
        assert!(note.id.starts_with("note:"));
    }

    #[tokio::test]
    async fn newest_first_and_capped() {
        let db = seeded().await;
        let hits = search_all(&db, "garden", 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].updated_at >= hits[1].updated_at);
    }

    #[tokio::test]
    async fn records_with_non_text_bodies_do_not_break_search() {
        let db = seeded().await;
        db.create("item", json!({ "name": "Garden shears", "description": { "len": 20 } }))
            .await
            .unwrap();

        let hits = search_all(&db, "garden", DEFAULT_SEARCH_LIMIT).await.unwrap();
        let shears = hits.iter().find(|h| h.title == "Garden shears").unwrap();
        assert_eq!(shears.snippet, None);
        assert_eq!(hits.len(), 4);
    }

    #[tokio::test]
    async fn blank_query_returns_nothing() {
        let db = seeded().await;
        assert!(search_all(&db, "   ", 10).await.unwrap().is_empty());
    }

    #[test]
    fn long_snippets_are_truncated() {
        let long = "x".repeat(500);
        let cut = snippet(long).unwrap();
        assert_eq!(cut.chars().count(), SNIPPET_CHARS + 1);
        assert!(snippet("  ".to_string()).is_none());
    }
}
