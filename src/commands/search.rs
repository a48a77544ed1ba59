use super::{closing, connection_manager};

pub(crate) async fn cmd_search(query: &str, limit: usize) -> anyhow::Result<()> {
    tracing::trace!(query = %query, limit, "cmd_search invoked");
    let connections = connection_manager().await?;

    let hits = closing(&connections, async {
        Ok(connections.search_all_with_limit(query, limit).await?)
    })
    .await?;
    tracing::trace!(hits = hits.len(), "Search results received");

    if hits.is_empty() {
        println!("No results for '{query}'");
        return Ok(());
    }

    for hit in &hits {
        println!("[{}] {}  ({})", hit.entity_type, hit.title, hit.id);
        if let Some(snippet) = &hit.snippet {
            println!("    {snippet}");
        }
    }
    println!("{} result(s)", hits.len());
    Ok(())
}
