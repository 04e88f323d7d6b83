use crate::cli::Command;
use anyhow::{anyhow, Context};
use linkstore_core::ShortCode;
use linkstore_storage::LinkStore;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Runs one subcommand against an opened store and returns its JSON output.
pub async fn run(store: &LinkStore, command: Command) -> anyhow::Result<Value> {
    debug!(?command, backend = %store.backend_kind(), "running command");

    match command {
        Command::Get { code } => {
            let record = store
                .get(&code)
                .await
                .ok_or_else(|| anyhow!("short code '{code}' not found"))?;
            Ok(serde_json::to_value(record)?)
        }
        Command::Set { url, code, owner } => {
            let code = match code {
                Some(code) => ShortCode::new(code)?,
                None => ShortCode::derive(&url),
            };
            store
                .set(code.clone(), url.as_str(), owner.as_deref())
                .await
                .with_context(|| format!("failed to store '{code}'"))?;
            Ok(json!({ "short_code": code, "original_url": url }))
        }
        Command::Import { path } => {
            let batch = read_import_file(&path).await?;
            let count = batch.len();
            store.set_batch(batch).await.context("failed to import batch")?;
            Ok(json!({ "imported": count }))
        }
        Command::List { owner } => {
            let records = store.get_by_owner(&owner).await?;
            Ok(serde_json::to_value(records)?)
        }
        Command::Delete { owner, codes } => {
            let codes = codes
                .into_iter()
                .map(ShortCode::new)
                .collect::<Result<Vec<_>, _>>()?;
            let report = store.delete_batch_with_report(&owner, codes).await?;
            Ok(serde_json::to_value(report)?)
        }
        Command::Stats => Ok(serde_json::to_value(store.stats().await?)?),
        Command::Ping => {
            store.ping().await?;
            Ok(json!({ "status": "ok" }))
        }
    }
}

async fn read_import_file(path: &Path) -> anyhow::Result<HashMap<ShortCode, String>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read '{}'", path.display()))?;
    let raw: HashMap<String, String> = serde_json::from_str(&content)
        .with_context(|| format!("'{}' is not a JSON object of code to URL", path.display()))?;

    raw.into_iter()
        .map(|(code, url)| -> anyhow::Result<_> { Ok((ShortCode::new(code)?, url)) })
        .collect()
}
