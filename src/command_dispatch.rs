//! Purpose: Execute one parsed CLI command against an opened store.
//! Role: Keeps `main.rs` focused on parsing and error rendering.
//! Invariants: The store is closed (and persisted) before the command result is reported.
use super::*;

use bytes::Bytes;
use kvwalk::api::{AdvanceMode, Store};
use serde_json::{Map, json};
use tokio::sync::oneshot;

pub(super) async fn dispatch_command(cli: Cli) -> Result<RunOutcome, Error> {
    let Cli { db, mode, command } = cli;
    let mode = mode.unwrap_or_else(|| command.default_mode().to_string());
    let store = Store::open(&db, &mode).map_err(|err| match err.kind() {
        ErrorKind::NotFound if err.hint().is_none() => {
            err.with_hint("Create the store first with a write command, or pass --mode wc.")
        }
        ErrorKind::Busy if err.hint().is_none() => {
            err.with_hint("Another process holds the store; retry without `f` to wait for it.")
        }
        _ => err,
    })?;
    tracing::debug!(spec = %store.spec(), mode = %mode, "store opened");

    let result = run_command(&store, command).await;
    let closed = store.close().await;
    let outcome = result?;
    closed?;
    Ok(outcome)
}

async fn run_command(store: &Store, command: Command) -> Result<RunOutcome, Error> {
    match command {
        Command::Get { key } => {
            let value = store.get(&key).await?;
            emit_json(json!({
                "key": key,
                "value": value.as_deref().map(lossy),
            }));
        }
        Command::Set { key, value } => {
            store.set(&key, value.clone()).await?;
            emit_json(json!({ "key": key, "value": value }));
        }
        Command::Add { key, value } => {
            store.add(&key, value.clone()).await?;
            emit_json(json!({ "key": key, "value": value }));
        }
        Command::Replace { key, value } => {
            store.replace(&key, value.clone()).await?;
            emit_json(json!({ "key": key, "value": value }));
        }
        Command::Remove { key } => {
            let removed = store.remove(&key).await?;
            emit_json(json!({ "key": key, "removed": removed }));
        }
        Command::Bulk { keys, non_atomic } => {
            let found = store.get_bulk(&keys, !non_atomic).await?;
            let missing: Vec<&String> = keys
                .iter()
                .filter(|key| !found.contains_key(key.as_bytes()))
                .collect();
            let records: Map<String, Value> = found
                .iter()
                .map(|(key, value)| (lossy(key), json!(lossy(value))))
                .collect();
            emit_json(json!({ "records": records, "missing": missing }));
        }
        Command::List {
            from,
            limit,
            reverse,
            keys_only,
        } => {
            if limit == Some(0) {
                return Ok(RunOutcome::ok());
            }
            let listed = match (reverse, from) {
                (true, from) => list_reverse(store, from, limit, keys_only).await?,
                (false, Some(from)) => list_from(store, from, limit, keys_only).await?,
                (false, None) => list_all(store, limit, keys_only).await?,
            };
            tracing::debug!(listed, "list finished");
        }
        Command::Count => {
            let count = store.count().await?;
            emit_json(json!({ "count": count }));
        }
    }
    Ok(RunOutcome::ok())
}

/// Whole-store listing through the `each` driver; the limit stops the drive early.
async fn list_all(store: &Store, limit: Option<usize>, keys_only: bool) -> Result<usize, Error> {
    let mut listed = 0usize;
    store
        .each(AdvanceMode::Auto, |record, next| {
            emit_record(&record, keys_only);
            listed += 1;
            if limit.is_some_and(|limit| listed >= limit) {
                next.stop();
            }
            Ok(())
        })
        .await?;
    Ok(listed)
}

/// Listing from a start key through a generator, pulling until the limit or exhaustion.
async fn list_from(
    store: &Store,
    from: String,
    limit: Option<usize>,
    keys_only: bool,
) -> Result<usize, Error> {
    let (tx, rx) = oneshot::channel();
    let mut generator = store.generate(Some(Bytes::from(from)), move |result| {
        let _ = tx.send(result);
    });

    let mut listed = 0usize;
    while limit.is_none_or(|limit| listed < limit) {
        let Some(record) = generator.next_record().await else {
            break;
        };
        emit_record(&record, keys_only);
        listed += 1;
    }
    drop(generator);

    // An unfired completion means the limit cut the listing short.
    if let Ok(result) = rx.await {
        result?;
    }
    Ok(listed)
}

async fn list_reverse(
    store: &Store,
    from: Option<String>,
    limit: Option<usize>,
    keys_only: bool,
) -> Result<usize, Error> {
    let mut cursor = store.cursor();
    match from {
        Some(from) => cursor.jump_back_to(from).await?,
        None => cursor.jump_back().await?,
    }

    let mut listed = 0usize;
    while limit.is_none_or(|limit| listed < limit) {
        let Some(record) = cursor.get(false).await? else {
            break;
        };
        emit_record(&record, keys_only);
        listed += 1;
        cursor.step_back().await?;
    }
    Ok(listed)
}
