//! Entity record helpers
//!
//! Partitions are schema-free; these helpers apply the entity conventions
//! on top: `id` is assigned once and never changes, `createdAt` is set on
//! creation, and `updatedAt` is refreshed on every mutation.

use serde_json::{Map, Value};

use super::models::{AppSettings, EntityId, SETTINGS_KEY, now_iso};
use super::partition::PartitionHandle;
use crate::error::AppError;

fn as_object(record: Value) -> Result<Map<String, Value>, AppError> {
    match record {
        Value::Object(map) => Ok(map),
        other => Err(AppError::Validation(format!(
            "record must be a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Id of a record, when it carries a non-empty string or numeric `id`
pub fn record_id(record: &Value) -> Option<String> {
    match record.get("id")? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

/// Insert a new record, assigning `id`, `createdAt` and `updatedAt`
///
/// A caller-supplied `id` is kept; otherwise a ULID is generated.
pub async fn create_record(partition: &PartitionHandle, record: Value) -> Result<Value, AppError> {
    let id = record_id(&record).unwrap_or_else(|| EntityId::new().0);
    let mut map = as_object(record)?;
    let now = now_iso();

    map.insert("id".to_string(), Value::String(id.clone()));
    map.insert("createdAt".to_string(), Value::String(now.clone()));
    map.insert("updatedAt".to_string(), Value::String(now));

    let record = Value::Object(map);
    partition.set(&id, &record).await?;
    Ok(record)
}

/// Merge `changes` into an existing record
///
/// `id` and `createdAt` are never overwritten; `updatedAt` is refreshed.
pub async fn update_record(
    partition: &PartitionHandle,
    id: &str,
    changes: Value,
) -> Result<Value, AppError> {
    let changes = as_object(changes)?;
    let existing = partition.get(id).await?.ok_or(AppError::NotFound)?;
    let mut map = as_object(existing)?;

    for (field, value) in changes {
        if field == "id" || field == "createdAt" {
            continue;
        }
        map.insert(field, value);
    }
    map.insert("updatedAt".to_string(), Value::String(now_iso()));

    let record = Value::Object(map);
    partition.set(id, &record).await?;
    Ok(record)
}

/// Write many records keyed by their own ids, generating ids where missing
pub async fn bulk_upsert(
    partition: &PartitionHandle,
    records: Vec<Value>,
) -> Result<usize, AppError> {
    let now = now_iso();
    let mut entries = Vec::with_capacity(records.len());
    for record in records {
        let id = record_id(&record).unwrap_or_else(|| EntityId::new().0);
        let mut map = as_object(record)?;
        map.insert("id".to_string(), Value::String(id.clone()));
        map.entry("createdAt")
            .or_insert_with(|| Value::String(now.clone()));
        map.insert("updatedAt".to_string(), Value::String(now.clone()));
        entries.push((id, Value::Object(map)));
    }

    partition.set_many(entries).await
}

/// Remove a record; fails with `NotFound` when it does not exist
pub async fn delete_record(partition: &PartitionHandle, id: &str) -> Result<(), AppError> {
    if partition.get(id).await?.is_none() {
        return Err(AppError::NotFound);
    }
    partition.remove(id).await
}

// =============================================================================
// Settings
// =============================================================================

/// The settings singleton, seeded with defaults when absent
pub async fn get_settings(partition: &PartitionHandle) -> Result<Value, AppError> {
    if let Some(settings) = partition.get(SETTINGS_KEY).await? {
        return Ok(settings);
    }

    let defaults = serde_json::to_value(AppSettings::default())?;
    partition.set(SETTINGS_KEY, &defaults).await?;
    tracing::info!(namespace = %partition.namespace(), "Seeded default settings");
    Ok(defaults)
}

/// Shallow-merge `changes` into the settings singleton
pub async fn update_settings(
    partition: &PartitionHandle,
    changes: Value,
) -> Result<Value, AppError> {
    let changes = as_object(changes)?;
    let mut settings = as_object(get_settings(partition).await?)?;
    settings.extend(changes);

    let settings = Value::Object(settings);
    partition.set(SETTINGS_KEY, &settings).await?;
    Ok(settings)
}
