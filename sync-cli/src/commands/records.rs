//! Record reads and optimistic writes.

use anyhow::{Context, Result};
use novaclub_sync_types::{EntityType, Record, RecordId};
use serde_json::Value;

use crate::config::Paths;

/// Build a record from a JSON object.
///
/// The id comes from `id`, then the object's `"id"` field, then a fresh one.
pub fn parse_record(json: &str, id: Option<&str>) -> Result<Record> {
    let value: Value = serde_json::from_str(json).context("Record must be valid JSON")?;
    let Value::Object(mut fields) = value else {
        anyhow::bail!("Record must be a JSON object");
    };

    let id = match (id, fields.get("id")) {
        (Some(id), _) => RecordId::new(id),
        (None, Some(Value::String(id))) => RecordId::new(id.as_str()),
        (None, Some(other)) => anyhow::bail!("Record id must be a string, got {}", other),
        (None, None) => RecordId::generate(),
    };
    fields.insert("id".into(), Value::String(id.to_string()));

    Ok(Record::from_payload(Value::Object(fields))?)
}

/// Run the put command.
pub async fn put(paths: &Paths, entity: &str, json: &str, id: Option<&str>) -> Result<()> {
    let entity = EntityType::new(entity)?;
    let record = parse_record(json, id)?;
    let client = paths.open_client().await?;

    let saved = client.save(&entity, record).await?;
    println!("Saved {}/{} (queued for sync)", entity, saved.id);
    Ok(())
}

/// Run the delete command.
pub async fn delete(paths: &Paths, entity: &str, id: &str) -> Result<()> {
    let entity = EntityType::new(entity)?;
    let client = paths.open_client().await?;

    client.remove(&entity, &RecordId::new(id)).await?;
    println!("Deleted {}/{} (queued for sync)", entity, id);
    Ok(())
}

/// Run the get command.
pub async fn get(paths: &Paths, entity: &str, id: &str) -> Result<()> {
    let entity = EntityType::new(entity)?;
    let client = paths.open_client().await?;

    match client.get(&entity, &RecordId::new(id)).await? {
        Some(record) => {
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
        None => anyhow::bail!("Not found: {}/{}", entity, id),
    }
}

/// Run the list command.
pub async fn list(paths: &Paths, entity: &str) -> Result<()> {
    let entity = EntityType::new(entity)?;
    let client = paths.open_client().await?;

    let mut records = client.list(&entity).await?;
    records.sort_by(|a, b| a.id.cmp(&b.id));
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::testing::offline_paths;
    use novaclub_sync_client::LocalStore;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn record_id_precedence() {
        let record = parse_record(r#"{"id": "m-1", "first_name": "Aiko"}"#, Some("m-9")).unwrap();
        assert_eq!(record.id.as_str(), "m-9");

        let record = parse_record(r#"{"id": "m-1", "first_name": "Aiko"}"#, None).unwrap();
        assert_eq!(record.id.as_str(), "m-1");
        assert_eq!(record.field("first_name"), Some(&json!("Aiko")));

        let record = parse_record(r#"{"first_name": "Aiko"}"#, None).unwrap();
        assert!(!record.id.as_str().is_empty());
    }

    #[test]
    fn rejects_non_objects() {
        assert!(parse_record("[1, 2]", None).is_err());
        assert!(parse_record("not json", None).is_err());
        assert!(parse_record(r#"{"id": 7}"#, None).is_err());
    }

    #[tokio::test]
    async fn offline_writes_are_queued_and_readable() {
        let dir = tempdir().unwrap();
        let paths = offline_paths(dir.path()).await;

        put(&paths, "members", r#"{"first_name": "Aiko"}"#, Some("m-1"))
            .await
            .unwrap();
        put(&paths, "members", r#"{"first_name": "Kenji"}"#, Some("m-2"))
            .await
            .unwrap();
        delete(&paths, "members", "m-2").await.unwrap();

        get(&paths, "members", "m-1").await.unwrap();
        assert!(get(&paths, "members", "m-2").await.is_err());
        list(&paths, "members").await.unwrap();

        let client = paths.open_client().await.unwrap();
        assert_eq!(client.engine().queue().len().await.unwrap(), 3);
        let members = EntityType::new("members").unwrap();
        assert_eq!(client.store().get_all(&members).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_entity_type_is_rejected() {
        let dir = tempdir().unwrap();
        let paths = offline_paths(dir.path()).await;
        assert!(put(&paths, "", r#"{}"#, None).await.is_err());
    }
}
