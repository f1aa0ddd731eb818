//! Reference `schedule` resource.
//!
//! Stores calendar entries in the `schedules` table. Clients see ids such as
//! `schedule-12`; the integer row id is the storage key. A POST onto a
//! deleted schedule re-creates it.

use async_trait::async_trait;
use concord_core::{ItemIdCodec, Millis, SyncError, SyncResult};
use concord_db::SqliteConnection;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Readable, RecreatePolicy, Writable};

pub const SCHEDULE_RESOURCE: &str = "schedule";

/// A calendar entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub title: String,
    pub starts_at: Millis,
    pub ends_at: Millis,
    #[serde(default)]
    pub note: Option<String>,
}

impl Schedule {
    pub fn new(title: impl Into<String>, starts_at: Millis, ends_at: Millis) -> Self {
        Schedule {
            title: title.into(),
            starts_at,
            ends_at,
            note: None,
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    fn validate(&self) -> SyncResult<()> {
        if self.title.trim().is_empty() {
            return Err(SyncError::BadRequest("schedule title is required".into()));
        }
        if self.ends_at < self.starts_at {
            return Err(SyncError::BadRequest(format!(
                "schedule ends ({}) before it starts ({})",
                self.ends_at, self.starts_at
            )));
        }
        Ok(())
    }
}

fn row_id(target_item_id: &str) -> SyncResult<i64> {
    target_item_id
        .parse()
        .map_err(|_| SyncError::Invariant(format!("schedule storage key '{}' is not a row id", target_item_id)))
}

/// SQLite-backed schedule store.
#[derive(Debug, Clone)]
pub struct ScheduleStore {
    codec: ItemIdCodec,
}

impl ScheduleStore {
    pub fn new() -> Self {
        ScheduleStore {
            codec: ItemIdCodec::new(SCHEDULE_RESOURCE),
        }
    }
}

impl Default for ScheduleStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Readable for ScheduleStore {
    type Element = Schedule;

    fn resource_name(&self) -> &str {
        SCHEDULE_RESOURCE
    }

    async fn fetch(&self, conn: &mut SqliteConnection, target_item_id: &str) -> SyncResult<Option<Schedule>> {
        let schedule = sqlx::query_as::<_, Schedule>(
            "SELECT title, starts_at, ends_at, note FROM schedules WHERE id = ?1",
        )
        .bind(row_id(target_item_id)?)
        .fetch_optional(&mut *conn)
        .await
        .map_err(concord_db::DbError::from)?;

        Ok(schedule)
    }
}

#[async_trait]
impl Writable for ScheduleStore {
    fn id_codec(&self) -> &ItemIdCodec {
        &self.codec
    }

    fn recreate_policy(&self) -> RecreatePolicy {
        RecreatePolicy::Revive
    }

    async fn insert(&self, conn: &mut SqliteConnection, element: &Schedule) -> SyncResult<String> {
        element.validate()?;

        let result = sqlx::query(
            "INSERT INTO schedules (title, starts_at, ends_at, note) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&element.title)
        .bind(element.starts_at)
        .bind(element.ends_at)
        .bind(&element.note)
        .execute(&mut *conn)
        .await
        .map_err(concord_db::DbError::from)?;

        let id = result.last_insert_rowid();
        debug!(row_id = id, "Inserted schedule");
        Ok(id.to_string())
    }

    async fn replace(&self, conn: &mut SqliteConnection, target_item_id: &str, element: &Schedule) -> SyncResult<()> {
        element.validate()?;

        let result = sqlx::query(
            r#"
            UPDATE schedules SET title = ?2, starts_at = ?3, ends_at = ?4, note = ?5
            WHERE id = ?1
            "#,
        )
        .bind(row_id(target_item_id)?)
        .bind(&element.title)
        .bind(element.starts_at)
        .bind(element.ends_at)
        .bind(&element.note)
        .execute(&mut *conn)
        .await
        .map_err(concord_db::DbError::from)?;

        if result.rows_affected() == 0 {
            return Err(SyncError::Invariant(format!(
                "schedule row {} is missing for a live sync record",
                target_item_id
            )));
        }
        Ok(())
    }

    async fn remove(&self, conn: &mut SqliteConnection, target_item_id: &str) -> SyncResult<()> {
        sqlx::query("DELETE FROM schedules WHERE id = ?1")
            .bind(row_id(target_item_id)?)
            .execute(&mut *conn)
            .await
            .map_err(concord_db::DbError::from)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_db::{Database, DbConfig};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_insert_fetch_replace_remove() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut conn = db.acquire().await.unwrap();
        let store = ScheduleStore::new();

        let standup = Schedule::new("standup", 100, 200).with_note("room 4");
        let key = store.insert(&mut conn, &standup).await.unwrap();
        assert_eq!(store.fetch(&mut conn, &key).await.unwrap(), Some(standup));

        let moved = Schedule::new("standup", 300, 400);
        store.replace(&mut conn, &key, &moved).await.unwrap();
        assert_eq!(store.fetch(&mut conn, &key).await.unwrap(), Some(moved));

        store.remove(&mut conn, &key).await.unwrap();
        assert_eq!(store.fetch(&mut conn, &key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rejects_invalid_schedules() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut conn = db.acquire().await.unwrap();
        let store = ScheduleStore::new();

        let backwards = Schedule::new("retro", 500, 100);
        assert!(matches!(
            store.insert(&mut conn, &backwards).await,
            Err(SyncError::BadRequest(_))
        ));
    }

    #[test]
    fn test_ids_round_trip_through_codec() {
        let store = ScheduleStore::new();
        let id = store.id_codec().generate("12");
        assert_eq!(id, "schedule-12");
        assert_eq!(store.id_codec().resolve(&id), Some("12"));
    }
}
