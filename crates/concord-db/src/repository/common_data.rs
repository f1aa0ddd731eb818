//! # Common Data Store
//!
//! Persistent per-item version records keyed by `(resource_name,
//! resource_item_id)`.
//!
//! ## Write Paths
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  save_new      INSERT, fails UniqueViolation if any row exists         │
//! │                (live or tombstone). Never an upsert, so two racing     │
//! │                first-creators cannot both win.                         │
//! │                                                                         │
//! │  save_updated  UPDATE, fails NotFound if no row exists.                │
//! │                                                                         │
//! │  revive        UPDATE ... WHERE action = 'DELETE', turning a tombstone │
//! │                back into a created item. Fails InvalidState if the     │
//! │                row is live.                                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `last_modified` is written as `MAX(last_modified, ?)` so a row's version
//! never moves backwards.

use concord_core::{CommonData, CommonDataId, Millis, SyncAction};
use sqlx::SqliteConnection;
use tracing::debug;

use crate::error::{DbError, DbResult};

const ENTITY: &str = "CommonData";

/// Row shape of `common_data`.
#[derive(Debug, sqlx::FromRow)]
struct CommonDataRow {
    resource_name: String,
    resource_item_id: String,
    target_item_id: String,
    action: SyncAction,
    last_modified: i64,
}

impl From<CommonDataRow> for CommonData {
    fn from(row: CommonDataRow) -> Self {
        CommonData {
            id: CommonDataId::new(row.resource_name, row.resource_item_id),
            target_item_id: row.target_item_id,
            action: row.action,
            last_modified: row.last_modified,
            conflict_type: None,
            for_update: false,
            keep_lock: false,
        }
    }
}

/// Repository for common data records.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommonDataStore;

impl CommonDataStore {
    pub fn new() -> Self {
        CommonDataStore
    }

    /// Reads one record, or `None` if the item was never created.
    pub async fn find(&self, conn: &mut SqliteConnection, id: &CommonDataId) -> DbResult<Option<CommonData>> {
        let row = sqlx::query_as::<_, CommonDataRow>(
            r#"
            SELECT resource_name, resource_item_id, target_item_id, action, last_modified
            FROM common_data
            WHERE resource_name = ?1 AND resource_item_id = ?2
            "#,
        )
        .bind(&id.resource_name)
        .bind(&id.resource_item_id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(row.map(CommonData::from))
    }

    /// Reads one record, failing `NotFound` if absent.
    pub async fn get(&self, conn: &mut SqliteConnection, id: &CommonDataId) -> DbResult<CommonData> {
        self.find(conn, id)
            .await?
            .ok_or_else(|| DbError::not_found(ENTITY, id))
    }

    /// Reads one record with write intent.
    ///
    /// SQLite has no `SELECT ... FOR UPDATE`; a no-op UPDATE on the row
    /// takes the database write lock first, so two transactions calling this
    /// for the same id are ordered. Returns `None` if the row is absent.
    pub async fn get_for_update(
        &self,
        conn: &mut SqliteConnection,
        id: &CommonDataId,
    ) -> DbResult<Option<CommonData>> {
        sqlx::query(
            r#"
            UPDATE common_data SET last_modified = last_modified
            WHERE resource_name = ?1 AND resource_item_id = ?2
            "#,
        )
        .bind(&id.resource_name)
        .bind(&id.resource_item_id)
        .execute(&mut *conn)
        .await?;

        let mut data = self.find(conn, id).await?;
        if let Some(data) = data.as_mut() {
            data.for_update = true;
        }
        Ok(data)
    }

    /// Lists records of one resource modified strictly after `since`,
    /// oldest first.
    ///
    /// Tombstones are included so deletions reach other clients. When
    /// `item_ids` is given only those items are considered; an empty filter
    /// matches nothing.
    pub async fn find_modified_since(
        &self,
        conn: &mut SqliteConnection,
        resource_name: &str,
        since: Millis,
        item_ids: Option<&[String]>,
    ) -> DbResult<Vec<CommonData>> {
        let mut sql = String::from(
            r#"
            SELECT resource_name, resource_item_id, target_item_id, action, last_modified
            FROM common_data
            WHERE resource_name = ?1 AND last_modified > ?2
            "#,
        );

        if let Some(ids) = item_ids {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            let placeholders = (0..ids.len())
                .map(|i| format!("?{}", i + 3))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&format!(" AND resource_item_id IN ({})", placeholders));
        }

        sql.push_str(" ORDER BY last_modified ASC, resource_item_id ASC");

        let mut query = sqlx::query_as::<_, CommonDataRow>(&sql)
            .bind(resource_name)
            .bind(since);
        for id in item_ids.unwrap_or_default() {
            query = query.bind(id);
        }

        let rows = query.fetch_all(&mut *conn).await?;

        debug!(
            resource = %resource_name,
            since = since,
            count = rows.len(),
            "Loaded modified common data"
        );

        Ok(rows.into_iter().map(CommonData::from).collect())
    }

    /// Inserts the first record for an item.
    ///
    /// Fails `UniqueViolation` if a row already exists, whatever its action.
    pub async fn save_new(&self, conn: &mut SqliteConnection, data: &CommonData) -> DbResult<CommonData> {
        let result = sqlx::query(
            r#"
            INSERT INTO common_data (
                resource_name, resource_item_id, target_item_id, action, last_modified
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&data.id.resource_name)
        .bind(&data.id.resource_item_id)
        .bind(&data.target_item_id)
        .bind(data.action)
        .bind(data.last_modified)
        .execute(&mut *conn)
        .await;

        match result {
            Ok(_) => {}
            Err(err) => {
                let err = DbError::from(err);
                return Err(if err.is_unique_violation() {
                    DbError::duplicate("common_data id", &data.id)
                } else {
                    err
                });
            }
        }

        debug!(id = %data.id, action = %data.action, "Saved new common data");

        Ok(CommonData {
            for_update: false,
            ..data.clone()
        })
    }

    /// Records a mutation on an existing item and returns the stored row.
    ///
    /// Fails `NotFound` if the row does not exist.
    pub async fn save_updated(&self, conn: &mut SqliteConnection, data: &CommonData) -> DbResult<CommonData> {
        let result = sqlx::query(
            r#"
            UPDATE common_data SET
                target_item_id = ?3,
                action = ?4,
                last_modified = MAX(last_modified, ?5)
            WHERE resource_name = ?1 AND resource_item_id = ?2
            "#,
        )
        .bind(&data.id.resource_name)
        .bind(&data.id.resource_item_id)
        .bind(&data.target_item_id)
        .bind(data.action)
        .bind(data.last_modified)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found(ENTITY, &data.id));
        }

        debug!(id = %data.id, action = %data.action, "Saved common data");

        self.get(conn, &data.id).await
    }

    /// Turns a tombstone back into a created item.
    ///
    /// Fails `NotFound` if there is no row and `InvalidState` if the row is
    /// not a tombstone.
    pub async fn revive(&self, conn: &mut SqliteConnection, data: &CommonData) -> DbResult<CommonData> {
        let result = sqlx::query(
            r#"
            UPDATE common_data SET
                target_item_id = ?3,
                action = ?4,
                last_modified = MAX(last_modified, ?5)
            WHERE resource_name = ?1 AND resource_item_id = ?2 AND action = 'DELETE'
            "#,
        )
        .bind(&data.id.resource_name)
        .bind(&data.id.resource_item_id)
        .bind(&data.target_item_id)
        .bind(SyncAction::Create)
        .bind(data.last_modified)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            let current = self.get(conn, &data.id).await?;
            return Err(DbError::invalid_state(
                ENTITY,
                &data.id,
                format!("cannot re-create an item whose action is {}", current.action),
            ));
        }

        debug!(id = %data.id, "Revived tombstoned common data");

        self.get(conn, &data.id).await
    }
}
