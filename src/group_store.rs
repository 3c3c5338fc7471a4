// Group Entity Store - named, typed groups with opaque JSON metadata

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

use crate::database::GroupDatabase;
use crate::error::{AppError, AppResult};
use crate::models::{Group, GroupData, GroupId, GroupProfile, GroupUpdate, NewGroup};

/// Column list shared by every query that materializes a `Group`.
/// Callers alias the group table as `g` and LEFT JOIN profiles as `p`.
pub(crate) const GROUP_COLUMNS: &str = "g.id, g.name, g.record_active, g.created, g.modified, \
     p.group_id AS profile_group_id, p.group_type, p.name AS profile_name, p.data";

pub(crate) fn group_from_row(row: &SqliteRow) -> AppResult<Group> {
    let profile_group_id: Option<GroupId> = row.try_get("profile_group_id")?;
    let profile = match profile_group_id {
        Some(group_id) => {
            let raw_data: Option<String> = row.try_get("data")?;
            let data = match raw_data {
                Some(raw) if !raw.is_empty() => Some(serde_json::from_str::<GroupData>(&raw)?),
                _ => None,
            };
            Some(GroupProfile {
                group_id,
                group_type: row.try_get("group_type")?,
                name: row.try_get("profile_name")?,
                data,
            })
        }
        None => None,
    };

    Ok(Group {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        record_active: row.try_get("record_active")?,
        created: row.try_get::<DateTime<Utc>, _>("created")?,
        modified: row.try_get::<DateTime<Utc>, _>("modified")?,
        profile,
    })
}

fn encode_data(data: Option<&GroupData>) -> AppResult<Option<String>> {
    Ok(data.map(serde_json::to_string).transpose()?)
}

impl GroupDatabase {
    /// Create a group, its relationship root and its profile in one transaction.
    ///
    /// The stored name is `"{id:04}: {label}"`, which keeps it unique while
    /// allowing several groups to share a label. The group is inserted under a
    /// placeholder name first because the id is only known after the insert.
    pub async fn create_group(&self, new_group: NewGroup) -> AppResult<Group> {
        if new_group.name.trim().is_empty() {
            return Err(AppError::Validation("Group name must not be empty".to_string()));
        }
        if new_group.group_type.trim().is_empty() {
            return Err(AppError::Validation("Group type must not be empty".to_string()));
        }

        let now = Utc::now();
        let data = encode_data(new_group.data.as_ref())?;
        let mut tx = self.begin_transaction().await?;

        let result = sqlx::query(
            "INSERT INTO group_entities (name, record_active, created, modified) VALUES (?, 1, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let id = result.last_insert_rowid();
        let canonical_name = format!("{:04}: {}", id, new_group.name);

        sqlx::query("UPDATE group_entities SET name = ? WHERE id = ?")
            .bind(&canonical_name)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO group_relationships (group_id, name, parent_group_id, record_active, created, modified)
             VALUES (?, ?, NULL, 1, ?, ?)",
        )
        .bind(id)
        .bind(&new_group.name)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO group_profiles (group_id, group_type, name, data, created, modified)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(&new_group.group_type)
        .bind(&new_group.name)
        .bind(&data)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        info!(group_id = id, group_type = %new_group.group_type, "Created group {}", canonical_name);

        let group = Group {
            id,
            name: canonical_name,
            record_active: true,
            created: now,
            modified: now,
            profile: Some(GroupProfile {
                group_id: id,
                group_type: Some(new_group.group_type),
                name: Some(new_group.name),
                data: new_group.data,
            }),
        };
        Ok(group)
    }

    pub async fn find_group(&self, id: GroupId) -> AppResult<Option<Group>> {
        let generation = match self.cached_group(id).await {
            Ok(group) => return Ok(Some(group)),
            Err(generation) => generation,
        };

        let row = sqlx::query(&format!(
            "SELECT {} FROM group_entities g LEFT JOIN group_profiles p ON p.group_id = g.id WHERE g.id = ?",
            GROUP_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let group = group_from_row(&row)?;
                self.fill_group(group.clone(), generation).await;
                Ok(Some(group))
            }
            None => Ok(None),
        }
    }

    pub async fn get_group(&self, id: GroupId) -> AppResult<Group> {
        self.find_group(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Group {} not found", id)))
    }

    /// Partial update of the profile. The profile is created if the group
    /// never had one; fields left as `None` keep their stored value.
    pub async fn update_group(&self, id: GroupId, update: GroupUpdate) -> AppResult<Group> {
        let group = self.get_group(id).await?;
        if update.is_empty() {
            return Ok(group);
        }
        if let Some(name) = &update.name {
            if name.trim().is_empty() {
                return Err(AppError::Validation("Group name must not be empty".to_string()));
            }
        }

        let now = Utc::now();
        let data = encode_data(update.data.as_ref())?;

        let mut tx = self.begin_transaction().await?;

        sqlx::query(
            "INSERT OR IGNORE INTO group_profiles (group_id, created, modified) VALUES (?, ?, ?)",
        )
        .bind(id)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE group_profiles
             SET group_type = COALESCE(?, group_type),
                 name = COALESCE(?, name),
                 data = COALESCE(?, data),
                 modified = ?
             WHERE group_id = ?",
        )
        .bind(&update.group_type)
        .bind(&update.name)
        .bind(&data)
        .bind(now)
        .bind(id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE group_entities SET modified = ? WHERE id = ?")
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        self.invalidate_group(id).await;
        debug!(group_id = id, "Updated group profile");
        self.get_group(id).await
    }

    /// Delete a group and everything hanging off it. Returns whether a row
    /// was removed; a missing group is not an error.
    pub async fn delete_group(&self, id: GroupId) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM group_entities WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        self.invalidate_group(id).await;
        let deleted = result.rows_affected() > 0;
        if deleted {
            info!(group_id = id, "Deleted group");
        }
        Ok(deleted)
    }

    pub async fn list_groups_by_type(&self, group_type: &str) -> AppResult<Vec<Group>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM group_entities g JOIN group_profiles p ON p.group_id = g.id
             WHERE p.group_type = ? ORDER BY g.id",
            GROUP_COLUMNS
        ))
        .bind(group_type)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(group_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(value: serde_json::Value) -> Option<GroupData> {
        value.as_object().cloned()
    }

    async fn count_groups(db: &GroupDatabase) -> i64 {
        sqlx::query("SELECT COUNT(*) FROM group_entities")
            .fetch_one(&db.pool)
            .await
            .unwrap()
            .get(0)
    }

    #[tokio::test]
    async fn test_create_assigns_prefixed_unique_name() {
        let db = GroupDatabase::in_memory().await.unwrap();

        let first = db
            .create_group(NewGroup {
                name: "Alpha Series".into(),
                group_type: "series".into(),
                data: data(json!({"start_date": "2014-01-01"})),
            })
            .await
            .unwrap();
        let second = db
            .create_group(NewGroup {
                name: "Alpha Series".into(),
                group_type: "series".into(),
                data: None,
            })
            .await
            .unwrap();

        assert_eq!(first.name, format!("{:04}: Alpha Series", first.id));
        assert_ne!(first.name, second.name);
        assert_eq!(first.display_name(), "Alpha Series");

        let stored = db.get_group(first.id).await.unwrap();
        assert_eq!(stored.group_type(), Some("series"));
        assert_eq!(stored.data().unwrap()["start_date"], json!("2014-01-01"));
        assert!(db.get_relationship(first.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_create_with_empty_name_persists_nothing() {
        let db = GroupDatabase::in_memory().await.unwrap();

        let result = db
            .create_group(NewGroup {
                name: "   ".into(),
                group_type: "series".into(),
                data: None,
            })
            .await;

        assert!(matches!(result, Err(AppError::Validation(_))));
        assert_eq!(count_groups(&db).await, 0);
    }

    #[tokio::test]
    async fn test_update_changes_only_supplied_fields() {
        let db = GroupDatabase::in_memory().await.unwrap();
        let group = db
            .create_group(NewGroup {
                name: "Cohort".into(),
                group_type: "cohort".into(),
                data: data(json!({"size": 10})),
            })
            .await
            .unwrap();

        let updated = db
            .update_group(
                group.id,
                GroupUpdate {
                    group_type: Some("team".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.group_type(), Some("team"));
        assert_eq!(updated.display_name(), "Cohort");
        assert_eq!(updated.data().unwrap()["size"], json!(10));
    }

    #[tokio::test]
    async fn test_update_creates_missing_profile() {
        let db = GroupDatabase::in_memory().await.unwrap();
        let group = db
            .create_group(NewGroup {
                name: "Bare".into(),
                group_type: "series".into(),
                data: None,
            })
            .await
            .unwrap();
        sqlx::query("DELETE FROM group_profiles WHERE group_id = ?")
            .bind(group.id)
            .execute(&db.pool)
            .await
            .unwrap();
        db.invalidate_group(group.id).await;
        assert!(db.get_group(group.id).await.unwrap().profile.is_none());

        let updated = db
            .update_group(
                group.id,
                GroupUpdate {
                    data: data(json!({"k": "v"})),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let profile = updated.profile.unwrap();
        assert_eq!(profile.group_type, None);
        assert_eq!(profile.data.unwrap()["k"], json!("v"));
    }

    #[tokio::test]
    async fn test_read_racing_an_update_does_not_cache_stale_row() {
        let db = GroupDatabase::in_memory().await.unwrap();
        let group = db
            .create_group(NewGroup {
                name: "Cohort".into(),
                group_type: "cohort".into(),
                data: None,
            })
            .await
            .unwrap();

        // A reader misses the cache, then the update commits before it fills
        let generation = db.cached_group(group.id).await.unwrap_err();
        let stale = group.clone();

        db.update_group(
            group.id,
            GroupUpdate {
                group_type: Some("team".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert!(!db.fill_group(stale, generation).await);
        assert_eq!(db.get_group(group.id).await.unwrap().group_type(), Some("team"));
    }

    #[tokio::test]
    async fn test_delete_evicts_cached_group() {
        let db = GroupDatabase::in_memory().await.unwrap();
        let group = db
            .create_group(NewGroup {
                name: "Cached".into(),
                group_type: "series".into(),
                data: None,
            })
            .await
            .unwrap();

        db.get_group(group.id).await.unwrap();
        assert!(db.cached_group(group.id).await.is_ok());

        db.delete_group(group.id).await.unwrap();
        assert!(db.cached_group(group.id).await.is_err());
    }

    #[tokio::test]
    async fn test_update_missing_group_is_not_found() {
        let db = GroupDatabase::in_memory().await.unwrap();
        let result = db
            .update_group(
                404,
                GroupUpdate {
                    group_type: Some("x".into()),
                    ..Default::default()
                },
            )
            .await;
        assert!(matches!(result, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let db = GroupDatabase::in_memory().await.unwrap();
        let group = db
            .create_group(NewGroup {
                name: "Doomed".into(),
                group_type: "series".into(),
                data: None,
            })
            .await
            .unwrap();

        assert!(db.delete_group(group.id).await.unwrap());
        assert!(!db.delete_group(group.id).await.unwrap());
        assert!(db.find_group(group.id).await.unwrap().is_none());
        assert!(db.get_relationship(group.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_by_type_filters_and_orders() {
        let db = GroupDatabase::in_memory().await.unwrap();
        for (name, group_type) in [("a", "series"), ("b", "cohort"), ("c", "series")] {
            db.create_group(NewGroup {
                name: name.into(),
                group_type: group_type.into(),
                data: None,
            })
            .await
            .unwrap();
        }

        let series = db.list_groups_by_type("series").await.unwrap();
        let labels: Vec<&str> = series.iter().map(|g| g.display_name()).collect();
        assert_eq!(labels, vec!["a", "c"]);
    }
}
