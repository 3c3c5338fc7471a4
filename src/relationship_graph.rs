// Relationship Graph - single-parent hierarchy plus symmetric links between groups
//
// Hierarchy lives in `group_relationships.parent_group_id`. A symmetric link
// between A and B is the pair of rows (A,B) and (B,A) in
// `linked_group_relationships`; both rows are written or removed in one
// transaction so no one-directional link survives a successful call.

use chrono::{DateTime, Utc};
use sqlx::Row;
use tracing::{debug, info};

use crate::database::GroupDatabase;
use crate::error::{AppError, AppResult};
use crate::group_store::{group_from_row, GROUP_COLUMNS};
use crate::models::{Direction, Group, GroupId, GroupRelationship, LinkedGroupRelationship, Relationship};

impl GroupDatabase {
    pub async fn get_relationship(&self, group_id: GroupId) -> AppResult<Option<GroupRelationship>> {
        let row = sqlx::query(
            "SELECT group_id, name, parent_group_id, record_active FROM group_relationships WHERE group_id = ?",
        )
        .bind(group_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(GroupRelationship {
                group_id: row.try_get("group_id")?,
                name: row.try_get("name")?,
                parent_group_id: row.try_get("parent_group_id")?,
                record_active: row.try_get("record_active")?,
            })),
            None => Ok(None),
        }
    }

    pub async fn require_relationship(&self, group_id: GroupId) -> AppResult<GroupRelationship> {
        self.get_relationship(group_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Relationship root for group {} not found", group_id)))
    }

    /// Make `parent_id` the parent of `child_id`, replacing any previous parent.
    pub async fn set_parent(&self, child_id: GroupId, parent_id: GroupId) -> AppResult<GroupRelationship> {
        if child_id == parent_id {
            return Err(AppError::Validation(format!("Group {} cannot be its own parent", child_id)));
        }
        let child = self.require_relationship(child_id).await?;
        self.require_relationship(parent_id).await?;

        if let Some(previous) = child.parent_group_id.filter(|p| *p != parent_id) {
            debug!(child_id, previous, parent_id, "Replacing hierarchical parent");
        }

        sqlx::query("UPDATE group_relationships SET parent_group_id = ?, modified = ? WHERE group_id = ?")
            .bind(parent_id)
            .bind(Utc::now())
            .bind(child_id)
            .execute(&self.pool)
            .await?;

        info!(child_id, parent_id, "Set hierarchical parent");
        Ok(GroupRelationship {
            parent_group_id: Some(parent_id),
            ..child
        })
    }

    /// Detach `child_id` from `parent_id`. Does nothing (and returns false)
    /// when `parent_id` is not the child's current parent.
    pub async fn clear_parent(&self, child_id: GroupId, parent_id: GroupId) -> AppResult<bool> {
        let result = sqlx::query(
            "UPDATE group_relationships SET parent_group_id = NULL, modified = ?
             WHERE group_id = ? AND parent_group_id = ?",
        )
        .bind(Utc::now())
        .bind(child_id)
        .bind(parent_id)
        .execute(&self.pool)
        .await?;

        let cleared = result.rows_affected() > 0;
        if cleared {
            info!(child_id, parent_id, "Cleared hierarchical parent");
        }
        Ok(cleared)
    }

    /// Link two groups symmetrically. Existing rows are kept, so repeating
    /// the call is harmless.
    pub async fn add_link(&self, a: GroupId, b: GroupId) -> AppResult<()> {
        self.require_relationship(a).await?;
        self.require_relationship(b).await?;

        let now = Utc::now();
        let mut tx = self.begin_transaction().await?;

        for (from, to) in [(a, b), (b, a)] {
            sqlx::query(
                "INSERT OR IGNORE INTO linked_group_relationships
                 (from_group_id, to_group_id, record_active, created, modified) VALUES (?, ?, 1, ?, ?)",
            )
            .bind(from)
            .bind(to)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!(a, b, "Linked groups");
        Ok(())
    }

    /// Remove both directed rows of a link. Absent links are ignored.
    pub async fn remove_link(&self, a: GroupId, b: GroupId) -> AppResult<()> {
        let mut tx = self.begin_transaction().await?;

        let result = sqlx::query(
            "DELETE FROM linked_group_relationships
             WHERE (from_group_id = ? AND to_group_id = ?) OR (from_group_id = ? AND to_group_id = ?)",
        )
        .bind(a)
        .bind(b)
        .bind(b)
        .bind(a)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        if result.rows_affected() > 0 {
            info!(a, b, "Unlinked groups");
        }
        Ok(())
    }

    pub async fn children_of(&self, parent_id: GroupId, type_filter: Option<&str>) -> AppResult<Vec<Group>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM group_relationships r
             JOIN group_entities g ON g.id = r.group_id
             LEFT JOIN group_profiles p ON p.group_id = g.id
             WHERE r.parent_group_id = ? AND (? IS NULL OR p.group_type = ?)
             ORDER BY g.id",
            GROUP_COLUMNS
        ))
        .bind(parent_id)
        .bind(type_filter)
        .bind(type_filter)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(group_from_row).collect()
    }

    /// Groups reachable over outbound link rows from `group_id`.
    pub async fn linked_of(&self, group_id: GroupId, type_filter: Option<&str>) -> AppResult<Vec<Group>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM linked_group_relationships l
             JOIN group_entities g ON g.id = l.to_group_id
             LEFT JOIN group_profiles p ON p.group_id = g.id
             WHERE l.from_group_id = ? AND (? IS NULL OR p.group_type = ?)
             ORDER BY g.id",
            GROUP_COLUMNS
        ))
        .bind(group_id)
        .bind(type_filter)
        .bind(type_filter)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(group_from_row).collect()
    }

    /// Link rows between `a` and `b` in either direction.
    pub async fn links_between(&self, a: GroupId, b: GroupId) -> AppResult<Vec<LinkedGroupRelationship>> {
        let rows = sqlx::query(
            "SELECT id, from_group_id, to_group_id, record_active, created FROM linked_group_relationships
             WHERE (from_group_id = ? AND to_group_id = ?) OR (from_group_id = ? AND to_group_id = ?)
             ORDER BY id",
        )
        .bind(a)
        .bind(b)
        .bind(b)
        .bind(a)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(LinkedGroupRelationship {
                    id: row.try_get("id")?,
                    from_group_id: row.try_get("from_group_id")?,
                    to_group_id: row.try_get("to_group_id")?,
                    record_active: row.try_get("record_active")?,
                    created: row.try_get::<DateTime<Utc>, _>("created")?,
                })
            })
            .collect()
    }

    /// How `a` relates to `b`. Hierarchy wins over links; a link counts if a
    /// row exists in either direction.
    pub async fn relationship_between(&self, a: GroupId, b: GroupId) -> AppResult<Relationship> {
        let (Some(from), Some(to)) = (self.get_relationship(a).await?, self.get_relationship(b).await?) else {
            return Ok(Relationship::None);
        };

        if to.parent_group_id == Some(a) {
            return Ok(Relationship::Hierarchical(Direction::Parent));
        }
        if from.parent_group_id == Some(b) {
            return Ok(Relationship::Hierarchical(Direction::Child));
        }
        if !self.links_between(a, b).await?.is_empty() {
            return Ok(Relationship::Symmetric);
        }
        Ok(Relationship::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewGroup;

    async fn group(db: &GroupDatabase, name: &str, group_type: &str) -> GroupId {
        db.create_group(NewGroup {
            name: name.into(),
            group_type: group_type.into(),
            data: None,
        })
        .await
        .unwrap()
        .id
    }

    #[tokio::test]
    async fn test_set_parent_overwrites_previous_parent() {
        let db = GroupDatabase::in_memory().await.unwrap();
        let a = group(&db, "A", "series").await;
        let b = group(&db, "B", "series").await;
        let c = group(&db, "C", "series").await;

        db.set_parent(a, b).await.unwrap();
        assert_eq!(db.relationship_between(b, a).await.unwrap(), Relationship::Hierarchical(Direction::Parent));

        db.set_parent(a, c).await.unwrap();
        assert_eq!(db.require_relationship(a).await.unwrap().parent_group_id, Some(c));
        assert_eq!(db.relationship_between(a, b).await.unwrap(), Relationship::None);
        assert_eq!(db.relationship_between(b, a).await.unwrap(), Relationship::None);
        assert_eq!(db.relationship_between(a, c).await.unwrap(), Relationship::Hierarchical(Direction::Child));
        assert!(db.children_of(b, None).await.unwrap().is_empty());
        assert_eq!(db.children_of(c, None).await.unwrap()[0].id, a);
    }

    #[tokio::test]
    async fn test_set_parent_requires_both_roots() {
        let db = GroupDatabase::in_memory().await.unwrap();
        let a = group(&db, "A", "series").await;

        assert!(matches!(db.set_parent(a, 9999).await, Err(AppError::NotFound(_))));
        assert!(matches!(db.set_parent(9999, a).await, Err(AppError::NotFound(_))));
        assert!(matches!(db.set_parent(a, a).await, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_clear_parent_ignores_wrong_parent() {
        let db = GroupDatabase::in_memory().await.unwrap();
        let child = group(&db, "child", "series").await;
        let parent = group(&db, "parent", "series").await;
        let stranger = group(&db, "stranger", "series").await;
        db.set_parent(child, parent).await.unwrap();

        assert!(!db.clear_parent(child, stranger).await.unwrap());
        assert_eq!(db.require_relationship(child).await.unwrap().parent_group_id, Some(parent));

        assert!(db.clear_parent(child, parent).await.unwrap());
        assert_eq!(db.require_relationship(child).await.unwrap().parent_group_id, None);
        assert!(!db.clear_parent(child, parent).await.unwrap());
    }

    #[tokio::test]
    async fn test_links_are_symmetric_and_removed_together() {
        let db = GroupDatabase::in_memory().await.unwrap();
        let a = group(&db, "A", "series").await;
        let b = group(&db, "B", "cohort").await;

        db.add_link(a, b).await.unwrap();
        db.add_link(a, b).await.unwrap();
        db.add_link(b, a).await.unwrap();

        assert_eq!(db.links_between(a, b).await.unwrap().len(), 2);
        assert_eq!(db.relationship_between(a, b).await.unwrap(), Relationship::Symmetric);
        assert_eq!(db.relationship_between(b, a).await.unwrap(), Relationship::Symmetric);
        assert_eq!(db.linked_of(a, None).await.unwrap()[0].id, b);
        assert_eq!(db.linked_of(b, None).await.unwrap()[0].id, a);

        db.remove_link(b, a).await.unwrap();
        assert!(db.links_between(a, b).await.unwrap().is_empty());
        assert_eq!(db.relationship_between(a, b).await.unwrap(), Relationship::None);

        db.remove_link(a, b).await.unwrap();
    }

    #[tokio::test]
    async fn test_add_link_to_missing_root_writes_nothing() {
        let db = GroupDatabase::in_memory().await.unwrap();
        let a = group(&db, "A", "series").await;

        assert!(matches!(db.add_link(a, 12345).await, Err(AppError::NotFound(_))));
        assert!(db.linked_of(a, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_inverse_row_rolls_back_forward_row() {
        let db = GroupDatabase::in_memory().await.unwrap();
        let a = group(&db, "A", "team").await;
        let b = group(&db, "B", "team").await;

        // Reject only the second directed row, b -> a
        sqlx::query(&format!(
            "CREATE TRIGGER reject_inverse_link BEFORE INSERT ON linked_group_relationships
             WHEN NEW.from_group_id = {}
             BEGIN SELECT RAISE(ABORT, 'inverse row rejected'); END",
            b
        ))
        .execute(&db.pool)
        .await
        .unwrap();

        let result = db.add_link(a, b).await;
        assert!(matches!(result, Err(AppError::DatabaseError(_))));
        assert!(db.links_between(a, b).await.unwrap().is_empty());
        assert!(db.linked_of(a, None).await.unwrap().is_empty());
        assert_eq!(db.relationship_between(a, b).await.unwrap(), Relationship::None);

        sqlx::query("DROP TRIGGER reject_inverse_link").execute(&db.pool).await.unwrap();
        db.add_link(a, b).await.unwrap();
        assert_eq!(db.links_between(a, b).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_type_filter_applies_to_children_and_links() {
        let db = GroupDatabase::in_memory().await.unwrap();
        let root = group(&db, "root", "program").await;
        let s1 = group(&db, "s1", "series").await;
        let c1 = group(&db, "c1", "cohort").await;
        let s2 = group(&db, "s2", "series").await;
        db.set_parent(s1, root).await.unwrap();
        db.set_parent(c1, root).await.unwrap();
        db.add_link(root, s2).await.unwrap();
        db.add_link(root, c1).await.unwrap();

        let children: Vec<GroupId> = db.children_of(root, Some("series")).await.unwrap().iter().map(|g| g.id).collect();
        assert_eq!(children, vec![s1]);
        let all_children: Vec<GroupId> = db.children_of(root, None).await.unwrap().iter().map(|g| g.id).collect();
        assert_eq!(all_children, vec![s1, c1]);
        let linked: Vec<GroupId> = db.linked_of(root, Some("cohort")).await.unwrap().iter().map(|g| g.id).collect();
        assert_eq!(linked, vec![c1]);
    }

    #[tokio::test]
    async fn test_deleting_parent_orphans_children_and_drops_links() {
        let db = GroupDatabase::in_memory().await.unwrap();
        let parent = group(&db, "parent", "series").await;
        let child = group(&db, "child", "series").await;
        let peer = group(&db, "peer", "series").await;
        db.set_parent(child, parent).await.unwrap();
        db.add_link(parent, peer).await.unwrap();

        db.delete_group(parent).await.unwrap();

        assert_eq!(db.require_relationship(child).await.unwrap().parent_group_id, None);
        assert!(db.linked_of(peer, None).await.unwrap().is_empty());
    }
}
