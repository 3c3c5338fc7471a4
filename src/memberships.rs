// Membership edges from groups to users, courses, organizations and workgroups

use chrono::{DateTime, Utc};
use sqlx::sqlite::{Sqlite, SqliteRow};
use sqlx::{QueryBuilder, Row};
use tracing::{debug, info};

use crate::database::GroupDatabase;
use crate::error::{AppError, AppResult};
use crate::models::{
    Course, CourseGroupRelationship, GroupId, NewOrganization, NewUser, Organization, User, UserId,
    Workgroup,
};

fn user_from_row(row: &SqliteRow) -> AppResult<User> {
    Ok(User {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        is_active: row.try_get("is_active")?,
    })
}

fn course_edge_from_row(row: &SqliteRow) -> AppResult<CourseGroupRelationship> {
    Ok(CourseGroupRelationship {
        id: row.try_get("id")?,
        course_id: row.try_get("course_id")?,
        group_id: row.try_get("group_id")?,
        record_active: row.try_get("record_active")?,
        created: row.try_get::<DateTime<Utc>, _>("created")?,
    })
}

fn organization_from_row(row: &SqliteRow) -> AppResult<Organization> {
    Ok(Organization {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        display_name: row.try_get("display_name")?,
        contact_name: row.try_get("contact_name")?,
        contact_email: row.try_get("contact_email")?,
        contact_phone: row.try_get("contact_phone")?,
        created: row.try_get::<DateTime<Utc>, _>("created")?,
        modified: row.try_get::<DateTime<Utc>, _>("modified")?,
    })
}

fn workgroup_from_row(row: &SqliteRow) -> AppResult<Workgroup> {
    Ok(Workgroup {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        course_id: row.try_get("course_id")?,
        created: row.try_get::<DateTime<Utc>, _>("created")?,
        modified: row.try_get::<DateTime<Utc>, _>("modified")?,
    })
}

impl GroupDatabase {
    // Users

    pub async fn create_user(&self, user: NewUser) -> AppResult<User> {
        let result = sqlx::query(
            "INSERT INTO users (username, email, first_name, last_name, is_active) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.is_active)
        .execute(&self.pool)
        .await?;

        Ok(User {
            id: result.last_insert_rowid(),
            username: user.username,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            is_active: user.is_active,
        })
    }

    pub async fn find_user_by_username(&self, username: &str) -> AppResult<Option<User>> {
        let row = sqlx::query(
            "SELECT id, username, email, first_name, last_name, is_active FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    pub async fn get_users_by_ids(&self, ids: &[UserId]) -> AppResult<Vec<User>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT id, username, email, first_name, last_name, is_active FROM users WHERE id IN (",
        );
        let mut separated = qb.separated(",");
        for id in ids {
            separated.push_bind(*id);
        }
        qb.push(") ORDER BY id");

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(user_from_row).collect()
    }

    /// Add every resolvable user in `ids` to the group. Unknown ids are
    /// skipped; the users actually resolved are returned.
    pub async fn add_users_to_group(&self, group_id: GroupId, ids: &[UserId]) -> AppResult<Vec<User>> {
        let users = self.get_users_by_ids(ids).await?;
        if users.is_empty() {
            return Ok(users);
        }

        let mut tx = self.begin_transaction().await?;
        for user in &users {
            sqlx::query("INSERT OR IGNORE INTO group_users (group_id, user_id) VALUES (?, ?)")
                .bind(group_id)
                .bind(user.id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        if users.len() < ids.len() {
            debug!(group_id, requested = ids.len(), resolved = users.len(), "Some user ids did not resolve");
        }
        info!(group_id, count = users.len(), "Added users to group");
        Ok(users)
    }

    pub async fn group_users(&self, group_id: GroupId, is_active: Option<bool>) -> AppResult<Vec<User>> {
        let rows = sqlx::query(
            "SELECT u.id, u.username, u.email, u.first_name, u.last_name, u.is_active
             FROM group_users gu JOIN users u ON u.id = gu.user_id
             WHERE gu.group_id = ? AND (? IS NULL OR u.is_active = ?)
             ORDER BY u.id",
        )
        .bind(group_id)
        .bind(is_active)
        .bind(is_active)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(user_from_row).collect()
    }

    pub async fn group_has_user(&self, group_id: GroupId, user_id: UserId) -> AppResult<bool> {
        let row = sqlx::query("SELECT 1 FROM group_users WHERE group_id = ? AND user_id = ?")
            .bind(group_id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn remove_user_from_group(&self, group_id: GroupId, user_id: UserId) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM group_users WHERE group_id = ? AND user_id = ?")
            .bind(group_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // Courses

    pub async fn upsert_course(&self, course: &Course) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO courses (course_id, display_name) VALUES (?, ?)
             ON CONFLICT(course_id) DO UPDATE SET display_name = excluded.display_name",
        )
        .bind(&course.course_id)
        .bind(&course.display_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_course(&self, course_id: &str) -> AppResult<Option<Course>> {
        let row = sqlx::query("SELECT course_id, display_name FROM courses WHERE course_id = ?")
            .bind(course_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(Course {
                course_id: row.try_get("course_id")?,
                display_name: row.try_get("display_name")?,
            })),
            None => Ok(None),
        }
    }

    pub async fn find_course_relationship(
        &self,
        group_id: GroupId,
        course_id: &str,
    ) -> AppResult<Option<CourseGroupRelationship>> {
        let row = sqlx::query(
            "SELECT id, course_id, group_id, record_active, created FROM course_group_relationships
             WHERE group_id = ? AND course_id = ? ORDER BY id LIMIT 1",
        )
        .bind(group_id)
        .bind(course_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(course_edge_from_row).transpose()
    }

    /// Attach a course to a group. The table has no unique constraint, so the
    /// duplicate check is part of the INSERT statement.
    pub async fn add_course_to_group(&self, group_id: GroupId, course_id: &str) -> AppResult<CourseGroupRelationship> {
        let now = Utc::now();

        let result = sqlx::query(
            "INSERT INTO course_group_relationships (course_id, group_id, record_active, created, modified)
             SELECT ?, ?, 1, ?, ?
             WHERE NOT EXISTS (
                 SELECT 1 FROM course_group_relationships WHERE group_id = ? AND course_id = ?
             )",
        )
        .bind(course_id)
        .bind(group_id)
        .bind(now)
        .bind(now)
        .bind(group_id)
        .bind(course_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict("Relationship already exists.".to_string()));
        }
        info!(group_id, course_id, "Added course to group");

        Ok(CourseGroupRelationship {
            id: result.last_insert_rowid(),
            course_id: course_id.to_string(),
            group_id,
            record_active: true,
            created: now,
        })
    }

    pub async fn group_courses(&self, group_id: GroupId) -> AppResult<Vec<CourseGroupRelationship>> {
        let rows = sqlx::query(
            "SELECT id, course_id, group_id, record_active, created FROM course_group_relationships
             WHERE group_id = ? ORDER BY id",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(course_edge_from_row).collect()
    }

    pub async fn remove_course_from_group(&self, group_id: GroupId, course_id: &str) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM course_group_relationships WHERE group_id = ? AND course_id = ?")
            .bind(group_id)
            .bind(course_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // Organizations

    pub async fn create_organization(&self, organization: NewOrganization) -> AppResult<Organization> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT INTO organizations (name, display_name, contact_name, contact_email, contact_phone, created, modified)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&organization.name)
        .bind(&organization.display_name)
        .bind(&organization.contact_name)
        .bind(&organization.contact_email)
        .bind(&organization.contact_phone)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Organization {
            id: result.last_insert_rowid(),
            name: organization.name,
            display_name: organization.display_name,
            contact_name: organization.contact_name,
            contact_email: organization.contact_email,
            contact_phone: organization.contact_phone,
            created: now,
            modified: now,
        })
    }

    pub async fn add_group_to_organization(&self, organization_id: i64, group_id: GroupId) -> AppResult<()> {
        sqlx::query("INSERT OR IGNORE INTO organization_groups (organization_id, group_id) VALUES (?, ?)")
            .bind(organization_id)
            .bind(group_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn group_organizations(&self, group_id: GroupId) -> AppResult<Vec<Organization>> {
        let rows = sqlx::query(
            "SELECT o.id, o.name, o.display_name, o.contact_name, o.contact_email, o.contact_phone, o.created, o.modified
             FROM organization_groups og JOIN organizations o ON o.id = og.organization_id
             WHERE og.group_id = ? ORDER BY o.id",
        )
        .bind(group_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(organization_from_row).collect()
    }

    // Workgroups

    pub async fn create_workgroup(&self, name: &str, course_id: &str) -> AppResult<Workgroup> {
        let now = Utc::now();
        let result = sqlx::query("INSERT INTO workgroups (name, course_id, created, modified) VALUES (?, ?, ?, ?)")
            .bind(name)
            .bind(course_id)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?;

        Ok(Workgroup {
            id: result.last_insert_rowid(),
            name: name.to_string(),
            course_id: course_id.to_string(),
            created: now,
            modified: now,
        })
    }

    pub async fn add_group_to_workgroup(&self, workgroup_id: i64, group_id: GroupId) -> AppResult<()> {
        sqlx::query("INSERT OR IGNORE INTO workgroup_groups (workgroup_id, group_id) VALUES (?, ?)")
            .bind(workgroup_id)
            .bind(group_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn group_workgroups(&self, group_id: GroupId, course_id: Option<&str>) -> AppResult<Vec<Workgroup>> {
        let rows = sqlx::query(
            "SELECT w.id, w.name, w.course_id, w.created, w.modified
             FROM workgroup_groups wg JOIN workgroups w ON w.id = wg.workgroup_id
             WHERE wg.group_id = ? AND (? IS NULL OR w.course_id = ?)
             ORDER BY w.id",
        )
        .bind(group_id)
        .bind(course_id)
        .bind(course_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(workgroup_from_row).collect()
    }
}
