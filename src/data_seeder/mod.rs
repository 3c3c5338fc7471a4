// Fixture seeding - loads users, courses, groups and their edges from JSON.
// The caller owns the store handle and its lifetime.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info};

use crate::{
    database::GroupDatabase,
    error::{AppError, AppResult},
    models::{Course, GroupData, GroupId, NewGroup, NewOrganization, NewUser, UserId},
};

#[derive(Debug, Default, Deserialize)]
pub struct SeedFixture {
    #[serde(default)]
    pub users: Vec<NewUser>,
    #[serde(default)]
    pub courses: Vec<Course>,
    #[serde(default)]
    pub groups: Vec<SeedGroup>,
    #[serde(default)]
    pub organizations: Vec<SeedOrganization>,
    #[serde(default)]
    pub workgroups: Vec<SeedWorkgroup>,
}

/// A group plus its edges. Other groups are referenced by `key`, users by
/// username.
#[derive(Debug, Default, Deserialize)]
pub struct SeedGroup {
    pub key: String,
    pub name: String,
    #[serde(rename = "type")]
    pub group_type: String,
    #[serde(default)]
    pub data: Option<GroupData>,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub links: Vec<String>,
    #[serde(default)]
    pub courses: Vec<String>,
    #[serde(default)]
    pub users: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SeedOrganization {
    #[serde(flatten)]
    pub organization: NewOrganization,
    #[serde(default)]
    pub groups: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SeedWorkgroup {
    pub name: String,
    pub course_id: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SeedReport {
    pub users: usize,
    pub courses: usize,
    pub groups: usize,
    pub parents: usize,
    pub links: usize,
    pub course_edges: usize,
    pub memberships: usize,
    pub organizations: usize,
    pub workgroups: usize,
}

pub fn load_fixture(path: &Path) -> AppResult<SeedFixture> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        AppError::ConfigurationError(format!("Cannot read fixture {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&raw).map_err(|e| {
        AppError::Validation(format!("Fixture {} is not valid: {}", path.display(), e))
    })
}

fn resolve_key(keys: &HashMap<String, GroupId>, key: &str) -> AppResult<GroupId> {
    keys.get(key)
        .copied()
        .ok_or_else(|| AppError::Validation(format!("Fixture references unknown group '{}'", key)))
}

pub async fn seed_fixture(db: &GroupDatabase, fixture: SeedFixture) -> AppResult<SeedReport> {
    let mut report = SeedReport::default();

    let mut usernames: HashMap<String, UserId> = HashMap::new();
    for user in fixture.users {
        let existing = db.find_user_by_username(&user.username).await?;
        let user = match existing {
            Some(user) => user,
            None => {
                report.users += 1;
                db.create_user(user).await?
            }
        };
        usernames.insert(user.username.clone(), user.id);
    }

    for course in &fixture.courses {
        db.upsert_course(course).await?;
        report.courses += 1;
    }

    // Create every group before wiring edges so forward references work
    let mut keys: HashMap<String, GroupId> = HashMap::new();
    for seed in &fixture.groups {
        if keys.contains_key(&seed.key) {
            return Err(AppError::Validation(format!("Duplicate group key '{}'", seed.key)));
        }
        let group = db
            .create_group(NewGroup {
                name: seed.name.clone(),
                group_type: seed.group_type.clone(),
                data: seed.data.clone(),
            })
            .await?;
        keys.insert(seed.key.clone(), group.id);
        report.groups += 1;
    }

    for seed in &fixture.groups {
        let group_id = resolve_key(&keys, &seed.key)?;

        if let Some(parent) = &seed.parent {
            db.set_parent(group_id, resolve_key(&keys, parent)?).await?;
            report.parents += 1;
        }

        for link in &seed.links {
            db.add_link(group_id, resolve_key(&keys, link)?).await?;
            report.links += 1;
        }

        for course_id in &seed.courses {
            match db.add_course_to_group(group_id, course_id).await {
                Ok(_) => report.course_edges += 1,
                Err(AppError::Conflict(_)) => debug!(group_id, course_id = %course_id, "Course edge already present"),
                Err(e) => return Err(e),
            }
        }

        let user_ids = seed
            .users
            .iter()
            .map(|username| {
                usernames.get(username).copied().ok_or_else(|| {
                    AppError::Validation(format!("Fixture references unknown user '{}'", username))
                })
            })
            .collect::<AppResult<Vec<_>>>()?;
        report.memberships += db.add_users_to_group(group_id, &user_ids).await?.len();
    }

    for seed in fixture.organizations {
        let organization = db.create_organization(seed.organization).await?;
        for key in &seed.groups {
            db.add_group_to_organization(organization.id, resolve_key(&keys, key)?).await?;
        }
        report.organizations += 1;
    }

    for seed in &fixture.workgroups {
        let workgroup = db.create_workgroup(&seed.name, &seed.course_id).await?;
        for key in &seed.groups {
            db.add_group_to_workgroup(workgroup.id, resolve_key(&keys, key)?).await?;
        }
        report.workgroups += 1;
    }

    info!(?report, "Fixture seeded");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Direction, Relationship};
    use serde_json::json;
    use std::io::Write;

    fn fixture_json() -> serde_json::Value {
        json!({
            "users": [
                {"username": "alice", "email": "alice@example.com"},
                {"username": "bob", "email": "bob@example.com", "is_active": false}
            ],
            "courses": [
                {"course_id": "edX/Open_DemoX/edx_demo_course", "display_name": "Demo"}
            ],
            "groups": [
                {"key": "program", "name": "Program", "type": "program", "links": ["partner"]},
                {"key": "series", "name": "Alpha Series", "type": "series",
                 "data": {"start_date": "2014-01-01"}, "parent": "program",
                 "courses": ["edX/Open_DemoX/edx_demo_course", "edX/Open_DemoX/edx_demo_course"],
                 "users": ["alice", "bob"]},
                {"key": "partner", "name": "Partner", "type": "program"}
            ],
            "organizations": [
                {"name": "Acme", "display_name": "Acme Corp", "groups": ["program"]}
            ],
            "workgroups": [
                {"name": "Team 1", "course_id": "edX/Open_DemoX/edx_demo_course", "groups": ["series"]}
            ]
        })
    }

    #[tokio::test]
    async fn test_seed_fixture_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", fixture_json()).unwrap();

        let fixture = load_fixture(file.path()).unwrap();
        let db = GroupDatabase::in_memory().await.unwrap();
        let report = seed_fixture(&db, fixture).await.unwrap();

        assert_eq!(
            report,
            SeedReport {
                users: 2,
                courses: 1,
                groups: 3,
                parents: 1,
                links: 1,
                course_edges: 1,
                memberships: 2,
                organizations: 1,
                workgroups: 1,
            }
        );

        let series = db.list_groups_by_type("series").await.unwrap();
        let programs = db.list_groups_by_type("program").await.unwrap();
        let (program, partner) = (programs[0].id, programs[1].id);
        assert_eq!(
            db.relationship_between(program, series[0].id).await.unwrap(),
            Relationship::Hierarchical(Direction::Parent)
        );
        assert_eq!(db.relationship_between(partner, program).await.unwrap(), Relationship::Symmetric);
        assert_eq!(db.group_organizations(program).await.unwrap().len(), 1);
        assert_eq!(db.group_workgroups(series[0].id, None).await.unwrap().len(), 1);

        db.close().await;
    }

    #[tokio::test]
    async fn test_unknown_group_reference_is_rejected() {
        let fixture: SeedFixture = serde_json::from_value(json!({
            "groups": [{"key": "a", "name": "A", "type": "series", "parent": "ghost"}]
        }))
        .unwrap();
        let db = GroupDatabase::in_memory().await.unwrap();

        let result = seed_fixture(&db, fixture).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn test_missing_fixture_file() {
        let result = load_fixture(Path::new("/definitely/not/here.json"));
        assert!(matches!(result, Err(AppError::ConfigurationError(_))));
    }
}
