// Groups HTTP interface - translates REST verbs into entity store, graph and
// membership operations

use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use crate::{
    collaborators::{str2bool, BaseUri, CourseLookup},
    config::ServerConfig,
    database::GroupDatabase,
    error::{AppError, AppResult},
    models::{
        Direction, Group, GroupData, GroupId, GroupUpdate, NewGroup, Relationship, RelationshipType,
        UserId,
    },
};

const DEFAULT_PAGE_SIZE: usize = 20;
const MAX_PAGE_SIZE: usize = 100;

/// Shared state of the group routes.
#[derive(Clone)]
pub struct GroupsApi {
    db: Arc<GroupDatabase>,
    courses: Arc<dyn CourseLookup>,
    public_scheme: String,
    public_host: String,
}

impl GroupsApi {
    pub fn new(db: Arc<GroupDatabase>, courses: Arc<dyn CourseLookup>, server: &ServerConfig) -> Self {
        Self {
            db,
            courses,
            public_scheme: server.public_scheme.clone(),
            public_host: format!("{}:{}", server.host, server.port),
        }
    }

    /// Swap the course resolution collaborator.
    pub fn with_course_lookup(mut self, courses: Arc<dyn CourseLookup>) -> Self {
        self.courses = courses;
        self
    }

    pub fn database(&self) -> Arc<GroupDatabase> {
        self.db.clone()
    }

    pub fn public_scheme(&self) -> &str {
        &self.public_scheme
    }

    pub fn public_host(&self) -> &str {
        &self.public_host
    }
}

// HTTP Request types

#[derive(Debug, Default, Deserialize)]
pub struct GroupRequest {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub group_type: Option<String>,
    pub data: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GroupRelationshipRequest {
    pub group_id: Option<Value>,
    pub relationship_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GroupCourseRequest {
    pub course_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GroupUserRequest {
    pub user_id: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GroupTypeQuery {
    #[serde(rename = "type")]
    pub group_type: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct GroupUsersQuery {
    pub is_active: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WorkgroupsQuery {
    pub course_id: Option<String>,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct GroupCourseItem {
    pub course_id: String,
    pub display_name: Option<String>,
}

/// `Path` whose rejection is a JSON 404. Ids that do not parse name no
/// resource, the same as an unmatched route.
pub struct IdPath<T>(pub T);

impl<S, T> FromRequestParts<S> for IdPath<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = AppError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        async move {
            match Path::<T>::from_request_parts(parts, state).await {
                Ok(Path(value)) => Ok(IdPath(value)),
                Err(rejection) => Err(AppError::NotFound(format!(
                    "No resource at {}: {}",
                    parts.uri.path(),
                    rejection.body_text()
                ))),
            }
        }
    }
}

// Request parsing helpers

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_group_data(data: Option<Value>) -> AppResult<Option<GroupData>> {
    match data {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(AppError::Validation("Field 'data' must be a JSON object".to_string())),
    }
}

fn parse_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Accepts `"1,2,3"`, a single integer, or an array of integers.
fn parse_user_ids(value: Option<Value>) -> AppResult<Vec<UserId>> {
    let invalid =
        || AppError::Validation("Field 'user_id' must be a comma-separated list of integers".to_string());

    let ids = match value {
        None | Some(Value::Null) => {
            return Err(AppError::Validation("Field 'user_id' is required".to_string()))
        }
        Some(Value::String(raw)) => raw
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| part.parse::<UserId>().map_err(|_| invalid()))
            .collect::<AppResult<Vec<_>>>()?,
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| parse_id(item).ok_or_else(invalid))
            .collect::<AppResult<Vec<_>>>()?,
        Some(other) => vec![parse_id(&other).ok_or_else(invalid)?],
    };

    if ids.is_empty() {
        return Err(invalid());
    }
    Ok(ids)
}

fn group_json(group: &Group, uri: String) -> Value {
    let mut body = json!({
        "id": group.id,
        "name": group.display_name(),
        "uri": uri,
    });
    if let Some(group_type) = group.group_type() {
        body["type"] = json!(group_type);
    }
    if let Some(data) = group.data() {
        body["data"] = Value::Object(data.clone());
    }
    body
}

fn related_group_json(group: &Group, uri: String, relationship_type: RelationshipType) -> Value {
    json!({
        "id": group.id,
        "name": group.display_name(),
        "uri": uri,
        "relationship_type": relationship_type.as_str(),
    })
}

fn paginate<T: Serialize>(items: Vec<T>, page: Option<usize>, page_size: Option<usize>) -> AppResult<Value> {
    let page_size = page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    let count = items.len();
    let num_pages = count.div_ceil(page_size).max(1);
    let page = page.unwrap_or(1);
    if page == 0 || page > num_pages {
        return Err(AppError::NotFound(format!("Invalid page {}", page)));
    }

    let results: Vec<T> = items
        .into_iter()
        .skip((page - 1) * page_size)
        .take(page_size)
        .collect();

    Ok(json!({
        "count": count,
        "num_pages": num_pages,
        "previous": (page > 1).then(|| page - 1),
        "next": (page < num_pages).then(|| page + 1),
        "results": serde_json::to_value(results)?,
    }))
}

async fn require_group(api: &GroupsApi, group_id: GroupId) -> AppResult<Group> {
    api.db.get_group(group_id).await
}

// HTTP Handlers - groups

pub async fn create_group_handler(
    State(api): State<GroupsApi>,
    base_uri: BaseUri,
    Json(req): Json<GroupRequest>,
) -> AppResult<Response> {
    let name = non_empty(req.name)
        .ok_or_else(|| AppError::Validation("Field 'name' is required".to_string()))?;
    let group_type = non_empty(req.group_type)
        .ok_or_else(|| AppError::Validation("Field 'type' is required".to_string()))?;
    let data = parse_group_data(req.data)?;

    let group = api.db.create_group(NewGroup { name, group_type, data }).await?;

    let body = json!({
        "id": group.id,
        "name": group.display_name(),
        "uri": base_uri.join(group.id),
    });
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

pub async fn list_groups_handler(
    State(api): State<GroupsApi>,
    base_uri: BaseUri,
    Query(query): Query<GroupTypeQuery>,
) -> AppResult<Response> {
    let group_type = non_empty(query.group_type)
        .ok_or_else(|| AppError::Validation("Query parameter 'type' is required".to_string()))?;

    let groups = api.db.list_groups_by_type(&group_type).await?;
    let body: Vec<Value> = groups
        .iter()
        .map(|group| group_json(group, base_uri.join(group.id)))
        .collect();
    Ok(Json(body).into_response())
}

pub async fn get_group_handler(
    State(api): State<GroupsApi>,
    IdPath(group_id): IdPath<GroupId>,
    base_uri: BaseUri,
) -> AppResult<Response> {
    let group = require_group(&api, group_id).await?;

    let mut body = group_json(&group, base_uri.as_str().to_string());
    body["resources"] = json!([
        {"uri": base_uri.join("users")},
        {"uri": base_uri.join("groups")},
        {"uri": base_uri.join("courses")},
    ]);
    Ok(Json(body).into_response())
}

pub async fn update_group_handler(
    State(api): State<GroupsApi>,
    IdPath(group_id): IdPath<GroupId>,
    base_uri: BaseUri,
    Json(req): Json<GroupRequest>,
) -> AppResult<Response> {
    require_group(&api, group_id).await?;

    let update = GroupUpdate {
        name: non_empty(req.name),
        group_type: non_empty(req.group_type),
        data: parse_group_data(req.data)?,
    };
    if update.group_type.is_none() && update.data.is_none() {
        return Err(AppError::Validation("One of 'type' or 'data' is required".to_string()));
    }

    let group = api.db.update_group(group_id, update).await?;
    Ok(Json(group_json(&group, base_uri.as_str().to_string())).into_response())
}

pub async fn delete_group_handler(
    State(api): State<GroupsApi>,
    IdPath(group_id): IdPath<GroupId>,
) -> AppResult<Response> {
    api.db.delete_group(group_id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

// HTTP Handlers - group users

pub async fn add_group_users_handler(
    State(api): State<GroupsApi>,
    IdPath(group_id): IdPath<GroupId>,
    base_uri: BaseUri,
    Json(req): Json<GroupUserRequest>,
) -> AppResult<Response> {
    let user_ids = parse_user_ids(req.user_id)?;
    require_group(&api, group_id).await?;

    let added = api.db.add_users_to_group(group_id, &user_ids).await?;
    if added.is_empty() {
        return Err(AppError::NotFound("None of the supplied users exist".to_string()));
    }

    let added_ids: Vec<String> = added.iter().map(|user| user.id.to_string()).collect();
    let body = json!({
        "uri": base_uri.as_str(),
        "group_id": group_id,
        "user_id": added_ids.join(","),
    });
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

pub async fn list_group_users_handler(
    State(api): State<GroupsApi>,
    IdPath(group_id): IdPath<GroupId>,
    Query(query): Query<GroupUsersQuery>,
) -> AppResult<Response> {
    require_group(&api, group_id).await?;

    let is_active = query.is_active.as_deref().map(str2bool);
    let users = api.db.group_users(group_id, is_active).await?;
    let users: Vec<Value> = users
        .iter()
        .map(|user| {
            json!({
                "id": user.id,
                "email": user.email,
                "username": user.username,
                "first_name": user.first_name,
                "last_name": user.last_name,
            })
        })
        .collect();
    Ok(Json(json!({ "users": users })).into_response())
}

pub async fn get_group_user_handler(
    State(api): State<GroupsApi>,
    IdPath((group_id, user_id)): IdPath<(GroupId, UserId)>,
    base_uri: BaseUri,
) -> AppResult<Response> {
    require_group(&api, group_id).await?;
    if !api.db.group_has_user(group_id, user_id).await? {
        return Err(AppError::NotFound(format!("User {} is not in group {}", user_id, group_id)));
    }

    let body = json!({
        "uri": base_uri.as_str(),
        "group_id": group_id,
        "user_id": user_id,
    });
    Ok(Json(body).into_response())
}

pub async fn delete_group_user_handler(
    State(api): State<GroupsApi>,
    IdPath((group_id, user_id)): IdPath<(GroupId, UserId)>,
) -> AppResult<Response> {
    api.db.remove_user_from_group(group_id, user_id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

// HTTP Handlers - group to group relationships

pub async fn add_related_group_handler(
    State(api): State<GroupsApi>,
    IdPath(group_id): IdPath<GroupId>,
    base_uri: BaseUri,
    Json(req): Json<GroupRelationshipRequest>,
) -> AppResult<Response> {
    let related_id = req
        .group_id
        .as_ref()
        .and_then(parse_id)
        .ok_or_else(|| AppError::Validation("Field 'group_id' must be an integer".to_string()))?;
    let relationship_type = non_empty(req.relationship_type)
        .ok_or_else(|| AppError::Validation("Field 'relationship_type' is required".to_string()))?;

    api.db.require_relationship(group_id).await?;
    api.db.require_relationship(related_id).await?;

    match RelationshipType::parse(&relationship_type) {
        Some(RelationshipType::Hierarchical) => {
            api.db.set_parent(related_id, group_id).await?;
        }
        Some(RelationshipType::Graph) => {
            api.db.add_link(group_id, related_id).await?;
        }
        None => {
            return Err(AppError::UnsupportedValue {
                field: "relationship_type".to_string(),
                message: format!("Relationship type '{}' not currently supported", relationship_type),
            });
        }
    }

    info!(group_id, related_id, relationship_type = %relationship_type, "Related groups");
    let body = json!({
        "uri": base_uri.join(related_id),
        "group_id": related_id,
        "relationship_type": relationship_type,
    });
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

pub async fn list_related_groups_handler(
    State(api): State<GroupsApi>,
    IdPath(group_id): IdPath<GroupId>,
    base_uri: BaseUri,
    Query(query): Query<GroupTypeQuery>,
) -> AppResult<Response> {
    api.db.require_relationship(group_id).await?;
    let type_filter = non_empty(query.group_type);

    let children = api.db.children_of(group_id, type_filter.as_deref()).await?;
    let linked = api.db.linked_of(group_id, type_filter.as_deref()).await?;

    let body: Vec<Value> = children
        .iter()
        .map(|group| related_group_json(group, base_uri.join(group.id), RelationshipType::Hierarchical))
        .chain(
            linked
                .iter()
                .map(|group| related_group_json(group, base_uri.join(group.id), RelationshipType::Graph)),
        )
        .collect();
    Ok(Json(body).into_response())
}

pub async fn get_related_group_handler(
    State(api): State<GroupsApi>,
    IdPath((group_id, related_id)): IdPath<(GroupId, GroupId)>,
    base_uri: BaseUri,
) -> AppResult<Response> {
    api.db.require_relationship(group_id).await?;

    // Mirrors the list view: children of `group_id` and its links.
    let relationship_type = match api.db.relationship_between(group_id, related_id).await? {
        Relationship::Hierarchical(Direction::Child) => None,
        relationship => relationship.relationship_type(),
    }
    .ok_or_else(|| {
        AppError::NotFound(format!("Group {} has no relationship to group {}", group_id, related_id))
    })?;

    let body = json!({
        "uri": base_uri.as_str(),
        "from_group_id": group_id,
        "to_group_id": related_id,
        "relationship_type": relationship_type.as_str(),
    });
    Ok(Json(body).into_response())
}

pub async fn delete_related_group_handler(
    State(api): State<GroupsApi>,
    IdPath((group_id, related_id)): IdPath<(GroupId, GroupId)>,
) -> AppResult<Response> {
    api.db.require_relationship(group_id).await?;

    if api.db.get_relationship(related_id).await?.is_some()
        && !api.db.clear_parent(related_id, group_id).await?
    {
        api.db.remove_link(group_id, related_id).await?;
    }
    Ok(StatusCode::NO_CONTENT.into_response())
}

// HTTP Handlers - group courses

pub async fn add_group_course_handler(
    State(api): State<GroupsApi>,
    IdPath(group_id): IdPath<GroupId>,
    base_uri: BaseUri,
    Json(req): Json<GroupCourseRequest>,
) -> AppResult<Response> {
    let course_id = non_empty(req.course_id)
        .ok_or_else(|| AppError::Validation("Field 'course_id' is required".to_string()))?;
    require_group(&api, group_id).await?;

    if api.courses.resolve(&course_id).await?.is_none() {
        return Err(AppError::NotFound(format!("Course {} not found", course_id)));
    }

    let edge = api.db.add_course_to_group(group_id, &course_id).await?;
    let body = json!({
        "group_id": edge.group_id,
        "course_id": edge.course_id,
        "uri": base_uri.join(&edge.course_id),
    });
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

pub async fn list_group_courses_handler(
    State(api): State<GroupsApi>,
    IdPath(group_id): IdPath<GroupId>,
) -> AppResult<Response> {
    require_group(&api, group_id).await?;

    let mut items = Vec::new();
    for edge in api.db.group_courses(group_id).await? {
        let display_name = api.courses.resolve(&edge.course_id).await?.map(|c| c.display_name);
        items.push(GroupCourseItem {
            course_id: edge.course_id,
            display_name,
        });
    }
    Ok(Json(items).into_response())
}

pub async fn get_group_course_handler(
    State(api): State<GroupsApi>,
    IdPath((group_id, course_id)): IdPath<(GroupId, String)>,
    base_uri: BaseUri,
) -> AppResult<Response> {
    require_group(&api, group_id).await?;
    let edge = api
        .db
        .find_course_relationship(group_id, &course_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Course {} is not linked to group {}", course_id, group_id)))?;

    let body = json!({
        "uri": base_uri.as_str(),
        "group_id": edge.group_id,
        "course_id": edge.course_id,
    });
    Ok(Json(body).into_response())
}

pub async fn delete_group_course_handler(
    State(api): State<GroupsApi>,
    IdPath((group_id, course_id)): IdPath<(GroupId, String)>,
) -> AppResult<Response> {
    api.db.remove_course_from_group(group_id, &course_id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

// HTTP Handlers - organizations and workgroups

pub async fn list_group_organizations_handler(
    State(api): State<GroupsApi>,
    IdPath(group_id): IdPath<GroupId>,
) -> AppResult<Response> {
    require_group(&api, group_id).await?;
    let organizations = api.db.group_organizations(group_id).await?;
    Ok(Json(organizations).into_response())
}

pub async fn list_group_workgroups_handler(
    State(api): State<GroupsApi>,
    IdPath(group_id): IdPath<GroupId>,
    Query(query): Query<WorkgroupsQuery>,
) -> AppResult<Response> {
    require_group(&api, group_id).await?;
    let course_id = non_empty(query.course_id);
    let workgroups = api.db.group_workgroups(group_id, course_id.as_deref()).await?;
    Ok(Json(paginate(workgroups, query.page, query.page_size)?).into_response())
}

// Create groups router
pub fn create_groups_router(api: GroupsApi) -> Router {
    Router::new()
        // Group entities
        .route("/groups", post(create_group_handler).get(list_groups_handler))
        .route(
            "/groups/{group_id}",
            get(get_group_handler)
                .post(update_group_handler)
                .delete(delete_group_handler),
        )
        // Users
        .route(
            "/groups/{group_id}/users",
            post(add_group_users_handler).get(list_group_users_handler),
        )
        .route(
            "/groups/{group_id}/users/{user_id}",
            get(get_group_user_handler).delete(delete_group_user_handler),
        )
        // Group to group
        .route(
            "/groups/{group_id}/groups",
            post(add_related_group_handler).get(list_related_groups_handler),
        )
        .route(
            "/groups/{group_id}/groups/{related_group_id}",
            get(get_related_group_handler).delete(delete_related_group_handler),
        )
        // Courses; ids may contain slashes
        .route(
            "/groups/{group_id}/courses",
            post(add_group_course_handler).get(list_group_courses_handler),
        )
        .route(
            "/groups/{group_id}/courses/{*course_id}",
            get(get_group_course_handler).delete(delete_group_course_handler),
        )
        .route("/groups/{group_id}/organizations", get(list_group_organizations_handler))
        .route("/groups/{group_id}/workgroups", get(list_group_workgroups_handler))
        .with_state(api)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_user_ids() {
        assert_eq!(parse_user_ids(Some(json!("1, 2,3"))).unwrap(), vec![1, 2, 3]);
        assert_eq!(parse_user_ids(Some(json!(7))).unwrap(), vec![7]);
        assert_eq!(parse_user_ids(Some(json!([4, "5"]))).unwrap(), vec![4, 5]);
        assert!(matches!(parse_user_ids(None), Err(AppError::Validation(_))));
        assert!(matches!(parse_user_ids(Some(json!("1,x"))), Err(AppError::Validation(_))));
        assert!(matches!(parse_user_ids(Some(json!(" , "))), Err(AppError::Validation(_))));
        assert!(matches!(parse_user_ids(Some(json!({"id": 1}))), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_parse_group_data_requires_object() {
        assert!(parse_group_data(None).unwrap().is_none());
        assert!(parse_group_data(Some(Value::Null)).unwrap().is_none());
        assert!(parse_group_data(Some(json!({"a": 1}))).unwrap().is_some());
        assert!(parse_group_data(Some(json!([1, 2]))).is_err());
    }

    #[test]
    fn test_paginate_bounds() {
        let items: Vec<u32> = (0..45).collect();
        let page = paginate(items.clone(), Some(3), Some(20)).unwrap();
        assert_eq!(page["count"], json!(45));
        assert_eq!(page["num_pages"], json!(3));
        assert_eq!(page["previous"], json!(2));
        assert_eq!(page["next"], Value::Null);
        assert_eq!(page["results"].as_array().unwrap().len(), 5);

        assert!(matches!(paginate(items, Some(4), Some(20)), Err(AppError::NotFound(_))));

        let empty = paginate(Vec::<u32>::new(), None, None).unwrap();
        assert_eq!(empty["num_pages"], json!(1));
        assert_eq!(empty["results"], json!([]));
    }
}
