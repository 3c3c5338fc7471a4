use std::sync::Arc;

use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

use crate::{
    collaborators::{CourseCatalog, CourseLookup},
    config::Config,
    database::GroupDatabase,
    error::AppResult,
    groups_api::{create_groups_router, GroupsApi},
};

#[derive(Clone)]
pub struct AppState {
    pub groups_api: GroupsApi,
    pub config: Config,
}

impl AppState {
    pub async fn new(config: Config) -> AppResult<Self> {
        // Initialize database
        let database = GroupDatabase::new(
            &config.database.url,
            config.database.max_connections,
            config.cache.capacity,
        )
        .await?;
        database.init().await?;
        let database = Arc::new(database);

        // Courses resolve against the local catalog unless a caller swaps it
        let courses: Arc<dyn CourseLookup> = Arc::new(CourseCatalog::new(database.clone()));
        let groups_api = GroupsApi::new(database, courses, &config.server);

        Ok(Self { groups_api, config })
    }

    pub fn with_course_lookup(mut self, courses: Arc<dyn CourseLookup>) -> Self {
        self.groups_api = self.groups_api.with_course_lookup(courses);
        self
    }

    pub fn database(&self) -> Arc<GroupDatabase> {
        self.groups_api.database()
    }

    /// Group routes mounted under the configured API prefix.
    pub fn router(&self) -> Router {
        let groups = create_groups_router(self.groups_api.clone());
        let prefix = self.config.server.api_prefix.trim_end_matches('/');

        // axum refuses to nest at the root
        let router = if prefix.is_empty() {
            Router::new().merge(groups)
        } else {
            Router::new().nest(prefix, groups)
        };
        router.layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
    }
}
