// Collaborators consumed by the HTTP layer: course resolution, resource URI
// generation from the incoming request, and query-flag parsing.

use std::convert::Infallible;
use std::fmt::Display;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, OriginalUri},
    http::{header, request::Parts},
};

use crate::database::GroupDatabase;
use crate::error::AppResult;
use crate::groups_api::GroupsApi;
use crate::models::Course;

/// Resolves opaque course identifiers against the course content store.
#[async_trait]
pub trait CourseLookup: Send + Sync {
    async fn resolve(&self, course_id: &str) -> AppResult<Option<Course>>;
}

/// Course lookup backed by the local `courses` table.
pub struct CourseCatalog {
    db: Arc<GroupDatabase>,
}

impl CourseCatalog {
    pub fn new(db: Arc<GroupDatabase>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CourseLookup for CourseCatalog {
    async fn resolve(&self, course_id: &str) -> AppResult<Option<Course>> {
        self.db.get_course(course_id).await
    }
}

/// Absolute URI of the requested resource, `{scheme}://{host}{path}`, with
/// any trailing slash removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseUri(pub String);

impl BaseUri {
    pub fn join(&self, segment: impl Display) -> String {
        format!("{}/{}", self.0, segment)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_parts(parts: &Parts, default_scheme: &str, default_host: &str) -> Self {
        let uri = parts
            .extensions
            .get::<OriginalUri>()
            .map(|original| &original.0)
            .unwrap_or(&parts.uri);

        let scheme = parts
            .headers
            .get("x-forwarded-proto")
            .and_then(|value| value.to_str().ok())
            .or_else(|| uri.scheme_str())
            .unwrap_or(default_scheme);

        let host = parts
            .headers
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
            .or_else(|| uri.authority().map(|authority| authority.as_str()))
            .unwrap_or(default_host);

        let path = uri.path().trim_end_matches('/');
        BaseUri(format!("{}://{}{}", scheme, host, path))
    }
}

impl FromRequestParts<GroupsApi> for BaseUri {
    type Rejection = Infallible;

    fn from_request_parts(
        parts: &mut Parts,
        state: &GroupsApi,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        let base_uri = BaseUri::from_parts(parts, state.public_scheme(), state.public_host());
        async move { Ok(base_uri) }
    }
}

/// Lenient boolean parsing for query flags such as `?is_active=true`.
pub fn str2bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "t" | "1" | "yes" | "y" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts_for(request: Request<()>) -> Parts {
        request.into_parts().0
    }

    #[test]
    fn test_str2bool() {
        for truthy in ["true", "True", "t", "1", "yes", "Y", " on "] {
            assert!(str2bool(truthy), "{} should be true", truthy);
        }
        for falsy in ["false", "0", "no", "", "maybe"] {
            assert!(!str2bool(falsy), "{} should be false", falsy);
        }
    }

    #[test]
    fn test_base_uri_from_host_header() {
        let parts = parts_for(
            Request::builder()
                .uri("/api/server/groups/12/")
                .header("host", "lms.example.com")
                .body(())
                .unwrap(),
        );
        let base = BaseUri::from_parts(&parts, "http", "localhost:3000");
        assert_eq!(base.as_str(), "http://lms.example.com/api/server/groups/12");
        assert_eq!(base.join("users"), "http://lms.example.com/api/server/groups/12/users");
    }

    #[test]
    fn test_base_uri_prefers_original_uri_and_forwarded_proto() {
        let mut parts = parts_for(
            Request::builder()
                .uri("/groups/3")
                .header("x-forwarded-proto", "https")
                .body(())
                .unwrap(),
        );
        parts
            .extensions
            .insert(OriginalUri("/api/server/groups/3".parse().unwrap()));

        let base = BaseUri::from_parts(&parts, "http", "localhost:3000");
        assert_eq!(base.as_str(), "https://localhost:3000/api/server/groups/3");
    }
}
