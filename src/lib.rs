// Group relationship graph service - groups, their hierarchy and symmetric
// links, and membership edges to users, courses, organizations and workgroups

// Storage handle, schema and cache
pub mod cache;
pub mod database;

// Records
pub mod models;

// Group Entity Store, Relationship Graph and membership edges
pub mod group_store;
pub mod memberships;
pub mod relationship_graph;

// HTTP surface and the collaborators it consumes
pub mod collaborators;
pub mod groups_api;

// Application wiring
pub mod app_state;
pub mod config;
pub mod data_seeder;

// Common utilities
pub mod error;

// Re-exports for convenience
pub use error::{AppError, AppResult};
