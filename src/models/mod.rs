// Group graph records - groups, their relationship anchors, and membership edges

pub mod group_models;
pub mod membership_models;

pub use group_models::{
    CourseGroupRelationship, Direction, Group, GroupData, GroupId, GroupProfile,
    GroupRelationship, GroupUpdate, LinkedGroupRelationship, NewGroup, Relationship,
    RelationshipType,
};
pub use membership_models::{
    Course, NewOrganization, NewUser, Organization, User, UserId, Workgroup,
};
