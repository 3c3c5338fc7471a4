use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Group ids are storage-assigned SQLite rowids.
pub type GroupId = i64;

/// Free-form metadata attached to a group profile.
pub type GroupData = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    /// Globally unique storage name, `"{id:04}: {label}"`.
    pub name: String,
    pub record_active: bool,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub profile: Option<GroupProfile>,
}

impl Group {
    /// The label callers supplied, falling back to the storage name for
    /// groups that never received a profile.
    pub fn display_name(&self) -> &str {
        self.profile
            .as_ref()
            .and_then(|p| p.name.as_deref())
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.name)
    }

    pub fn group_type(&self) -> Option<&str> {
        self.profile.as_ref().and_then(|p| p.group_type.as_deref())
    }

    pub fn data(&self) -> Option<&GroupData> {
        self.profile.as_ref().and_then(|p| p.data.as_ref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupProfile {
    pub group_id: GroupId,
    pub group_type: Option<String>,
    pub name: Option<String>,
    pub data: Option<GroupData>,
}

#[derive(Debug, Clone, Default)]
pub struct NewGroup {
    pub name: String,
    pub group_type: String,
    pub data: Option<GroupData>,
}

/// Partial update; `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct GroupUpdate {
    pub name: Option<String>,
    pub group_type: Option<String>,
    pub data: Option<GroupData>,
}

impl GroupUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.group_type.is_none() && self.data.is_none()
    }
}

/// Per-group anchor of the relationship graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRelationship {
    pub group_id: GroupId,
    pub name: String,
    pub parent_group_id: Option<GroupId>,
    pub record_active: bool,
}

/// One directed half of a symmetric link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkedGroupRelationship {
    pub id: i64,
    pub from_group_id: GroupId,
    pub to_group_id: GroupId,
    pub record_active: bool,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CourseGroupRelationship {
    pub id: i64,
    pub course_id: String,
    pub group_id: GroupId,
    pub record_active: bool,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationshipType {
    #[serde(rename = "h")]
    Hierarchical,
    #[serde(rename = "g")]
    Graph,
}

impl RelationshipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationshipType::Hierarchical => "h",
            RelationshipType::Graph => "g",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "h" => Some(RelationshipType::Hierarchical),
            "g" => Some(RelationshipType::Graph),
            _ => None,
        }
    }
}

/// Which end of a hierarchical edge the first group sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Parent,
    Child,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relationship {
    None,
    Hierarchical(Direction),
    Symmetric,
}

impl Relationship {
    pub fn relationship_type(&self) -> Option<RelationshipType> {
        match self {
            Relationship::None => None,
            Relationship::Hierarchical(_) => Some(RelationshipType::Hierarchical),
            Relationship::Symmetric => Some(RelationshipType::Graph),
        }
    }
}
