//! Resource identity.
//!
//! A [`ResourceKey`] names one unit of cached content. Its canonical string
//! form (`kind/owner/entity`, `-` for an absent component) is what ends up in
//! the persistent store, so it must stay stable across releases.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Placeholder for an absent key component in the canonical string form.
const ABSENT: &str = "-";

/// The kind of resource a key refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// A user's profile document (owned courses, preferences).
    Profile,
    /// The course catalog, or one catalog entry.
    Catalog,
    /// Downloaded content of a single course.
    Course,
    /// Per-owner progress for a course.
    Progress,
    /// The orchestrator's last assembled result for an owner.
    Aggregate,
}

impl ResourceKind {
    /// All kinds, in declaration order.
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::Profile,
        ResourceKind::Catalog,
        ResourceKind::Course,
        ResourceKind::Progress,
        ResourceKind::Aggregate,
    ];

    /// Lowercase name used in keys and config files.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Profile => "profile",
            ResourceKind::Catalog => "catalog",
            ResourceKind::Course => "course",
            ResourceKind::Progress => "progress",
            ResourceKind::Aggregate => "aggregate",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "profile" => Ok(ResourceKind::Profile),
            "catalog" => Ok(ResourceKind::Catalog),
            "course" => Ok(ResourceKind::Course),
            "progress" => Ok(ResourceKind::Progress),
            "aggregate" => Ok(ResourceKind::Aggregate),
            other => Err(KeyParseError::UnknownKind(other.to_string())),
        }
    }
}

/// Errors produced when parsing a canonical key string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyParseError {
    #[error("unknown resource kind: {0}")]
    UnknownKind(String),

    #[error("malformed resource key: {0}")]
    Malformed(String),
}

/// Composite identifier `(kind, owner?, entity?)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceKey {
    pub kind: ResourceKind,
    pub owner: Option<String>,
    pub entity: Option<String>,
}

impl ResourceKey {
    /// Build a key from its raw parts.
    pub fn new(kind: ResourceKind, owner: Option<String>, entity: Option<String>) -> Self {
        Self {
            kind,
            owner,
            entity,
        }
    }

    /// `(profile, user, -)`
    pub fn profile(user_id: impl Into<String>) -> Self {
        Self::new(ResourceKind::Profile, Some(user_id.into()), None)
    }

    /// `(catalog, -, -)`: the full catalog listing.
    pub fn catalog() -> Self {
        Self::new(ResourceKind::Catalog, None, None)
    }

    /// `(course, -, course)`
    pub fn course(course_id: impl Into<String>) -> Self {
        Self::new(ResourceKind::Course, None, Some(course_id.into()))
    }

    /// `(progress, owner, course)`
    pub fn progress(owner_id: impl Into<String>, course_id: impl Into<String>) -> Self {
        Self::new(
            ResourceKind::Progress,
            Some(owner_id.into()),
            Some(course_id.into()),
        )
    }

    /// `(aggregate, owner, -)`
    pub fn aggregate(owner_id: impl Into<String>) -> Self {
        Self::new(ResourceKind::Aggregate, Some(owner_id.into()), None)
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    pub fn entity(&self) -> Option<&str> {
        self.entity.as_deref()
    }

    /// Whether this key belongs to the given owner.
    pub fn is_owned_by(&self, owner_id: &str) -> bool {
        self.owner.as_deref() == Some(owner_id)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.kind,
            self.owner.as_deref().unwrap_or(ABSENT),
            self.entity.as_deref().unwrap_or(ABSENT)
        )
    }
}

impl FromStr for ResourceKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, '/');
        let (Some(kind), Some(owner), Some(entity)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(KeyParseError::Malformed(s.to_string()));
        };

        let component = |part: &str| (part != ABSENT).then(|| part.to_string());
        Ok(Self::new(kind.parse()?, component(owner), component(entity)))
    }
}
