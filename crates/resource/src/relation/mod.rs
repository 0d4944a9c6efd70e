//! Persisted relations between resources and the linker that reconciles
//! them with in-memory references.

mod linker;

pub use linker::{LinkReport, PendingRelation, RelationDiff, RelationLinker, RelationUpdate};

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::{RelationId, ResourceId};

/// Kind of a persisted relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationKind {
    /// Containment tree edge: source is the parent, target the child.
    ParentChild,
    /// Target is a candidate part that may be exchanged into the source.
    PossibleExchangeablePart,
    /// Target is the part currently mounted on the source.
    CurrentExchangeablePart,
    /// Generic extension relation.
    Extension,
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ParentChild => "parent-child",
            Self::PossibleExchangeablePart => "possible-exchangeable-part",
            Self::CurrentExchangeablePart => "current-exchangeable-part",
            Self::Extension => "extension",
        };
        f.write_str(s)
    }
}

/// Which end of a relation record a resource sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationRole {
    Source,
    Target,
}

impl RelationRole {
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Source => Self::Target,
            Self::Target => Self::Source,
        }
    }
}

/// A persisted edge between two resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationRecord {
    /// Record id, [`RelationId::UNSAVED`] before the store assigned one.
    pub id: RelationId,
    pub source: ResourceId,
    pub target: ResourceId,
    pub kind: RelationKind,
    /// The side whose reference declaration owns this entry.
    pub owner: RelationRole,
    /// Disambiguates records of the same kind that back different slots.
    pub name: Option<String>,
}

impl RelationRecord {
    /// A new, unsaved record owned by the source side.
    #[must_use]
    pub fn new(source: ResourceId, target: ResourceId, kind: RelationKind) -> Self {
        Self {
            id: RelationId::UNSAVED,
            source,
            target,
            kind,
            owner: RelationRole::Source,
            name: None,
        }
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn owned_by(mut self, owner: RelationRole) -> Self {
        self.owner = owner;
        self
    }

    #[must_use]
    pub fn with_id(mut self, id: RelationId) -> Self {
        self.id = id;
        self
    }

    /// The role `resource` plays in this record, if it takes part at all.
    #[must_use]
    pub fn role_of(&self, resource: ResourceId) -> Option<RelationRole> {
        if self.source == resource {
            Some(RelationRole::Source)
        } else if self.target == resource {
            Some(RelationRole::Target)
        } else {
            None
        }
    }

    /// The id at the end opposite to `role`.
    #[must_use]
    pub fn other(&self, role: RelationRole) -> ResourceId {
        match role {
            RelationRole::Source => self.target,
            RelationRole::Target => self.source,
        }
    }

    /// Whether both ends are the same resource.
    #[must_use]
    pub fn is_self_relation(&self) -> bool {
        self.source == self.target
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_and_other_end() {
        let record = RelationRecord::new(ResourceId::new(1), ResourceId::new(2), RelationKind::ParentChild);
        assert_eq!(record.role_of(ResourceId::new(1)), Some(RelationRole::Source));
        assert_eq!(record.role_of(ResourceId::new(2)), Some(RelationRole::Target));
        assert_eq!(record.role_of(ResourceId::new(3)), None);
        assert_eq!(record.other(RelationRole::Source), ResourceId::new(2));
        assert_eq!(record.other(RelationRole::Target), ResourceId::new(1));
    }

    #[test]
    fn builder_sets_name_and_owner() {
        let record = RelationRecord::new(ResourceId::new(1), ResourceId::new(2), RelationKind::CurrentExchangeablePart)
            .named("Fixture")
            .owned_by(RelationRole::Target);
        assert_eq!(record.name.as_deref(), Some("Fixture"));
        assert_eq!(record.owner, RelationRole::Target);
        assert_eq!(record.id, RelationId::UNSAVED);
    }
}
