//! Identifiers used across the resource graph.
//!
//! Two families live here:
//!
//! - numeric ids ([`ResourceId`], [`RelationId`], [`ResourceKey`]), where the
//!   persistent ones use `0` for "never stored";
//! - interned names ([`TypeTag`], [`CapabilityId`], [`SlotName`]) backed by
//!   `Arc<str>` so cloning them on hot paths is a refcount bump.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Wrap a raw value.
            #[must_use]
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            /// The raw numeric value.
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

numeric_id!(
    /// Persistent identifier of a resource.
    ///
    /// `0` marks a transient resource that has never been saved. Once a
    /// resource received a non-zero id it keeps it for the lifetime of the
    /// in-memory instance.
    ResourceId,
    "r"
);

numeric_id!(
    /// Persistent identifier of a relation record (`0` = not stored yet).
    RelationId,
    "rel"
);

numeric_id!(
    /// Runtime key of a node inside one [`ResourceGraph`](crate::graph::ResourceGraph).
    ///
    /// Keys are handed out on insertion, never reused and never persisted.
    /// They let transient resources (id `0`) take part in the graph.
    ResourceKey,
    "k"
);

impl ResourceId {
    /// The id of a resource that has not been persisted.
    pub const TRANSIENT: Self = Self(0);

    /// Whether this resource has never been persisted.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        self.0 == 0
    }
}

impl RelationId {
    /// The id of a relation record that has not been stored.
    pub const UNSAVED: Self = Self(0);
}

macro_rules! name_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Arc<str>);

        impl $name {
            /// Create a new name.
            pub fn new(name: impl Into<Arc<str>>) -> Self {
                Self(name.into())
            }

            /// Borrow the underlying string.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(name: &str) -> Self {
                Self(Arc::from(name))
            }
        }

        impl From<String> for $name {
            fn from(name: String) -> Self {
                Self(Arc::from(name))
            }
        }

        impl From<&$name> for $name {
            fn from(name: &$name) -> Self {
                name.clone()
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                &*self.0 == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                &*self.0 == *other
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({:?})"), &*self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

name_type!(
    /// Name of a registered concrete resource type, stored with every entity.
    TypeTag
);

name_type!(
    /// Name of a capability interface.
    CapabilityId
);

name_type!(
    /// Name of a reference slot (single reference or reference collection).
    SlotName
);
