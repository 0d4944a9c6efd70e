//! Error types for the resource graph runtime
use thiserror::Error;

use crate::id::{CapabilityId, ResourceId, ResourceKey, SlotName, TypeTag};
use crate::lifecycle::Lifecycle;
use crate::persistence::StoreError;

/// Result type for resource graph operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the resource graph runtime.
///
/// Every failure is scoped to the operation that raised it; none of these
/// leave the graph in a partially updated state.
#[derive(Error, Debug)]
pub enum Error {
    /// A required reference or reference collection is not populated.
    ///
    /// Raised before any persistence side effect.
    #[error("Validation failed for resource {resource_id} ({type_tag}): slot '{slot}' {reason}")]
    Validation {
        /// The resource being saved
        resource_id: ResourceId,
        /// Its concrete type
        type_tag: TypeTag,
        /// The offending slot
        slot: SlotName,
        /// What is wrong with it
        reason: String,
    },

    /// Lookup of a resource that was destroyed or never existed.
    #[error("Resource {what} not found")]
    NotFound {
        /// Human readable description of the lookup key
        what: String,
    },

    /// Invocation through a proxy whose layer has been detached.
    #[error("Proxy for resource {resource_id} is detached")]
    ProxyDetached {
        /// The resource behind the proxy
        resource_id: ResourceId,
    },

    /// Attempt to bind against a generic capability.
    #[error("Capability '{capability}' is generic and cannot be bound")]
    UnsupportedCapability {
        /// The generic capability
        capability: CapabilityId,
    },

    /// A capability that was never registered.
    #[error("Capability '{capability}' is not registered")]
    UnknownCapability {
        /// The requested capability
        capability: CapabilityId,
    },

    /// The resource's proxy shape does not include the capability.
    #[error("Resource {resource_id} does not implement capability '{capability}'")]
    CapabilityNotImplemented {
        /// The resource behind the proxy
        resource_id: ResourceId,
        /// The requested capability
        capability: CapabilityId,
    },

    /// A type tag with no registration.
    #[error("Resource type '{type_tag}' is not registered")]
    UnknownType {
        /// The requested type
        type_tag: TypeTag,
    },

    /// A type that exists but cannot be instantiated.
    #[error("Resource type '{type_tag}' is abstract and has no factory")]
    AbstractType {
        /// The requested type
        type_tag: TypeTag,
    },

    /// The member is not part of any capability the proxy exposes.
    #[error("Member '{member}' is not exposed for resource {resource_id}")]
    MemberNotExposed {
        /// The resource behind the proxy
        resource_id: ResourceId,
        /// Property, method, event or collection name
        member: String,
    },

    /// A resource rejected a property access or method call.
    #[error("Invocation of '{member}' failed: {reason}")]
    Invocation {
        /// Property or method name
        member: String,
        /// Failure reason reported by the resource
        reason: String,
    },

    /// A reference operation that does not fit the slot.
    #[error("Slot '{slot}' on resource {resource_id}: {reason}")]
    Slot {
        /// The resource owning the slot
        resource_id: ResourceId,
        /// The slot
        slot: SlotName,
        /// What went wrong
        reason: String,
    },

    /// A lifecycle hook failed.
    #[error("Hook '{hook}' failed for resource {resource_id}: {reason}")]
    Hook {
        /// The resource
        resource_id: ResourceId,
        /// Hook name (initialize, start, stop)
        hook: &'static str,
        /// Failure reason
        reason: String,
    },

    /// Lifecycle state machine violation
    #[error("Invalid state transition for resource {resource_id}: {from} -> {to}")]
    InvalidStateTransition {
        /// The resource (transient id for the manager itself)
        resource_id: ResourceId,
        /// The current state
        from: Lifecycle,
        /// The attempted target state
        to: Lifecycle,
    },

    /// A persistent id was assigned twice.
    #[error("Resource {resource_id} already has a persistent identifier")]
    IdAlreadyAssigned {
        /// The existing id
        resource_id: ResourceId,
    },

    /// A relation points at a resource that has not been saved yet.
    #[error("Resource {key} has not been persisted")]
    Unsaved {
        /// Runtime key of the unsaved resource
        key: ResourceKey,
    },

    /// The operation was cancelled through its cancellation token.
    #[error("Operation '{operation}' was cancelled")]
    Cancelled {
        /// The cancelled operation
        operation: &'static str,
    },

    /// A bootstrap initializer failed.
    #[error("Initializer '{name}' failed: {reason}")]
    Initializer {
        /// Initializer name
        name: String,
        /// The failure reason
        reason: String,
        /// The underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Manager configuration is invalid
    #[error("Configuration error: {message}")]
    Configuration {
        /// The error message
        message: String,
    },

    /// Error from the persistence unit of work, passed through unchanged.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Error {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Lookup failure for a persistent id.
    #[must_use]
    pub fn not_found(id: ResourceId) -> Self {
        Self::NotFound {
            what: id.to_string(),
        }
    }

    /// Lookup failure for a runtime key.
    #[must_use]
    pub fn key_not_found(key: ResourceKey) -> Self {
        Self::NotFound {
            what: key.to_string(),
        }
    }

    /// Error reported by a resource implementation for one of its members.
    pub fn invocation(member: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invocation {
            member: member.into(),
            reason: reason.into(),
        }
    }

    /// An initializer failure wrapping an arbitrary source error.
    pub fn initializer(
        name: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        let source = source.into();
        Self::Initializer {
            name: name.into(),
            reason: source.to_string(),
            source: Some(source),
        }
    }

    /// Whether the caller may retry the same operation unchanged.
    ///
    /// Only transport-level persistence failures qualify; everything else
    /// needs corrected input or a fresh proxy.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Get the resource id associated with this error (if any)
    #[must_use]
    pub fn resource_id(&self) -> Option<ResourceId> {
        match self {
            Self::Validation { resource_id, .. }
            | Self::ProxyDetached { resource_id }
            | Self::CapabilityNotImplemented { resource_id, .. }
            | Self::MemberNotExposed { resource_id, .. }
            | Self::Slot { resource_id, .. }
            | Self::Hook { resource_id, .. }
            | Self::InvalidStateTransition { resource_id, .. }
            | Self::IdAlreadyAssigned { resource_id } => Some(*resource_id),
            _ => None,
        }
    }
}
