//! Type registry: capability declarations and concrete resource types.
//!
//! Each resource type is registered once. Registration resolves the type's
//! ancestry, merges reference slots down the hierarchy and computes the
//! capability descriptor the proxy layer binds against. Nothing is
//! introspected at bind time.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::id::{CapabilityId, TypeTag};
use crate::reference::ReferenceSlot;
use crate::resource::Resource;

/// Name of the built-in capability every resource type may expose.
pub const RESOURCE_CAPABILITY: &str = "Resource";

/// Factory producing a blank instance of a concrete type.
pub type Factory = Arc<dyn Fn() -> Box<dyn Resource> + Send + Sync>;

// ---------------------------------------------------------------------------
// CapabilityDecl
// ---------------------------------------------------------------------------

/// A property exposed by a capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDecl {
    pub name: String,
    pub writable: bool,
}

/// A named contract a resource type may expose through its proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityDecl {
    pub id: CapabilityId,
    /// Capabilities this one inherits members from.
    pub extends: Vec<CapabilityId>,
    /// Open generic capabilities are never bound.
    pub generic: bool,
    pub properties: Vec<PropertyDecl>,
    pub methods: Vec<String>,
    pub events: Vec<String>,
}

impl CapabilityDecl {
    pub fn new(id: impl Into<CapabilityId>) -> Self {
        Self {
            id: id.into(),
            extends: Vec::new(),
            generic: false,
            properties: Vec::new(),
            methods: Vec::new(),
            events: Vec::new(),
        }
    }

    /// The built-in `Resource` capability: identity, naming and hierarchy.
    #[must_use]
    pub fn resource() -> Self {
        Self::new(RESOURCE_CAPABILITY)
            .property("Id")
            .writable_property("Name")
            .writable_property("Description")
            .writable_property(crate::reference::PARENT)
            .property(crate::reference::CHILDREN)
    }

    #[must_use]
    pub fn extends(mut self, base: impl Into<CapabilityId>) -> Self {
        self.extends.push(base.into());
        self
    }

    #[must_use]
    pub fn generic(mut self) -> Self {
        self.generic = true;
        self
    }

    /// A read-only property. Reference collections are exposed this way too.
    #[must_use]
    pub fn property(mut self, name: impl Into<String>) -> Self {
        self.properties.push(PropertyDecl {
            name: name.into(),
            writable: false,
        });
        self
    }

    #[must_use]
    pub fn writable_property(mut self, name: impl Into<String>) -> Self {
        self.properties.push(PropertyDecl {
            name: name.into(),
            writable: true,
        });
        self
    }

    #[must_use]
    pub fn method(mut self, name: impl Into<String>) -> Self {
        self.methods.push(name.into());
        self
    }

    #[must_use]
    pub fn event(mut self, name: impl Into<String>) -> Self {
        self.events.push(name.into());
        self
    }
}

// ---------------------------------------------------------------------------
// ResourceType
// ---------------------------------------------------------------------------

/// Registration input for one resource type.
#[derive(Clone)]
pub struct ResourceType {
    tag: TypeTag,
    base: Option<TypeTag>,
    public: bool,
    generic: bool,
    implements: Vec<CapabilityId>,
    available_as: Vec<CapabilityId>,
    slots: Vec<ReferenceSlot>,
    factory: Option<Factory>,
}

impl ResourceType {
    /// A concrete type instantiated through `R::default()`.
    pub fn new<R: Resource + Default>(tag: impl Into<TypeTag>) -> Self {
        Self::with_factory(tag, || Box::new(R::default()))
    }

    /// A concrete type with a custom factory.
    pub fn with_factory<F>(tag: impl Into<TypeTag>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Resource> + Send + Sync + 'static,
    {
        let mut ty = Self::abstract_type(tag);
        ty.factory = Some(Arc::new(factory));
        ty
    }

    /// A type that only serves as a base and cannot be instantiated.
    pub fn abstract_type(tag: impl Into<TypeTag>) -> Self {
        Self {
            tag: tag.into(),
            base: None,
            public: true,
            generic: false,
            implements: Vec::new(),
            available_as: Vec::new(),
            slots: Vec::new(),
            factory: None,
        }
    }

    #[must_use]
    pub fn base(mut self, base: impl Into<TypeTag>) -> Self {
        self.base = Some(base.into());
        self
    }

    /// Capabilities declared by a non-public type are not exposed, except
    /// those listed through [`available_as`](Self::available_as).
    #[must_use]
    pub fn internal(mut self) -> Self {
        self.public = false;
        self
    }

    /// An open generic type; it contributes no capabilities to descendants.
    #[must_use]
    pub fn generic(mut self) -> Self {
        self.generic = true;
        self
    }

    #[must_use]
    pub fn implements(mut self, capability: impl Into<CapabilityId>) -> Self {
        self.implements.push(capability.into());
        self
    }

    /// Expose a capability even when the type itself is internal.
    #[must_use]
    pub fn available_as(mut self, capability: impl Into<CapabilityId>) -> Self {
        self.available_as.push(capability.into());
        self
    }

    /// Declare a reference slot. A slot with the name of an inherited one
    /// replaces it.
    #[must_use]
    pub fn reference(mut self, slot: ReferenceSlot) -> Self {
        self.slots.push(slot);
        self
    }

    #[must_use]
    pub fn tag(&self) -> &TypeTag {
        &self.tag
    }
}

impl fmt::Debug for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceType")
            .field("tag", &self.tag)
            .field("base", &self.base)
            .field("public", &self.public)
            .field("generic", &self.generic)
            .field("abstract", &self.factory.is_none())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// RegisteredType
// ---------------------------------------------------------------------------

/// A type after registration, with everything resolved.
pub struct RegisteredType {
    decl: ResourceType,
    /// The type itself first, then its bases up to the root.
    ancestry: Vec<TypeTag>,
    slots: Vec<ReferenceSlot>,
    capabilities: BTreeSet<CapabilityId>,
}

impl RegisteredType {
    #[must_use]
    pub fn tag(&self) -> &TypeTag {
        &self.decl.tag
    }

    #[must_use]
    pub fn base(&self) -> Option<&TypeTag> {
        self.decl.base.as_ref()
    }

    #[must_use]
    pub fn ancestry(&self) -> &[TypeTag] {
        &self.ancestry
    }

    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.decl.factory.is_none()
    }

    /// Whether `tag` is this type or one of its bases.
    #[must_use]
    pub fn is_a(&self, tag: &str) -> bool {
        self.ancestry.iter().any(|t| t == tag)
    }

    /// All slots, built-in ones first, inherited ones overridden by name.
    #[must_use]
    pub fn slots(&self) -> &[ReferenceSlot] {
        &self.slots
    }

    #[must_use]
    pub fn slot(&self, name: &str) -> Option<&ReferenceSlot> {
        self.slots.iter().find(|s| s.name == name)
    }

    /// The slot on this type that shows the far side of `slot`.
    #[must_use]
    pub fn mirror_of(&self, slot: &ReferenceSlot) -> Option<&ReferenceSlot> {
        self.slots.iter().find(|s| slot.mirrors(s))
    }

    /// The capability descriptor: every capability a proxy of this type exposes.
    #[must_use]
    pub fn capabilities(&self) -> &BTreeSet<CapabilityId> {
        &self.capabilities
    }

    pub(crate) fn instantiate(&self) -> Result<Box<dyn Resource>> {
        self.decl
            .factory
            .as_ref()
            .map(|factory| factory())
            .ok_or_else(|| Error::AbstractType {
                type_tag: self.decl.tag.clone(),
            })
    }
}

impl fmt::Debug for RegisteredType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredType")
            .field("tag", &self.decl.tag)
            .field("ancestry", &self.ancestry)
            .field("capabilities", &self.capabilities)
            .field("slots", &self.slots.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// TypeRegistry
// ---------------------------------------------------------------------------

/// Registry of capabilities and resource types.
///
/// Filled during startup, then shared read-only behind an `Arc`.
#[derive(Debug)]
pub struct TypeRegistry {
    capabilities: HashMap<CapabilityId, Arc<CapabilityDecl>>,
    types: HashMap<TypeTag, Arc<RegisteredType>>,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    /// A registry holding only the built-in `Resource` capability.
    #[must_use]
    pub fn new() -> Self {
        let builtin = CapabilityDecl::resource();
        Self {
            capabilities: HashMap::from([(builtin.id.clone(), Arc::new(builtin))]),
            types: HashMap::new(),
        }
    }

    /// Register a capability. Capabilities it extends must be registered first.
    pub fn register_capability(&mut self, capability: CapabilityDecl) -> Result<()> {
        if let Some(missing) = capability
            .extends
            .iter()
            .find(|base| !self.capabilities.contains_key(*base))
        {
            return Err(Error::UnknownCapability {
                capability: missing.clone(),
            });
        }
        if self.capabilities.contains_key(&capability.id) {
            return Err(Error::configuration(format!(
                "capability '{}' is already registered",
                capability.id
            )));
        }
        self.capabilities
            .insert(capability.id.clone(), Arc::new(capability));
        Ok(())
    }

    /// Register a resource type and compute its capability descriptor.
    ///
    /// The base type and every referenced capability must already be known.
    pub fn register(&mut self, ty: ResourceType) -> Result<Arc<RegisteredType>> {
        if self.types.contains_key(&ty.tag) {
            return Err(Error::configuration(format!(
                "resource type '{}' is already registered",
                ty.tag
            )));
        }
        if let Some(missing) = ty
            .implements
            .iter()
            .chain(&ty.available_as)
            .find(|cap| !self.capabilities.contains_key(*cap))
        {
            return Err(Error::UnknownCapability {
                capability: missing.clone(),
            });
        }

        let base = match &ty.base {
            Some(tag) => Some(self.types.get(tag).cloned().ok_or_else(|| {
                Error::UnknownType {
                    type_tag: tag.clone(),
                }
            })?),
            None => None,
        };

        let mut ancestry = vec![ty.tag.clone()];
        let mut slots = match &base {
            Some(base) => {
                ancestry.extend(base.ancestry.iter().cloned());
                base.slots.clone()
            }
            None => vec![ReferenceSlot::parent(), ReferenceSlot::children()],
        };
        for slot in &ty.slots {
            match slots.iter_mut().find(|s| s.name == slot.name) {
                Some(existing) => *existing = slot.clone(),
                None => slots.push(slot.clone()),
            }
        }

        let mut chain: Vec<&ResourceType> = vec![&ty];
        let mut cursor = base.as_deref();
        while let Some(registered) = cursor {
            chain.push(&registered.decl);
            cursor = registered
                .decl
                .base
                .as_ref()
                .and_then(|tag| self.types.get(tag))
                .map(Arc::as_ref);
        }
        let capabilities = self.descriptor(&chain);

        tracing::debug!(
            type_tag = %ty.tag,
            capabilities = capabilities.len(),
            slots = slots.len(),
            "registered resource type"
        );

        let registered = Arc::new(RegisteredType {
            decl: ty,
            ancestry,
            slots,
            capabilities,
        });
        self.types
            .insert(registered.tag().clone(), Arc::clone(&registered));
        Ok(registered)
    }

    /// Union of the capabilities a type chain exposes.
    ///
    /// Generic types in the chain contribute nothing. Public types contribute
    /// what they implement; every type contributes its `available_as` list.
    /// Extended capabilities are followed transitively and generic ones are
    /// dropped.
    fn descriptor(&self, chain: &[&ResourceType]) -> BTreeSet<CapabilityId> {
        let mut pending: Vec<&CapabilityId> = Vec::new();
        for ty in chain.iter().filter(|ty| !ty.generic) {
            if ty.public {
                pending.extend(&ty.implements);
            }
            pending.extend(&ty.available_as);
        }

        let mut seen = BTreeSet::new();
        let mut exposed = BTreeSet::new();
        while let Some(id) = pending.pop() {
            if !seen.insert(id.clone()) {
                continue;
            }
            let Some(cap) = self.capabilities.get(id) else {
                continue;
            };
            pending.extend(&cap.extends);
            if !cap.generic {
                exposed.insert(id.clone());
            }
        }
        exposed
    }

    #[must_use]
    pub fn get(&self, tag: &str) -> Option<&Arc<RegisteredType>> {
        self.types.get(tag)
    }

    /// Look up a type or fail with [`Error::UnknownType`].
    pub fn resolve(&self, tag: &str) -> Result<&Arc<RegisteredType>> {
        self.types.get(tag).ok_or_else(|| Error::UnknownType {
            type_tag: TypeTag::from(tag),
        })
    }

    #[must_use]
    pub fn capability(&self, id: &str) -> Option<&Arc<CapabilityDecl>> {
        self.capabilities.get(id)
    }

    /// Create a blank instance of type `tag`.
    pub fn create(&self, tag: &str) -> Result<Box<dyn Resource>> {
        self.resolve(tag)?.instantiate()
    }

    /// Concrete types whose descriptor contains every capability in `required`.
    #[must_use]
    pub fn enumerate(&self, required: &[CapabilityId]) -> Vec<TypeTag> {
        let mut tags: Vec<TypeTag> = self
            .types
            .values()
            .filter(|ty| !ty.is_abstract())
            .filter(|ty| required.iter().all(|cap| ty.capabilities.contains(cap)))
            .map(|ty| ty.tag().clone())
            .collect();
        tags.sort();
        tags
    }
}
