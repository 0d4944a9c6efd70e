//! Reference slots: declared metadata and per-node state.
//!
//! A slot is either a single reference or an ordered reference collection.
//! Every slot maps onto relation records of one [`RelationKind`], seen from one
//! [`RelationRole`], optionally narrowed by a relation name when a type exposes
//! several slots of the same kind.

use std::collections::HashMap;

use indexmap::IndexSet;

use crate::id::{ResourceKey, SlotName};
use crate::relation::{RelationKind, RelationRole};

/// Slot holding the parent of a resource.
pub const PARENT: &str = "Parent";
/// Slot holding the children of a resource.
pub const CHILDREN: &str = "Children";

/// Whether a slot holds one reference or many.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    Single,
    Many,
}

/// Declaration of a reference slot on a resource type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceSlot {
    /// Property name under which the slot is exposed.
    pub name: SlotName,
    pub kind: RelationKind,
    /// The side the declaring resource takes in the relation record.
    pub role: RelationRole,
    pub cardinality: Cardinality,
    /// Persisted record name; `None` for the unnamed slot of a kind.
    pub relation_name: Option<String>,
    /// Saving fails while a required slot is unset or empty.
    pub required: bool,
    /// Structural changes are persisted immediately while the manager runs.
    pub auto_save: bool,
}

impl ReferenceSlot {
    /// A single reference, owned by the declaring (source) side.
    pub fn single(name: impl Into<SlotName>, kind: RelationKind) -> Self {
        Self::with(name.into(), kind, Cardinality::Single)
    }

    /// A reference collection, owned by the declaring (source) side.
    pub fn many(name: impl Into<SlotName>, kind: RelationKind) -> Self {
        Self::with(name.into(), kind, Cardinality::Many)
    }

    fn with(name: SlotName, kind: RelationKind, cardinality: Cardinality) -> Self {
        Self {
            name,
            kind,
            role: RelationRole::Source,
            cardinality,
            relation_name: None,
            required: false,
            auto_save: false,
        }
    }

    /// The built-in `Parent` slot.
    #[must_use]
    pub fn parent() -> Self {
        Self::single(PARENT, RelationKind::ParentChild).as_target()
    }

    /// The built-in `Children` slot.
    #[must_use]
    pub fn children() -> Self {
        Self::many(CHILDREN, RelationKind::ParentChild)
    }

    /// The declaring resource is the target of the relation records.
    #[must_use]
    pub fn as_target(mut self) -> Self {
        self.role = RelationRole::Target;
        self
    }

    /// Give the persisted records an explicit name.
    #[must_use]
    pub fn named(mut self, relation_name: impl Into<String>) -> Self {
        self.relation_name = Some(relation_name.into());
        self
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn auto_save(mut self) -> Self {
        self.auto_save = true;
        self
    }

    #[must_use]
    pub fn is_many(&self) -> bool {
        self.cardinality == Cardinality::Many
    }

    /// Whether a record of `kind`, seen from `role`, with `name` belongs to this slot.
    #[must_use]
    pub fn matches(&self, kind: RelationKind, role: RelationRole, name: Option<&str>) -> bool {
        self.kind == kind && self.role == role && self.relation_name.as_deref() == name
    }

    /// Whether `other` is the far-side view of the same records.
    #[must_use]
    pub fn mirrors(&self, other: &ReferenceSlot) -> bool {
        other.matches(self.kind, self.role.opposite(), self.relation_name.as_deref())
    }
}

/// Current value of one slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotValue {
    Single(Option<ResourceKey>),
    Many(IndexSet<ResourceKey>),
}

impl SlotValue {
    fn empty(cardinality: Cardinality) -> Self {
        match cardinality {
            Cardinality::Single => Self::Single(None),
            Cardinality::Many => Self::Many(IndexSet::new()),
        }
    }

    /// Referenced keys in slot order.
    pub fn keys(&self) -> impl Iterator<Item = ResourceKey> + '_ {
        let (single, many) = match self {
            Self::Single(key) => (*key, None),
            Self::Many(keys) => (None, Some(keys)),
        };
        single.into_iter().chain(many.into_iter().flatten().copied())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Single(key) => key.is_none(),
            Self::Many(keys) => keys.is_empty(),
        }
    }

    #[must_use]
    pub fn contains(&self, key: ResourceKey) -> bool {
        match self {
            Self::Single(current) => *current == Some(key),
            Self::Many(keys) => keys.contains(&key),
        }
    }
}

/// Reference state of one resource, keyed by slot name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct References {
    slots: HashMap<SlotName, SlotValue>,
}

impl References {
    /// Empty state for the given slot declarations.
    #[must_use]
    pub fn for_slots(slots: &[ReferenceSlot]) -> Self {
        Self {
            slots: slots
                .iter()
                .map(|slot| (slot.name.clone(), SlotValue::empty(slot.cardinality)))
                .collect(),
        }
    }

    #[must_use]
    pub fn get(&self, slot: &str) -> Option<&SlotValue> {
        self.slots.get(slot)
    }

    /// Target of a single slot.
    #[must_use]
    pub fn single(&self, slot: &str) -> Option<ResourceKey> {
        match self.slots.get(slot) {
            Some(SlotValue::Single(key)) => *key,
            _ => None,
        }
    }

    /// Members of a collection slot, in insertion order.
    #[must_use]
    pub fn many(&self, slot: &str) -> Vec<ResourceKey> {
        match self.slots.get(slot) {
            Some(SlotValue::Many(keys)) => keys.iter().copied().collect(),
            _ => Vec::new(),
        }
    }

    #[must_use]
    pub fn parent(&self) -> Option<ResourceKey> {
        self.single(PARENT)
    }

    #[must_use]
    pub fn children(&self) -> Vec<ResourceKey> {
        self.many(CHILDREN)
    }

    /// Every referenced key across all slots, without duplicates.
    #[must_use]
    pub fn targets(&self) -> IndexSet<ResourceKey> {
        self.slots.values().flat_map(SlotValue::keys).collect()
    }

    /// Replace a single slot, returning the previous target.
    pub(crate) fn set_single(
        &mut self,
        slot: &str,
        key: Option<ResourceKey>,
    ) -> Option<ResourceKey> {
        match self.slots.get_mut(slot) {
            Some(SlotValue::Single(current)) => std::mem::replace(current, key),
            _ => None,
        }
    }

    /// Add to a collection slot. Returns `false` when already present.
    pub(crate) fn insert(&mut self, slot: &str, key: ResourceKey) -> bool {
        match self.slots.get_mut(slot) {
            Some(SlotValue::Many(keys)) => keys.insert(key),
            _ => false,
        }
    }

    /// Remove `key` from a slot of either cardinality. Returns `false` when absent.
    pub(crate) fn remove(&mut self, slot: &str, key: ResourceKey) -> bool {
        match self.slots.get_mut(slot) {
            Some(SlotValue::Many(keys)) => keys.shift_remove(&key),
            Some(SlotValue::Single(current)) if *current == Some(key) => {
                *current = None;
                true
            }
            _ => false,
        }
    }

    /// Drop every reference to `key`; returns the slots that changed.
    pub(crate) fn clear_target(&mut self, key: ResourceKey) -> Vec<SlotName> {
        let mut changed = Vec::new();
        for (name, value) in &mut self.slots {
            let hit = match value {
                SlotValue::Single(current) if *current == Some(key) => {
                    *current = None;
                    true
                }
                SlotValue::Many(keys) => keys.shift_remove(&key),
                SlotValue::Single(_) => false,
            };
            if hit {
                changed.push(name.clone());
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refs() -> References {
        References::for_slots(&[
            ReferenceSlot::parent(),
            ReferenceSlot::children(),
            ReferenceSlot::single("Tool", RelationKind::CurrentExchangeablePart).named("Tool"),
        ])
    }

    #[test]
    fn parent_and_children_mirror_each_other() {
        assert!(ReferenceSlot::parent().mirrors(&ReferenceSlot::children()));
        assert!(ReferenceSlot::children().mirrors(&ReferenceSlot::parent()));
        let named = ReferenceSlot::single("A", RelationKind::Extension).named("a");
        let other = ReferenceSlot::many("B", RelationKind::Extension).as_target();
        assert!(!named.mirrors(&other), "relation names must agree");
    }

    #[test]
    fn collection_keeps_insertion_order() {
        let mut r = refs();
        assert!(r.insert(CHILDREN, ResourceKey::new(3)));
        assert!(r.insert(CHILDREN, ResourceKey::new(1)));
        assert!(!r.insert(CHILDREN, ResourceKey::new(3)));
        assert_eq!(r.children(), vec![ResourceKey::new(3), ResourceKey::new(1)]);
    }

    #[test]
    fn clear_target_is_idempotent() {
        let mut r = refs();
        r.set_single("Tool", Some(ResourceKey::new(9)));
        r.insert(CHILDREN, ResourceKey::new(9));
        let changed = r.clear_target(ResourceKey::new(9));
        assert_eq!(changed.len(), 2);
        assert!(r.clear_target(ResourceKey::new(9)).is_empty());
        assert!(r.targets().is_empty());
    }

    #[test]
    fn unknown_slot_is_ignored() {
        let mut r = refs();
        assert_eq!(r.set_single("Nope", Some(ResourceKey::new(1))), None);
        assert!(!r.insert("Nope", ResourceKey::new(1)));
        assert!(r.get("Nope").is_none());
    }
}
