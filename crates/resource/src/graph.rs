//! The resource graph: an arena of live resources addressed by [`ResourceKey`].
//!
//! Edges are stored as keys inside each node's [`References`]; nothing holds a
//! pointer to another node. The graph keeps both sides of an edge consistent:
//! when a slot changes, the mirrored slot on the target (same relation kind and
//! name, opposite role) is updated as part of the same edit.
//!
//! # Locking
//!
//! Every node has its own `RwLock`. Edits that touch more than one node are
//! serialized by a graph-wide edit lock and take node locks one at a time.
//! Observers are notified after every lock has been released, so they may call
//! back into the graph.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use crate::error::{Error, Result};
use crate::id::{ResourceId, ResourceKey, SlotName, TypeTag};
use crate::lifecycle::Lifecycle;
use crate::persistence::ResourceEntity;
use crate::reference::{Cardinality, ReferenceSlot, References};
use crate::registry::{RegisteredType, TypeRegistry};
use crate::resource::{Resource, ResourceContext, ResourceCore, Signals};
use crate::value::Value;

// ---------------------------------------------------------------------------
// Observers
// ---------------------------------------------------------------------------

/// A structural change of a reference collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionChange {
    Added(ResourceKey),
    Removed(ResourceKey),
}

/// Receives notifications about graph activity.
///
/// Callbacks run synchronously on the thread that made the change, after all
/// graph locks were released.
pub trait GraphObserver: Send + Sync {
    /// A resource raised an event.
    fn on_event(&self, _key: ResourceKey, _event: &str, _args: &[Value]) {}

    /// A resource signalled that its persisted state changed.
    fn on_changed(&self, _key: ResourceKey) {}

    /// A reference collection gained or lost a member.
    fn on_collection_changed(
        &self,
        _key: ResourceKey,
        _slot: &ReferenceSlot,
        _change: CollectionChange,
    ) {
    }

    /// A resource left the graph.
    fn on_removed(&self, _key: ResourceKey) {}
}

/// Handle returned by [`ResourceGraph::observe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

enum Notice {
    Event(ResourceKey, String, Vec<Value>),
    Changed(ResourceKey),
    Collection(ResourceKey, ReferenceSlot, CollectionChange),
    Removed(ResourceKey),
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

pub(crate) struct Node {
    pub(crate) key: ResourceKey,
    pub(crate) ty: Arc<RegisteredType>,
    pub(crate) state: RwLock<NodeState>,
}

pub(crate) struct NodeState {
    pub(crate) core: ResourceCore,
    pub(crate) references: References,
    pub(crate) lifecycle: Lifecycle,
    pub(crate) resource: Box<dyn Resource>,
}

/// One reference edit, before mirroring.
#[derive(Debug, Clone, Copy)]
enum Edit {
    Set(Option<ResourceKey>),
    Add(ResourceKey),
    Remove(ResourceKey),
}

// ---------------------------------------------------------------------------
// ResourceGraph
// ---------------------------------------------------------------------------

/// In-memory registry of live resources.
pub struct ResourceGraph {
    registry: Arc<TypeRegistry>,
    nodes: DashMap<ResourceKey, Arc<Node>>,
    ids: DashMap<ResourceId, ResourceKey>,
    next_key: AtomicU64,
    edit_lock: Mutex<()>,
    observers: RwLock<Vec<(ObserverId, Arc<dyn GraphObserver>)>>,
    next_observer: AtomicU64,
}

impl std::fmt::Debug for ResourceGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceGraph")
            .field("nodes", &self.nodes.len())
            .field("persisted", &self.ids.len())
            .field("observers", &self.observers.read().len())
            .finish()
    }
}

impl ResourceGraph {
    #[must_use]
    pub fn new(registry: Arc<TypeRegistry>) -> Self {
        Self {
            registry,
            nodes: DashMap::new(),
            ids: DashMap::new(),
            next_key: AtomicU64::new(1),
            edit_lock: Mutex::new(()),
            observers: RwLock::new(Vec::new()),
            next_observer: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    // -- membership -------------------------------------------------------

    /// Create a blank, transient instance of `tag` inside the graph.
    pub fn instantiate(&self, tag: &str) -> Result<ResourceKey> {
        let ty = Arc::clone(self.registry.resolve(tag)?);
        let resource = ty.instantiate()?;
        let key = self.insert_node(ty, resource, ResourceCore::new(TypeTag::from(tag)));
        tracing::debug!(key = %key, type_tag = tag, "instantiated resource");
        Ok(key)
    }

    /// Insert a resource loaded from storage, restoring its core fields and
    /// extension data. References are linked separately.
    pub(crate) fn insert_loaded(&self, entity: &ResourceEntity) -> Result<ResourceKey> {
        if self.ids.contains_key(&entity.id) {
            return Err(Error::IdAlreadyAssigned {
                resource_id: entity.id,
            });
        }
        let ty = Arc::clone(self.registry.resolve(entity.type_tag.as_str())?);
        let mut resource = ty.instantiate()?;
        resource.load_state(entity.extension_data.clone())?;
        let core = ResourceCore {
            id: entity.id,
            type_tag: entity.type_tag.clone(),
            name: entity.name.clone(),
            description: entity.description.clone(),
        };
        let key = self.insert_node(ty, resource, core);
        self.ids.insert(entity.id, key);
        Ok(key)
    }

    fn insert_node(
        &self,
        ty: Arc<RegisteredType>,
        resource: Box<dyn Resource>,
        core: ResourceCore,
    ) -> ResourceKey {
        let key = ResourceKey::new(self.next_key.fetch_add(1, Ordering::Relaxed));
        let state = NodeState {
            core,
            references: References::for_slots(ty.slots()),
            lifecycle: Lifecycle::Created,
            resource,
        };
        self.nodes.insert(
            key,
            Arc::new(Node {
                key,
                ty,
                state: RwLock::new(state),
            }),
        );
        key
    }

    /// Drop a node from the graph and mark it `Destroyed`.
    ///
    /// References other nodes hold to it must be cleared by the caller first.
    pub(crate) fn remove(&self, key: ResourceKey) -> Result<()> {
        let (_, node) = self
            .nodes
            .remove(&key)
            .ok_or_else(|| Error::key_not_found(key))?;
        let id = {
            let mut state = node.state.write();
            state.lifecycle = Lifecycle::Destroyed;
            state.core.id
        };
        if !id.is_transient() {
            self.ids.remove(&id);
        }
        self.dispatch(vec![Notice::Removed(key)]);
        Ok(())
    }

    /// Resolve a persistent id to the key of its live node.
    pub fn get(&self, id: ResourceId) -> Result<ResourceKey> {
        self.ids
            .get(&id)
            .map(|entry| *entry.value())
            .ok_or_else(|| Error::not_found(id))
    }

    #[must_use]
    pub fn key_of(&self, id: ResourceId) -> Option<ResourceKey> {
        self.ids.get(&id).map(|entry| *entry.value())
    }

    #[must_use]
    pub fn contains(&self, key: ResourceKey) -> bool {
        self.nodes.contains_key(&key)
    }

    /// Keys of all live nodes, in insertion order.
    #[must_use]
    pub fn keys(&self) -> Vec<ResourceKey> {
        let mut keys: Vec<_> = self.nodes.iter().map(|entry| *entry.key()).collect();
        keys.sort_unstable();
        keys
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn node(&self, key: ResourceKey) -> Result<Arc<Node>> {
        self.nodes
            .get(&key)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::key_not_found(key))
    }

    // -- identity ---------------------------------------------------------

    /// Persistent id of a node (`0` while transient).
    pub fn id_of(&self, key: ResourceKey) -> Result<ResourceId> {
        Ok(self.node(key)?.state.read().core.id)
    }

    pub fn type_of(&self, key: ResourceKey) -> Result<Arc<RegisteredType>> {
        Ok(Arc::clone(&self.node(key)?.ty))
    }

    pub fn lifecycle(&self, key: ResourceKey) -> Result<Lifecycle> {
        Ok(self.node(key)?.state.read().lifecycle)
    }

    /// A copy of the node's core fields.
    pub fn core(&self, key: ResourceKey) -> Result<ResourceCore> {
        Ok(self.node(key)?.state.read().core.clone())
    }

    /// The entity row describing a node as it is now.
    pub(crate) fn snapshot(&self, key: ResourceKey) -> Result<ResourceEntity> {
        let node = self.node(key)?;
        let state = node.state.read();
        let mut entity = ResourceEntity::new(state.core.type_tag.clone());
        entity.id = state.core.id;
        entity.name.clone_from(&state.core.name);
        entity.description.clone_from(&state.core.description);
        entity.extension_data = state.resource.save_state()?;
        Ok(entity)
    }

    /// Give a transient node its persistent id.
    pub(crate) fn assign_id(&self, key: ResourceKey, id: ResourceId) -> Result<()> {
        let node = self.node(key)?;
        let mut state = node.state.write();
        if !state.core.id.is_transient() {
            return Err(Error::IdAlreadyAssigned {
                resource_id: state.core.id,
            });
        }
        if self.ids.contains_key(&id) {
            return Err(Error::IdAlreadyAssigned { resource_id: id });
        }
        state.core.id = id;
        self.ids.insert(id, key);
        Ok(())
    }

    /// Undo [`assign_id`](Self::assign_id) after the enclosing save failed.
    pub(crate) fn reset_id(&self, key: ResourceKey) {
        if let Ok(node) = self.node(key) {
            let mut state = node.state.write();
            let id = std::mem::replace(&mut state.core.id, ResourceId::TRANSIENT);
            if !id.is_transient() {
                self.ids.remove(&id);
            }
        }
    }

    // -- resource access --------------------------------------------------

    /// Run `f` against the concrete resource behind `key`.
    ///
    /// Returns `Ok(None)` when the resource is not a `T`.
    pub fn with_resource<T: Resource, O>(
        &self,
        key: ResourceKey,
        f: impl FnOnce(&T) -> O,
    ) -> Result<Option<O>> {
        let node = self.node(key)?;
        let state = node.state.read();
        Ok((*state.resource).downcast_ref::<T>().map(f))
    }

    /// A copy of the node's reference state.
    pub fn references(&self, key: ResourceKey) -> Result<References> {
        Ok(self.node(key)?.state.read().references.clone())
    }

    pub fn parent(&self, key: ResourceKey) -> Result<Option<ResourceKey>> {
        Ok(self.node(key)?.state.read().references.parent())
    }

    pub fn children(&self, key: ResourceKey) -> Result<Vec<ResourceKey>> {
        Ok(self.node(key)?.state.read().references.children())
    }

    /// Read a property: core fields, reference slots, then domain properties.
    pub fn get_property(&self, key: ResourceKey, name: &str) -> Result<Value> {
        let node = self.node(key)?;
        let state = node.state.read();
        let value = match name {
            "Id" => Value::Int(i64::try_from(state.core.id.get()).unwrap_or(i64::MAX)),
            "Name" => Value::Text(state.core.name.clone()),
            "Description" => Value::Text(state.core.description.clone()),
            _ => match node.ty.slot(name) {
                Some(slot) => match slot.cardinality {
                    Cardinality::Single => Value::from(state.references.single(name)),
                    Cardinality::Many => Value::List(
                        state
                            .references
                            .many(name)
                            .into_iter()
                            .map(Value::Resource)
                            .collect(),
                    ),
                },
                None => state
                    .resource
                    .property(name)
                    .ok_or_else(|| Error::invocation(name, "no such property"))?,
            },
        };
        Ok(value)
    }

    /// Write a property: core fields, single reference slots, then domain
    /// properties.
    pub fn set_property(&self, key: ResourceKey, name: &str, value: Value) -> Result<()> {
        let node = self.node(key)?;
        match name {
            "Id" => Err(Error::invocation(name, "the identifier is read-only")),
            "Name" | "Description" => {
                let text = match value {
                    Value::Text(text) => text,
                    Value::Null => String::new(),
                    other => {
                        return Err(Error::invocation(
                            name,
                            format!("expected text, got {}", other.kind()),
                        ));
                    }
                };
                {
                    let mut state = node.state.write();
                    if name == "Name" {
                        state.core.name = text;
                    } else {
                        state.core.description = text;
                    }
                }
                self.dispatch(vec![Notice::Changed(key)]);
                Ok(())
            }
            _ => match node.ty.slot(name) {
                Some(slot) if slot.is_many() => Err(Error::Slot {
                    resource_id: node.state.read().core.id,
                    slot: slot.name.clone(),
                    reason: "collections are modified through add and remove".into(),
                }),
                Some(_) => {
                    let target = match value {
                        Value::Resource(target) => Some(target),
                        Value::Null => None,
                        other => {
                            return Err(Error::invocation(
                                name,
                                format!("expected a resource, got {}", other.kind()),
                            ));
                        }
                    };
                    self.set_reference(key, name, target)
                }
                None => {
                    let signals = {
                        let mut guard = node.state.write();
                        let state = &mut *guard;
                        let mut ctx =
                            ResourceContext::new(key, state.core.id, &state.references);
                        state.resource.set_property(name, value, &mut ctx)?;
                        ctx.into_signals()
                    };
                    self.deliver(key, signals);
                    Ok(())
                }
            },
        }
    }

    /// Call a domain method on the resource.
    pub fn invoke(&self, key: ResourceKey, method: &str, args: Vec<Value>) -> Result<Value> {
        let node = self.node(key)?;
        let (result, signals) = {
            let mut guard = node.state.write();
            let state = &mut *guard;
            let mut ctx = ResourceContext::new(key, state.core.id, &state.references);
            let result = state.resource.invoke(method, args, &mut ctx);
            (result, ctx.into_signals())
        };
        self.deliver(key, signals);
        result
    }

    /// Raise an event on behalf of a resource, e.g. from a device driver.
    pub fn raise(&self, key: ResourceKey, event: impl Into<String>, args: Vec<Value>) -> Result<()> {
        self.node(key)?;
        self.dispatch(vec![Notice::Event(key, event.into(), args)]);
        Ok(())
    }

    /// Signal that a resource changed outside of its own methods.
    pub fn mark_changed(&self, key: ResourceKey) -> Result<()> {
        self.node(key)?;
        self.dispatch(vec![Notice::Changed(key)]);
        Ok(())
    }

    // -- references -------------------------------------------------------

    /// Point a single reference slot at `target` (or clear it).
    pub fn set_reference(
        &self,
        key: ResourceKey,
        slot: &str,
        target: Option<ResourceKey>,
    ) -> Result<()> {
        let decl = self.slot_decl(key, slot, Cardinality::Single)?;
        self.edit(key, &decl, Edit::Set(target), true).map(|_| ())
    }

    /// Add `target` to a reference collection. Returns `false` if it was
    /// already a member.
    pub fn add_reference(&self, key: ResourceKey, slot: &str, target: ResourceKey) -> Result<bool> {
        let decl = self.slot_decl(key, slot, Cardinality::Many)?;
        self.edit(key, &decl, Edit::Add(target), true)
    }

    /// Remove `target` from a reference slot of either cardinality.
    pub fn remove_reference(
        &self,
        key: ResourceKey,
        slot: &str,
        target: ResourceKey,
    ) -> Result<bool> {
        let node = self.node(key)?;
        let decl = node.ty.slot(slot).cloned().ok_or_else(|| Error::Slot {
            resource_id: node.state.read().core.id,
            slot: SlotName::from(slot),
            reason: "not declared by the resource type".into(),
        })?;
        self.edit(key, &decl, Edit::Remove(target), true)
    }

    /// Set or add a reference during loading: mirrored, but not announced.
    pub(crate) fn link_reference(
        &self,
        key: ResourceKey,
        slot: &ReferenceSlot,
        target: ResourceKey,
    ) -> Result<bool> {
        let edit = match slot.cardinality {
            Cardinality::Single => Edit::Set(Some(target)),
            Cardinality::Many => Edit::Add(target),
        };
        self.edit(key, slot, edit, false)
    }

    /// Clear every reference `key` holds to `removed`, without mirroring or
    /// notifications. Returns whether anything changed.
    pub(crate) fn clear_references_to(&self, key: ResourceKey, removed: ResourceKey) -> bool {
        let Ok(node) = self.node(key) else {
            return false;
        };
        let _edit = self.edit_lock.lock();
        !node.state.write().references.clear_target(removed).is_empty()
    }

    fn slot_decl(
        &self,
        key: ResourceKey,
        slot: &str,
        cardinality: Cardinality,
    ) -> Result<ReferenceSlot> {
        let node = self.node(key)?;
        let reason = match node.ty.slot(slot) {
            Some(decl) if decl.cardinality == cardinality => return Ok(decl.clone()),
            Some(_) if cardinality == Cardinality::Single => "is a collection",
            Some(_) => "is a single reference",
            None => "is not declared by the resource type",
        };
        Err(Error::Slot {
            resource_id: node.state.read().core.id,
            slot: SlotName::from(slot),
            reason: reason.into(),
        })
    }

    /// Apply one edit and its mirror on the far side.
    fn edit(&self, key: ResourceKey, slot: &ReferenceSlot, edit: Edit, notify: bool) -> Result<bool> {
        let node = self.node(key)?;
        let target_node = match edit {
            Edit::Set(Some(target)) | Edit::Add(target) => Some(self.node(target)?),
            Edit::Set(None) | Edit::Remove(_) => None,
        };

        let mut notices = Vec::new();
        {
            let _edit = self.edit_lock.lock();
            let (attached, detached) = {
                let mut state = node.state.write();
                match edit {
                    Edit::Set(new) => {
                        let old = state.references.set_single(slot.name.as_str(), new);
                        if old == new {
                            return Ok(false);
                        }
                        (new, old)
                    }
                    Edit::Add(new) => {
                        if !state.references.insert(slot.name.as_str(), new) {
                            return Ok(false);
                        }
                        (Some(new), None)
                    }
                    Edit::Remove(old) => {
                        if !state.references.remove(slot.name.as_str(), old) {
                            return Ok(false);
                        }
                        (None, Some(old))
                    }
                }
            };
            match edit {
                Edit::Set(_) => notices.push(Notice::Changed(key)),
                Edit::Add(new) => {
                    notices.push(Notice::Collection(key, slot.clone(), CollectionChange::Added(new)));
                }
                Edit::Remove(old) => notices.push(Notice::Collection(
                    key,
                    slot.clone(),
                    CollectionChange::Removed(old),
                )),
            }

            if let Some(old) = detached {
                self.detach_mirror(old, key, slot, &mut notices);
            }
            if let (Some(_), Some(new_node)) = (attached, target_node.as_ref()) {
                self.attach_mirror(new_node, key, slot, &mut notices);
            }
        }

        tracing::trace!(key = %key, slot = %slot.name, "reference edited");
        if notify {
            self.dispatch(notices);
        }
        Ok(true)
    }

    /// Remove `source` from the slot on `other` that mirrors `slot`.
    fn detach_mirror(
        &self,
        other: ResourceKey,
        source: ResourceKey,
        slot: &ReferenceSlot,
        notices: &mut Vec<Notice>,
    ) {
        let Ok(other_node) = self.node(other) else {
            return;
        };
        let Some(mirror) = other_node.ty.mirror_of(slot).cloned() else {
            return;
        };
        if other_node.state.write().references.remove(mirror.name.as_str(), source) {
            notices.push(Self::notice_for(other, mirror, CollectionChange::Removed(source)));
        }
    }

    /// Put `source` into the slot on `target_node` that mirrors `slot`.
    ///
    /// If that mirror is a single reference that pointed elsewhere, the
    /// displaced resource loses its side of the old edge.
    fn attach_mirror(
        &self,
        target_node: &Node,
        source: ResourceKey,
        slot: &ReferenceSlot,
        notices: &mut Vec<Notice>,
    ) {
        let Some(mirror) = target_node.ty.mirror_of(slot).cloned() else {
            return;
        };
        let target = target_node.key;
        let displaced = {
            let mut state = target_node.state.write();
            match mirror.cardinality {
                Cardinality::Many => {
                    if !state.references.insert(mirror.name.as_str(), source) {
                        return;
                    }
                    None
                }
                Cardinality::Single => {
                    let previous = state.references.set_single(mirror.name.as_str(), Some(source));
                    if previous == Some(source) {
                        return;
                    }
                    previous
                }
            }
        };
        notices.push(Self::notice_for(target, mirror.clone(), CollectionChange::Added(source)));

        if let Some(displaced) = displaced
            && let Ok(displaced_node) = self.node(displaced)
            && let Some(back) = displaced_node.ty.mirror_of(&mirror).cloned()
            && displaced_node.state.write().references.remove(back.name.as_str(), target)
        {
            notices.push(Self::notice_for(displaced, back, CollectionChange::Removed(target)));
        }
    }

    fn notice_for(key: ResourceKey, slot: ReferenceSlot, change: CollectionChange) -> Notice {
        match slot.cardinality {
            Cardinality::Single => Notice::Changed(key),
            Cardinality::Many => Notice::Collection(key, slot, change),
        }
    }

    // -- lifecycle --------------------------------------------------------

    /// Move a node to `to`, running the matching hook.
    ///
    /// Returns `Ok(false)` without calling the hook when the node is already
    /// in `to`. A failing hook leaves the node in its previous state.
    pub(crate) fn transition(&self, key: ResourceKey, to: Lifecycle) -> Result<bool> {
        let node = self.node(key)?;
        let signals = {
            let mut guard = node.state.write();
            let state = &mut *guard;
            if state.lifecycle == to {
                return Ok(false);
            }
            if !state.lifecycle.can_transition_to(to) {
                return Err(Error::InvalidStateTransition {
                    resource_id: state.core.id,
                    from: state.lifecycle,
                    to,
                });
            }
            let mut ctx = ResourceContext::new(key, state.core.id, &state.references);
            let outcome = match to {
                Lifecycle::Initialized => state.resource.initialize(&mut ctx),
                Lifecycle::Running => state.resource.start(&mut ctx),
                Lifecycle::Stopped => state.resource.stop(&mut ctx),
                Lifecycle::Created | Lifecycle::Destroyed => Ok(()),
            };
            if let Err(e) = outcome {
                return Err(Error::Hook {
                    resource_id: state.core.id,
                    hook: to.hook_name().unwrap_or("transition"),
                    reason: e.to_string(),
                });
            }
            tracing::debug!(
                key = %key,
                resource_id = %state.core.id,
                from = %state.lifecycle,
                to = %to,
                "lifecycle transition"
            );
            state.lifecycle = to;
            ctx.into_signals()
        };
        self.deliver(key, signals);
        Ok(true)
    }

    // -- observers --------------------------------------------------------

    pub fn observe(&self, observer: Arc<dyn GraphObserver>) -> ObserverId {
        let id = ObserverId(self.next_observer.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((id, observer));
        id
    }

    /// Remove an observer. Returns `false` if it was not registered.
    pub fn unobserve(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    fn deliver(&self, key: ResourceKey, signals: Signals) {
        let mut notices: Vec<Notice> = signals
            .raised
            .into_iter()
            .map(|(event, args)| Notice::Event(key, event, args))
            .collect();
        if signals.changed {
            notices.push(Notice::Changed(key));
        }
        self.dispatch(notices);
    }

    fn dispatch(&self, notices: Vec<Notice>) {
        if notices.is_empty() {
            return;
        }
        let observers: Vec<Arc<dyn GraphObserver>> = self
            .observers
            .read()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();
        for notice in &notices {
            for observer in &observers {
                match notice {
                    Notice::Event(key, event, args) => observer.on_event(*key, event, args),
                    Notice::Changed(key) => observer.on_changed(*key),
                    Notice::Collection(key, slot, change) => {
                        observer.on_collection_changed(*key, slot, *change);
                    }
                    Notice::Removed(key) => observer.on_removed(*key),
                }
            }
        }
    }
}
