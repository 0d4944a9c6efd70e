//! Capability proxy layer.
//!
//! A [`TypeController`] hands out [`Proxy`] views over graph resources. A proxy
//! exposes exactly the members of the capabilities in its type's descriptor
//! and forwards every access to the graph. Resource references crossing the
//! boundary are converted in one place: [`TypeController::wrap`] turns keys
//! into proxies on the way out, [`TypeController::unwrap`] turns proxies back
//! into keys on the way in, so the graph never stores a proxy.
//!
//! Detaching a controller is permanent. Its proxies stop delivering events
//! and reject every further access with [`Error::ProxyDetached`]; a new
//! controller has to be created to resume.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::graph::{GraphObserver, ObserverId, ResourceGraph};
use crate::id::{CapabilityId, ResourceId, ResourceKey, TypeTag};
use crate::registry::{RegisteredType, TypeRegistry};
use crate::value::Value;

// ---------------------------------------------------------------------------
// ProxyShape
// ---------------------------------------------------------------------------

/// The member surface shared by all proxies of one capability set.
#[derive(Debug, PartialEq, Eq)]
pub struct ProxyShape {
    capabilities: BTreeSet<CapabilityId>,
    /// Property name to writability.
    properties: BTreeMap<String, bool>,
    methods: BTreeSet<String>,
    events: BTreeSet<String>,
}

impl ProxyShape {
    fn build(registry: &TypeRegistry, capabilities: &BTreeSet<CapabilityId>) -> Self {
        let mut shape = Self {
            capabilities: capabilities.clone(),
            properties: BTreeMap::new(),
            methods: BTreeSet::new(),
            events: BTreeSet::new(),
        };
        for cap in capabilities.iter().filter_map(|id| registry.capability(id.as_str())) {
            for property in &cap.properties {
                let writable = shape.properties.entry(property.name.clone()).or_default();
                *writable |= property.writable;
            }
            shape.methods.extend(cap.methods.iter().cloned());
            shape.events.extend(cap.events.iter().cloned());
        }
        shape
    }

    #[must_use]
    pub fn capabilities(&self) -> &BTreeSet<CapabilityId> {
        &self.capabilities
    }

    #[must_use]
    pub fn implements(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }

    #[must_use]
    pub fn has_property(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    #[must_use]
    pub fn is_writable(&self, name: &str) -> bool {
        self.properties.get(name).copied().unwrap_or(false)
    }

    #[must_use]
    pub fn has_method(&self, name: &str) -> bool {
        self.methods.contains(name)
    }

    #[must_use]
    pub fn has_event(&self, name: &str) -> bool {
        self.events.contains(name)
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// An event re-raised through a proxy.
#[derive(Debug, Clone)]
pub struct ProxyEvent {
    /// The proxy of the raising resource, never the resource itself.
    pub sender: Proxy,
    pub event: String,
    pub args: Vec<Value<Proxy>>,
}

type Callback = Arc<dyn Fn(&ProxyEvent) + Send + Sync>;

struct Listener {
    id: u64,
    event: String,
    callback: Callback,
}

/// Handle for removing a listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    key: ResourceKey,
    id: u64,
}

// ---------------------------------------------------------------------------
// TypeController
// ---------------------------------------------------------------------------

struct ControllerInner {
    graph: Arc<ResourceGraph>,
    shapes: DashMap<TypeTag, Arc<ProxyShape>>,
    proxies: DashMap<ResourceKey, Proxy>,
    listeners: DashMap<ResourceKey, Vec<Listener>>,
    next_listener: AtomicU64,
    attached: AtomicBool,
    observer: Mutex<Option<ObserverId>>,
}

/// Produces and caches proxies over one graph.
///
/// Cloning is cheap; clones share caches and the attachment switch.
#[derive(Clone)]
pub struct TypeController {
    inner: Arc<ControllerInner>,
}

impl TypeController {
    /// A new, attached controller over `graph`.
    #[must_use]
    pub fn new(graph: Arc<ResourceGraph>) -> Self {
        let inner = Arc::new(ControllerInner {
            graph: Arc::clone(&graph),
            shapes: DashMap::new(),
            proxies: DashMap::new(),
            listeners: DashMap::new(),
            next_listener: AtomicU64::new(1),
            attached: AtomicBool::new(true),
            observer: Mutex::new(None),
        });
        let dispatcher = Arc::new(Dispatcher {
            controller: Arc::downgrade(&inner),
        });
        *inner.observer.lock() = Some(graph.observe(dispatcher));
        Self { inner }
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.inner.is_attached()
    }

    /// The proxy for `key`. Repeated calls return the same proxy.
    pub fn get_proxy(&self, key: ResourceKey) -> Result<Proxy> {
        self.inner.proxy(key)
    }

    /// The proxy for `key`, checked against one capability.
    ///
    /// Fails with [`Error::UnsupportedCapability`] for generic capabilities,
    /// whether or not the resource would otherwise qualify.
    pub fn bind_as(&self, key: ResourceKey, capability: &str) -> Result<Proxy> {
        let decl = self
            .inner
            .graph
            .registry()
            .capability(capability)
            .ok_or_else(|| Error::UnknownCapability {
                capability: CapabilityId::from(capability),
            })?;
        if decl.generic {
            return Err(Error::UnsupportedCapability {
                capability: decl.id.clone(),
            });
        }
        let proxy = self.inner.proxy(key)?;
        if !proxy.implements(capability) {
            return Err(Error::CapabilityNotImplemented {
                resource_id: self.inner.graph.id_of(key)?,
                capability: decl.id.clone(),
            });
        }
        Ok(proxy)
    }

    /// The shape proxies of type `tag` get.
    pub fn shape_of(&self, tag: &str) -> Result<Arc<ProxyShape>> {
        let ty = Arc::clone(self.inner.graph.registry().resolve(tag)?);
        Ok(self.inner.shape_for(&ty))
    }

    /// Replace every resource key in `value` with its proxy.
    pub fn wrap(&self, value: Value) -> Result<Value<Proxy>> {
        self.inner.wrap(value)
    }

    /// Replace every proxy in `value` with the key of its resource.
    #[must_use]
    pub fn unwrap(value: Value<Proxy>) -> Value {
        value.map_refs(&mut |proxy| proxy.key())
    }

    /// Permanently detach this controller and every proxy it produced.
    pub fn detach(&self) {
        self.inner.detach();
    }

    /// Drop cached state for a resource that left the graph.
    pub fn forget(&self, key: ResourceKey) {
        self.inner.forget(key);
    }
}

impl fmt::Debug for TypeController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeController")
            .field("attached", &self.inner.is_attached())
            .field("shapes", &self.inner.shapes.len())
            .field("proxies", &self.inner.proxies.len())
            .finish()
    }
}

impl ControllerInner {
    fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    fn detached_error(&self, key: ResourceKey) -> Error {
        Error::ProxyDetached {
            resource_id: self.graph.id_of(key).unwrap_or(ResourceId::TRANSIENT),
        }
    }

    fn proxy(self: &Arc<Self>, key: ResourceKey) -> Result<Proxy> {
        if !self.is_attached() {
            return Err(self.detached_error(key));
        }
        if let Some(proxy) = self.proxies.get(&key) {
            return Ok(Proxy::clone(&proxy));
        }
        let ty = self.graph.type_of(key)?;
        let shape = self.shape_for(&ty);
        let entry = self.proxies.entry(key).or_insert_with(|| Proxy {
            inner: Arc::new(ProxyInner {
                key,
                type_tag: ty.tag().clone(),
                shape,
                controller: Arc::downgrade(self),
            }),
        });
        Ok(Proxy::clone(&entry))
    }

    /// Shape for a type, shared with the base type when the capability sets
    /// are equal.
    fn shape_for(&self, ty: &RegisteredType) -> Arc<ProxyShape> {
        if let Some(shape) = self.shapes.get(ty.tag()) {
            return Arc::clone(&shape);
        }
        let registry = self.graph.registry();
        let shape = match ty.base().and_then(|base| registry.get(base.as_str())) {
            Some(base) if base.capabilities() == ty.capabilities() => self.shape_for(base),
            _ => Arc::new(ProxyShape::build(registry, ty.capabilities())),
        };
        tracing::trace!(type_tag = %ty.tag(), "cached proxy shape");
        Arc::clone(&self.shapes.entry(ty.tag().clone()).or_insert(shape))
    }

    fn wrap(self: &Arc<Self>, value: Value) -> Result<Value<Proxy>> {
        value.try_map_refs(&mut |key| self.proxy(key))
    }

    fn detach(&self) {
        if !self.attached.swap(false, Ordering::AcqRel) {
            return;
        }
        self.listeners.clear();
        self.proxies.clear();
        if let Some(id) = self.observer.lock().take() {
            self.graph.unobserve(id);
        }
        tracing::debug!("type controller detached");
    }

    fn forget(&self, key: ResourceKey) {
        self.proxies.remove(&key);
        self.listeners.remove(&key);
    }
}

impl Drop for ControllerInner {
    fn drop(&mut self) {
        if let Some(id) = self.observer.get_mut().take() {
            self.graph.unobserve(id);
        }
    }
}

/// Graph observer re-raising resource events through proxies.
struct Dispatcher {
    controller: Weak<ControllerInner>,
}

impl GraphObserver for Dispatcher {
    fn on_event(&self, key: ResourceKey, event: &str, args: &[Value]) {
        let Some(controller) = self.controller.upgrade() else {
            return;
        };
        if !controller.is_attached() {
            return;
        }
        let callbacks: Vec<Callback> = controller
            .listeners
            .get(&key)
            .map(|listeners| {
                listeners
                    .iter()
                    .filter(|listener| listener.event == event)
                    .map(|listener| Arc::clone(&listener.callback))
                    .collect()
            })
            .unwrap_or_default();
        if callbacks.is_empty() {
            return;
        }

        let wrapped = controller.proxy(key).and_then(|sender| {
            let args = args
                .iter()
                .cloned()
                .map(|arg| controller.wrap(arg))
                .collect::<Result<Vec<_>>>()?;
            Ok(ProxyEvent {
                sender,
                event: event.to_owned(),
                args,
            })
        });
        let payload = match wrapped {
            Ok(payload) => payload,
            Err(e) => {
                tracing::debug!(key = %key, event, error = %e, "dropping event");
                return;
            }
        };
        for callback in callbacks {
            if !controller.is_attached() {
                break;
            }
            callback(&payload);
        }
    }

    fn on_removed(&self, key: ResourceKey) {
        if let Some(controller) = self.controller.upgrade() {
            controller.forget(key);
        }
    }
}

// ---------------------------------------------------------------------------
// Proxy
// ---------------------------------------------------------------------------

struct ProxyInner {
    key: ResourceKey,
    type_tag: TypeTag,
    shape: Arc<ProxyShape>,
    controller: Weak<ControllerInner>,
}

/// Capability-scoped view of one resource.
///
/// Two proxies are equal when they come from the same controller and view
/// the same resource.
#[derive(Clone)]
pub struct Proxy {
    inner: Arc<ProxyInner>,
}

impl Proxy {
    /// Key of the viewed resource.
    #[must_use]
    pub fn key(&self) -> ResourceKey {
        self.inner.key
    }

    /// Concrete type of the viewed resource.
    #[must_use]
    pub fn type_tag(&self) -> &TypeTag {
        &self.inner.type_tag
    }

    #[must_use]
    pub fn shape(&self) -> &Arc<ProxyShape> {
        &self.inner.shape
    }

    #[must_use]
    pub fn implements(&self, capability: &str) -> bool {
        self.inner.shape.implements(capability)
    }

    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.inner
            .controller
            .upgrade()
            .is_some_and(|controller| controller.is_attached())
    }

    /// Persistent id of the viewed resource.
    pub fn id(&self) -> Result<ResourceId> {
        self.controller()?.graph.id_of(self.inner.key)
    }

    /// Read a property.
    pub fn get(&self, name: &str) -> Result<Value<Proxy>> {
        let controller = self.controller()?;
        self.check(self.inner.shape.has_property(name), name)?;
        let value = controller.graph.get_property(self.inner.key, name)?;
        controller.wrap(value)
    }

    /// Write a property. Proxies inside `value` are unwrapped first.
    pub fn set(&self, name: &str, value: impl Into<Value<Proxy>>) -> Result<()> {
        let controller = self.controller()?;
        self.check(self.inner.shape.has_property(name), name)?;
        if !self.inner.shape.is_writable(name) {
            return Err(Error::invocation(name, "property is read-only"));
        }
        let value = TypeController::unwrap(value.into());
        controller.graph.set_property(self.inner.key, name, value)
    }

    /// Call a method.
    pub fn invoke(&self, method: &str, args: Vec<Value<Proxy>>) -> Result<Value<Proxy>> {
        let controller = self.controller()?;
        self.check(self.inner.shape.has_method(method), method)?;
        let args = args.into_iter().map(TypeController::unwrap).collect();
        let result = controller.graph.invoke(self.inner.key, method, args)?;
        controller.wrap(result)
    }

    /// Add `member` to an exposed reference collection.
    pub fn add(&self, collection: &str, member: &Proxy) -> Result<bool> {
        let controller = self.controller()?;
        self.check(self.inner.shape.has_property(collection), collection)?;
        controller
            .graph
            .add_reference(self.inner.key, collection, member.key())
    }

    /// Remove `member` from an exposed reference collection.
    pub fn remove(&self, collection: &str, member: &Proxy) -> Result<bool> {
        let controller = self.controller()?;
        self.check(self.inner.shape.has_property(collection), collection)?;
        controller
            .graph
            .remove_reference(self.inner.key, collection, member.key())
    }

    /// Listen for `event`. The callback receives this proxy as the sender.
    pub fn subscribe<F>(&self, event: &str, callback: F) -> Result<Subscription>
    where
        F: Fn(&ProxyEvent) + Send + Sync + 'static,
    {
        let controller = self.controller()?;
        self.check(self.inner.shape.has_event(event), event)?;
        let id = controller.next_listener.fetch_add(1, Ordering::Relaxed);
        controller
            .listeners
            .entry(self.inner.key)
            .or_default()
            .push(Listener {
                id,
                event: event.to_owned(),
                callback: Arc::new(callback),
            });
        Ok(Subscription {
            key: self.inner.key,
            id,
        })
    }

    /// Remove a listener. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        let Some(controller) = self.inner.controller.upgrade() else {
            return false;
        };
        let Some(mut listeners) = controller.listeners.get_mut(&subscription.key) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|listener| listener.id != subscription.id);
        listeners.len() != before
    }

    fn controller(&self) -> Result<Arc<ControllerInner>> {
        match self.inner.controller.upgrade() {
            Some(controller) if controller.is_attached() => Ok(controller),
            Some(controller) => Err(controller.detached_error(self.inner.key)),
            None => Err(Error::ProxyDetached {
                resource_id: ResourceId::TRANSIENT,
            }),
        }
    }

    fn check(&self, exposed: bool, member: &str) -> Result<()> {
        if exposed {
            return Ok(());
        }
        Err(Error::MemberNotExposed {
            resource_id: self.id().unwrap_or(ResourceId::TRANSIENT),
            member: member.to_owned(),
        })
    }
}

impl PartialEq for Proxy {
    fn eq(&self, other: &Self) -> bool {
        self.inner.key == other.inner.key
            && Weak::ptr_eq(&self.inner.controller, &other.inner.controller)
    }
}

impl Eq for Proxy {}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Proxy")
            .field("key", &self.inner.key)
            .field("type_tag", &self.inner.type_tag)
            .field("attached", &self.is_attached())
            .finish()
    }
}

impl From<Proxy> for Value<Proxy> {
    fn from(proxy: Proxy) -> Self {
        Self::Resource(proxy)
    }
}

impl From<&Proxy> for Value<Proxy> {
    fn from(proxy: &Proxy) -> Self {
        Self::Resource(proxy.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::reference::{CHILDREN, PARENT};
    use crate::registry::{CapabilityDecl, RESOURCE_CAPABILITY, ResourceType};
    use crate::resource::{Resource, ResourceContext};

    #[derive(Default)]
    struct Beacon;

    impl Resource for Beacon {
        fn invoke(
            &mut self,
            method: &str,
            args: Vec<Value>,
            ctx: &mut ResourceContext<'_>,
        ) -> Result<Value> {
            match method {
                "Flash" => {
                    ctx.raise("Flashed", args.clone());
                    Ok(Value::List(args))
                }
                other => Err(Error::invocation(other, "unknown")),
            }
        }
    }

    fn graph() -> Arc<ResourceGraph> {
        let mut reg = TypeRegistry::new();
        reg.register_capability(
            CapabilityDecl::new("IBeacon")
                .extends(RESOURCE_CAPABILITY)
                .method("Flash")
                .event("Flashed"),
        )
        .unwrap();
        reg.register_capability(CapabilityDecl::new("IDimmable").writable_property("Level"))
            .unwrap();
        reg.register_capability(CapabilityDecl::new("ISet").generic())
            .unwrap();
        reg.register(ResourceType::new::<Beacon>("Beacon").implements("IBeacon"))
            .unwrap();
        reg.register(ResourceType::new::<Beacon>("RedBeacon").base("Beacon"))
            .unwrap();
        reg.register(
            ResourceType::new::<Beacon>("DimBeacon")
                .base("Beacon")
                .implements("IDimmable"),
        )
        .unwrap();
        reg.register(ResourceType::new::<Beacon>("Bare")).unwrap();
        Arc::new(ResourceGraph::new(Arc::new(reg)))
    }

    #[test]
    fn repeated_requests_share_shape_and_target() {
        let graph = graph();
        let controller = TypeController::new(Arc::clone(&graph));
        let a = graph.instantiate("Beacon").unwrap();
        let b = graph.instantiate("Beacon").unwrap();

        let p1 = controller.get_proxy(a).unwrap();
        let p2 = controller.get_proxy(a).unwrap();
        let q = controller.get_proxy(b).unwrap();
        assert_eq!(p1, p2);
        assert_ne!(p1, q);
        assert!(Arc::ptr_eq(p1.shape(), q.shape()));
    }

    #[test]
    fn derived_type_reuses_base_shape_unless_it_adds_capabilities() {
        let graph = graph();
        let controller = TypeController::new(graph);
        let base = controller.shape_of("Beacon").unwrap();
        assert!(Arc::ptr_eq(&base, &controller.shape_of("RedBeacon").unwrap()));
        let dim = controller.shape_of("DimBeacon").unwrap();
        assert!(!Arc::ptr_eq(&base, &dim));
        assert!(dim.is_writable("Level"));
    }

    #[test]
    fn bare_type_gets_empty_shape() {
        let graph = graph();
        let controller = TypeController::new(Arc::clone(&graph));
        let key = graph.instantiate("Bare").unwrap();
        let proxy = controller.get_proxy(key).unwrap();
        assert!(proxy.shape().capabilities().is_empty());
        assert!(matches!(proxy.get("Name"), Err(Error::MemberNotExposed { .. })));
    }

    #[test]
    fn generic_capability_is_rejected_at_bind_time() {
        let graph = graph();
        let controller = TypeController::new(Arc::clone(&graph));
        let key = graph.instantiate("Beacon").unwrap();
        assert!(matches!(
            controller.bind_as(key, "ISet"),
            Err(Error::UnsupportedCapability { .. })
        ));
        assert!(matches!(
            controller.bind_as(key, "IDimmable"),
            Err(Error::CapabilityNotImplemented { .. })
        ));
        assert!(controller.bind_as(key, "IBeacon").is_ok());
    }

    #[test]
    fn references_cross_the_boundary_as_proxies() {
        let graph = graph();
        let controller = TypeController::new(Arc::clone(&graph));
        let parent = controller
            .get_proxy(graph.instantiate("Beacon").unwrap())
            .unwrap();
        let child = controller
            .get_proxy(graph.instantiate("Beacon").unwrap())
            .unwrap();

        child.set(PARENT, &parent).unwrap();
        assert_eq!(child.get(PARENT).unwrap(), Value::Resource(parent.clone()));
        assert_eq!(
            parent.get(CHILDREN).unwrap(),
            Value::List(vec![Value::Resource(child.clone())])
        );
        // the graph itself only ever stores keys
        assert_eq!(graph.parent(child.key()).unwrap(), Some(parent.key()));

        let echoed = parent
            .invoke("Flash", vec![Value::Resource(child.clone())])
            .unwrap();
        assert_eq!(echoed, Value::List(vec![Value::Resource(child)]));
    }

    #[test]
    fn events_carry_the_proxy_as_sender() {
        let graph = graph();
        let controller = TypeController::new(Arc::clone(&graph));
        let proxy = controller
            .get_proxy(graph.instantiate("Beacon").unwrap())
            .unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        proxy
            .subscribe("Flashed", move |event| {
                sink.lock().push(event.sender.clone());
            })
            .unwrap();
        proxy.invoke("Flash", Vec::new()).unwrap();
        assert_eq!(*seen.lock(), vec![proxy.clone()]);
        assert!(matches!(
            proxy.subscribe("Exploded", |_| {}),
            Err(Error::MemberNotExposed { .. })
        ));
    }

    #[test]
    fn detach_is_permanent() {
        let graph = graph();
        let controller = TypeController::new(Arc::clone(&graph));
        let key = graph.instantiate("Beacon").unwrap();
        let proxy = controller.get_proxy(key).unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let subscription = proxy
            .subscribe("Flashed", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        controller.detach();
        assert!(!proxy.is_attached());
        assert!(matches!(
            proxy.invoke("Flash", Vec::new()),
            Err(Error::ProxyDetached { .. })
        ));
        assert!(matches!(proxy.get("Name"), Err(Error::ProxyDetached { .. })));
        assert!(matches!(controller.get_proxy(key), Err(Error::ProxyDetached { .. })));

        graph.invoke(key, "Flash", Vec::new()).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(!proxy.unsubscribe(subscription));

        let fresh = TypeController::new(graph);
        assert!(fresh.get_proxy(key).unwrap().is_attached());
    }
}
