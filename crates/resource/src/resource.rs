//! The resource trait implemented by every concrete resource type.
//!
//! A resource owns only its own domain state. Identity, name, description,
//! references and lifecycle live in the [`ResourceGraph`](crate::graph::ResourceGraph)
//! node that wraps it; the resource sees them through a [`ResourceContext`]
//! while one of its hooks or members runs.

use std::any::Any;

use crate::error::{Error, Result};
use crate::id::{ResourceId, ResourceKey, TypeTag};
use crate::reference::References;
use crate::value::Value;

/// Upcast helper so `dyn Resource` can be downcast to its concrete type.
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Domain behavior of a resource.
///
/// Every method has a default so simple types only implement what they
/// actually expose. Hooks are synchronous: they run while the node is locked
/// and must not block on I/O.
pub trait Resource: AsAny + Send + Sync + 'static {
    /// Called once when the resource enters `Initialized`.
    fn initialize(&mut self, _ctx: &mut ResourceContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Called on every transition into `Running`.
    fn start(&mut self, _ctx: &mut ResourceContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Called on every transition into `Stopped`.
    fn stop(&mut self, _ctx: &mut ResourceContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Read a domain property. `None` means the resource has no such property.
    fn property(&self, _name: &str) -> Option<Value> {
        None
    }

    /// Write a domain property.
    fn set_property(
        &mut self,
        name: &str,
        _value: Value,
        _ctx: &mut ResourceContext<'_>,
    ) -> Result<()> {
        Err(Error::invocation(name, "no writable property with this name"))
    }

    /// Call a domain method.
    fn invoke(
        &mut self,
        method: &str,
        _args: Vec<Value>,
        _ctx: &mut ResourceContext<'_>,
    ) -> Result<Value> {
        Err(Error::invocation(method, "no method with this name"))
    }

    /// Serialize state that is not part of the core schema.
    ///
    /// Stored as the entity's extension data blob.
    fn save_state(&self) -> Result<serde_json::Value> {
        Ok(serde_json::Value::Null)
    }

    /// Restore state previously produced by [`save_state`](Self::save_state).
    fn load_state(&mut self, _state: serde_json::Value) -> Result<()> {
        Ok(())
    }
}

impl dyn Resource {
    /// Downcast to the concrete resource type.
    #[must_use]
    pub fn downcast_ref<T: Resource>(&self) -> Option<&T> {
        self.as_any().downcast_ref()
    }

    /// Mutable downcast to the concrete resource type.
    pub fn downcast_mut<T: Resource>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut()
    }
}

/// Core fields every resource carries, stored alongside the instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceCore {
    pub id: ResourceId,
    pub type_tag: TypeTag,
    pub name: String,
    pub description: String,
}

impl ResourceCore {
    pub(crate) fn new(type_tag: TypeTag) -> Self {
        Self {
            id: ResourceId::TRANSIENT,
            type_tag,
            name: String::new(),
            description: String::new(),
        }
    }
}

/// What a resource may see and do while one of its methods runs.
///
/// Events raised and change marks are buffered and delivered by the graph
/// once the node lock is released.
#[derive(Debug)]
pub struct ResourceContext<'a> {
    key: ResourceKey,
    id: ResourceId,
    references: &'a References,
    raised: Vec<(String, Vec<Value>)>,
    changed: bool,
}

impl<'a> ResourceContext<'a> {
    pub(crate) fn new(key: ResourceKey, id: ResourceId, references: &'a References) -> Self {
        Self {
            key,
            id,
            references,
            raised: Vec::new(),
            changed: false,
        }
    }

    #[must_use]
    pub fn key(&self) -> ResourceKey {
        self.key
    }

    #[must_use]
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Current references of the resource.
    #[must_use]
    pub fn references(&self) -> &References {
        self.references
    }

    /// Raise an event to everyone subscribed through a proxy.
    pub fn raise(&mut self, event: impl Into<String>, args: Vec<Value>) {
        self.raised.push((event.into(), args));
    }

    /// Signal that persisted state changed and the resource should be saved.
    pub fn mark_changed(&mut self) {
        self.changed = true;
    }

    pub(crate) fn into_signals(self) -> Signals {
        Signals {
            raised: self.raised,
            changed: self.changed,
        }
    }
}

/// Buffered output of a [`ResourceContext`].
#[derive(Debug, Default)]
pub(crate) struct Signals {
    pub(crate) raised: Vec<(String, Vec<Value>)>,
    pub(crate) changed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Lamp {
        on: bool,
    }

    impl Resource for Lamp {
        fn invoke(
            &mut self,
            method: &str,
            _args: Vec<Value>,
            ctx: &mut ResourceContext<'_>,
        ) -> Result<Value> {
            match method {
                "Toggle" => {
                    self.on = !self.on;
                    ctx.raise("Toggled", vec![Value::Bool(self.on)]);
                    ctx.mark_changed();
                    Ok(Value::Bool(self.on))
                }
                other => Err(Error::invocation(other, "unknown")),
            }
        }
    }

    #[test]
    fn context_buffers_signals() {
        let refs = References::default();
        let mut lamp: Box<dyn Resource> = Box::new(Lamp::default());
        let mut ctx = ResourceContext::new(ResourceKey::new(1), ResourceId::TRANSIENT, &refs);
        let out = lamp.invoke("Toggle", Vec::new(), &mut ctx).unwrap();
        assert_eq!(out, Value::Bool(true));

        let signals = ctx.into_signals();
        assert!(signals.changed);
        assert_eq!(signals.raised.len(), 1);
        assert_eq!(signals.raised[0].0, "Toggled");
    }

    #[test]
    fn downcast_through_trait_object() {
        let lamp: Box<dyn Resource> = Box::new(Lamp { on: true });
        assert!((*lamp).downcast_ref::<Lamp>().is_some_and(|l| l.on));
    }

    #[test]
    fn defaults_reject_unknown_members() {
        let refs = References::default();
        let mut lamp = Lamp::default();
        let mut ctx = ResourceContext::new(ResourceKey::new(1), ResourceId::TRANSIENT, &refs);
        assert!(lamp.set_property("Power", Value::Null, &mut ctx).is_err());
        assert!(lamp.property("Power").is_none());
    }
}
