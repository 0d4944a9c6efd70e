//! Shared fixture: a small plant model with cells, tools and mounts.
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::broadcast;
use trellis_resource::registry::RESOURCE_CAPABILITY;
use trellis_resource::{
    CapabilityDecl, Error, ManagerConfig, MemoryStore, ReferenceSlot, RelationKind, Resource,
    ResourceContext, ResourceEvent, ResourceManager, ResourceType, Result, TypeRegistry, Value,
};

/// How often each lifecycle hook ran, across all cells.
#[derive(Debug, Default)]
pub struct HookCounts {
    pub initialize: AtomicUsize,
    pub start: AtomicUsize,
    pub stop: AtomicUsize,
}

impl HookCounts {
    pub fn initialize(&self) -> usize {
        self.initialize.load(Ordering::SeqCst)
    }

    pub fn start(&self) -> usize {
        self.start.load(Ordering::SeqCst)
    }

    pub fn stop(&self) -> usize {
        self.stop.load(Ordering::SeqCst)
    }
}

pub struct Cell {
    speed: i64,
    hooks: Arc<HookCounts>,
}

impl Resource for Cell {
    fn initialize(&mut self, _ctx: &mut ResourceContext<'_>) -> Result<()> {
        self.hooks.initialize.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn start(&mut self, _ctx: &mut ResourceContext<'_>) -> Result<()> {
        self.hooks.start.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self, _ctx: &mut ResourceContext<'_>) -> Result<()> {
        self.hooks.stop.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn property(&self, name: &str) -> Option<Value> {
        (name == "Speed").then_some(Value::Int(self.speed))
    }

    fn set_property(&mut self, name: &str, value: Value, ctx: &mut ResourceContext<'_>) -> Result<()> {
        match name {
            "Speed" => {
                self.speed = value
                    .as_int()
                    .ok_or_else(|| Error::invocation(name, "expected an integer"))?;
                ctx.mark_changed();
                Ok(())
            }
            other => Err(Error::invocation(other, "no such property")),
        }
    }

    fn invoke(
        &mut self,
        method: &str,
        args: Vec<Value>,
        ctx: &mut ResourceContext<'_>,
    ) -> Result<Value> {
        match method {
            "Run" => {
                ctx.raise("Done", args.clone());
                Ok(Value::List(args))
            }
            other => Err(Error::invocation(other, "no such method")),
        }
    }

    fn save_state(&self) -> Result<serde_json::Value> {
        Ok(serde_json::json!({ "speed": self.speed }))
    }

    fn load_state(&mut self, state: serde_json::Value) -> Result<()> {
        self.speed = state
            .get("speed")
            .and_then(serde_json::Value::as_i64)
            .unwrap_or_default();
        Ok(())
    }
}

#[derive(Default)]
pub struct Tool {
    wear: i64,
}

impl Resource for Tool {
    fn property(&self, name: &str) -> Option<Value> {
        (name == "Wear").then_some(Value::Int(self.wear))
    }
}

#[derive(Default)]
pub struct Bare;

impl Resource for Bare {}

pub struct Fixture {
    pub registry: Arc<TypeRegistry>,
    pub hooks: Arc<HookCounts>,
}

/// Cells hold a `Primary` and a `Backup` tool (two named current-part
/// slots), a `Candidates` collection of possible parts and an auto-saved
/// `Tools` collection. A `Mount` requires its `Tool`.
pub fn fixture() -> Fixture {
    trellis_log::init_test();
    let hooks = Arc::new(HookCounts::default());
    let mut reg = TypeRegistry::new();

    reg.register_capability(
        CapabilityDecl::new("ICell")
            .extends(RESOURCE_CAPABILITY)
            .writable_property("Speed")
            .writable_property("Primary")
            .writable_property("Backup")
            .property("Candidates")
            .property("Tools")
            .method("Run")
            .event("Done"),
    )
    .unwrap();
    reg.register_capability(
        CapabilityDecl::new("ITool")
            .extends(RESOURCE_CAPABILITY)
            .property("Wear"),
    )
    .unwrap();
    reg.register_capability(CapabilityDecl::new("ISmart").method("Calibrate"))
        .unwrap();
    reg.register_capability(
        CapabilityDecl::new("IMount")
            .extends(RESOURCE_CAPABILITY)
            .writable_property("Tool"),
    )
    .unwrap();
    reg.register_capability(CapabilityDecl::new("ICollection").generic())
        .unwrap();

    let cell_hooks = Arc::clone(&hooks);
    let cell = move || -> Box<dyn Resource> {
        Box::new(Cell {
            speed: 0,
            hooks: Arc::clone(&cell_hooks),
        })
    };

    reg.register(
        ResourceType::with_factory("Cell", cell.clone())
            .implements("ICell")
            .reference(
                ReferenceSlot::single("Primary", RelationKind::CurrentExchangeablePart)
                    .named("Primary"),
            )
            .reference(
                ReferenceSlot::single("Backup", RelationKind::CurrentExchangeablePart)
                    .named("Backup"),
            )
            .reference(ReferenceSlot::many(
                "Candidates",
                RelationKind::PossibleExchangeablePart,
            ))
            .reference(
                ReferenceSlot::many("Tools", RelationKind::Extension)
                    .named("Tools")
                    .auto_save(),
            ),
    )
    .unwrap();
    reg.register(ResourceType::with_factory("Station", cell.clone()).base("Cell"))
        .unwrap();
    reg.register(
        ResourceType::with_factory("SmartCell", cell)
            .base("Cell")
            .implements("ISmart"),
    )
    .unwrap();
    reg.register(ResourceType::new::<Tool>("Tool").implements("ITool"))
        .unwrap();
    reg.register(
        ResourceType::new::<Bare>("Mount").implements("IMount").reference(
            ReferenceSlot::single("Tool", RelationKind::CurrentExchangeablePart)
                .named("Mount")
                .required(),
        ),
    )
    .unwrap();
    reg.register(ResourceType::new::<Bare>("Bare")).unwrap();

    Fixture {
        registry: Arc::new(reg),
        hooks,
    }
}

pub fn manager(fixture: &Fixture, store: &MemoryStore) -> ResourceManager {
    manager_with(fixture, store, ManagerConfig::default())
}

pub fn manager_with(fixture: &Fixture, store: &MemoryStore, config: ManagerConfig) -> ResourceManager {
    ResourceManager::new(config, Arc::clone(&fixture.registry), Arc::new(store.clone())).unwrap()
}

/// Wait for the first event matching `pred`, failing after two seconds.
pub async fn wait_for(
    rx: &mut broadcast::Receiver<ResourceEvent>,
    pred: impl Fn(&ResourceEvent) -> bool,
) -> ResourceEvent {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Drain every event currently queued.
pub fn drain(rx: &mut broadcast::Receiver<ResourceEvent>) -> Vec<ResourceEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
