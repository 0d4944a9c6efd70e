//! Resource manager: lifecycle orchestration, persistence and change fan-out.
//!
//! The manager owns the runtime context of one resource graph: the type
//! controller handing out proxies, the relation linker, the store, the
//! registered initializers and the event bus. Every storage interaction is a
//! single [`UnitOfWork`]; a failure anywhere before commit leaves both the
//! store and the graph as they were.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::{Arc, Weak};

use chrono::Utc;
use dashmap::DashSet;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ManagerConfig;
use crate::error::{Error, Result};
use crate::events::{EventBus, ResourceEvent};
use crate::graph::{CollectionChange, GraphObserver, ObserverId, ResourceGraph};
use crate::id::{ResourceId, ResourceKey, SlotName};
use crate::initializer::{InitializerContext, InitializerParameters, ResourceInitializer};
use crate::lifecycle::Lifecycle;
use crate::persistence::{ResourceStore, UnitOfWork};
use crate::proxy::{Proxy, TypeController};
use crate::reference::ReferenceSlot;
use crate::registry::TypeRegistry;
use crate::relation::{RelationDiff, RelationLinker, RelationRecord};

// ---------------------------------------------------------------------------
// Change worker
// ---------------------------------------------------------------------------

/// Work item for the background change worker.
#[derive(Debug, Clone)]
enum Change {
    Resource(ResourceKey),
    Collection(ResourceKey, SlotName),
}

/// Turns graph notifications into work items while the manager is running.
struct SignalForwarder {
    tx: mpsc::UnboundedSender<Change>,
    auto_save: bool,
}

impl GraphObserver for SignalForwarder {
    fn on_changed(&self, key: ResourceKey) {
        let _ = self.tx.send(Change::Resource(key));
    }

    fn on_collection_changed(
        &self,
        key: ResourceKey,
        slot: &ReferenceSlot,
        _change: CollectionChange,
    ) {
        if self.auto_save && slot.auto_save {
            let _ = self.tx.send(Change::Collection(key, slot.name.clone()));
        }
    }
}

/// Records which resources changed since they were last written.
///
/// Registered for the whole life of the manager, running or not.
struct ChangeTracker {
    dirty: Arc<DashSet<ResourceKey>>,
}

impl GraphObserver for ChangeTracker {
    fn on_changed(&self, key: ResourceKey) {
        self.dirty.insert(key);
    }

    fn on_removed(&self, key: ResourceKey) {
        self.dirty.remove(&key);
    }
}

struct Worker {
    observer: ObserverId,
    handle: JoinHandle<()>,
}

async fn run_worker(inner: Weak<ManagerInner>, mut rx: mpsc::UnboundedReceiver<Change>) {
    while let Some(change) = rx.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let (key, outcome) = match change {
            Change::Resource(key) => {
                match inner.graph.id_of(key) {
                    // Gone already, or never persisted: an explicit save
                    // picks it up.
                    Err(_) => continue,
                    Ok(id) if id.is_transient() => {
                        tracing::trace!(key = %key, "change on transient resource ignored");
                        continue;
                    }
                    Ok(_) => {}
                }
                (key, inner.save_roots(&[key]).await)
            }
            Change::Collection(key, slot) => {
                if !inner.graph.contains(key) {
                    continue;
                }
                (key, inner.persist_collection(key, slot.as_str()).await)
            }
        };
        if let Err(e) = outcome {
            inner.report(key, &e);
        }
    }
    tracing::debug!("change worker finished");
}

fn check_cancelled(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() {
        return Err(Error::Cancelled {
            operation: "initialize",
        });
    }
    Ok(())
}

/// Race `fut` against cancellation of `token`.
async fn cancellable<T, E>(
    token: &CancellationToken,
    operation: &'static str,
    fut: impl Future<Output = std::result::Result<T, E>>,
) -> Result<T>
where
    E: Into<Error>,
{
    tokio::select! {
        biased;
        () = token.cancelled() => Err(Error::Cancelled { operation }),
        outcome = fut => outcome.map_err(Into::into),
    }
}

// ---------------------------------------------------------------------------
// ResourceManager
// ---------------------------------------------------------------------------

/// Lifecycle and persistence orchestrator of one resource graph.
///
/// Cloning is cheap and yields a handle to the same manager.
///
/// # Example
///
/// ```rust,ignore
/// let manager = ResourceManager::new(ManagerConfig::default(), registry, store)?;
/// manager.initialize(&CancellationToken::new()).await?;
/// manager.start().await?;
///
/// let key = manager.create("Cell")?;
/// manager.save(key).await?;
/// let cell = manager.get_proxy(key)?;
/// ```
#[derive(Clone)]
pub struct ResourceManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    config: ManagerConfig,
    graph: Arc<ResourceGraph>,
    linker: RelationLinker,
    store: Arc<dyn ResourceStore>,
    controller: RwLock<TypeController>,
    initializers: RwLock<Vec<(Arc<dyn ResourceInitializer>, InitializerParameters)>>,
    events: EventBus,
    /// Serializes `initialize`, `start` and `stop`.
    phase_lock: tokio::sync::Mutex<()>,
    /// Serializes every unit of work that writes.
    persist_lock: tokio::sync::Mutex<()>,
    phase: RwLock<Lifecycle>,
    worker: Mutex<Option<Worker>>,
    /// Resources with unsaved changes; only these announce `Changed`.
    dirty: Arc<DashSet<ResourceKey>>,
}

impl ResourceManager {
    /// Create a manager over `registry` and `store`.
    pub fn new(
        config: ManagerConfig,
        registry: Arc<TypeRegistry>,
        store: Arc<dyn ResourceStore>,
    ) -> Result<Self> {
        config.validate()?;
        let graph = Arc::new(ResourceGraph::new(registry));
        let dirty = Arc::new(DashSet::new());
        graph.observe(Arc::new(ChangeTracker {
            dirty: Arc::clone(&dirty),
        }));
        let inner = ManagerInner {
            events: EventBus::new(config.event_buffer),
            linker: RelationLinker::new(Arc::clone(&graph)),
            controller: RwLock::new(TypeController::new(Arc::clone(&graph))),
            graph,
            store,
            initializers: RwLock::new(Vec::new()),
            phase_lock: tokio::sync::Mutex::new(()),
            persist_lock: tokio::sync::Mutex::new(()),
            phase: RwLock::new(Lifecycle::Created),
            worker: Mutex::new(None),
            dirty,
            config,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn graph(&self) -> &Arc<ResourceGraph> {
        &self.inner.graph
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<TypeRegistry> {
        self.inner.graph.registry()
    }

    #[must_use]
    pub fn linker(&self) -> &RelationLinker {
        &self.inner.linker
    }

    /// The current type controller. Replaced by a fresh one when the manager
    /// restarts after a stop.
    #[must_use]
    pub fn controller(&self) -> TypeController {
        self.inner.controller.read().clone()
    }

    /// Lifecycle phase of the manager itself.
    #[must_use]
    pub fn phase(&self) -> Lifecycle {
        *self.inner.phase.read()
    }

    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Shorthand for `events().subscribe()`.
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ResourceEvent> {
        self.inner.events.subscribe()
    }

    /// Register a bootstrap initializer together with its parameters.
    pub fn register_initializer(
        &self,
        initializer: Arc<dyn ResourceInitializer>,
        parameters: InitializerParameters,
    ) {
        tracing::debug!(initializer = initializer.name(), "registered initializer");
        self.inner.initializers.write().push((initializer, parameters));
    }

    // -- lookup -----------------------------------------------------------

    /// Instantiate a blank, transient resource of type `tag`.
    pub fn create(&self, tag: &str) -> Result<ResourceKey> {
        self.inner.graph.instantiate(tag)
    }

    /// Resolve a persistent id to its live resource.
    pub fn get(&self, id: ResourceId) -> Result<ResourceKey> {
        self.inner.graph.get(id)
    }

    /// A capability view of `key`.
    pub fn get_proxy(&self, key: ResourceKey) -> Result<Proxy> {
        self.inner.controller.read().get_proxy(key)
    }

    pub fn get_proxy_by_id(&self, id: ResourceId) -> Result<Proxy> {
        let key = self.inner.graph.get(id)?;
        self.get_proxy(key)
    }

    /// A view of `key` restricted to one capability.
    pub fn bind_as(&self, key: ResourceKey, capability: &str) -> Result<Proxy> {
        self.inner.controller.read().bind_as(key, capability)
    }

    // -- lifecycle --------------------------------------------------------

    /// Load every persisted resource, link relations and run the initialize
    /// hooks.
    ///
    /// When storage is empty and bootstrapping is enabled, the registered
    /// initializers run first. Their roots are persisted in a single unit of
    /// work once all of them succeeded.
    ///
    /// If an initializer fails, or `cancellation` fires before the bootstrap
    /// commits, every resource created by this call is removed again and
    /// nothing is written. The manager stays in `Created` and may be
    /// initialized again.
    pub async fn initialize(&self, cancellation: &CancellationToken) -> Result<()> {
        let inner = &self.inner;
        let _phase = inner.phase_lock.lock().await;
        let phase = *inner.phase.read();
        if phase != Lifecycle::Created {
            return Err(Error::InvalidStateTransition {
                resource_id: ResourceId::TRANSIENT,
                from: phase,
                to: Lifecycle::Initialized,
            });
        }

        let mut created = Vec::new();
        if let Err(e) = inner.load(cancellation, &mut created).await {
            inner.discard(&created);
            tracing::warn!(error = %e, "initialization aborted");
            return Err(e);
        }

        let mut initialized = 0_usize;
        for key in inner.graph.keys() {
            if inner.graph.lifecycle(key)? != Lifecycle::Created {
                continue;
            }
            if inner.step(key, Lifecycle::Initialized) {
                initialized += 1;
            }
        }

        *inner.phase.write() = Lifecycle::Initialized;
        tracing::info!(
            resources = inner.graph.len(),
            initialized,
            "resource manager initialized"
        );
        Ok(())
    }

    /// Start every initialized or stopped resource and begin persisting
    /// change signals in the background.
    ///
    /// Calling `start` on a running manager does nothing.
    pub async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        let _phase = inner.phase_lock.lock().await;
        let phase = *inner.phase.read();
        match phase {
            Lifecycle::Running => return Ok(()),
            Lifecycle::Initialized | Lifecycle::Stopped => {}
            other => {
                return Err(Error::InvalidStateTransition {
                    resource_id: ResourceId::TRANSIENT,
                    from: other,
                    to: Lifecycle::Running,
                });
            }
        }

        {
            let mut controller = inner.controller.write();
            if !controller.is_attached() {
                *controller = TypeController::new(Arc::clone(&inner.graph));
            }
        }

        let mut started = 0_usize;
        for key in inner.graph.keys() {
            let state = inner.graph.lifecycle(key)?;
            if matches!(state, Lifecycle::Initialized | Lifecycle::Stopped)
                && inner.step(key, Lifecycle::Running)
            {
                started += 1;
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let observer = inner.graph.observe(Arc::new(SignalForwarder {
            tx,
            auto_save: inner.config.auto_save,
        }));
        let handle = tokio::spawn(run_worker(Arc::downgrade(inner), rx));
        *inner.worker.lock() = Some(Worker { observer, handle });

        *inner.phase.write() = Lifecycle::Running;
        tracing::info!(started, "resource manager started");
        Ok(())
    }

    /// Drain pending background work, stop every running resource and
    /// detach all proxies handed out so far.
    ///
    /// Calling `stop` on a manager that is not running does nothing.
    pub async fn stop(&self) -> Result<()> {
        let inner = &self.inner;
        let _phase = inner.phase_lock.lock().await;
        if *inner.phase.read() != Lifecycle::Running {
            return Ok(());
        }

        let worker = inner.worker.lock().take();
        if let Some(worker) = worker {
            inner.graph.unobserve(worker.observer);
            if let Err(e) = worker.handle.await {
                tracing::warn!(error = %e, "change worker ended abnormally");
            }
        }

        let mut stopped = 0_usize;
        for key in inner.graph.keys() {
            if inner.graph.lifecycle(key)? == Lifecycle::Running
                && inner.step(key, Lifecycle::Stopped)
            {
                stopped += 1;
            }
        }

        inner.controller.read().detach();
        *inner.phase.write() = Lifecycle::Stopped;
        tracing::info!(stopped, "resource manager stopped");
        Ok(())
    }

    // -- persistence ------------------------------------------------------

    /// Persist `key` with its scalar fields and references.
    ///
    /// Never persisted resources reachable from it are persisted in the same
    /// unit of work and receive their ids before the records pointing at
    /// them are written.
    ///
    /// A [`ResourceEvent::Changed`] is emitted only if `key` already had an
    /// id before this call and changed since it was last written, so one
    /// mutation is announced once no matter how often it gets saved.
    pub async fn save(&self, key: ResourceKey) -> Result<()> {
        self.inner.save_roots(&[key]).await
    }

    /// React to a resource signalling that it changed: persist it.
    pub async fn resource_changed(&self, key: ResourceKey) -> Result<()> {
        self.inner.graph.id_of(key)?;
        self.inner.dirty.insert(key);
        self.inner.save_roots(&[key]).await
    }

    /// Persist only the relations of one reference collection of `key`.
    ///
    /// Skipped while `key` itself has never been persisted.
    pub async fn persist_collection(&self, key: ResourceKey, slot: &str) -> Result<()> {
        self.inner.persist_collection(key, slot).await
    }

    /// Remove `key` from storage and from the runtime.
    ///
    /// `permanent` deletes the entity row; otherwise the row is kept with a
    /// deletion timestamp. Either way the resource's relation records are
    /// removed, it is stopped if running, every reference to it is cleared
    /// and later lookups fail with [`Error::NotFound`].
    pub async fn destroy(&self, key: ResourceKey, permanent: bool) -> Result<()> {
        self.inner.destroy(key, permanent).await
    }

    // -- initializers -----------------------------------------------------

    /// Run the registered initializer called `name` now and persist its
    /// roots.
    pub async fn execute_initializer(
        &self,
        name: &str,
        parameters: &InitializerParameters,
    ) -> Result<Vec<ResourceKey>> {
        let initializer = self
            .inner
            .initializers
            .read()
            .iter()
            .find(|(init, _)| init.name() == name)
            .map(|(init, _)| Arc::clone(init))
            .ok_or_else(|| Error::NotFound {
                what: format!("initializer `{name}`"),
            })?;
        self.inner
            .run_initializer(initializer.as_ref(), parameters, &CancellationToken::new())
            .await
    }
}

impl std::fmt::Debug for ResourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceManager")
            .field("phase", &*self.inner.phase.read())
            .field("resources", &self.inner.graph.len())
            .field("initializers", &self.inner.initializers.read().len())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

impl ManagerInner {
    /// Load entities and relations, then bootstrap an empty store.
    async fn load(
        &self,
        cancellation: &CancellationToken,
        created: &mut Vec<ResourceKey>,
    ) -> Result<()> {
        let (entities, relations) = {
            let mut uow = cancellable(cancellation, "initialize", self.store.begin()).await?;
            let entities = cancellable(cancellation, "initialize", uow.load_entities()).await?;
            let relations = cancellable(cancellation, "initialize", uow.load_relations()).await?;
            (entities, relations)
        };

        for entity in &entities {
            match self.graph.insert_loaded(entity) {
                Ok(key) => created.push(key),
                Err(e @ (Error::UnknownType { .. } | Error::AbstractType { .. })) => {
                    tracing::warn!(
                        resource_id = %entity.id,
                        type_tag = %entity.type_tag,
                        error = %e,
                        "cannot instantiate stored entity, skipping"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        let mut by_id: HashMap<ResourceId, Vec<RelationRecord>> = HashMap::new();
        for record in relations {
            if !record.is_self_relation() {
                by_id.entry(record.target).or_default().push(record.clone());
            }
            by_id.entry(record.source).or_default().push(record);
        }
        for &key in created.iter() {
            let id = self.graph.id_of(key)?;
            if let Some(records) = by_id.get(&id) {
                self.linker.link(key, records)?;
            }
        }
        tracing::debug!(
            entities = entities.len(),
            loaded = created.len(),
            "loaded persisted resources"
        );

        check_cancelled(cancellation)?;
        if entities.is_empty() && self.config.bootstrap_when_empty {
            self.bootstrap(cancellation, created).await?;
        }
        Ok(())
    }

    /// Run every registered initializer, then persist all of their roots in
    /// one unit of work.
    ///
    /// Nothing is committed unless every initializer succeeded, so a failed
    /// or cancelled bootstrap leaves the store empty and is retried in full
    /// by the next `initialize`.
    async fn bootstrap(
        &self,
        cancellation: &CancellationToken,
        created: &mut Vec<ResourceKey>,
    ) -> Result<()> {
        let initializers: Vec<_> = self
            .initializers
            .read()
            .iter()
            .map(|(init, params)| (Arc::clone(init), params.clone()))
            .collect();
        if initializers.is_empty() {
            return Ok(());
        }

        let mut roots = Vec::new();
        for (initializer, parameters) in initializers {
            let (produced, made) = self
                .produce(initializer.as_ref(), &parameters, cancellation)
                .await?;
            roots.extend(produced);
            created.extend(made);
        }
        check_cancelled(cancellation)?;
        self.save_roots(&roots).await?;
        tracing::info!(roots = roots.len(), "bootstrap persisted");
        Ok(())
    }

    /// Run one initializer on demand and persist its roots.
    async fn run_initializer(
        &self,
        initializer: &dyn ResourceInitializer,
        parameters: &InitializerParameters,
        cancellation: &CancellationToken,
    ) -> Result<Vec<ResourceKey>> {
        let (roots, created) = self
            .produce(initializer, parameters, cancellation)
            .await?;
        if let Err(e) = self.save_roots(&roots).await {
            self.discard(&created);
            return Err(e);
        }
        Ok(roots)
    }

    /// Execute `initializer` without persisting anything.
    ///
    /// Returns its roots and every resource it created. On failure the
    /// created resources are removed again before the error is returned.
    async fn produce(
        &self,
        initializer: &dyn ResourceInitializer,
        parameters: &InitializerParameters,
        cancellation: &CancellationToken,
    ) -> Result<(Vec<ResourceKey>, Vec<ResourceKey>)> {
        let name = initializer.name().to_owned();
        let ctx = InitializerContext::new(Arc::clone(&self.graph), cancellation.clone());
        let outcome = cancellable(
            cancellation,
            "initializer",
            initializer.execute(&ctx, parameters),
        )
        .await;

        let created = ctx.take_created();
        match outcome {
            Ok(roots) => {
                tracing::info!(initializer = %name, roots = roots.len(), "initializer completed");
                Ok((roots, created))
            }
            Err(e) => {
                self.discard(&created);
                Err(match e {
                    Error::Cancelled { .. } => e,
                    other => Error::initializer(name, other),
                })
            }
        }
    }

    /// Persist `roots` and everything never persisted that they reach.
    async fn save_roots(&self, roots: &[ResourceKey]) -> Result<()> {
        let _persist = self.persist_lock.lock().await;

        let mut updated = Vec::new();
        for &root in roots {
            if !self.graph.id_of(root)?.is_transient() {
                updated.push(root);
            }
        }
        let closure = self.closure_of(roots)?;
        for &member in &closure {
            self.linker.validate(member)?;
        }

        // Changes made while the unit of work is open mark their resource
        // again and are picked up by the next save.
        let taken: HashSet<ResourceKey> = closure
            .iter()
            .filter(|&key| self.dirty.remove(key).is_some())
            .copied()
            .collect();

        let mut assigned = Vec::new();
        let outcome = match self.store.begin().await {
            Ok(mut uow) => {
                match self.write_resources(uow.as_mut(), &closure, &mut assigned).await {
                    Ok(()) => uow.commit().await.map_err(Error::from),
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e.into()),
        };
        if let Err(e) = outcome {
            self.rollback_ids(&assigned);
            for key in taken {
                self.dirty.insert(key);
            }
            return Err(e);
        }

        tracing::debug!(
            roots = roots.len(),
            resources = closure.len(),
            created = assigned.len(),
            "saved resources"
        );
        self.catch_up(&assigned);
        for key in updated.into_iter().filter(|key| taken.contains(key)) {
            let core = self.graph.core(key)?;
            self.events.emit(ResourceEvent::Changed {
                resource_id: core.id,
                type_tag: core.type_tag,
            });
        }
        Ok(())
    }

    async fn persist_collection(&self, key: ResourceKey, slot: &str) -> Result<()> {
        let _persist = self.persist_lock.lock().await;

        let id = self.graph.id_of(key)?;
        if id.is_transient() {
            tracing::debug!(key = %key, slot, "collection owner not persisted yet, skipping");
            return Ok(());
        }
        let mut unsaved = Vec::new();
        for member in self.graph.references(key)?.many(slot) {
            if self.graph.id_of(member)?.is_transient() {
                unsaved.push(member);
            }
        }
        let closure = self.closure_of(&unsaved)?;
        for &member in &closure {
            self.linker.validate(member)?;
        }

        let mut assigned = Vec::new();
        let mut uow = self.store.begin().await?;
        let written = self
            .write_collection(uow.as_mut(), key, slot, &closure, &mut assigned)
            .await;
        let outcome = match written {
            Ok(()) => uow.commit().await.map_err(Error::from),
            Err(e) => Err(e),
        };
        if let Err(e) = outcome {
            self.rollback_ids(&assigned);
            return Err(e);
        }

        tracing::debug!(resource_id = %id, slot, created = assigned.len(), "persisted collection");
        self.catch_up(&assigned);
        self.events.emit(ResourceEvent::CollectionPersisted {
            resource_id: id,
            slot: SlotName::from(slot),
        });
        Ok(())
    }

    async fn destroy(&self, key: ResourceKey, permanent: bool) -> Result<()> {
        let _persist = self.persist_lock.lock().await;

        let id = self.graph.id_of(key)?;
        if !id.is_transient() {
            let mut uow = self.store.begin().await?;
            for record in uow.relations_of(id).await? {
                uow.remove_relation(record.id).await?;
            }
            if permanent {
                uow.hard_delete_entity(id).await?;
            } else {
                uow.soft_delete_entity(id, Utc::now()).await?;
            }
            uow.commit().await?;
        }

        if self.graph.lifecycle(key)? == Lifecycle::Running {
            self.step(key, Lifecycle::Stopped);
        }
        for other in self.graph.keys() {
            if other != key {
                self.linker.unlink(key, other);
            }
        }
        self.controller.read().forget(key);
        self.graph.remove(key)?;

        tracing::debug!(resource_id = %id, permanent, "destroyed resource");
        self.events.emit(ResourceEvent::Destroyed {
            resource_id: id,
            permanent,
        });
        Ok(())
    }

    // -- unit of work helpers ---------------------------------------------

    async fn write_resources(
        &self,
        uow: &mut dyn UnitOfWork,
        closure: &[ResourceKey],
        assigned: &mut Vec<ResourceKey>,
    ) -> Result<()> {
        self.write_entities(uow, closure, assigned).await?;
        for &member in closure {
            self.write_relations(uow, member).await?;
        }
        Ok(())
    }

    async fn write_collection(
        &self,
        uow: &mut dyn UnitOfWork,
        key: ResourceKey,
        slot: &str,
        closure: &[ResourceKey],
        assigned: &mut Vec<ResourceKey>,
    ) -> Result<()> {
        self.write_resources(uow, closure, assigned).await?;
        let persisted = uow.relations_of(self.graph.id_of(key)?).await?;
        let diff = self.linker.save_collection(key, slot, &persisted)?;
        self.apply_diff(uow, &diff).await
    }

    /// Create or update the entity row of every member, handing out ids.
    async fn write_entities(
        &self,
        uow: &mut dyn UnitOfWork,
        closure: &[ResourceKey],
        assigned: &mut Vec<ResourceKey>,
    ) -> Result<()> {
        for &key in closure {
            let entity = self.graph.snapshot(key)?;
            if entity.id.is_transient() {
                let id = uow.create_entity(&entity).await?;
                self.graph.assign_id(key, id)?;
                assigned.push(key);
            } else {
                uow.update_entity(&entity).await?;
            }
        }
        Ok(())
    }

    async fn write_relations(&self, uow: &mut dyn UnitOfWork, key: ResourceKey) -> Result<()> {
        let persisted = uow.relations_of(self.graph.id_of(key)?).await?;
        let diff = self.linker.save_references(key, &persisted)?;
        self.apply_diff(uow, &diff).await
    }

    async fn apply_diff(&self, uow: &mut dyn UnitOfWork, diff: &RelationDiff) -> Result<()> {
        for record in &diff.removed {
            uow.remove_relation(record.id).await?;
        }
        for update in &diff.updated {
            let target = self.persisted_id(update.target)?;
            uow.update_relation(&update.retarget(target)).await?;
        }
        for pending in &diff.created {
            let source = self.persisted_id(pending.source)?;
            let target = self.persisted_id(pending.target)?;
            uow.create_relation(&pending.to_record(source, target)).await?;
        }
        if !diff.is_empty() {
            tracing::trace!(operations = diff.operations(), "applied relation diff");
        }
        Ok(())
    }

    fn persisted_id(&self, key: ResourceKey) -> Result<ResourceId> {
        let id = self.graph.id_of(key)?;
        if id.is_transient() {
            return Err(Error::Unsaved { key });
        }
        Ok(id)
    }

    /// `roots` followed by every never persisted resource reachable from
    /// them through never persisted resources.
    fn closure_of(&self, roots: &[ResourceKey]) -> Result<Vec<ResourceKey>> {
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        let mut queue: VecDeque<ResourceKey> = roots.iter().copied().collect();
        while let Some(key) = queue.pop_front() {
            if !seen.insert(key) {
                continue;
            }
            order.push(key);
            for target in self.linker.unsaved_references(key)? {
                if !seen.contains(&target) {
                    queue.push_back(target);
                }
            }
        }
        Ok(order)
    }

    fn rollback_ids(&self, assigned: &[ResourceKey]) {
        for &key in assigned {
            self.graph.reset_id(key);
        }
        if !assigned.is_empty() {
            tracing::debug!(count = assigned.len(), "reset ids after failed save");
        }
    }

    // -- lifecycle helpers ------------------------------------------------

    /// Bring freshly persisted resources up to the manager's phase.
    fn catch_up(&self, keys: &[ResourceKey]) {
        let steps: &[Lifecycle] = match *self.phase.read() {
            Lifecycle::Initialized | Lifecycle::Stopped => &[Lifecycle::Initialized],
            Lifecycle::Running => &[Lifecycle::Initialized, Lifecycle::Running],
            Lifecycle::Created | Lifecycle::Destroyed => &[],
        };
        for &key in keys {
            for &to in steps {
                if self.graph.lifecycle(key).is_ok_and(|state| state == to) {
                    continue;
                }
                if !self.step(key, to) {
                    break;
                }
            }
        }
    }

    /// Run one lifecycle transition, announcing success and reporting
    /// failure. Returns whether the resource is now in `to`.
    fn step(&self, key: ResourceKey, to: Lifecycle) -> bool {
        match self.graph.transition(key, to) {
            Ok(changed) => {
                if changed {
                    let resource_id = self.graph.id_of(key).unwrap_or_default();
                    let event = match to {
                        Lifecycle::Initialized => Some(ResourceEvent::Initialized { resource_id }),
                        Lifecycle::Running => Some(ResourceEvent::Started { resource_id }),
                        Lifecycle::Stopped => Some(ResourceEvent::Stopped { resource_id }),
                        Lifecycle::Created | Lifecycle::Destroyed => None,
                    };
                    if let Some(event) = event {
                        self.events.emit(event);
                    }
                }
                true
            }
            Err(e) => {
                self.report(key, &e);
                false
            }
        }
    }

    /// Remove resources created by an aborted operation.
    fn discard(&self, keys: &[ResourceKey]) {
        for &key in keys {
            for other in self.graph.keys() {
                if other != key {
                    self.linker.unlink(key, other);
                }
            }
            self.controller.read().forget(key);
            if let Err(e) = self.graph.remove(key) {
                tracing::trace!(key = %key, error = %e, "discarded resource already gone");
            }
        }
        if !keys.is_empty() {
            tracing::debug!(count = keys.len(), "discarded resources");
        }
    }

    fn report(&self, key: ResourceKey, error: &Error) {
        let resource_id = self.graph.id_of(key).unwrap_or_default();
        tracing::error!(key = %key, resource_id = %resource_id, error = %error, "resource operation failed");
        self.events.emit(ResourceEvent::Error {
            resource_id,
            error: error.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;

    fn manager(config: ManagerConfig) -> Result<ResourceManager> {
        ResourceManager::new(
            config,
            Arc::new(TypeRegistry::new()),
            Arc::new(MemoryStore::new()),
        )
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = ManagerConfig {
            event_buffer: 0,
            ..ManagerConfig::default()
        };
        assert!(matches!(manager(config), Err(Error::Configuration { .. })));
    }

    #[tokio::test]
    async fn start_requires_initialize() {
        let manager = manager(ManagerConfig::default()).unwrap();
        let err = manager.start().await.unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidStateTransition {
                from: Lifecycle::Created,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn phases_follow_the_manager_lifecycle() {
        let manager = manager(ManagerConfig::default()).unwrap();
        manager.initialize(&CancellationToken::new()).await.unwrap();
        assert_eq!(manager.phase(), Lifecycle::Initialized);

        manager.start().await.unwrap();
        manager.start().await.unwrap();
        assert_eq!(manager.phase(), Lifecycle::Running);

        manager.stop().await.unwrap();
        manager.stop().await.unwrap();
        assert_eq!(manager.phase(), Lifecycle::Stopped);
        assert!(!manager.controller().is_attached());

        manager.start().await.unwrap();
        assert!(manager.controller().is_attached());
        manager.stop().await.unwrap();
    }

    #[tokio::test]
    async fn initialize_twice_fails() {
        let manager = manager(ManagerConfig::default()).unwrap();
        manager.initialize(&CancellationToken::new()).await.unwrap();
        assert!(manager.initialize(&CancellationToken::new()).await.is_err());
    }

    #[tokio::test]
    async fn unknown_initializer_is_not_found() {
        let manager = manager(ManagerConfig::default()).unwrap();
        let err = manager
            .execute_initializer("seed", &serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
