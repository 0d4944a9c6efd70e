//! Reconciles persisted relation records with in-memory references.
//!
//! Loading goes records → references ([`RelationLinker::link`]). Saving goes
//! the other way: the linker compares a resource's current references with
//! the records previously persisted for it and describes the minimal set of
//! writes ([`RelationDiff`]). The linker holds no state of its own and never
//! talks to storage; applying a diff is the caller's job.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::graph::ResourceGraph;
use crate::id::{ResourceId, ResourceKey, SlotName};
use crate::reference::{Cardinality, ReferenceSlot, SlotValue};
use crate::registry::RegisteredType;

use super::{RelationKind, RelationRecord, RelationRole};

/// Outcome of [`RelationLinker::link`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkReport {
    /// Records applied to a slot.
    pub linked: usize,
    /// Records with no matching slot or an unresolvable far end.
    pub skipped: usize,
}

/// A record to create once both ends have persistent ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRelation {
    pub source: ResourceKey,
    pub target: ResourceKey,
    pub kind: RelationKind,
    pub owner: RelationRole,
    pub name: Option<String>,
}

impl PendingRelation {
    /// The record to store, given the ids both ends have by now.
    #[must_use]
    pub fn to_record(&self, source: ResourceId, target: ResourceId) -> RelationRecord {
        let record = RelationRecord::new(source, target, self.kind).owned_by(self.owner);
        match &self.name {
            Some(name) => record.named(name.clone()),
            None => record,
        }
    }
}

/// An existing record whose far end must move to another resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationUpdate {
    /// The record as currently persisted.
    pub record: RelationRecord,
    /// The resource the far end must point at.
    pub target: ResourceKey,
    /// The role the saving resource plays in the record.
    pub role: RelationRole,
}

impl RelationUpdate {
    /// The record with its far end replaced by `target`.
    #[must_use]
    pub fn retarget(&self, target: ResourceId) -> RelationRecord {
        let mut record = self.record.clone();
        match self.role {
            RelationRole::Source => record.target = target,
            RelationRole::Target => record.source = target,
        }
        record
    }
}

/// Writes needed to bring persisted relations in line with memory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationDiff {
    pub created: Vec<PendingRelation>,
    pub updated: Vec<RelationUpdate>,
    pub removed: Vec<RelationRecord>,
    /// Referenced resources that were never persisted. They need ids before
    /// the records pointing at them can be written.
    pub unsaved: Vec<ResourceKey>,
}

impl RelationDiff {
    /// No create, update or remove is required.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.updated.is_empty() && self.removed.is_empty()
    }

    /// Number of write operations the diff describes.
    #[must_use]
    pub fn operations(&self) -> usize {
        self.created.len() + self.updated.len() + self.removed.len()
    }

    fn note_unsaved(&mut self, key: ResourceKey) {
        if !self.unsaved.contains(&key) {
            self.unsaved.push(key);
        }
    }
}

/// Stateless transform between the graph and relation records.
#[derive(Debug, Clone)]
pub struct RelationLinker {
    graph: Arc<ResourceGraph>,
}

impl RelationLinker {
    #[must_use]
    pub fn new(graph: Arc<ResourceGraph>) -> Self {
        Self { graph }
    }

    /// Populate the references of `key` from persisted records.
    ///
    /// Each record is routed to the slot declared for its kind, the role the
    /// resource plays and the record name. Records whose far end is not in
    /// the graph are skipped; they get linked from the other side once that
    /// resource is loaded.
    pub fn link(&self, key: ResourceKey, records: &[RelationRecord]) -> Result<LinkReport> {
        let node = self.graph.node(key)?;
        let id = node.state.read().core.id;
        let mut report = LinkReport::default();

        for record in records {
            let Some(role) = record.role_of(id) else {
                continue;
            };
            let Some(slot) = node
                .ty
                .slots()
                .iter()
                .find(|slot| slot.matches(record.kind, role, record.name.as_deref()))
            else {
                tracing::warn!(
                    resource_id = %id,
                    type_tag = %node.ty.tag(),
                    relation_id = %record.id,
                    kind = %record.kind,
                    name = record.name.as_deref().unwrap_or(""),
                    "no slot for relation record, skipping"
                );
                report.skipped += 1;
                continue;
            };
            let other = record.other(role);
            let Some(target) = self.graph.key_of(other) else {
                tracing::warn!(
                    resource_id = %id,
                    slot = %slot.name,
                    target = %other,
                    "relation target is not loaded, skipping"
                );
                report.skipped += 1;
                continue;
            };
            self.graph.link_reference(key, slot, target)?;
            report.linked += 1;
        }

        tracing::debug!(
            resource_id = %id,
            linked = report.linked,
            skipped = report.skipped,
            "linked relations"
        );
        Ok(report)
    }

    /// Fail if a required slot of `key` is unset or empty.
    pub fn validate(&self, key: ResourceKey) -> Result<()> {
        let node = self.graph.node(key)?;
        let state = node.state.read();
        for slot in node.ty.slots().iter().filter(|slot| slot.required) {
            let empty = state
                .references
                .get(slot.name.as_str())
                .is_none_or(SlotValue::is_empty);
            if empty {
                return Err(Error::Validation {
                    resource_id: state.core.id,
                    type_tag: node.ty.tag().clone(),
                    slot: slot.name.clone(),
                    reason: match slot.cardinality {
                        Cardinality::Single => "is required but unset".into(),
                        Cardinality::Many => "is required but empty".into(),
                    },
                });
            }
        }
        Ok(())
    }

    /// Diff every slot of `key` against `persisted`, the records stored for
    /// it so far.
    ///
    /// Validates first, so a failing resource produces no diff at all.
    /// Records that belong to no declared slot are left untouched.
    pub fn save_references(
        &self,
        key: ResourceKey,
        persisted: &[RelationRecord],
    ) -> Result<RelationDiff> {
        self.validate(key)?;
        let node = self.graph.node(key)?;
        let (id, references) = {
            let state = node.state.read();
            (state.core.id, state.references.clone())
        };
        let mut diff = RelationDiff::default();
        for slot in node.ty.slots() {
            let current = references.get(slot.name.as_str());
            self.diff_slot(key, id, slot, current, persisted, &mut diff)?;
        }
        Ok(diff)
    }

    /// Diff a single collection slot, as done for auto-save collections.
    pub fn save_collection(
        &self,
        key: ResourceKey,
        slot: &str,
        persisted: &[RelationRecord],
    ) -> Result<RelationDiff> {
        let node = self.graph.node(key)?;
        let (id, current) = {
            let state = node.state.read();
            (state.core.id, state.references.get(slot).cloned())
        };
        let decl = node.ty.slot(slot).ok_or_else(|| Error::Slot {
            resource_id: id,
            slot: SlotName::from(slot),
            reason: "is not declared by the resource type".into(),
        })?;
        if decl.required && current.as_ref().is_none_or(SlotValue::is_empty) {
            return Err(Error::Validation {
                resource_id: id,
                type_tag: node.ty.tag().clone(),
                slot: decl.name.clone(),
                reason: "is required but empty".into(),
            });
        }
        let mut diff = RelationDiff::default();
        self.diff_slot(key, id, decl, current.as_ref(), persisted, &mut diff)?;
        Ok(diff)
    }

    /// Referenced resources of `key` that were never persisted.
    pub fn unsaved_references(&self, key: ResourceKey) -> Result<Vec<ResourceKey>> {
        let targets = self.graph.node(key)?.state.read().references.targets();
        let mut unsaved = Vec::new();
        for target in targets {
            if self.graph.id_of(target)?.is_transient() {
                unsaved.push(target);
            }
        }
        Ok(unsaved)
    }

    /// Drop every reference `referencing` holds to `removed`.
    ///
    /// Returns whether anything changed. Repeating the call, or calling it
    /// for a resource that is already gone, is a no-op.
    pub fn unlink(&self, removed: ResourceKey, referencing: ResourceKey) -> bool {
        let changed = self.graph.clear_references_to(referencing, removed);
        if changed {
            tracing::debug!(removed = %removed, referencing = %referencing, "unlinked references");
        }
        changed
    }

    fn diff_slot(
        &self,
        key: ResourceKey,
        id: ResourceId,
        slot: &ReferenceSlot,
        current: Option<&SlotValue>,
        persisted: &[RelationRecord],
        diff: &mut RelationDiff,
    ) -> Result<()> {
        let mut existing: Vec<(&RelationRecord, RelationRole)> = persisted
            .iter()
            .filter_map(|record| {
                let role = record.role_of(id)?;
                slot.matches(record.kind, role, record.name.as_deref())
                    .then_some((record, role))
            })
            .collect();
        let targets: Vec<ResourceKey> = current.map(|v| v.keys().collect()).unwrap_or_default();

        for target in targets {
            let target_id = self.graph.id_of(target)?;
            if target_id.is_transient() {
                diff.note_unsaved(target);
            }
            let matched = (!target_id.is_transient())
                .then(|| {
                    existing
                        .iter()
                        .position(|(record, role)| record.other(*role) == target_id)
                })
                .flatten();
            match matched {
                Some(index) => {
                    existing.remove(index);
                }
                // A single slot whose record points elsewhere is retargeted
                // instead of removed and re-created.
                None if slot.cardinality == Cardinality::Single && !existing.is_empty() => {
                    let (record, role) = existing.remove(0);
                    diff.updated.push(RelationUpdate {
                        record: record.clone(),
                        target,
                        role,
                    });
                }
                None => diff.created.push(self.pending(key, slot, target)?),
            }
        }

        diff.removed
            .extend(existing.into_iter().map(|(record, _)| record.clone()));
        Ok(())
    }

    fn pending(
        &self,
        key: ResourceKey,
        slot: &ReferenceSlot,
        target: ResourceKey,
    ) -> Result<PendingRelation> {
        let (source, sink) = match slot.role {
            RelationRole::Source => (key, target),
            RelationRole::Target => (target, key),
        };
        let far_type: Arc<RegisteredType> = self.graph.type_of(target)?;
        let owner = if slot.role == RelationRole::Target && far_type.mirror_of(slot).is_none() {
            RelationRole::Target
        } else {
            RelationRole::Source
        };
        Ok(PendingRelation {
            source,
            target: sink,
            kind: slot.kind,
            owner,
            name: slot.relation_name.clone(),
        })
    }
}
