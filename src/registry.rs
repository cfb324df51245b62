//! Entity Registry
//!
//! Owns entity identity across the session. Raw slot ids are reusable and
//! therefore never used as identity; the registry keeps an append-only arena
//! of `EntityHandle`s addressed by opaque id, plus an explicitly rebindable
//! slot -> handle map. Two occupants of the same slot separated by a destroy
//! are two distinct handles.
//!
//! A destroy seals the handle but leaves the slot bound to it until the next
//! spawn rebinds the slot. That keeps the error taxonomy sharp: a record for
//! a sealed-but-bound slot is a sealed-entity mutation (dropped), while a
//! record for a never-seen slot is an unknown-slot pathology (spawn
//! synthesized by the caller).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::error::ReconcileError;
use crate::record::{Lifecycle, SlotId, Tick};

/// Opaque, stable identity for one entity's lifetime. An index into the
/// registry arena; never reused within a run.
pub type HandleId = u64;

/// One entity's identity record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityHandle {
    pub id: HandleId,
    /// Slot this handle occupied. Informational only - identity is `id`.
    pub slot: SlotId,
    pub class: String,
    pub first_seen: Tick,
    /// Tick at which the handle was sealed; `None` while live.
    pub sealed_at: Option<Tick>,
    /// Stable platform identity captured from metadata fields, if observed.
    pub external_id: Option<String>,
    /// Display name captured from metadata fields, if observed.
    pub display_name: Option<String>,
}

impl EntityHandle {
    #[inline]
    pub fn is_sealed(&self) -> bool {
        self.sealed_at.is_some()
    }
}

/// Outcome of resolving a record against the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Record belongs to an existing live handle.
    Update(HandleId),
    /// A new handle was allocated. `implicit_seal` carries the previous
    /// occupant if the spawn arrived on a live slot with no destroy first.
    Spawned {
        handle: HandleId,
        implicit_seal: Option<HandleId>,
    },
    /// The handle was sealed by a destroy at this tick.
    Destroyed(HandleId),
}

/// Arena of entity handles with a rebindable slot map.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    handles: Vec<EntityHandle>,
    bindings: HashMap<SlotId, HandleId>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a raw record to a stable handle, per its lifecycle tag.
    ///
    /// Recoverable failures (`UnknownSlot`, `SealedEntityMutation`) are
    /// returned as errors; the caller decides the recovery action and keeps
    /// the counters.
    pub fn resolve(
        &mut self,
        slot: SlotId,
        class: &str,
        tick: Tick,
        lifecycle: Lifecycle,
    ) -> Result<Resolution, ReconcileError> {
        match lifecycle {
            Lifecycle::Spawn => {
                let (handle, implicit_seal) = self.spawn(slot, class, tick);
                Ok(Resolution::Spawned {
                    handle,
                    implicit_seal,
                })
            }
            Lifecycle::Update => match self.bindings.get(&slot) {
                None => Err(ReconcileError::UnknownSlot { slot, tick }),
                Some(&id) if self.handles[id as usize].is_sealed() => {
                    Err(ReconcileError::SealedEntityMutation { slot, tick })
                }
                Some(&id) => Ok(Resolution::Update(id)),
            },
            Lifecycle::Destroy => match self.bindings.get(&slot) {
                None => Err(ReconcileError::UnknownSlot { slot, tick }),
                Some(&id) if self.handles[id as usize].is_sealed() => {
                    Err(ReconcileError::SealedEntityMutation { slot, tick })
                }
                Some(&id) => {
                    self.handles[id as usize].sealed_at = Some(tick);
                    debug!(handle = id, slot, tick, "sealed entity on destroy");
                    Ok(Resolution::Destroyed(id))
                }
            },
        }
    }

    /// Allocate a new handle bound to `slot` starting at `tick`, returning it
    /// with the previous occupant if the slot was still live (sealed at the
    /// same tick first).
    pub fn spawn(&mut self, slot: SlotId, class: &str, tick: Tick) -> (HandleId, Option<HandleId>) {
        let implicit_seal = match self.bindings.get(&slot) {
            Some(&prev) if !self.handles[prev as usize].is_sealed() => {
                self.handles[prev as usize].sealed_at = Some(tick);
                Some(prev)
            }
            _ => None,
        };
        let id = self.handles.len() as HandleId;
        self.handles.push(EntityHandle {
            id,
            slot,
            class: class.to_string(),
            first_seen: tick,
            sealed_at: None,
            external_id: None,
            display_name: None,
        });
        self.bindings.insert(slot, id);
        debug!(handle = id, slot, class, tick, "allocated entity handle");
        (id, implicit_seal)
    }

    /// Seal a handle directly (end-of-stream, or recovery paths).
    pub fn seal(&mut self, id: HandleId, tick: Tick) {
        if let Some(handle) = self.handles.get_mut(id as usize) {
            if handle.sealed_at.is_none() {
                handle.sealed_at = Some(tick);
            }
        }
    }

    /// Live handle currently bound to a slot, if any. Used for owner weak
    /// references: the answer is only meaningful at the tick it is asked.
    pub fn live_binding(&self, slot: SlotId) -> Option<HandleId> {
        self.bindings
            .get(&slot)
            .copied()
            .filter(|&id| !self.handles[id as usize].is_sealed())
    }

    /// Attach identity metadata to a handle. Later observations win, matching
    /// a decoder that re-reports identity when it changes.
    pub fn set_metadata(
        &mut self,
        id: HandleId,
        external_id: Option<String>,
        display_name: Option<String>,
    ) {
        if let Some(handle) = self.handles.get_mut(id as usize) {
            if external_id.is_some() {
                handle.external_id = external_id;
            }
            if display_name.is_some() {
                handle.display_name = display_name;
            }
        }
    }

    #[inline]
    pub fn handle(&self, id: HandleId) -> Option<&EntityHandle> {
        self.handles.get(id as usize)
    }

    /// All handles, in allocation order.
    pub fn handles(&self) -> &[EntityHandle] {
        &self.handles
    }

    /// Ids of handles not yet sealed.
    pub fn open_handle_ids(&self) -> Vec<HandleId> {
        self.handles
            .iter()
            .filter(|h| !h.is_sealed())
            .map(|h| h.id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
