//! Observable registry: dense ids with a free-list
//!
//! Observables live in a flat slot array indexed by their `ObservableId`, so
//! per-observer state can be plain arrays indexed the same way. Released ids
//! are quarantined until the scheduler has published the "no longer visible"
//! transitions for them, then handed back smallest-first.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use hashbrown::HashMap;
use rustc_hash::FxBuildHasher;

use crate::util::vec3::Vec3;
use crate::visibility::constants::capacity::ID_SPACE;
use crate::visibility::error::VisibilityError;
use crate::visibility::types::{EntityId, ObservableId, ObservableKind};

/// A registered observable
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observable {
    pub entity: EntityId,
    pub position: Vec3,
    pub kind: ObservableKind,
}

/// Per-tick copy of one observable, consumed by the scheduler
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapshotEntry {
    pub id: ObservableId,
    pub entity: EntityId,
    pub position: Vec3,
    pub trace_point: Option<Vec3>,
    pub is_simple: bool,
}

pub struct ObservableRegistry {
    slots: Vec<Option<Observable>>,
    /// Released ids ready for reuse (min-heap)
    free: BinaryHeap<Reverse<u16>>,
    /// Released ids whose stale bits have not been published yet
    quarantine: Vec<ObservableId>,
    by_entity: HashMap<EntityId, ObservableId, FxBuildHasher>,
    capacity: usize,
}

impl ObservableRegistry {
    /// Create a registry holding at most `capacity` live observables
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(ID_SPACE);
        Self {
            slots: Vec::with_capacity(capacity.min(1024)),
            free: BinaryHeap::new(),
            quarantine: Vec::new(),
            by_entity: HashMap::with_capacity_and_hasher(capacity.min(1024), FxBuildHasher),
            capacity,
        }
    }

    /// Register an observable and return the smallest free id
    pub fn register(
        &mut self,
        entity: EntityId,
        kind: ObservableKind,
        position: Vec3,
    ) -> Result<ObservableId, VisibilityError> {
        if self.by_entity.contains_key(&entity) {
            return Err(VisibilityError::DuplicateObservable(entity));
        }
        if self.by_entity.len() >= self.capacity {
            return Err(VisibilityError::CapacityExceeded { capacity: self.capacity });
        }

        let id = if let Some(Reverse(raw)) = self.free.pop() {
            ObservableId(raw)
        } else if self.slots.len() < ID_SPACE {
            self.slots.push(None);
            ObservableId((self.slots.len() - 1) as u16)
        } else {
            // Every id is live or quarantined
            return Err(VisibilityError::CapacityExceeded { capacity: self.capacity });
        };

        debug_assert!(self.slots[id.index()].is_none(), "observable id {:?} handed out twice", id);
        self.slots[id.index()] = Some(Observable { entity, position, kind });
        self.by_entity.insert(entity, id);
        Ok(id)
    }

    /// Remove an observable; its id stays quarantined until `release_quarantined`
    pub fn unregister(&mut self, id: ObservableId) -> Result<EntityId, VisibilityError> {
        let observable = self
            .slots
            .get_mut(id.index())
            .and_then(Option::take)
            .ok_or(VisibilityError::UnknownObservable(id))?;
        self.by_entity.remove(&observable.entity);
        self.quarantine.push(id);
        Ok(observable.entity)
    }

    /// Return quarantined ids to the free-list. Only call after every observer
    /// has cleared and published its bit for them.
    pub fn release_quarantined(&mut self) -> usize {
        let released = self.quarantine.len();
        for id in self.quarantine.drain(..) {
            self.free.push(Reverse(id.0));
        }
        released
    }

    /// Ids removed since the last release
    pub fn quarantined(&self) -> &[ObservableId] {
        &self.quarantine
    }

    pub fn set_position(&mut self, id: ObservableId, position: Vec3) {
        if let Some(Some(observable)) = self.slots.get_mut(id.index()) {
            observable.position = position;
        }
    }

    /// Pull fresh positions for every live observable; unknown entities keep theirs
    pub fn update_positions(&mut self, mut lookup: impl FnMut(EntityId) -> Option<Vec3>) {
        for observable in self.slots.iter_mut().flatten() {
            if let Some(position) = lookup(observable.entity) {
                observable.position = position;
            }
        }
    }

    /// Fill `out` with a copy of every live observable, ordered by id
    pub fn snapshot_into(&self, out: &mut Vec<SnapshotEntry>) {
        out.clear();
        out.extend(self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.as_ref().map(|observable| SnapshotEntry {
                id: ObservableId(index as u16),
                entity: observable.entity,
                position: observable.position,
                trace_point: observable.kind.trace_point(observable.position),
                is_simple: observable.kind.is_simple(),
            })
        }));
    }

    pub fn snapshot(&self) -> Vec<SnapshotEntry> {
        let mut out = Vec::with_capacity(self.len());
        self.snapshot_into(&mut out);
        out
    }

    #[inline]
    pub fn id_of(&self, entity: EntityId) -> Option<ObservableId> {
        self.by_entity.get(&entity).copied()
    }

    #[inline]
    pub fn entity_of(&self, id: ObservableId) -> Option<EntityId> {
        self.get(id).map(|observable| observable.entity)
    }

    #[inline]
    pub fn get(&self, id: ObservableId) -> Option<&Observable> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    /// Iterate live observables as (id, observable)
    pub fn iter(&self) -> impl Iterator<Item = (ObservableId, &Observable)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|o| (ObservableId(index as u16), o)))
    }

    /// Number of live observables
    #[inline]
    pub fn len(&self) -> usize {
        self.by_entity.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.by_entity.is_empty()
    }

    /// One past the highest id ever handed out; per-observer arrays are sized to this
    #[inline]
    pub fn id_limit(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
