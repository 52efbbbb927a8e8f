//! Observer registry and per-observer visibility state
//!
//! Each observer owns a visibility bitmap and a next-due period array, both
//! indexed by `ObservableId`. Nothing here is shared between observers, which
//! is what lets the scheduler evaluate them independently.

use bitvec::prelude::*;
use hashbrown::HashMap;
use rustc_hash::FxBuildHasher;

use crate::util::vec3::Vec3;
use crate::visibility::constants::period;
use crate::visibility::error::VisibilityError;
use crate::visibility::types::{AimOrientation, EntityId, ObservableId, VisibilityRadii};

/// Returns true when a pair with this id and period must be evaluated on `frame_counter`.
///
/// Only used modulo small periods, so a wrapped counter is harmless.
#[inline(always)]
pub fn is_due(id: ObservableId, frame_counter: u64, period: u8) -> bool {
    let period = period.max(1) as u64;
    (id.0 as u64).wrapping_add(frame_counter) % period == 0
}

/// Visibility state of one observer
#[derive(Debug, Clone)]
pub struct ObserverState {
    pub entity: EntityId,
    pub position: Vec3,
    pub aim: Option<AimOrientation>,
    pub radii: VisibilityRadii,
    visible: BitVec,
    next_due_period: Vec<u8>,
    /// Last published replication frequency per id; 0 while hidden or unset
    frequency: Vec<u8>,
}

impl ObserverState {
    fn new(entity: EntityId, radii: VisibilityRadii, position: Vec3, id_limit: usize) -> Self {
        Self {
            entity,
            position,
            aim: None,
            radii,
            visible: bitvec![0; id_limit],
            next_due_period: vec![period::INITIAL; id_limit],
            frequency: vec![0; id_limit],
        }
    }

    #[inline]
    pub fn is_visible(&self, id: ObservableId) -> bool {
        self.visible.get(id.index()).map(|bit| *bit).unwrap_or(false)
    }

    /// Write a bit, returning true when it changed
    #[inline]
    pub fn set_visible(&mut self, id: ObservableId, visible: bool) -> bool {
        let previous = self.is_visible(id);
        if previous != visible {
            self.visible.set(id.index(), visible);
        }
        previous != visible
    }

    #[inline]
    pub fn next_period(&self, id: ObservableId) -> u8 {
        self.next_due_period
            .get(id.index())
            .copied()
            .unwrap_or(period::INITIAL)
    }

    #[inline]
    pub fn set_next_period(&mut self, id: ObservableId, next: u8) {
        debug_assert!(next >= 1, "period must be at least 1");
        self.next_due_period[id.index()] = next.max(1);
    }

    #[inline]
    pub fn frequency(&self, id: ObservableId) -> u8 {
        self.frequency.get(id.index()).copied().unwrap_or(0)
    }

    /// Store a replication frequency, returning true when it changed
    #[inline]
    pub fn set_frequency(&mut self, id: ObservableId, frequency: u8) -> bool {
        let slot = &mut self.frequency[id.index()];
        let changed = *slot != frequency;
        *slot = frequency;
        changed
    }

    #[inline]
    pub fn is_due(&self, id: ObservableId, frame_counter: u64) -> bool {
        is_due(id, frame_counter, self.next_period(id))
    }

    /// Ids currently marked visible
    pub fn visible_ids(&self) -> impl Iterator<Item = ObservableId> + '_ {
        self.visible.iter_ones().map(|index| ObservableId(index as u16))
    }

    pub fn visible_count(&self) -> usize {
        self.visible.count_ones()
    }

    /// Forget a released observable id. Returns true if it was visible, in
    /// which case the caller owes the replication layer a `false` transition.
    pub fn clear_observable(&mut self, id: ObservableId) -> bool {
        if id.index() >= self.next_due_period.len() {
            return false;
        }
        self.next_due_period[id.index()] = period::INITIAL;
        self.frequency[id.index()] = 0;
        self.set_visible(id, false)
    }

    /// Grow the per-observable arrays; new slots are hidden and due immediately
    fn ensure_len(&mut self, id_limit: usize) {
        if self.next_due_period.len() < id_limit {
            self.next_due_period.resize(id_limit, period::INITIAL);
            self.frequency.resize(id_limit, 0);
            self.visible.resize(id_limit, false);
        }
    }
}

#[derive(Default)]
pub struct ObserverRegistry {
    observers: Vec<ObserverState>,
    index: HashMap<EntityId, usize, FxBuildHasher>,
    id_limit: usize,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer; every pair is due on its first tick
    pub fn register(
        &mut self,
        entity: EntityId,
        radii: VisibilityRadii,
        position: Vec3,
    ) -> Result<(), VisibilityError> {
        validate_radii(radii)?;
        if self.index.contains_key(&entity) {
            return Err(VisibilityError::DuplicateObserver(entity));
        }

        self.index.insert(entity, self.observers.len());
        self.observers
            .push(ObserverState::new(entity, radii, position, self.id_limit));
        Ok(())
    }

    /// Remove an observer and hand back its state so the caller can publish
    /// a `false` transition for every bit still set.
    pub fn unregister(&mut self, entity: EntityId) -> Option<ObserverState> {
        let slot = self.index.remove(&entity)?;
        let state = self.observers.swap_remove(slot);
        if let Some(moved) = self.observers.get(slot) {
            self.index.insert(moved.entity, slot);
        }
        Some(state)
    }

    /// Change thresholds for future classification; periods are left alone
    pub fn update_radii(&mut self, entity: EntityId, radii: VisibilityRadii) -> Result<(), VisibilityError> {
        validate_radii(radii)?;
        let state = self
            .get_mut(entity)
            .ok_or(VisibilityError::UnknownObserver(entity))?;
        state.radii = radii;
        Ok(())
    }

    pub fn set_transform(&mut self, entity: EntityId, position: Vec3, aim: Option<AimOrientation>) {
        if let Some(state) = self.get_mut(entity) {
            state.position = position;
            state.aim = aim;
        }
    }

    /// Grow every observer's arrays to cover ids below `id_limit`
    pub fn ensure_id_capacity(&mut self, id_limit: usize) {
        if id_limit <= self.id_limit {
            return;
        }
        self.id_limit = id_limit;
        for state in &mut self.observers {
            state.ensure_len(id_limit);
        }
    }

    /// Clear a released id in every observer; returns the observers that had it visible
    pub fn clear_observable(&mut self, id: ObservableId) -> Vec<EntityId> {
        self.observers
            .iter_mut()
            .filter_map(|state| state.clear_observable(id).then_some(state.entity))
            .collect()
    }

    #[inline]
    pub fn get(&self, entity: EntityId) -> Option<&ObserverState> {
        self.index.get(&entity).map(|&slot| &self.observers[slot])
    }

    #[inline]
    pub fn get_mut(&mut self, entity: EntityId) -> Option<&mut ObserverState> {
        match self.index.get(&entity) {
            Some(&slot) => Some(&mut self.observers[slot]),
            None => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ObserverState> {
        self.observers.iter()
    }

    pub(crate) fn states_mut(&mut self) -> &mut [ObserverState] {
        &mut self.observers
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

fn validate_radii(radii: VisibilityRadii) -> Result<(), VisibilityError> {
    if radii.is_valid() {
        Ok(())
    } else {
        Err(VisibilityError::InvalidRadii {
            unconditional: radii.unconditional,
            max: radii.max,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn radii() -> VisibilityRadii {
        VisibilityRadii::new(5.0, 50.0)
    }

    #[test]
    fn test_due_schedule_period_four() {
        let id = ObservableId(2);
        let due: Vec<u64> = (0..40).filter(|&frame| is_due(id, frame, 4)).collect();
        assert_eq!(due.len(), 10);
        assert_eq!(&due[..3], &[2, 6, 10]);
        assert!(due.iter().all(|frame| (2 + frame) % 4 == 0));
    }

    #[test]
    fn test_period_one_always_due() {
        for frame in 0..8 {
            assert!(is_due(ObservableId(5), frame, 1));
        }
        // Zero is clamped rather than dividing by zero
        assert!(is_due(ObservableId(5), 3, 0));
    }

    #[test]
    fn test_register_sizes_arrays_with_initial_period() {
        let mut registry = ObserverRegistry::new();
        registry.ensure_id_capacity(8);
        registry.register(1, radii(), Vec3::ZERO).unwrap();

        let state = registry.get(1).unwrap();
        for raw in 0..8 {
            let id = ObservableId(raw);
            assert_eq!(state.next_period(id), period::INITIAL);
            assert!(!state.is_visible(id));
            assert!(state.is_due(id, 12345));
        }
    }

    #[test]
    fn test_register_rejects_bad_radii_and_duplicates() {
        let mut registry = ObserverRegistry::new();
        assert_eq!(
            registry.register(1, VisibilityRadii::new(60.0, 50.0), Vec3::ZERO),
            Err(VisibilityError::InvalidRadii { unconditional: 60.0, max: 50.0 })
        );
        registry.register(1, radii(), Vec3::ZERO).unwrap();
        assert_eq!(
            registry.register(1, radii(), Vec3::ZERO),
            Err(VisibilityError::DuplicateObserver(1))
        );
    }

    #[test]
    fn test_update_radii_keeps_periods() {
        let mut registry = ObserverRegistry::new();
        registry.ensure_id_capacity(4);
        registry.register(1, radii(), Vec3::ZERO).unwrap();
        registry.get_mut(1).unwrap().set_next_period(ObservableId(2), 9);

        registry.update_radii(1, VisibilityRadii::new(10.0, 100.0)).unwrap();

        let state = registry.get(1).unwrap();
        assert_eq!(state.radii, VisibilityRadii::new(10.0, 100.0));
        assert_eq!(state.next_period(ObservableId(2)), 9);
        assert_eq!(
            registry.update_radii(2, radii()),
            Err(VisibilityError::UnknownObserver(2))
        );
    }

    #[test]
    fn test_unregister_returns_state_and_fixes_index() {
        let mut registry = ObserverRegistry::new();
        registry.ensure_id_capacity(4);
        for entity in 1..=3 {
            registry.register(entity, radii(), Vec3::ZERO).unwrap();
        }
        registry.get_mut(1).unwrap().set_visible(ObservableId(3), true);

        let removed = registry.unregister(1).unwrap();
        assert_eq!(removed.visible_ids().collect::<Vec<_>>(), vec![ObservableId(3)]);

        // Entity 3 was swapped into slot 0 and must still resolve
        assert_eq!(registry.get(3).unwrap().entity, 3);
        assert_eq!(registry.get(2).unwrap().entity, 2);
        assert!(registry.unregister(1).is_none());
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_clear_observable_reports_visible_observers() {
        let mut registry = ObserverRegistry::new();
        registry.ensure_id_capacity(2);
        registry.register(1, radii(), Vec3::ZERO).unwrap();
        registry.register(2, radii(), Vec3::ZERO).unwrap();
        let id = ObservableId(1);
        registry.get_mut(1).unwrap().set_visible(id, true);
        registry.get_mut(1).unwrap().set_next_period(id, 16);
        registry.get_mut(1).unwrap().set_frequency(id, 3);
        registry.get_mut(2).unwrap().set_next_period(id, 4);

        assert_eq!(registry.clear_observable(id), vec![1]);
        assert_eq!(registry.get(1).unwrap().frequency(id), 0);
        assert!(!registry.get(1).unwrap().is_visible(id));
        assert_eq!(registry.get(1).unwrap().next_period(id), period::INITIAL);
        assert_eq!(registry.get(2).unwrap().next_period(id), period::INITIAL);
    }

    #[test]
    fn test_growth_keeps_existing_bits() {
        let mut registry = ObserverRegistry::new();
        registry.ensure_id_capacity(2);
        registry.register(1, radii(), Vec3::ZERO).unwrap();
        registry.get_mut(1).unwrap().set_visible(ObservableId(1), true);

        registry.ensure_id_capacity(64);

        let state = registry.get(1).unwrap();
        assert!(state.is_visible(ObservableId(1)));
        assert!(!state.is_visible(ObservableId(63)));
        assert_eq!(state.next_period(ObservableId(63)), period::INITIAL);
        assert_eq!(state.visible_count(), 1);
    }
}
