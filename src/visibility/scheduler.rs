//! Per-tick visibility driver
//!
//! Each tick:
//! 1. apply queued lifecycle events and pull transforms
//! 2. refresh the terrain cache and snapshot observables
//! 3. evaluate due pairs per observer (near/far/middle tiers)
//! 4. advance the frame counter
//! 5. publish changed bits (and LOD frequencies), then release quarantined ids
//!
//! Observers are independent: each one owns its bitmap and period array, so
//! evaluation shards cleanly across rayon workers.

use std::time::{Duration, Instant};

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::config::{ConfigError, PovConfig, TierPeriods, VisibilityConfig};
use crate::util::vec3::Vec3;
use crate::visibility::constants::period;
use crate::visibility::error::VisibilityError;
use crate::visibility::instrumentation::{DebugInstrumentation, RaySegment};
use crate::visibility::lifecycle::{LifecycleEvent, LifecycleQueue, LifecycleSender};
use crate::visibility::observable::{ObservableRegistry, SnapshotEntry};
use crate::visibility::observer::{ObserverRegistry, ObserverState};
use crate::visibility::occlusion::{CollisionWorld, OcclusionQueryAdapter, RayOutcome};
use crate::visibility::transform::TransformSource;
use crate::visibility::types::{
    AimOrientation, EntityId, FrequencyChange, ObservableId, ObservableKind, VisibilityChange,
    VisibilityRadii,
};

/// Receiver of visibility transitions (the replication layer)
pub trait ReplicationSink {
    fn set_visibility(&mut self, change: VisibilityChange);

    /// Replication frequency of a visible pair changed (LOD enabled only)
    fn set_frequency(&mut self, _change: FrequencyChange) {}
}

impl ReplicationSink for Vec<VisibilityChange> {
    fn set_visibility(&mut self, change: VisibilityChange) {
        self.push(change);
    }
}

/// Summary of one tick
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TickReport {
    /// Frame counter value the tick evaluated
    pub frame: u64,
    pub pairs_evaluated: u64,
    /// Casts the collision world answered
    pub ray_casts: u64,
    pub occlusion_failures: u64,
    pub transitions: u64,
    pub frequency_changes: u64,
    pub observers: usize,
    pub observables: usize,
    pub terrain_shapes: usize,
    pub duration: Duration,
}

/// Classification of one due pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    SelfPair,
    Near,
    Far,
    Simple { visible: bool },
    RaycastVisible,
    RaycastInvisible,
    /// Collision world failed to answer or a transform was not finite;
    /// hidden and retried next tick
    OcclusionRetry,
}

impl Tier {
    #[inline]
    pub fn is_visible(self) -> bool {
        match self {
            Tier::SelfPair | Tier::Near | Tier::RaycastVisible => true,
            Tier::Simple { visible } => visible,
            Tier::Far | Tier::RaycastInvisible | Tier::OcclusionRetry => false,
        }
    }

    #[inline]
    pub fn period(self, periods: &TierPeriods) -> u8 {
        match self {
            Tier::SelfPair => periods.self_period,
            Tier::Near => periods.near,
            Tier::Far => periods.far,
            Tier::Simple { .. } => periods.simple,
            Tier::RaycastVisible => periods.raycast_visible,
            Tier::RaycastInvisible => periods.raycast_invisible,
            Tier::OcclusionRetry => period::OCCLUSION_RETRY,
        }
    }

    /// True when the collision world answered a ray for this pair
    #[inline]
    pub fn cast_ray(self) -> bool {
        matches!(self, Tier::RaycastVisible | Tier::RaycastInvisible)
    }
}

/// Ray origin for an observer: eye point pushed along the aim direction.
///
/// Without aim the raw position is used. Looking down never drops the eye
/// below `eye_height * min_eye_height_fraction`.
pub fn extrapolated_pov(position: Vec3, aim: Option<AimOrientation>, pov: &PovConfig) -> Vec3 {
    let Some(aim) = aim else {
        return position;
    };

    let direction = Vec3::from_pitch_yaw(aim.pitch, aim.yaw);
    let mut offset = Vec3::UP * pov.eye_height + direction * pov.aim_forward_bias;
    let min_height = pov.eye_height * pov.min_eye_height_fraction;
    if offset.z < min_height {
        offset.z = min_height;
    }
    position + offset
}

/// Results of evaluating one observer
#[derive(Debug, Default)]
struct ObserverPass {
    observer: EntityId,
    changes: SmallVec<[(EntityId, bool); 8]>,
    frequencies: SmallVec<[(EntityId, u8); 4]>,
    pairs_evaluated: u64,
    ray_casts: u64,
    occlusion_failures: u64,
    segments: Vec<RaySegment>,
}

fn classify<W: CollisionWorld>(
    state: &ObserverState,
    entry: &SnapshotEntry,
    pov: Vec3,
    occlusion: &OcclusionQueryAdapter<W>,
) -> Tier {
    if entry.entity == state.entity {
        return Tier::SelfPair;
    }

    let distance_sq = state.position.distance_sq_to(entry.position);
    if !distance_sq.is_finite() {
        return Tier::OcclusionRetry;
    }
    let max_sq = state.radii.max * state.radii.max;

    if entry.is_simple {
        return Tier::Simple {
            visible: distance_sq <= max_sq,
        };
    }
    if distance_sq < state.radii.unconditional * state.radii.unconditional {
        return Tier::Near;
    }
    if distance_sq > max_sq {
        return Tier::Far;
    }

    let target = entry.trace_point.unwrap_or(entry.position);
    match occlusion.trace(pov, target) {
        RayOutcome::Clear => Tier::RaycastVisible,
        RayOutcome::Blocked => Tier::RaycastInvisible,
        RayOutcome::Failed => Tier::OcclusionRetry,
    }
}

fn evaluate_observer<W: CollisionWorld>(
    state: &mut ObserverState,
    snapshot: &[SnapshotEntry],
    occlusion: &OcclusionQueryAdapter<W>,
    config: &VisibilityConfig,
    frame: u64,
    record_segments: bool,
) -> ObserverPass {
    let periods = &config.periods;
    let lod = &config.lod;
    let pov = extrapolated_pov(state.position, state.aim, &config.pov);
    let mut pass = ObserverPass {
        observer: state.entity,
        ..Default::default()
    };

    for entry in snapshot {
        if !state.is_due(entry.id, frame) {
            continue;
        }
        pass.pairs_evaluated += 1;

        let tier = classify(state, entry, pov, occlusion);
        let visible = tier.is_visible();

        if tier == Tier::OcclusionRetry {
            pass.occlusion_failures += 1;
        }
        if tier.cast_ray() {
            pass.ray_casts += 1;
            if record_segments {
                pass.segments.push(RaySegment {
                    observer: state.entity,
                    observable: entry.entity,
                    origin: pov,
                    target: entry.trace_point.unwrap_or(entry.position),
                    blocked: !visible,
                });
            }
        }

        if state.set_visible(entry.id, visible) {
            pass.changes.push((entry.entity, visible));
        }
        state.set_next_period(entry.id, tier.period(periods));

        if lod.enabled {
            let frequency = match tier {
                Tier::SelfPair => 1,
                _ if visible => lod.frequency(state.position.distance_to(entry.position)),
                _ => 0,
            };
            if state.set_frequency(entry.id, frequency) && visible {
                pass.frequencies.push((entry.entity, frequency));
            }
        }
    }

    pass
}

pub struct VisibilityScheduler<W: CollisionWorld> {
    config: VisibilityConfig,
    observables: ObservableRegistry,
    observers: ObserverRegistry,
    occlusion: OcclusionQueryAdapter<W>,
    lifecycle: LifecycleQueue,
    frame_counter: u64,
    snapshot: Vec<SnapshotEntry>,
    events: Vec<LifecycleEvent>,
    /// Transitions waiting for the publish step
    pending: Vec<VisibilityChange>,
    pending_frequencies: Vec<FrequencyChange>,
    instrumentation: DebugInstrumentation,
}

impl<W: CollisionWorld> VisibilityScheduler<W> {
    pub fn new(config: VisibilityConfig, world: W) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            observables: ObservableRegistry::new(config.max_observables),
            observers: ObserverRegistry::new(),
            occlusion: OcclusionQueryAdapter::new(world),
            lifecycle: LifecycleQueue::new(),
            frame_counter: 0,
            snapshot: Vec::new(),
            events: Vec::new(),
            pending: Vec::new(),
            pending_frequencies: Vec::new(),
            instrumentation: DebugInstrumentation::new(config.debug),
            config,
        })
    }

    /// Handle for entity systems to queue lifecycle events for the next tick
    pub fn sender(&self) -> LifecycleSender {
        self.lifecycle.sender()
    }

    // ========================================================================
    // Registration (only between ticks)
    // ========================================================================

    pub fn register_observer(
        &mut self,
        entity: EntityId,
        radii: VisibilityRadii,
        position: Vec3,
    ) -> Result<(), VisibilityError> {
        self.observers.ensure_id_capacity(self.observables.id_limit());
        self.observers.register(entity, radii, position)?;
        debug!(
            "Observer {} registered (unconditional={}, max={})",
            entity, radii.unconditional, radii.max
        );
        Ok(())
    }

    /// Remove an observer; every bit it still had set is published as a
    /// `false` transition on the next publish step.
    pub fn unregister_observer(&mut self, entity: EntityId) -> Result<(), VisibilityError> {
        let state = self
            .observers
            .unregister(entity)
            .ok_or(VisibilityError::UnknownObserver(entity))?;

        let before = self.pending.len();
        for id in state.visible_ids() {
            if let Some(observable) = self.observables.entity_of(id) {
                self.pending.push(VisibilityChange {
                    observer: entity,
                    observable,
                    visible: false,
                });
            }
        }
        debug!(
            "Observer {} unregistered ({} visibility bits revoked)",
            entity,
            self.pending.len() - before
        );
        Ok(())
    }

    pub fn update_radii(&mut self, entity: EntityId, radii: VisibilityRadii) -> Result<(), VisibilityError> {
        self.observers.update_radii(entity, radii)
    }

    pub fn register_observable(
        &mut self,
        entity: EntityId,
        kind: ObservableKind,
        position: Vec3,
    ) -> Result<ObservableId, VisibilityError> {
        let id = self.observables.register(entity, kind, position)?;
        self.observers.ensure_id_capacity(self.observables.id_limit());
        debug!("Observable {} registered as {:?}", entity, id);
        Ok(id)
    }

    /// Remove an observable. Its bit is cleared in every observer now; the
    /// `false` transitions go out on the next publish step, after which the
    /// id may be reused.
    pub fn unregister_observable(&mut self, entity: EntityId) -> Result<ObservableId, VisibilityError> {
        let id = self
            .observables
            .id_of(entity)
            .ok_or(VisibilityError::NotObservable(entity))?;
        self.observables.unregister(id)?;

        let revoked = self.observers.clear_observable(id);
        debug!(
            "Observable {} unregistered ({:?}, visible to {} observers)",
            entity,
            id,
            revoked.len()
        );
        self.pending.extend(revoked.into_iter().map(|observer| VisibilityChange {
            observer,
            observable: entity,
            visible: false,
        }));
        Ok(id)
    }

    fn apply_event(&mut self, event: LifecycleEvent) -> Result<(), VisibilityError> {
        match event {
            LifecycleEvent::ObserverAdded { entity, radii, position } => {
                self.register_observer(entity, radii, position)
            }
            LifecycleEvent::ObserverRemoved { entity } => {
                if self.unregister_observer(entity).is_err() {
                    warn!("Ignoring removal of unknown observer {}", entity);
                }
                Ok(())
            }
            LifecycleEvent::ObserverRadiiChanged { entity, radii } => match self.update_radii(entity, radii) {
                Err(VisibilityError::UnknownObserver(_)) => {
                    warn!("Ignoring radii change for unknown observer {}", entity);
                    Ok(())
                }
                result => result,
            },
            LifecycleEvent::ObservableAdded { entity, kind, position } => {
                self.register_observable(entity, kind, position).map(|_| ())
            }
            LifecycleEvent::ObservableRemoved { entity } => {
                if self.unregister_observable(entity).is_err() {
                    warn!("Ignoring removal of unknown observable {}", entity);
                }
                Ok(())
            }
        }
    }

    /// Apply every queued lifecycle event, in submission order
    fn apply_lifecycle_events(&mut self) -> Result<usize, VisibilityError> {
        let mut events = std::mem::take(&mut self.events);
        events.clear();
        self.lifecycle.drain_into(&mut events);

        let applied = events.len();
        for event in events.drain(..) {
            self.apply_event(event)?;
        }
        self.events = events;
        Ok(applied)
    }

    fn sync_transforms<T: TransformSource>(&mut self, transforms: &T) {
        for state in self.observers.states_mut() {
            if let Some(position) = transforms.position(state.entity) {
                state.position = position;
            }
            state.aim = transforms.aim(state.entity);
        }
        self.observables
            .update_positions(|entity| transforms.position(entity));
    }

    // ========================================================================
    // Tick
    // ========================================================================

    /// Run one visibility tick and publish the resulting transitions.
    ///
    /// An error means a lifecycle event violated a configuration limit; the
    /// host should treat it as fatal.
    pub fn tick<T, S>(&mut self, transforms: &T, sink: &mut S) -> Result<TickReport, VisibilityError>
    where
        T: TransformSource,
        S: ReplicationSink,
    {
        let start = Instant::now();
        let frame = self.frame_counter;

        let applied = self.apply_lifecycle_events()?;
        if applied > 0 {
            debug!("Applied {} lifecycle events at frame {}", applied, frame);
        }
        self.sync_transforms(transforms);

        let terrain_shapes = self.occlusion.refresh_terrain_cache();
        self.observables.snapshot_into(&mut self.snapshot);

        self.instrumentation.begin_tick(frame);
        let record_segments = self.instrumentation.wants_segments();

        let snapshot = &self.snapshot;
        let occlusion = &self.occlusion;
        let config = &self.config;
        let states = self.observers.states_mut();

        #[cfg(feature = "parallel")]
        let passes: Vec<ObserverPass> = states
            .par_iter_mut()
            .map(|state| evaluate_observer(state, snapshot, occlusion, config, frame, record_segments))
            .collect();

        #[cfg(not(feature = "parallel"))]
        let passes: Vec<ObserverPass> = states
            .iter_mut()
            .map(|state| evaluate_observer(state, snapshot, occlusion, config, frame, record_segments))
            .collect();

        let mut report = TickReport {
            frame,
            observers: self.observers.len(),
            observables: self.observables.len(),
            terrain_shapes,
            ..Default::default()
        };

        for pass in passes {
            report.pairs_evaluated += pass.pairs_evaluated;
            report.ray_casts += pass.ray_casts;
            report.occlusion_failures += pass.occlusion_failures;
            let observer = pass.observer;
            self.pending
                .extend(pass.changes.into_iter().map(|(observable, visible)| VisibilityChange {
                    observer,
                    observable,
                    visible,
                }));
            self.pending_frequencies
                .extend(pass.frequencies.into_iter().map(|(observable, frequency)| FrequencyChange {
                    observer,
                    observable,
                    frequency,
                }));
            if record_segments {
                self.instrumentation.record_segments(pass.segments);
            }
        }

        self.frame_counter = self.frame_counter.wrapping_add(1);

        report.transitions = self.pending.len() as u64;
        for change in self.pending.drain(..) {
            sink.set_visibility(change);
        }
        report.frequency_changes = self.pending_frequencies.len() as u64;
        for change in self.pending_frequencies.drain(..) {
            sink.set_frequency(change);
        }
        let released = self.observables.release_quarantined();
        if released > 0 {
            debug!("Released {} observable ids", released);
        }

        if report.occlusion_failures > 0 {
            debug!(
                "Frame {}: {} occlusion casts failed closed",
                frame, report.occlusion_failures
            );
        }

        self.instrumentation.end_tick(report.ray_casts);
        report.duration = start.elapsed();
        Ok(report)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn is_visible(&self, observer: EntityId, observable: EntityId) -> bool {
        match (self.observers.get(observer), self.observables.id_of(observable)) {
            (Some(state), Some(id)) => state.is_visible(id),
            _ => false,
        }
    }

    /// Entities currently visible to `observer`, ordered by observable id
    pub fn visible_entities(&self, observer: EntityId) -> Vec<EntityId> {
        self.observers
            .get(observer)
            .map(|state| {
                state
                    .visible_ids()
                    .filter_map(|id| self.observables.entity_of(id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Last published replication frequency of a visible pair; 0 when hidden
    /// or when LOD is disabled
    pub fn replication_frequency(&self, observer: EntityId, observable: EntityId) -> u8 {
        match (self.observers.get(observer), self.observables.id_of(observable)) {
            (Some(state), Some(id)) => state.frequency(id),
            _ => 0,
        }
    }

    /// Re-evaluation period currently scheduled for a pair
    pub fn next_period(&self, observer: EntityId, observable: EntityId) -> Option<u8> {
        let state = self.observers.get(observer)?;
        let id = self.observables.id_of(observable)?;
        Some(state.next_period(id))
    }

    /// Total visible (observer, observable) pairs
    pub fn visible_pairs(&self) -> usize {
        self.observers.iter().map(ObserverState::visible_count).sum()
    }

    #[inline]
    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    pub fn observable_id(&self, entity: EntityId) -> Option<ObservableId> {
        self.observables.id_of(entity)
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    pub fn observable_count(&self) -> usize {
        self.observables.len()
    }

    pub fn config(&self) -> &VisibilityConfig {
        &self.config
    }

    pub fn instrumentation(&self) -> &DebugInstrumentation {
        &self.instrumentation
    }

    pub fn world(&self) -> &W {
        self.occlusion.world()
    }

    /// Mutable world access; edits become visible to casts on the next tick
    pub fn world_mut(&mut self) -> &mut W {
        self.occlusion.world_mut()
    }
}
