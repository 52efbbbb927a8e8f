//! Synthetic population for the headless server
//!
//! Players are observers and shaped observables at once; props are a mix of
//! shaped and simple observables. Everything wanders by a random walk over a
//! square map scattered with terrain boxes.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::collision::shape::Primitive;
use crate::collision::world::StaticGeometryWorld;
use crate::config::{DemoConfig, VisibilityConfig};
use crate::util::vec3::Vec3;
use crate::visibility::lifecycle::{LifecycleQueueError, LifecycleSender};
use crate::visibility::scheduler::{ReplicationSink, VisibilityScheduler};
use crate::visibility::transform::{TransformSource, TransformTable};
use crate::visibility::types::{AimOrientation, EntityId, FrequencyChange, ObservableKind, VisibilityChange};

/// Player capsule trace height
const PLAYER_TRACE_HEIGHT: f32 = 1.0;
/// Share of props registered as distance-only
const SIMPLE_PROP_RATIO: f64 = 0.25;

/// Replication stand-in that only counts transitions
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CountingSink {
    pub shown: u64,
    pub hidden: u64,
    pub frequency_updates: u64,
}

impl ReplicationSink for CountingSink {
    fn set_visibility(&mut self, change: VisibilityChange) {
        if change.visible {
            self.shown += 1;
        } else {
            self.hidden += 1;
        }
    }

    fn set_frequency(&mut self, _change: FrequencyChange) {
        self.frequency_updates += 1;
    }
}

pub struct DemoWorld {
    config: DemoConfig,
    rng: StdRng,
    transforms: TransformTable,
    players: Vec<EntityId>,
    props: Vec<EntityId>,
    next_entity: EntityId,
}

impl DemoWorld {
    /// Build the terrain and population, registering everything with a new scheduler
    pub fn build(
        demo: DemoConfig,
        visibility: VisibilityConfig,
        seed: u64,
    ) -> anyhow::Result<(Self, VisibilityScheduler<StaticGeometryWorld>)> {
        let mut rng = StdRng::seed_from_u64(seed);
        let extent = demo.world_extent;

        let mut geometry = StaticGeometryWorld::new();
        for _ in 0..demo.terrain_shapes {
            let center = Vec3::new(rng.gen_range(-extent..extent), rng.gen_range(-extent..extent), 0.0);
            let half = Vec3::new(rng.gen_range(2.0..15.0), rng.gen_range(2.0..15.0), 0.0);
            let height = rng.gen_range(1.0..12.0);
            geometry.add_terrain(Primitive::aabb(center - half, center + half + Vec3::UP * height));
        }

        let radii = visibility.default_radii;
        let mut scheduler = VisibilityScheduler::new(visibility, geometry)?;

        let mut world = Self {
            config: demo,
            rng,
            transforms: TransformTable::new(),
            players: Vec::with_capacity(demo.observers),
            props: Vec::with_capacity(demo.observables),
            next_entity: 1,
        };

        for _ in 0..demo.observers {
            let entity = world.allocate_entity();
            let position = world.random_position();
            scheduler.register_observer(entity, radii, position)?;
            world.transforms.set_position(entity, position);
            world.players.push(entity);
        }

        // Players count against the observable budget first
        let player_observables = demo.observables.min(world.players.len());
        for &entity in &world.players[..player_observables] {
            let position = world.transforms_position(entity);
            scheduler.register_observable(
                entity,
                ObservableKind::Shaped { trace_height: PLAYER_TRACE_HEIGHT },
                position,
            )?;
        }

        for _ in player_observables..demo.observables {
            let entity = world.allocate_entity();
            let position = world.random_position();
            let kind = world.random_prop_kind();
            scheduler.register_observable(entity, kind, position)?;
            world.transforms.set_position(entity, position);
            world.props.push(entity);
        }

        info!(
            "Demo world: {} observers, {} observables, {} terrain boxes, extent {}",
            scheduler.observer_count(),
            scheduler.observable_count(),
            demo.terrain_shapes,
            extent
        );

        Ok((world, scheduler))
    }

    /// Advance the random walk by one tick
    pub fn step(&mut self) {
        let step = self.config.step;
        let extent = self.config.world_extent;

        for &entity in self.players.iter().chain(self.props.iter()) {
            let Some(position) = self.transforms.position(entity) else {
                continue;
            };
            let moved = Vec3::new(
                (position.x + self.rng.gen_range(-step..=step)).clamp(-extent, extent),
                (position.y + self.rng.gen_range(-step..=step)).clamp(-extent, extent),
                position.z,
            );
            self.transforms.set_position(entity, moved);
        }

        for &entity in &self.players {
            let aim = AimOrientation {
                pitch: self.rng.gen_range(-0.6..0.6),
                yaw: self.rng.gen_range(0.0..std::f32::consts::TAU),
            };
            self.transforms.set_aim(entity, aim);
        }
    }

    /// Despawn one random prop and spawn a replacement through the lifecycle queue
    pub fn churn(&mut self, sender: &LifecycleSender) -> Result<(), LifecycleQueueError> {
        if self.props.is_empty() {
            return Ok(());
        }
        let index = self.rng.gen_range(0..self.props.len());
        let removed = self.props.swap_remove(index);
        self.transforms.remove(removed);
        sender.observable_removed(removed)?;

        let entity = self.allocate_entity();
        let position = self.random_position();
        let kind = self.random_prop_kind();
        self.transforms.set_position(entity, position);
        self.props.push(entity);
        sender.observable_added(entity, kind, position)
    }

    pub fn transforms(&self) -> &TransformTable {
        &self.transforms
    }

    fn allocate_entity(&mut self) -> EntityId {
        let entity = self.next_entity;
        self.next_entity += 1;
        entity
    }

    fn random_position(&mut self) -> Vec3 {
        let extent = self.config.world_extent;
        Vec3::new(
            self.rng.gen_range(-extent..extent),
            self.rng.gen_range(-extent..extent),
            0.0,
        )
    }

    fn random_prop_kind(&mut self) -> ObservableKind {
        if self.rng.gen_bool(SIMPLE_PROP_RATIO) {
            ObservableKind::Simple
        } else {
            ObservableKind::Shaped {
                trace_height: self.rng.gen_range(0.3..2.0),
            }
        }
    }

    fn transforms_position(&self, entity: EntityId) -> Vec3 {
        self.transforms.position(entity).unwrap_or(Vec3::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> DemoConfig {
        DemoConfig {
            observers: 4,
            observables: 20,
            terrain_shapes: 10,
            world_extent: 60.0,
            step: 1.0,
        }
    }

    #[test]
    fn test_build_registers_population() {
        let (_, scheduler) = DemoWorld::build(small(), VisibilityConfig::default(), 7).unwrap();
        assert_eq!(scheduler.observer_count(), 4);
        assert_eq!(scheduler.observable_count(), 20);
        assert_eq!(scheduler.world().bodies().len(), 10);
    }

    #[test]
    fn test_players_see_themselves() {
        let (world, mut scheduler) = DemoWorld::build(small(), VisibilityConfig::default(), 7).unwrap();
        let mut sink = CountingSink::default();
        scheduler.tick(world.transforms(), &mut sink).unwrap();

        for entity in 1..=4 {
            assert!(scheduler.is_visible(entity, entity));
        }
        assert!(sink.shown >= 4);
    }

    #[test]
    fn test_step_stays_in_bounds() {
        let (mut world, _) = DemoWorld::build(small(), VisibilityConfig::default(), 3).unwrap();
        for _ in 0..200 {
            world.step();
        }
        for entity in 1..=20 {
            let position = world.transforms().position(entity).unwrap();
            assert!(position.x.abs() <= 60.0 && position.y.abs() <= 60.0);
        }
    }

    #[test]
    fn test_churn_keeps_population() {
        let (mut world, mut scheduler) = DemoWorld::build(small(), VisibilityConfig::default(), 11).unwrap();
        let sender = scheduler.sender();
        let mut sink = CountingSink::default();

        for _ in 0..10 {
            world.churn(&sender).unwrap();
            world.step();
            scheduler.tick(world.transforms(), &mut sink).unwrap();
        }
        assert_eq!(scheduler.observable_count(), 20);
    }

    #[test]
    fn test_lod_counts_frequency_updates() {
        let mut visibility = VisibilityConfig::default();
        visibility.lod.enabled = true;
        let (world, mut scheduler) = DemoWorld::build(small(), visibility, 7).unwrap();
        let mut sink = CountingSink::default();
        scheduler.tick(world.transforms(), &mut sink).unwrap();

        // Every newly visible pair gets a frequency
        assert_eq!(sink.frequency_updates, sink.shown);
    }

    #[test]
    fn test_counting_sink() {
        let mut sink = CountingSink::default();
        sink.set_visibility(VisibilityChange { observer: 1, observable: 2, visible: true });
        sink.set_visibility(VisibilityChange { observer: 1, observable: 2, visible: false });
        sink.set_visibility(VisibilityChange { observer: 1, observable: 3, visible: false });
        sink.set_frequency(FrequencyChange { observer: 1, observable: 2, frequency: 3 });
        assert_eq!(sink, CountingSink { shown: 1, hidden: 2, frequency_updates: 1 });
    }
}
