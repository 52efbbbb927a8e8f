//! Occlusion queries against cached static terrain
//!
//! The adapter snapshots the terrain shape list once per tick and casts every
//! ray against that list only. Dynamic bodies and character controllers never
//! occlude, which keeps results independent of how moving objects are ordered.
//!
//! When the collision world cannot answer, or an endpoint is not finite,
//! casts fail closed: the pair is reported blocked instead of silently
//! granting visibility.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::util::vec3::Vec3;
use crate::visibility::error::CollisionError;

/// Rays shorter than this cannot be blocked
const MIN_RAY_LENGTH: f32 = 1e-4;

/// Category of a collision body as reported by the physics engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BodyKind {
    StaticTerrain,
    DynamicBody,
    Character,
    Trigger,
}

/// Collision/geometry query capability provided by the host's physics engine
pub trait CollisionWorld: Send + Sync {
    type Shape: Clone + Send + Sync;

    /// Append every collision shape in the world, tagged with its body kind
    fn list_shapes(&self, out: &mut Vec<(BodyKind, Self::Shape)>) -> Result<(), CollisionError>;

    /// Does a ray from `origin` along unit `direction` hit `shape` within `max_distance`?
    fn raycast(
        &self,
        shape: &Self::Shape,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
    ) -> Result<bool, CollisionError>;
}

/// Result of a single occlusion cast
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RayOutcome {
    Clear,
    Blocked,
    /// Collision world could not answer; treated as blocked
    Failed,
}

impl RayOutcome {
    #[inline]
    pub fn is_blocked(self) -> bool {
        !matches!(self, RayOutcome::Clear)
    }
}

pub struct OcclusionQueryAdapter<W: CollisionWorld> {
    world: W,
    terrain: Vec<W::Shape>,
    scratch: Vec<(BodyKind, W::Shape)>,
    available: bool,
    refreshed: bool,
}

impl<W: CollisionWorld> OcclusionQueryAdapter<W> {
    pub fn new(world: W) -> Self {
        Self {
            world,
            terrain: Vec::new(),
            scratch: Vec::new(),
            available: false,
            refreshed: false,
        }
    }

    /// Rebuild the terrain cache. Call once per tick before any cast.
    ///
    /// Returns the number of cached terrain shapes; on failure the cache is
    /// emptied and every cast this tick fails closed.
    pub fn refresh_terrain_cache(&mut self) -> usize {
        self.scratch.clear();
        self.terrain.clear();

        match self.world.list_shapes(&mut self.scratch) {
            Ok(()) => {
                self.terrain.extend(
                    self.scratch
                        .drain(..)
                        .filter(|(kind, _)| *kind == BodyKind::StaticTerrain)
                        .map(|(_, shape)| shape),
                );
                if !self.available {
                    debug!("Terrain cache online with {} shapes", self.terrain.len());
                }
                self.available = true;
            }
            Err(e) => {
                if self.available || !self.refreshed {
                    warn!("Collision world unavailable, occlusion casts fail closed: {}", e);
                }
                self.available = false;
            }
        }
        self.refreshed = true;

        self.terrain.len()
    }

    /// Cast from `origin` to `target` against cached terrain; true = blocked
    #[inline]
    pub fn cast(&self, origin: Vec3, target: Vec3) -> bool {
        self.trace(origin, target).is_blocked()
    }

    /// Like `cast`, but distinguishes a real hit from a failed query
    pub fn trace(&self, origin: Vec3, target: Vec3) -> RayOutcome {
        if !self.available || !origin.is_finite() || !target.is_finite() {
            return RayOutcome::Failed;
        }

        let (direction, distance) = (target - origin).normalize_with_length();
        if distance < MIN_RAY_LENGTH {
            return RayOutcome::Clear;
        }

        for shape in &self.terrain {
            match self.world.raycast(shape, origin, direction, distance) {
                Ok(true) => return RayOutcome::Blocked,
                Ok(false) => {}
                Err(_) => return RayOutcome::Failed,
            }
        }
        RayOutcome::Clear
    }

    #[inline]
    pub fn is_available(&self) -> bool {
        self.available
    }

    #[inline]
    pub fn terrain_shape_count(&self) -> usize {
        self.terrain.len()
    }

    pub fn world(&self) -> &W {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut W {
        &mut self.world
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::shape::Primitive;
    use crate::collision::world::StaticGeometryWorld;

    fn wall_at_x(x: f32) -> Primitive {
        Primitive::plane(Vec3::new(1.0, 0.0, 0.0), x)
    }

    #[test]
    fn test_cast_before_refresh_fails_closed() {
        let adapter = OcclusionQueryAdapter::new(StaticGeometryWorld::new());
        assert!(!adapter.is_available());
        assert_eq!(adapter.trace(Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0)), RayOutcome::Failed);
        assert!(adapter.cast(Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0)));
    }

    #[test]
    fn test_empty_terrain_is_clear() {
        let mut adapter = OcclusionQueryAdapter::new(StaticGeometryWorld::new());
        assert_eq!(adapter.refresh_terrain_cache(), 0);
        assert!(!adapter.cast(Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0)));
    }

    #[test]
    fn test_terrain_between_blocks() {
        let mut world = StaticGeometryWorld::new();
        world.add_terrain(wall_at_x(5.0));
        let mut adapter = OcclusionQueryAdapter::new(world);
        adapter.refresh_terrain_cache();

        assert!(adapter.cast(Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0)));
        // Wall beyond the target does not count
        assert!(!adapter.cast(Vec3::ZERO, Vec3::new(4.0, 0.0, 0.0)));
    }

    #[test]
    fn test_only_static_terrain_occludes() {
        let mut world = StaticGeometryWorld::new();
        world.add_body(BodyKind::DynamicBody, wall_at_x(5.0));
        world.add_body(BodyKind::Character, Primitive::sphere(Vec3::new(3.0, 0.0, 0.0), 1.0));
        let mut adapter = OcclusionQueryAdapter::new(world);

        assert_eq!(adapter.refresh_terrain_cache(), 0);
        assert!(!adapter.cast(Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0)));
    }

    #[test]
    fn test_cache_is_rebuilt_each_refresh() {
        let mut adapter = OcclusionQueryAdapter::new(StaticGeometryWorld::new());
        adapter.refresh_terrain_cache();
        adapter.world_mut().add_terrain(wall_at_x(5.0));

        // Not visible to casts until the next refresh
        assert!(!adapter.cast(Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0)));
        assert_eq!(adapter.refresh_terrain_cache(), 1);
        assert!(adapter.cast(Vec3::ZERO, Vec3::new(10.0, 0.0, 0.0)));
    }

    #[test]
    fn test_unavailable_world_fails_closed() {
        let mut adapter = OcclusionQueryAdapter::new(StaticGeometryWorld::new());
        adapter.world().set_available(false);
        adapter.refresh_terrain_cache();

        assert!(!adapter.is_available());
        assert_eq!(adapter.trace(Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0)), RayOutcome::Failed);

        adapter.world().set_available(true);
        adapter.refresh_terrain_cache();
        assert_eq!(adapter.trace(Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0)), RayOutcome::Clear);
    }

    #[test]
    fn test_non_finite_endpoint_fails_closed() {
        let mut world = StaticGeometryWorld::new();
        world.add_terrain(Primitive::aabb(Vec3::new(9.0, -5.0, -5.0), Vec3::new(11.0, 5.0, 5.0)));
        let mut adapter = OcclusionQueryAdapter::new(world);
        adapter.refresh_terrain_cache();

        let corrupt = Vec3::new(f32::NAN, 0.0, 0.0);
        assert_eq!(adapter.trace(Vec3::ZERO, corrupt), RayOutcome::Failed);
        assert_eq!(adapter.trace(corrupt, Vec3::new(20.0, 0.0, 0.0)), RayOutcome::Failed);
        assert_eq!(
            adapter.trace(Vec3::ZERO, Vec3::new(f32::INFINITY, 0.0, 0.0)),
            RayOutcome::Failed
        );
    }

    #[test]
    fn test_degenerate_ray_is_clear() {
        let mut world = StaticGeometryWorld::new();
        world.add_terrain(Primitive::sphere(Vec3::ZERO, 5.0));
        let mut adapter = OcclusionQueryAdapter::new(world);
        adapter.refresh_terrain_cache();
        assert_eq!(adapter.trace(Vec3::ONE, Vec3::ONE), RayOutcome::Clear);
    }
}
