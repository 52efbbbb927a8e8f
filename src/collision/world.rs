//! In-memory collision world of static primitives
//!
//! Stands in for a physics engine: the demo server, the benchmark and the
//! scheduler tests all cast against it through `CollisionWorld`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::collision::shape::Primitive;
use crate::util::vec3::Vec3;
use crate::visibility::error::CollisionError;
use crate::visibility::occlusion::{BodyKind, CollisionWorld};

/// One collision body
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Body {
    pub kind: BodyKind,
    pub shape: Primitive,
}

#[derive(Debug)]
pub struct StaticGeometryWorld {
    bodies: Vec<Body>,
    /// Cleared to simulate an outage of the physics engine
    available: AtomicBool,
    /// Shape-level ray queries answered so far
    raycasts: AtomicU64,
}

impl StaticGeometryWorld {
    pub fn new() -> Self {
        Self {
            bodies: Vec::new(),
            available: AtomicBool::new(true),
            raycasts: AtomicU64::new(0),
        }
    }

    pub fn add_terrain(&mut self, shape: Primitive) {
        self.add_body(BodyKind::StaticTerrain, shape);
    }

    pub fn add_body(&mut self, kind: BodyKind, shape: Primitive) {
        self.bodies.push(Body { kind, shape });
    }

    pub fn clear(&mut self) {
        self.bodies.clear();
    }

    pub fn bodies(&self) -> &[Body] {
        &self.bodies
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    pub fn raycast_count(&self) -> u64 {
        self.raycasts.load(Ordering::Relaxed)
    }

    fn check_available(&self) -> Result<(), CollisionError> {
        if self.available.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(CollisionError::Unavailable)
        }
    }
}

impl Default for StaticGeometryWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl CollisionWorld for StaticGeometryWorld {
    type Shape = Primitive;

    fn list_shapes(&self, out: &mut Vec<(BodyKind, Primitive)>) -> Result<(), CollisionError> {
        self.check_available()?;
        out.extend(self.bodies.iter().map(|body| (body.kind, body.shape)));
        Ok(())
    }

    fn raycast(
        &self,
        shape: &Primitive,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
    ) -> Result<bool, CollisionError> {
        self.check_available()?;
        self.raycasts.fetch_add(1, Ordering::Relaxed);
        Ok(shape.intersects_ray(origin, direction, max_distance))
    }
}
