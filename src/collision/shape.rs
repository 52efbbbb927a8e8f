//! Primitive collision shapes with ray intersection

use serde::{Deserialize, Serialize};

use crate::util::vec3::Vec3;

/// Parallel-ray tolerance for plane and slab tests
const RAY_EPSILON: f32 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Primitive {
    /// Infinite plane of points `p` with `normal · p == offset`
    Plane { normal: Vec3, offset: f32 },
    /// Axis-aligned box
    Aabb { min: Vec3, max: Vec3 },
    Sphere { center: Vec3, radius: f32 },
}

impl Primitive {
    pub fn plane(normal: Vec3, offset: f32) -> Self {
        Primitive::Plane {
            normal: normal.normalize(),
            offset,
        }
    }

    /// Box spanning the two corners in any order
    pub fn aabb(a: Vec3, b: Vec3) -> Self {
        Primitive::Aabb {
            min: a.min(b),
            max: a.max(b),
        }
    }

    pub fn sphere(center: Vec3, radius: f32) -> Self {
        Primitive::Sphere {
            center,
            radius: radius.abs(),
        }
    }

    /// Distance along the ray to the first hit within `[0, max_distance]`.
    ///
    /// `direction` must be unit length. A ray starting inside a solid shape
    /// hits at distance 0.
    pub fn ray_hit_distance(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Option<f32> {
        let hit = match *self {
            Primitive::Plane { normal, offset } => {
                let denom = normal.dot(direction);
                if denom.abs() < RAY_EPSILON {
                    return None;
                }
                let t = (offset - normal.dot(origin)) / denom;
                (t >= 0.0).then_some(t)
            }
            Primitive::Aabb { min, max } => ray_aabb(origin, direction, min, max),
            Primitive::Sphere { center, radius } => ray_sphere(origin, direction, center, radius),
        };
        hit.filter(|&t| t <= max_distance)
    }

    #[inline]
    pub fn intersects_ray(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> bool {
        self.ray_hit_distance(origin, direction, max_distance).is_some()
    }
}

/// Slab test
fn ray_aabb(origin: Vec3, direction: Vec3, min: Vec3, max: Vec3) -> Option<f32> {
    let mut t_near = 0.0f32;
    let mut t_far = f32::INFINITY;

    for (o, d, lo, hi) in [
        (origin.x, direction.x, min.x, max.x),
        (origin.y, direction.y, min.y, max.y),
        (origin.z, direction.z, min.z, max.z),
    ] {
        if d.abs() < RAY_EPSILON {
            if o < lo || o > hi {
                return None;
            }
            continue;
        }
        let inv = 1.0 / d;
        let (t0, t1) = {
            let a = (lo - o) * inv;
            let b = (hi - o) * inv;
            if a < b { (a, b) } else { (b, a) }
        };
        t_near = t_near.max(t0);
        t_far = t_far.min(t1);
        if t_near > t_far {
            return None;
        }
    }
    Some(t_near)
}

fn ray_sphere(origin: Vec3, direction: Vec3, center: Vec3, radius: f32) -> Option<f32> {
    let to_origin = origin - center;
    let c = to_origin.length_sq() - radius * radius;
    if c <= 0.0 {
        return Some(0.0);
    }
    let b = to_origin.dot(direction);
    if b > 0.0 {
        // Outside and pointing away
        return None;
    }
    let discriminant = b * b - c;
    if discriminant < 0.0 {
        return None;
    }
    Some(-b - discriminant.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-4;
    const X: Vec3 = Vec3::new(1.0, 0.0, 0.0);

    #[test]
    fn test_plane_hit_and_miss() {
        let wall = Primitive::plane(Vec3::new(2.0, 0.0, 0.0), 5.0);
        let t = wall.ray_hit_distance(Vec3::ZERO, X, 100.0).unwrap();
        assert!((t - 5.0).abs() < EPSILON);

        // Too short, pointing away, and parallel
        assert!(!wall.intersects_ray(Vec3::ZERO, X, 4.9));
        assert!(!wall.intersects_ray(Vec3::ZERO, -X, 100.0));
        assert!(!wall.intersects_ray(Vec3::ZERO, Vec3::UP, 100.0));
    }

    #[test]
    fn test_plane_from_far_side() {
        let wall = Primitive::plane(X, 5.0);
        assert!(wall.intersects_ray(Vec3::new(10.0, 0.0, 0.0), -X, 6.0));
    }

    #[test]
    fn test_aabb_hit_distance() {
        let block = Primitive::aabb(Vec3::new(4.0, -1.0, -1.0), Vec3::new(6.0, 1.0, 1.0));
        let t = block.ray_hit_distance(Vec3::ZERO, X, 100.0).unwrap();
        assert!((t - 4.0).abs() < EPSILON);
        assert!(!block.intersects_ray(Vec3::ZERO, X, 3.5));
    }

    #[test]
    fn test_aabb_ray_passes_over() {
        let block = Primitive::aabb(Vec3::new(4.0, -1.0, 0.0), Vec3::new(6.0, 1.0, 2.0));
        let origin = Vec3::new(0.0, 0.0, 3.0);
        assert!(!block.intersects_ray(origin, X, 100.0));

        let dip = (Vec3::new(5.0, 0.0, 1.0) - origin).normalize();
        assert!(block.intersects_ray(origin, dip, 100.0));
    }

    #[test]
    fn test_aabb_corner_order_irrelevant() {
        let a = Primitive::aabb(Vec3::new(6.0, 1.0, 1.0), Vec3::new(4.0, -1.0, -1.0));
        assert!(a.intersects_ray(Vec3::ZERO, X, 10.0));
    }

    #[test]
    fn test_origin_inside_solid_hits_immediately() {
        let block = Primitive::aabb(Vec3::new(-1.0, -1.0, -1.0), Vec3::ONE);
        assert_eq!(block.ray_hit_distance(Vec3::ZERO, X, 10.0), Some(0.0));

        let ball = Primitive::sphere(Vec3::ZERO, 2.0);
        assert_eq!(ball.ray_hit_distance(Vec3::ZERO, X, 10.0), Some(0.0));
    }

    #[test]
    fn test_sphere_hit_and_miss() {
        let ball = Primitive::sphere(Vec3::new(10.0, 0.0, 0.0), 2.0);
        let t = ball.ray_hit_distance(Vec3::ZERO, X, 100.0).unwrap();
        assert!((t - 8.0).abs() < EPSILON);

        assert!(!ball.intersects_ray(Vec3::ZERO, Vec3::new(0.0, 1.0, 0.0), 100.0));
        assert!(!ball.intersects_ray(Vec3::ZERO, -X, 100.0));
        assert!(!ball.intersects_ray(Vec3::ZERO, X, 7.0));
    }
}
