//! Identifiers and value types shared by the visibility registries.

use serde::{Deserialize, Serialize};

use crate::util::vec3::Vec3;

/// Entity identifier as handed out by the host's entity storage
pub type EntityId = u64;

/// Dense, reusable slot index of a registered observable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObservableId(pub u16);

impl ObservableId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// How an observable is tested for visibility
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ObservableKind {
    /// Distance-only: visible inside the observer's max radius, never ray cast
    Simple,
    /// Has a visibility shape; occlusion rays target `position + UP * trace_height`
    Shaped { trace_height: f32 },
}

impl ObservableKind {
    #[inline]
    pub fn is_simple(&self) -> bool {
        matches!(self, ObservableKind::Simple)
    }

    /// Occlusion ray target for an observable standing at `position`
    #[inline]
    pub fn trace_point(&self, position: Vec3) -> Option<Vec3> {
        match *self {
            ObservableKind::Simple => None,
            ObservableKind::Shaped { trace_height } => Some(position + Vec3::UP * trace_height),
        }
    }
}

/// Observer aim, used only to bias the occlusion ray origin
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AimOrientation {
    /// Radians above the horizon
    pub pitch: f32,
    /// Radians counter-clockwise from +x
    pub yaw: f32,
}

/// Observer visibility radii (compared squared during classification)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VisibilityRadii {
    /// Inside this radius shaped observables are visible without a ray cast
    pub unconditional: f32,
    /// Beyond this radius nothing but the observer itself is visible
    pub max: f32,
}

impl VisibilityRadii {
    pub fn new(unconditional: f32, max: f32) -> Self {
        Self { unconditional, max }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.unconditional >= 0.0 && self.unconditional <= self.max
    }
}

/// A published visibility transition for one (observer, observable) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VisibilityChange {
    pub observer: EntityId,
    pub observable: EntityId,
    pub visible: bool,
}

/// Replication frequency hint for a visible pair: replicate every `frequency`
/// ticks. Only published when replication LOD is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrequencyChange {
    pub observer: EntityId,
    pub observable: EntityId,
    pub frequency: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_point_offsets_up() {
        let kind = ObservableKind::Shaped { trace_height: 1.8 };
        let point = kind.trace_point(Vec3::new(4.0, 5.0, 1.0)).unwrap();
        assert!(point.approx_eq(Vec3::new(4.0, 5.0, 2.8), 1e-5));
        assert!(!kind.is_simple());
    }

    #[test]
    fn test_simple_has_no_trace_point() {
        assert_eq!(ObservableKind::Simple.trace_point(Vec3::ONE), None);
        assert!(ObservableKind::Simple.is_simple());
    }

    #[test]
    fn test_radii_validity() {
        assert!(VisibilityRadii::new(5.0, 50.0).is_valid());
        assert!(VisibilityRadii::new(50.0, 50.0).is_valid());
        assert!(!VisibilityRadii::new(60.0, 50.0).is_valid());
        assert!(!VisibilityRadii::new(-1.0, 50.0).is_valid());
    }
}
