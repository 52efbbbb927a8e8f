//! Read-only view of entity transforms consumed at the start of each tick

use hashbrown::HashMap;
use rustc_hash::FxBuildHasher;

use crate::util::vec3::Vec3;
use crate::visibility::types::{AimOrientation, EntityId};

/// Source of world positions (and optional aim) for observers and observables.
///
/// Entities the source does not know keep their last synced position.
pub trait TransformSource {
    fn position(&self, entity: EntityId) -> Option<Vec3>;

    /// Observer aim; absence falls back to the raw position as point of view
    fn aim(&self, _entity: EntityId) -> Option<AimOrientation> {
        None
    }
}

/// Plain table of transforms, filled by the host each tick
#[derive(Debug, Default, Clone)]
pub struct TransformTable {
    positions: HashMap<EntityId, Vec3, FxBuildHasher>,
    aims: HashMap<EntityId, AimOrientation, FxBuildHasher>,
}

impl TransformTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_position(&mut self, entity: EntityId, position: Vec3) {
        self.positions.insert(entity, position);
    }

    pub fn set_aim(&mut self, entity: EntityId, aim: AimOrientation) {
        self.aims.insert(entity, aim);
    }

    pub fn clear_aim(&mut self, entity: EntityId) {
        self.aims.remove(&entity);
    }

    pub fn remove(&mut self, entity: EntityId) {
        self.positions.remove(&entity);
        self.aims.remove(&entity);
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

impl TransformSource for TransformTable {
    fn position(&self, entity: EntityId) -> Option<Vec3> {
        self.positions.get(&entity).copied()
    }

    fn aim(&self, entity: EntityId) -> Option<AimOrientation> {
        self.aims.get(&entity).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_lookup() {
        let mut table = TransformTable::new();
        table.set_position(1, Vec3::new(1.0, 2.0, 3.0));
        table.set_aim(1, AimOrientation { pitch: 0.1, yaw: 0.2 });

        assert_eq!(table.position(1), Some(Vec3::new(1.0, 2.0, 3.0)));
        assert_eq!(table.aim(1), Some(AimOrientation { pitch: 0.1, yaw: 0.2 }));
        assert_eq!(table.position(2), None);

        table.clear_aim(1);
        assert_eq!(table.aim(1), None);
        table.remove(1);
        assert!(table.is_empty());
    }
}
