use crate::visibility::types::{EntityId, ObservableId};

/// Errors raised while mutating the visibility registries.
///
/// None of these are recoverable mid-match: the host is expected to size the
/// registries and radii correctly before the match starts, so a tick that
/// returns one of these is treated as fatal.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VisibilityError {
    #[error("Observable capacity exceeded ({capacity} concurrent observables)")]
    CapacityExceeded { capacity: usize },
    #[error("Unconditional radius {unconditional} exceeds max radius {max}")]
    InvalidRadii { unconditional: f32, max: f32 },
    #[error("Entity {0} is already registered as an observer")]
    DuplicateObserver(EntityId),
    #[error("Entity {0} is already registered as an observable")]
    DuplicateObservable(EntityId),
    #[error("Entity {0} is not a registered observer")]
    UnknownObserver(EntityId),
    #[error("Observable id {0:?} is not in use")]
    UnknownObservable(ObservableId),
    #[error("Entity {0} is not a registered observable")]
    NotObservable(EntityId),
}

/// Failure reported by the external collision world.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollisionError {
    #[error("Collision world unavailable")]
    Unavailable,
    #[error("Shape query failed: {0}")]
    QueryFailed(String),
}
