//! Area-of-interest visibility scheduling
//!
//! Decides, per tick, which observables each observer may see and when each
//! pair must be looked at again. Cheap distance tiers cover most pairs; only
//! the middle band pays for an occlusion ray against static terrain.

pub mod constants;
pub mod error;
pub mod instrumentation;
pub mod lifecycle;
pub mod observable;
pub mod observer;
pub mod occlusion;
pub mod scheduler;
pub mod transform;
pub mod types;

pub use error::{CollisionError, VisibilityError};
pub use lifecycle::{LifecycleEvent, LifecycleSender};
pub use occlusion::{BodyKind, CollisionWorld};
pub use scheduler::{ReplicationSink, TickReport, VisibilityScheduler};
pub use transform::{TransformSource, TransformTable};
pub use types::{
    AimOrientation, EntityId, FrequencyChange, ObservableId, ObservableKind, VisibilityChange,
    VisibilityRadii,
};
