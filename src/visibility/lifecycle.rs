//! Tick-boundary queue for registry mutations
//!
//! Entity systems report observer/observable additions and removals whenever
//! they happen. The scheduler only applies them at the start of its next
//! tick, so a tick always iterates a frozen population.
//!
//! The channel is unbounded: dropping a removal would leave a stale
//! "visible" bit behind, so there is no backpressure path.

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::util::vec3::Vec3;
use crate::visibility::types::{EntityId, ObservableKind, VisibilityRadii};

/// Component lifecycle notification from the entity layer
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    ObserverAdded {
        entity: EntityId,
        radii: VisibilityRadii,
        position: Vec3,
    },
    ObserverRemoved {
        entity: EntityId,
    },
    ObserverRadiiChanged {
        entity: EntityId,
        radii: VisibilityRadii,
    },
    ObservableAdded {
        entity: EntityId,
        kind: ObservableKind,
        position: Vec3,
    },
    ObservableRemoved {
        entity: EntityId,
    },
}

/// Queue owned by the scheduler, drained once per tick
pub struct LifecycleQueue {
    sender: Sender<LifecycleEvent>,
    receiver: Receiver<LifecycleEvent>,
}

impl LifecycleQueue {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self { sender, receiver }
    }

    /// Create a sender handle for an entity system
    pub fn sender(&self) -> LifecycleSender {
        LifecycleSender {
            sender: self.sender.clone(),
        }
    }

    #[inline]
    pub fn submit(&self, event: LifecycleEvent) {
        // The queue holds its own receiver, so the channel cannot be disconnected
        let _ = self.sender.send(event);
    }

    /// Move every pending event into `out`, in submission order
    pub fn drain_into(&self, out: &mut Vec<LifecycleEvent>) {
        out.extend(self.receiver.try_iter());
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }
}

impl Default for LifecycleQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Clonable sender handle for entity systems
#[derive(Clone)]
pub struct LifecycleSender {
    sender: Sender<LifecycleEvent>,
}

impl LifecycleSender {
    /// Queue an event for the next tick boundary
    #[inline]
    pub fn send(&self, event: LifecycleEvent) -> Result<(), LifecycleQueueError> {
        self.sender
            .send(event)
            .map_err(|_| LifecycleQueueError::Disconnected)
    }

    pub fn observer_added(&self, entity: EntityId, radii: VisibilityRadii, position: Vec3) -> Result<(), LifecycleQueueError> {
        self.send(LifecycleEvent::ObserverAdded { entity, radii, position })
    }

    pub fn observer_removed(&self, entity: EntityId) -> Result<(), LifecycleQueueError> {
        self.send(LifecycleEvent::ObserverRemoved { entity })
    }

    pub fn observable_added(&self, entity: EntityId, kind: ObservableKind, position: Vec3) -> Result<(), LifecycleQueueError> {
        self.send(LifecycleEvent::ObservableAdded { entity, kind, position })
    }

    pub fn observable_removed(&self, entity: EntityId) -> Result<(), LifecycleQueueError> {
        self.send(LifecycleEvent::ObservableRemoved { entity })
    }
}

/// Lifecycle queue errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleQueueError {
    /// Scheduler dropped (server shutting down)
    #[error("Lifecycle queue disconnected")]
    Disconnected,
}
