//! Non-blocking single-flight admission for expensive operations.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Operations that are limited to one in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceClass {
    /// Call to the remote object-detection service.
    Detection,
}

impl ResourceClass {
    pub const ALL: [ResourceClass; 1] = [ResourceClass::Detection];

    pub fn name(self) -> &'static str {
        match self {
            Self::Detection => "detection",
        }
    }
}

/// Exclusive right to run one operation of a resource class.
/// Released when dropped.
#[derive(Debug)]
pub struct FlightPermit {
    class: ResourceClass,
    _permit: OwnedSemaphorePermit,
}

impl FlightPermit {
    pub fn class(&self) -> ResourceClass {
        self.class
    }
}

/// One permit per [`ResourceClass`]. Acquisition never waits: a held class
/// rejects the caller immediately.
#[derive(Debug)]
pub struct SingleFlightGuard {
    slots: HashMap<ResourceClass, Arc<Semaphore>>,
}

impl SingleFlightGuard {
    pub fn new() -> Self {
        let slots = ResourceClass::ALL
            .into_iter()
            .map(|class| (class, Arc::new(Semaphore::new(1))))
            .collect();
        Self { slots }
    }

    /// Take the permit for `class`, or `None` if it is already held.
    pub fn try_acquire(&self, class: ResourceClass) -> Option<FlightPermit> {
        let slot = self.slots.get(&class)?;
        Arc::clone(slot)
            .try_acquire_owned()
            .ok()
            .map(|permit| FlightPermit {
                class,
                _permit: permit,
            })
    }

    pub fn is_held(&self, class: ResourceClass) -> bool {
        self.slots
            .get(&class)
            .is_some_and(|slot| slot.available_permits() == 0)
    }
}

impl Default for SingleFlightGuard {
    fn default() -> Self {
        Self::new()
    }
}
