//! Shared per-process state: dedup, photo groups, debounce timers and the
//! single-flight guard.

pub mod debounce;
pub mod dedup;
pub mod registry;
pub mod single_flight;

pub use debounce::{DebounceScheduler, TimerHandle};
pub use dedup::{DEFAULT_DEDUP_CAPACITY, DedupKey, DedupWindow};
pub use registry::{GroupSession, GroupUpdate, SessionRegistry};
pub use single_flight::{FlightPermit, ResourceClass, SingleFlightGuard};
