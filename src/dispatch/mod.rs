//! Event dispatch: classify each inbound event and run its terminal state.

pub mod dispatcher;
pub mod event;

pub use dispatcher::{
    Classification, DEFAULT_GROUP_DEBOUNCE, Dispatcher, DispatcherConfig, Outcome, classify,
};
pub use event::{InboundEvent, PhotoRef};
