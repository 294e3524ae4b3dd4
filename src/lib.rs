//! Photo Relay: chat-driven image filters and object detection.

pub mod channels;
pub mod config;
pub mod detection;
pub mod dispatch;
pub mod error;
pub mod imaging;
pub mod session;
pub mod storage;
