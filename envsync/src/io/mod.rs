//! I/O helpers: store backends, rendering and process supervision.

pub mod artifacts;
pub mod atomic;
pub mod config;
pub mod process;
pub mod render;
pub mod resolve;
pub mod store;
