//! Fixed-slot readiness multiplexing over `poll(2)`.
//!
//! A [`poll::Registry`] is a fixed-capacity table of descriptors with a
//! permanent primary descriptor in slot 0. [`poll::Registry::wait`] blocks
//! until at least one registered descriptor is ready and hands back the
//! slots to service, primary first, remaining slots in ascending order.

pub mod error;
pub mod poll;

pub use error::MuxError;
