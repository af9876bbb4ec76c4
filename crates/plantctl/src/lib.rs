//! Plant Supervisory Controller core.
//!
//! Aggregates RTUs over a cyclic fieldbus abstraction, drives PID/interlock
//! control, reconciles authority and desired state across reconnects, and
//! exposes a shared-memory IPC bridge to an external API tier.

pub mod alarms;
pub mod authority;
pub mod clock;
pub mod config;
pub mod control;
pub mod error;
pub mod fieldbus;
pub mod ipc;
pub mod logging;
pub mod reconciler;
pub mod registry;
pub mod supervisor;
