//! Shared wire types for the Armada fleet control plane.
//!
//! Keep cross-crate DTOs here so the control-plane, agents, and dashboard
//! tooling agree on one wire format.

#![warn(missing_docs)]

/// Agent protocol frames, dashboard events, and operator API DTOs.
pub mod api;
