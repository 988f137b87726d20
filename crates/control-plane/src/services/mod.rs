//! Control-plane operations, grouped by caller.
//!
//! [`agents`] holds the calls agents make over their persistent
//! connections plus the server-initiated calls pushed back to them.
//! [`tokens`] mints enrollment credentials for operators.

pub mod agents;
pub mod tokens;
