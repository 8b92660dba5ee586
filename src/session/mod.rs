//! Session credential lifecycle
//!
//! Short-lived access tokens, single-use refresh tokens, and the gate that
//! checks them on every protected call.

mod gate;
mod issuer;

pub use gate::{AuthorizationGate, GateDecision, RejectReason};
pub use issuer::SessionIssuer;
