//! Session negotiation with the remote streaming engine.

pub mod negotiation;

pub use negotiation::*;
