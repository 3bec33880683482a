//! Signaling with the remote streaming engine.
//!
//! - `message`: JSON envelope codec
//! - `client`: websocket connection and receive loop

pub mod client;
pub mod message;

pub use client::*;
pub use message::*;
