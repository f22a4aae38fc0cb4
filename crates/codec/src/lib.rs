//! Wire codec
//!
//! Pure translation between the local event model and the JSON text frames
//! the remote speech service speaks. No business logic, no I/O: the
//! orchestrator never sees wire messages and this crate never sees state.

pub mod wire;

pub use wire::{decode, encode, DecodeError, WireMessage};
