//! # Wire Protocol
//!
//! Stateless binary codec for everything that crosses a connection.
//!
//! ## Frame Structure
//!
//! ```text
//! ┌────────────────┬──────────────────────────────────────────┐
//! │ length: u32 LE │ payload (StateUpdate or InputCommand)    │
//! └────────────────┴──────────────────────────────────────────┘
//! ```
//!
//! ## Rules
//!
//! - All integers little-endian, fixed width per field
//! - Strings: `u16` length + UTF-8 bytes
//! - Opaque payloads: `u32` length + bytes
//! - Malformed input is rejected whole, never partially applied

mod framing;
mod messages;
mod wire;

pub use framing::{encode_frame, read_frame, write_frame, FRAME_HEADER_LEN};
pub use messages::{
    ComponentData, InputCommand, StateUpdate, INPUT_COMMAND_MIN_LEN, STATE_UPDATE_HEADER_LEN,
};
pub use wire::{WireReader, WireWriter, MAX_BLOB_LEN, MAX_STRING_LEN};
