//! Types the engine hands to the application layer.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize` so a host can
//! forward them over whatever transport it uses.

pub mod events;
