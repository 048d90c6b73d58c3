//! C6 message layer: the MAGIC AVP dictionary, a recursive AVP codec, the
//! per-message envelope, and typed request/answer structs for the seven
//! command pairs (Application-Id 1094202169, Vendor-Id 13712).
//!
//! Diameter base-protocol framing (peer discovery, CER/CEA, watchdog) is
//! out of scope; this crate assumes a transport that already delimits
//! whole messages.

pub mod avp;
pub mod commands;
pub mod dictionary;
pub mod message;

pub use avp::{Avp, AvpCodecError, AvpValue};
pub use message::{DiameterMessage, MessageCodecError};
