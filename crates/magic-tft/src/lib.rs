//! C1 — TFT/NAPT parsing and whitelist range-containment validation.
//!
//! Parses 3GPP TS 23.060-form packet filters (`_iTFT=`/`+CGTFT=`) and ARINC
//! 839 NAPT rule strings, then validates a client's request against its
//! `TrafficSecurityConfig` whitelist by *range containment*, not string
//! match (ARINC 839 §1.2.2.2).

pub mod ip_range;
pub mod napt;
pub mod port_range;
pub mod tft;
pub mod whitelist;

pub use ip_range::IpRange;
pub use napt::{NaptRule, NatType};
pub use port_range::PortRange;
pub use tft::{Direction, TftRule};
