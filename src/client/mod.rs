//! # DSU Client Module
//!
//! Connection lifecycle and controller state for remote DSU servers.
//!
//! This module handles:
//! - Per-server UDP connections with a background receive worker
//! - The slot state machine (absent → detected → connected → absent)
//! - Two-phase registration with the host input subsystem
//! - Liveness timeouts and removal
//!
//! ## Threading
//!
//! ```text
//! recv worker (per server) ──lock──▶ SlotTable ◀──lock── detect / update (host thread)
//!          │                                                  ▲
//!          └──────────── pending promotions (mpsc) ───────────┘
//! ```
//!
//! Host callbacks are only made from the detect and update paths, never
//! while the slot lock is held.

pub mod connection;
pub mod host;
pub mod session;
pub mod slot;

pub use connection::ServerConnection;
pub use host::{HostInput, PowerLevel, SensorKind};
pub use session::{Session, SessionConfig};
pub use slot::{JoystickGuid, Slot};
