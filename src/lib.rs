//! # DSU Client Library
//!
//! Surface controllers exposed by remote DSU ("DualShock UDP", cemuhook)
//! servers as local gamepads.
//!
//! This library provides the wire codec, the per-server UDP connections and
//! the slot state machine behind a small driver façade that a host input
//! subsystem polls.

pub mod client;
pub mod config;
pub mod driver;
pub mod error;
pub mod protocol;
pub mod transport;
