//! # DSU Protocol Module
//!
//! Implementation of the DSU (DualShock UDP) wire protocol.
//!
//! This module handles:
//! - Header framing (magic, version, length, sender id, message type)
//! - CRC32 (IEEE 802.3) stamping and validation
//! - Client request encoding (PortsInfo, Data subscription, Rumble)
//! - Server response decoding (VersionInfo, PortsInfo, Data)
//!
//! All multi-byte fields are little-endian on the wire.

#[allow(clippy::module_inception)]
pub mod protocol;
pub mod encoder;
pub mod decoder;
pub mod crc;
