//! # Error Types
//!
//! Custom error types for the DSU client using `thiserror`.

use thiserror::Error;

/// Main error type for the DSU client
#[derive(Debug, Error)]
pub enum DsuError {
    /// No session is running (disabled, failed to start, or already shut down)
    #[error("DSU not initialized")]
    NotInitialized,

    /// The addressed controller is not connected
    #[error("DSU controller not available: {0}")]
    NotAvailable(String),

    /// The requested capability is not part of the protocol
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    /// Device index does not name a connected controller
    #[error("DSU device not found at index {0}")]
    DeviceNotFound(usize),

    /// Datagram shorter than the structure it should hold
    #[error("Packet too short: expected at least {expected} bytes, got {actual}")]
    PacketTooShort { expected: usize, actual: usize },

    /// Magic bytes do not match the expected sender tag
    #[error("Invalid magic: {0:02X?}")]
    InvalidMagic([u8; 4]),

    /// Embedded CRC32 does not match the computed one
    #[error("CRC mismatch: expected 0x{expected:08X}, got 0x{actual:08X}")]
    CrcMismatch { expected: u32, actual: u32 },

    /// Declared length runs past the received bytes
    #[error("Truncated packet: header declares {declared} bytes, {available} available")]
    Truncated { declared: usize, available: usize },

    /// None of the configured servers could be opened
    #[error("No DSU server connection could be opened")]
    NoServers,

    /// Server address could not be parsed or resolved
    #[error("Address error: {0}")]
    Address(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for the DSU client
pub type Result<T> = std::result::Result<T, DsuError>;
