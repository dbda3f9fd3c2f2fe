//! Native protocol implementation (v4).
//!
//! Low-level pieces of the frame-based binary protocol:
//!
//! - [`wire`] - integer/string/bytes/map notations shared by every body
//! - [`frame`] - the 9-byte header, opcodes, and a Tokio codec
//! - [`types`] - column type codes and the value decoder
//!
//! Most users should use the high-level [`crate::client`] module instead of
//! interacting with the protocol directly.

pub mod frame;
pub mod types;
pub mod wire;

pub use frame::{Frame, FrameCodec, Opcode, HEADER_SIZE, REQUEST_VERSION, RESPONSE_VERSION};
pub use types::{decode_cell, decode_value, parse_type, CqlType};
pub use wire::WireReader;

/// Consistency level: how many replicas must acknowledge an operation.
/// Sent as a fixed 2-byte code with every query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u16)]
pub enum Consistency {
    /// Any replica, including hinted handoff.
    Any = 0x0000,
    /// A single replica.
    #[default]
    One = 0x0001,
    /// Two replicas.
    Two = 0x0002,
    /// Three replicas.
    Three = 0x0003,
    /// A quorum of replicas.
    Quorum = 0x0004,
    /// All replicas.
    All = 0x0005,
    /// A quorum within the local datacenter.
    LocalQuorum = 0x0006,
    /// A quorum within every datacenter.
    EachQuorum = 0x0007,
    /// Linearizable.
    Serial = 0x0008,
    /// Linearizable within the local datacenter.
    LocalSerial = 0x0009,
    /// A single replica in the local datacenter.
    LocalOne = 0x000A,
}

impl Consistency {
    /// Wire code.
    pub fn code(self) -> u16 {
        self as u16
    }
}
