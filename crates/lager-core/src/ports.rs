// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Port-layout validation shared by every host binary.
//!
//! `spec.md` §6 lays out five ports relative to a single `base_port`: three
//! consecutive CHP ports, plus a forwarder frontend and backend offset that
//! a deployer is free to choose. This module owns the arithmetic and the
//! single validation rule every component depends on: the resulting port
//! must land inside `0..=65535`.

use crate::error::LagerError;

/// CHP snapshot (request/reply) port offset from `base_port`.
pub const CHP_SNAPSHOT_OFFSET: i32 = 0;
/// CHP publisher (fan-out) port offset from `base_port`.
pub const CHP_PUBLISHER_OFFSET: i32 = 1;
/// CHP collector (fan-in) port offset from `base_port`.
pub const CHP_COLLECTOR_OFFSET: i32 = 2;
/// Forwarder frontend (tap-facing subscribe side) port offset from `base_port`.
pub const FORWARDER_FRONTEND_OFFSET: i32 = 3;
/// Forwarder backend (mug-facing publish side) port offset from `base_port`.
pub const FORWARDER_BACKEND_OFFSET: i32 = 4;

/// Validates `base_port + offset` falls inside `[0, 65535]` and returns it as a `u16`.
///
/// Ports are accepted as `i32` (not `u16`) so that callers can pass a
/// negative or overflowing value straight from a CLI flag or a test and get
/// back an `InvalidPort` error rather than a panic or silent wraparound.
pub fn resolve_port(base_port: i32, offset: i32) -> Result<u16, LagerError> {
    let port = base_port + offset;
    if port < 0 || port > i32::from(u16::MAX) {
        return Err(LagerError::InvalidPort(port));
    }
    Ok(port as u16)
}

/// The full set of ports a deployment derives from one `base_port`.
#[derive(Debug, Clone, Copy)]
pub struct PortLayout {
    pub snapshot: u16,
    pub publisher: u16,
    pub collector: u16,
    pub forwarder_frontend: u16,
    pub forwarder_backend: u16,
}

impl PortLayout {
    /// Resolves all five ports from `base_port`, failing on the first one out of range.
    pub fn resolve(base_port: i32) -> Result<Self, LagerError> {
        Ok(Self {
            snapshot: resolve_port(base_port, CHP_SNAPSHOT_OFFSET)?,
            publisher: resolve_port(base_port, CHP_PUBLISHER_OFFSET)?,
            collector: resolve_port(base_port, CHP_COLLECTOR_OFFSET)?,
            forwarder_frontend: resolve_port(base_port, FORWARDER_FRONTEND_OFFSET)?,
            forwarder_backend: resolve_port(base_port, FORWARDER_BACKEND_OFFSET)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_base_port_resolves() {
        let layout = PortLayout::resolve(12345).unwrap();
        assert_eq!(layout.snapshot, 12345);
        assert_eq!(layout.publisher, 12346);
        assert_eq!(layout.collector, 12347);
    }

    #[test]
    fn negative_port_is_rejected() {
        assert_eq!(resolve_port(-1, 0), Err(LagerError::InvalidPort(-1)));
    }

    #[test]
    fn overflowing_port_is_rejected() {
        assert_eq!(resolve_port(65536, 0), Err(LagerError::InvalidPort(65536)));
    }

    #[test]
    fn offset_pushing_base_out_of_range_is_rejected() {
        assert!(resolve_port(65535, CHP_COLLECTOR_OFFSET).is_err());
    }
}
