// SPDX-License-Identifier: Apache-2.0 OR MIT

//! UUID generation. Out of scope per `spec.md` §1 beyond the 16-byte,
//! globally-unique-per-process contract in §6 — backed by the `uuid` crate.

/// A CHP participant identifier: 16 bytes, unique per client process.
pub type Uuid = uuid::Uuid;

/// Generates a fresh client/owner UUID.
pub fn generate() -> Uuid {
    uuid::Uuid::new_v4()
}
