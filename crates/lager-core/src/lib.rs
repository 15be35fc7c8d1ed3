// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Core of the `lager` telemetry bus: the Clustered Hash-map Protocol (CHP)
//! replication subsystem, the multi-frame wire codec, sample framing, schema
//! parsing, and the local persistence ("keg") interface.
//!
//! # Modules
//!
//! - [`wire`] — length-prefixed multi-frame transport codec
//! - [`chp`] — CHP server and client (the replicated key/value map)
//! - [`schema`] — `<format>` XML schema parsing
//! - [`sample`] — tap/mug binary sample message framing
//! - [`keg`] — local persistence sink trait and a file-backed implementation
//! - [`ports`] — port-layout validation shared by every host binary

pub mod chp;
pub mod error;
pub mod keg;
pub mod ports;
pub mod sample;
pub mod schema;
pub mod time;
pub mod wire;

pub use error::LagerError;
