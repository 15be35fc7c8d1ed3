// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The Clustered Hash-map Protocol: a replicated, eventually-consistent
//! key/value map kept in sync between one [`server::ChpServer`] and any
//! number of [`client::ChpClient`]s (`spec.md` §3/§4.B/§4.C).

pub mod client;
pub mod entry;
pub mod ids;
pub mod message;
pub mod server;

pub use client::ChpClient;
pub use entry::{ApplyOutcome, ChpMap, Entry};
pub use ids::Uuid;
pub use message::{ChpMessage, SnapshotRequest, HUGZ, ICANHAZ, KTHXBAI};
pub use server::ChpServer;
