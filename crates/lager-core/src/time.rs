// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Time helpers. Out of scope per `spec.md` §1 ("anything cosmetic... sleep/time
//! helpers") beyond this one conversion, which the sample wire format needs.

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time as nanoseconds since the Unix epoch.
///
/// `spec.md` §3 fixes the sample timestamp at this resolution and epoch.
pub fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}
