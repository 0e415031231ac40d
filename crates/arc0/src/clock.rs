// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wall-clock timestamps for bookkeeping fields (`createdAt`, `lastSeen`,
//! `connectedAt`, ...) that this system never compares against transcript
//! timestamps, so a plain Unix-seconds string is enough; avoids pulling in a
//! date/time crate for it.

use std::time::{SystemTime, UNIX_EPOCH};

pub fn unix_timestamp() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_default()
}
