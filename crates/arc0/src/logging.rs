// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Global tracing subscriber setup.

use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber from `--log-format` / `--log-level`.
///
/// Uses `try_init` so calling it more than once (e.g. once per spawned test
/// process) never panics.
pub fn init(log_format: &str, log_level: &str) {
    let filter = if std::env::var("ARC0_LOG_LEVEL").is_err() && log_level == "info" {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level))
    } else {
        EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let result = match log_format {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}
