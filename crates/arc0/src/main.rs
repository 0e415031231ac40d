// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use arc0::config::Config;

#[tokio::main]
async fn main() {
    let config = Config::parse();

    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    arc0::logging::init(&config.log_format, &config.log_level);

    match arc0::lifecycle::start(config).await {
        Ok(daemon) => {
            daemon.wait().await;
            daemon.shutdown().await;
            std::process::exit(0);
        }
        Err(e) => {
            error!("fatal: {e:#}");
            std::process::exit(1);
        }
    }
}
