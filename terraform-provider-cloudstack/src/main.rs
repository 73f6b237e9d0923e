//! Terraform Provider for Apache CloudStack
//!
//! Speaks line-delimited JSON-RPC on stdin/stdout and manages firewall
//! rules, network ACL rules and networks through the CloudStack API.

mod cidr;
mod client;
mod data_sources;
mod provider;
mod resources;
mod schema;
#[cfg(test)]
mod stub_api;
mod tags;

use anyhow::Context;
use clap::Parser;
use provider::CloudStackProvider;
use std::io::{self, BufRead, Write};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Terraform Provider for Apache CloudStack
#[derive(Parser, Debug)]
#[command(name = "terraform-provider-cloudstack")]
#[command(about = "Terraform provider for Apache CloudStack")]
struct Args {
    /// Enable debug logging
    #[arg(long, env = "CLOUDSTACK_DEBUG")]
    debug: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // stdout carries the protocol, so logs go to stderr
    let default_level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_level.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Terraform Provider for CloudStack");

    let provider = CloudStackProvider::new().context("Failed to start async runtime")?;

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut stdout_lock = stdout.lock();

    for line in stdin.lock().lines() {
        let input = line.context("Failed to read request")?;
        if input.trim().is_empty() {
            continue;
        }

        let response = provider.handle_request(&input);
        writeln!(stdout_lock, "{}", response).context("Failed to write response")?;
        stdout_lock.flush().context("Failed to flush stdout")?;
    }

    tracing::info!("Terraform Provider shutting down");
    Ok(())
}
