// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! pendwire-probe - exercise a pendwire channel against a live peer
//!
//! `serve` runs an echo responder; `call` drives stamped requests through a
//! `Channel` and reports each outcome plus the channel metrics.

mod call;
mod serve;

use clap::{Parser, Subcommand};
use colored::*;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// pendwire request/response probe
#[derive(Parser, Debug)]
#[command(name = "pendwire-probe")]
#[command(version)]
#[command(about = "Echo responder and request driver for pendwire channels")]
struct Args {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Echo every received frame back to its sender
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:7400")]
        bind: SocketAddr,

        /// Use UDP instead of TCP
        #[arg(long)]
        udp: bool,

        /// Delay before each reply, in milliseconds
        #[arg(long, default_value = "0")]
        delay_ms: u64,

        /// Skip every Nth reply (0 = never)
        #[arg(long, default_value = "0")]
        drop_every: u64,
    },
    /// Submit stamped requests and report their outcomes
    Call {
        /// Responder address
        #[arg(short, long, default_value = "127.0.0.1:7400")]
        peer: SocketAddr,

        /// Use UDP instead of TCP
        #[arg(long)]
        udp: bool,

        /// Number of requests
        #[arg(short = 'n', long, default_value = "10")]
        count: u64,

        /// Per-request timeout, in sweep ticks
        #[arg(short, long, default_value = "10")]
        timeout_ticks: u32,

        /// Cancel every Nth request inside its grace window (0 = never)
        #[arg(long, default_value = "0")]
        cancel_every: u64,
    },
}

fn main() {
    // Initialize logger for RUST_LOG-based debug output
    env_logger::init();

    let args = Args::parse();

    if let Err(e) = run(&args) {
        eprintln!("{}: {}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    match &args.mode {
        Mode::Serve {
            bind,
            udp,
            delay_ms,
            drop_every,
        } => {
            let options = serve::ServeOptions {
                bind: *bind,
                delay: std::time::Duration::from_millis(*delay_ms),
                drop_every: *drop_every,
            };
            if *udp {
                serve::run_udp(&options, &running)
            } else {
                serve::run_tcp(&options, &running)
            }
        }
        Mode::Call {
            peer,
            udp,
            count,
            timeout_ticks,
            cancel_every,
        } => call::run(
            &call::CallOptions {
                peer: *peer,
                udp: *udp,
                count: *count,
                timeout_ticks: *timeout_ticks,
                cancel_every: *cancel_every,
            },
            &running,
        ),
    }
}
