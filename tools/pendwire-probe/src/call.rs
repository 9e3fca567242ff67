// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Request driver: stamped requests through a live channel.

use colored::*;
use crossbeam::channel::{unbounded, Sender};
use pendwire::config::{TcpConfig, UdpConfig};
use pendwire::transport::{TcpTransport, UdpTransport};
use pendwire::{
    completion_queue, Channel, ChannelConfig, Message, MetricsSnapshot, Request, StampedMessage,
    Transport,
};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct CallOptions {
    pub peer: SocketAddr,
    pub udp: bool,
    pub count: u64,
    pub timeout_ticks: u32,
    pub cancel_every: u64,
}

enum Reply {
    Response { stamp: u64, body: Vec<u8>, rtt: Duration },
    Failed { stamp: u64, after: Duration },
}

fn build_request(stamp: u64, ticks: u32, results: &Sender<Reply>) -> Arc<Request> {
    let started = Instant::now();
    let on_response = results.clone();
    let on_error = results.clone();
    Request::builder(StampedMessage::with_stamp(stamp, format!("probe-{}", stamp).into_bytes()))
        .timeout_ticks(ticks)
        .on_response(move |message: &dyn Message| {
            let body = message
                .downcast_ref::<StampedMessage>()
                .and_then(StampedMessage::reply)
                .map(<[u8]>::to_vec)
                .unwrap_or_default();
            let _ = on_response.send(Reply::Response {
                stamp,
                body,
                rtt: started.elapsed(),
            });
        })
        .on_error(move |_: &dyn Message| {
            let _ = on_error.send(Reply::Failed {
                stamp,
                after: started.elapsed(),
            });
        })
        .build()
}

pub fn run(options: &CallOptions, running: &Arc<AtomicBool>) -> Result<(), Box<dyn std::error::Error>> {
    let config = ChannelConfig::from_env();
    let transport: Arc<dyn Transport> = if options.udp {
        Arc::new(UdpTransport::new(UdpConfig::new(options.peer)))
    } else {
        Arc::new(TcpTransport::new(TcpConfig::new(options.peer)))
    };

    eprintln!(
        "{} Calling {}://{} ({} requests, timeout {} ticks of {:?})",
        ">>>".green().bold(),
        if options.udp { "udp" } else { "tcp" },
        options.peer,
        options.count,
        options.timeout_ticks,
        config.sweep_interval
    );

    // Longest a live request can wait: grace, timeout ticks, one extra sweep
    let budget = config.grace_period
        + config.sweep_interval * (options.timeout_ticks.saturating_add(2))
        + Duration::from_secs(1);

    let (sink, pump) = completion_queue();
    let channel = Channel::new(transport, Arc::new(sink), config);
    channel.initialize()?;

    let (results_tx, results_rx) = unbounded();
    let mut expected = 0u64;
    for stamp in 1..=options.count {
        let request = build_request(stamp, options.timeout_ticks, &results_tx);
        channel.submit(request.clone());
        if options.cancel_every > 0 && stamp % options.cancel_every == 0 {
            request.cancel();
            println!("  {} stamp={}", "cancel".yellow(), stamp);
        } else {
            expected += 1;
        }
    }
    drop(results_tx);

    let deadline = Instant::now() + budget;
    let mut responses = 0u64;
    let mut failures = 0u64;
    let mut rtts = Vec::new();
    while responses + failures < expected && running.load(Ordering::SeqCst) {
        if Instant::now() >= deadline {
            eprintln!("{}", "    Deadline reached, tearing down.".dimmed());
            break;
        }
        pump.run_for(Duration::from_millis(100));
        for reply in results_rx.try_iter() {
            match reply {
                Reply::Response { stamp, body, rtt } => {
                    responses += 1;
                    rtts.push(rtt);
                    println!(
                        "  {} stamp={} {:>8.2?} {}",
                        "ok".green(),
                        stamp,
                        rtt,
                        String::from_utf8_lossy(&body).dimmed()
                    );
                }
                Reply::Failed { stamp, after } => {
                    failures += 1;
                    println!("  {} stamp={} after {:.2?}", "fail".red(), stamp, after);
                }
            }
        }
    }

    channel.tear_down();
    pump.run_pending();
    for reply in results_rx.try_iter() {
        if let Reply::Failed { stamp, .. } = reply {
            failures += 1;
            println!("  {} stamp={} (drained)", "fail".red(), stamp);
        }
    }

    print_summary(responses, failures, &mut rtts, &channel.metrics().snapshot());
    Ok(())
}

fn print_summary(responses: u64, failures: u64, rtts: &mut [Duration], stats: &MetricsSnapshot) {
    println!();
    println!("{}", "=== Results ===".bold());
    println!("  Responses:      {}", responses.to_string().green());
    println!("  Network errors: {}", failures.to_string().red());
    if !rtts.is_empty() {
        rtts.sort_unstable();
        let p50 = rtts[rtts.len() / 2];
        let max = rtts[rtts.len() - 1];
        println!("  RTT p50/max:    {:.2?} / {:.2?}", p50, max);
    }

    println!();
    println!("{}", "=== Channel metrics ===".bold());
    let rows = [
        ("submitted", stats.submitted),
        ("transmitted", stats.transmitted),
        ("transmit_failures", stats.transmit_failures),
        ("cancelled_before_send", stats.cancelled_before_send),
        ("responses", stats.responses),
        ("cancelled_after_send", stats.cancelled_after_send),
        ("timeouts", stats.timeouts),
        ("malformed_frames", stats.malformed_frames),
        ("pushes", stats.pushes),
        ("pushes_dropped", stats.pushes_dropped),
        ("drained", stats.drained),
    ];
    for (name, value) in rows {
        let value = if value == 0 {
            value.to_string().dimmed()
        } else {
            value.to_string().normal()
        };
        println!("  {:<22} {}", name, value);
    }
}
