// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Echo responder.

use colored::*;
use pendwire::frame::{parse_frame, FrameReader};
use pendwire::StampedMessage;
use std::io::{self, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// How often blocking calls come back to check for Ctrl+C.
const POLL: Duration = Duration::from_millis(100);

pub struct ServeOptions {
    pub bind: SocketAddr,
    pub delay: Duration,
    pub drop_every: u64,
}

/// Shared reply policy: delay, then echo unless this is an Nth frame.
struct Responder {
    delay: Duration,
    drop_every: u64,
    seen: AtomicU64,
}

impl Responder {
    fn new(options: &ServeOptions) -> Self {
        Self {
            delay: options.delay,
            drop_every: options.drop_every,
            seen: AtomicU64::new(0),
        }
    }

    /// Returns whether `frame` should be echoed.
    fn admit(&self, frame: &[u8], from: &SocketAddr) -> bool {
        let n = self.seen.fetch_add(1, Ordering::Relaxed) + 1;
        let stamp = parse_frame(frame).and_then(StampedMessage::peek_stamp);
        let label = match stamp {
            Some(stamp) => format!("stamp={}", stamp),
            None => format!("{} raw bytes", frame.len()),
        };

        if self.drop_every > 0 && n % self.drop_every == 0 {
            println!("  {} #{} {} from {}", "drop".yellow(), n, label, from);
            return false;
        }
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        println!("  {} #{} {} from {}", "echo".green(), n, label, from);
        true
    }
}

pub fn run_tcp(options: &ServeOptions, running: &Arc<AtomicBool>) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(options.bind)?;
    listener.set_nonblocking(true)?;
    eprintln!(
        "{} Echo responder on tcp://{}",
        ">>>".green().bold(),
        listener.local_addr()?
    );

    let responder = Arc::new(Responder::new(options));
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, from)) => {
                eprintln!("{} connection from {}", "+".cyan(), from);
                let responder = responder.clone();
                let running = running.clone();
                thread::Builder::new()
                    .name(format!("probe-conn-{}", from.port()))
                    .spawn(move || {
                        if let Err(e) = serve_connection(stream, from, &responder, &running) {
                            log::warn!("[serve] {}: {}", from, e);
                        }
                        eprintln!("{} {} disconnected", "-".cyan(), from);
                    })?;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => thread::sleep(POLL),
            Err(e) => return Err(e.into()),
        }
    }
    eprintln!("{}", "    Stopped.".dimmed());
    Ok(())
}

fn serve_connection(
    stream: TcpStream,
    from: SocketAddr,
    responder: &Responder,
    running: &AtomicBool,
) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(POLL))?;
    stream.set_nodelay(true)?;
    let mut reader = stream.try_clone()?;
    let mut writer = stream;
    let mut frames = FrameReader::new();

    while running.load(Ordering::SeqCst) {
        match frames.read_frame(&mut reader) {
            Ok(Some(frame)) => {
                if responder.admit(&frame, &from) {
                    writer.write_all(&frame)?;
                }
            }
            Ok(None) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

pub fn run_udp(options: &ServeOptions, running: &Arc<AtomicBool>) -> Result<(), Box<dyn std::error::Error>> {
    let socket = UdpSocket::bind(options.bind)?;
    socket.set_read_timeout(Some(POLL))?;
    eprintln!(
        "{} Echo responder on udp://{}",
        ">>>".green().bold(),
        socket.local_addr()?
    );

    let responder = Responder::new(options);
    let mut buf = vec![0u8; 65537];
    while running.load(Ordering::SeqCst) {
        match socket.recv_from(&mut buf) {
            Ok((n, from)) => {
                if responder.admit(&buf[..n], &from) {
                    socket.send_to(&buf[..n], from)?;
                }
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
            Err(e) => log::warn!("[serve] receive failed: {}", e),
        }
    }
    eprintln!("{}", "    Stopped.".dimmed());
    Ok(())
}
