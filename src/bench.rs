//! `dgrpcd bench` — fires a burst of calls at a running server and reports
//! round-trip latency plus duplicate-reply cache hit/miss counts.

use std::net::UdpSocket;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct BenchReport {
    pub target: String,
    pub calls_sent: u64,
    pub replies_received: u64,
    pub retransmits_sent: u64,
    pub retransmit_replies_received: u64,
    pub latency_mean_us: f64,
    pub latency_p50_us: u64,
    pub latency_p99_us: u64,
}

pub fn run(target: &str, count: u64, retransmit: bool) -> Result<()> {
    let socket = UdpSocket::bind("0.0.0.0:0").context("failed to bind client socket")?;
    socket
        .set_read_timeout(Some(Duration::from_millis(500)))
        .context("failed to set read timeout")?;
    socket.connect(target).with_context(|| format!("failed to connect to {target}"))?;

    let mut latencies_us = Vec::with_capacity(count as usize);
    let mut replies_received = 0u64;
    let mut retransmits_sent = 0u64;
    let mut retransmit_replies_received = 0u64;
    let mut recv_buf = [0u8; 8800];

    for i in 0..count {
        let xid = 0x1000_0000u32.wrapping_add(i as u32);
        let call = build_call(xid, 100003, 3, 1, b"ping");

        let started = Instant::now();
        socket.send(&call).context("send failed")?;
        if let Ok(n) = socket.recv(&mut recv_buf) {
            if n >= 8 {
                latencies_us.push(started.elapsed().as_micros() as u64);
                replies_received += 1;
            }
        }

        if retransmit {
            retransmits_sent += 1;
            socket.send(&call).context("retransmit send failed")?;
            if let Ok(n) = socket.recv(&mut recv_buf) {
                if n >= 8 {
                    retransmit_replies_received += 1;
                }
            }
        }
    }

    latencies_us.sort_unstable();
    let mean = if latencies_us.is_empty() {
        0.0
    } else {
        latencies_us.iter().sum::<u64>() as f64 / latencies_us.len() as f64
    };
    let pct = |p: f64| -> u64 {
        if latencies_us.is_empty() {
            0
        } else {
            let idx = ((latencies_us.len() as f64 - 1.0) * p).round() as usize;
            latencies_us[idx]
        }
    };

    let report = BenchReport {
        target: target.to_string(),
        calls_sent: count,
        replies_received,
        retransmits_sent,
        retransmit_replies_received,
        latency_mean_us: mean,
        latency_p50_us: pct(0.50),
        latency_p99_us: pct(0.99),
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// `xid, prog, vers, proc` (big-endian u32 each) followed by an opaque
/// body — matches `dgrpc_core::codec::FixedHeaderCodec`.
fn build_call(xid: u32, prog: u32, vers: u32, proc_: u32, body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16 + body.len());
    buf.extend_from_slice(&xid.to_be_bytes());
    buf.extend_from_slice(&prog.to_be_bytes());
    buf.extend_from_slice(&vers.to_be_bytes());
    buf.extend_from_slice(&proc_.to_be_bytes());
    buf.extend_from_slice(body);
    buf
}
