//! `dgrpcd serve` — runs the demo echo dispatcher over the transport core.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dgrpc_core::{
    create_or_lookup, register_endpoint, CreateOpts, EventRegistrar, FixedHeaderCodec, NullAuth,
    RegistrationPolicy, ThreadPerEndpointLoop, DEFAULT_CHANNEL,
};
use socket2::{Domain, Socket, Type};

use crate::config::ServeConfig;

pub fn run(config: &ServeConfig) -> Result<()> {
    let addr: std::net::SocketAddr = config.bind.parse().context("invalid bind address")?;
    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::DGRAM, None).context("socket(2) failed")?;
    socket.set_nonblocking(false)?;
    socket.bind(&addr.into()).context("bind failed")?;

    let endpoint = create_or_lookup(
        socket,
        CreateOpts {
            send_sz: config.send_sz,
            recv_sz: config.recv_sz,
            close_on_destroy: true,
            codec: Arc::new(FixedHeaderCodec),
            auth: Arc::new(NullAuth),
        },
    )?;

    if let Some(size) = config.cache_size {
        if !endpoint.enable_cache(size) {
            anyhow::bail!("duplicate-reply cache was already enabled for this endpoint");
        }
        tracing::info!(size, "duplicate-reply cache enabled");
    }

    tracing::info!(bind = %endpoint.local_addr(), io_sz = endpoint.io_sz(), "dgrpcd listening");

    let event_loop: Arc<dyn EventRegistrar> = Arc::new(ThreadPerEndpointLoop::new());
    if !register_endpoint(&event_loop, &endpoint, DEFAULT_CHANNEL, RegistrationPolicy::Default) {
        anyhow::bail!("event loop rejected endpoint registration");
    }

    loop {
        std::thread::sleep(Duration::from_secs(5));
        let snap = dgrpc_core::METRICS.snapshot();
        tracing::info!(
            received = snap.calls_received,
            dispatched = snap.calls_dispatched,
            cache_hits = snap.cache_hits,
            cache_misses = snap.cache_misses,
            decode_failures = snap.decode_failures,
            send_failures = snap.send_failures,
            "metrics"
        );
    }
}
