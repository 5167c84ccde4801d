//! Receive path — component D.
//!
//! Grounded on `svc_dg_recv` in the reference transport: pull one datagram
//! into the endpoint's buffer, decode the call header or short-circuit on a
//! duplicate-reply cache hit.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use std::sync::Arc;

use crate::addr::StoredAddr;
use crate::endpoint::Endpoint;
use crate::flags;

/// Attempts to receive and classify one datagram. Returns `true` when the
/// dispatcher should be invoked (a fresh call was decoded); returns `false`
/// when there is nothing more to do this cycle — either the datagram was
/// invalid/undersized, or a cache hit was already replied to in place
/// (`spec.md` §4.D).
///
/// On entry this acquires the endpoint's recv interlock. On the `false`
/// path it releases that interlock before returning. On the `true` path the
/// interlock is deliberately left held — `reply.rs::reply` releases it once
/// the dispatcher's reply has been sent (`spec.md` §5).
pub fn recv(endpoint: &Arc<Endpoint>, ctx: &mut crate::request::RequestContext) -> bool {
    endpoint.recv_lock.lock();
    endpoint.flags.set(flags::BLOCKED);

    let needs_dispatch = recv_locked(endpoint, ctx);
    if !needs_dispatch {
        endpoint.flags.clear(flags::BLOCKED);
        unsafe {
            endpoint.recv_lock.unlock();
        }
    }
    needs_dispatch
}

fn recv_locked(endpoint: &Endpoint, ctx: &mut crate::request::RequestContext) -> bool {
    let fd = endpoint.fd();
    let mut io_buf = endpoint.io_buf.lock().unwrap();

    let mut cmsg_buf = [0u8; crate::pktinfo::CMSG_BUF_LEN];
    let mut peer_storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };

    let (n, msg) = loop {
        let mut iov = libc::iovec {
            iov_base: io_buf.as_mut_ptr() as *mut libc::c_void,
            iov_len: io_buf.len(),
        };
        let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
        msg.msg_name = &mut peer_storage as *mut _ as *mut libc::c_void;
        msg.msg_namelen = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = cmsg_buf.as_mut_ptr() as *mut libc::c_void;
        msg.msg_controllen = cmsg_buf.len() as _;

        let rc = unsafe { libc::recvmsg(fd, &mut msg, 0) };
        if rc < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            tracing::debug!(fd, error = %err, "recvmsg failed");
            return false;
        }
        break (rc as usize, msg);
    };

    if n < 16 {
        tracing::trace!(fd, n, "datagram below minimum valid length, dropping");
        return false;
    }

    ctx.peer_addr = sockaddr_storage_to_socket_addr(&peer_storage, msg.msg_namelen)
        .map(StoredAddr::from_socket_addr)
        .unwrap_or_default();

    ctx.local_addr = unsafe { crate::pktinfo::store_pktinfo(&msg, msg.msg_flags) };

    let (call, body_offset) = match endpoint.codec.decode_call(&io_buf[..n]) {
        Some(v) => v,
        None => {
            crate::metrics::METRICS.decode_failures.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            tracing::debug!(fd, "call header decode failed, dropping datagram");
            return false;
        }
    };
    crate::metrics::METRICS.calls_received.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

    let window_len = n.min(256);
    ctx.cksum = crate::hash::stable_hash64_seeded(103, &io_buf[..window_len]);
    ctx.call = Some(call);
    ctx.body = io_buf[body_offset..n].to_vec();

    if let Some(cache) = endpoint.cache() {
        if let Some(cached) = cache.get(&call, ctx.peer_addr) {
            crate::metrics::METRICS.cache_hits.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            crate::reply::send_datagram(endpoint, &cached, ctx.peer_addr, ctx.local_addr);
            return false;
        }
        crate::metrics::METRICS.cache_misses.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    true
}

fn sockaddr_storage_to_socket_addr(storage: &libc::sockaddr_storage, len: libc::socklen_t) -> Option<SocketAddr> {
    match storage.ss_family as i32 {
        libc::AF_INET if len as usize >= std::mem::size_of::<libc::sockaddr_in>() => {
            let sin = unsafe { &*(storage as *const _ as *const libc::sockaddr_in) };
            let ip = Ipv4Addr::from(sin.sin_addr.s_addr.to_ne_bytes());
            let port = u16::from_be(sin.sin_port);
            Some(SocketAddr::V4(SocketAddrV4::new(ip, port)))
        }
        libc::AF_INET6 if len as usize >= std::mem::size_of::<libc::sockaddr_in6>() => {
            let sin6 = unsafe { &*(storage as *const _ as *const libc::sockaddr_in6) };
            let ip = Ipv6Addr::from(sin6.sin6_addr.s6_addr);
            let port = u16::from_be(sin6.sin6_port);
            Some(SocketAddr::V6(SocketAddrV6::new(ip, port, sin6.sin6_flowinfo, sin6.sin6_scope_id)))
        }
        _ => None,
    }
}
