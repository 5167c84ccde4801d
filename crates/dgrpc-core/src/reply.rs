//! Reply path — component E.
//!
//! Grounded on `svc_dg_reply` in the reference transport: encode, auth-wrap,
//! transmit, and on success hand the sent bytes to the cache via buffer
//! rotation.

use std::net::SocketAddr;
use std::sync::Arc;

use crate::addr::StoredAddr;
use crate::codec::{ReplyMessage, ReplyStatus};
use crate::endpoint::Endpoint;
use crate::flags;
use crate::pktinfo::LocalAddrInfo;
use crate::request::RequestContext;

/// Encodes, auth-wraps, and transmits `msg`; on a complete send, inserts the
/// reply into the endpoint's cache if one is enabled (`spec.md` §4.E).
///
/// This releases the recv interlock that `recv` handed off on its
/// dispatch-required path, regardless of outcome — see the `Drop` guard
/// below. That release is this crate's concrete reading of `spec.md` §4.E
/// step 8 / §9's duplex-lock hand-off.
pub fn reply(endpoint: &Arc<Endpoint>, ctx: &RequestContext, msg: &ReplyMessage) -> bool {
    struct ReleaseRecvInterlock<'a>(&'a Endpoint);
    impl Drop for ReleaseRecvInterlock<'_> {
        fn drop(&mut self) {
            self.0.flags.clear(flags::BLOCKED);
            unsafe {
                self.0.recv_lock.unlock();
            }
        }
    }
    let _release = ReleaseRecvInterlock(endpoint);

    let has_args = matches!(msg.status, ReplyStatus::Accepted);
    let wrapped = if has_args {
        match endpoint.auth.wrap(ctx.auth_handle, &msg.results) {
            Some(bytes) => Some(bytes),
            None => return false,
        }
    } else {
        None
    };

    let mut io_buf = endpoint.io_buf.lock().unwrap();
    let total = match endpoint.codec.encode_reply(&mut io_buf, msg, wrapped.as_deref()) {
        Some(total) => total,
        None => return false,
    };

    let sent = match send_datagram(endpoint, &io_buf[..total], ctx.peer_addr, ctx.local_addr) {
        Some(n) if n == total => n,
        _ => {
            crate::metrics::METRICS.send_failures.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return false;
        }
    };

    if let Some(cache) = endpoint.cache() {
        cache.set(&mut io_buf, endpoint.io_sz(), sent, msg.xid, ctx.peer_addr);
    }

    true
}

/// Raw `sendmsg` to `peer`, synthesizing a `PKTINFO` control message from
/// `local` when present so the reply sources from the address the request
/// arrived on (`spec.md` §4.A/§4.E step 5). Guarded narrowly by the
/// endpoint's send lock — shared with the cache-hit short-circuit in
/// `recv.rs`, which calls this same function.
pub(crate) fn send_datagram(
    endpoint: &Endpoint,
    bytes: &[u8],
    peer: StoredAddr,
    local: Option<LocalAddrInfo>,
) -> Option<usize> {
    let peer_addr = peer.to_socket_addr()?;
    let (storage, addrlen) = socket_addr_to_raw(peer_addr);
    let mut cmsg_buf = [0u8; crate::pktinfo::CMSG_BUF_LEN];
    let cmsg_len = local.map(|info| crate::pktinfo::set_pktinfo(&mut cmsg_buf, &info)).unwrap_or(0);

    endpoint.send_lock.lock();
    let rc = unsafe {
        let mut iov = libc::iovec {
            iov_base: bytes.as_ptr() as *mut libc::c_void,
            iov_len: bytes.len(),
        };
        let mut msg: libc::msghdr = std::mem::zeroed();
        msg.msg_name = &storage as *const _ as *mut libc::c_void;
        msg.msg_namelen = addrlen;
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        if cmsg_len > 0 {
            msg.msg_control = cmsg_buf.as_mut_ptr() as *mut libc::c_void;
            msg.msg_controllen = cmsg_len as _;
        }
        libc::sendmsg(endpoint.fd(), &msg, 0)
    };
    unsafe {
        endpoint.send_lock.unlock();
    }

    if rc < 0 {
        let err = std::io::Error::last_os_error();
        tracing::debug!(fd = endpoint.fd(), error = %err, "sendmsg failed");
        return None;
    }
    Some(rc as usize)
}

fn socket_addr_to_raw(addr: SocketAddr) -> (libc::sockaddr_storage, libc::socklen_t) {
    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    match addr {
        SocketAddr::V4(v4) => {
            let sin = libc::sockaddr_in {
                sin_family: libc::AF_INET as libc::sa_family_t,
                sin_port: v4.port().to_be(),
                sin_addr: libc::in_addr {
                    s_addr: u32::from_ne_bytes(v4.ip().octets()),
                },
                sin_zero: [0; 8],
            };
            unsafe {
                std::ptr::write(&mut storage as *mut _ as *mut libc::sockaddr_in, sin);
            }
            (storage, std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t)
        }
        SocketAddr::V6(v6) => {
            let sin6 = libc::sockaddr_in6 {
                sin6_family: libc::AF_INET6 as libc::sa_family_t,
                sin6_port: v6.port().to_be(),
                sin6_flowinfo: v6.flowinfo(),
                sin6_addr: libc::in6_addr { s6_addr: v6.ip().octets() },
                sin6_scope_id: v6.scope_id(),
            };
            unsafe {
                std::ptr::write(&mut storage as *mut _ as *mut libc::sockaddr_in6, sin6);
            }
            (storage, std::mem::size_of::<libc::sockaddr_in6>() as libc::socklen_t)
        }
    }
}
