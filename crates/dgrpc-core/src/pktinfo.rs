//! Ancillary-data (packet-info) helper — component A.
//!
//! Detects and builds `IP_PKTINFO`/`IPV6_PKTINFO` control messages so a
//! reply leaves through the same local address the request arrived on,
//! which matters on multi-homed hosts. Grounded directly on the
//! `svc_dg_store_in_pktinfo`/`svc_dg_store_in6_pktinfo`/`svc_dg_store_pktinfo`
//! trio and `svc_dg_enable_pktinfo` in the reference transport this crate is
//! modeled on; built with raw `libc` cmsg macros the way the ingest crate
//! this repository grew from handles `SO_TIMESTAMPNS` control messages.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::os::unix::io::RawFd;

/// Local destination address recovered from a received datagram's ancillary
/// data, or supplied by the caller to steer an outgoing reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LocalAddrInfo {
    pub addr: IpAddr,
    /// Interface index for IPv6 (`ipi6_ifindex`); unused for IPv4.
    pub ifindex: i32,
}

/// Enables per-family PKTINFO reception on a bound datagram socket. Mirrors
/// `svc_dg_enable_pktinfo`: best-effort, non-fatal on platforms/sockets that
/// reject the option (the feature then silently degrades — the reply's
/// source address becomes the kernel's choice).
pub fn enable_pktinfo(fd: RawFd, family: i32) {
    unsafe {
        match family {
            libc::AF_INET => {
                let on: libc::c_int = 1;
                let rc = libc::setsockopt(
                    fd,
                    libc::IPPROTO_IP,
                    libc::IP_PKTINFO,
                    &on as *const _ as *const libc::c_void,
                    std::mem::size_of::<libc::c_int>() as libc::socklen_t,
                );
                if rc != 0 {
                    tracing::debug!(fd, "IP_PKTINFO not supported by this socket/platform");
                }
            }
            libc::AF_INET6 => {
                let on: libc::c_int = 1;
                // Deliberately matches the reference: dual-stack sockets also
                // get IP_PKTINFO enabled here. Redundant for a true v4
                // socket, meaningful for an AF_INET6 socket accepting
                // v4-mapped traffic. See `spec.md` §9 design note — preserved
                // on purpose, not a bug.
                let rc_v4 = libc::setsockopt(
                    fd,
                    libc::IPPROTO_IP,
                    libc::IP_PKTINFO,
                    &on as *const _ as *const libc::c_void,
                    std::mem::size_of::<libc::c_int>() as libc::socklen_t,
                );
                if rc_v4 != 0 {
                    tracing::debug!(fd, "IP_PKTINFO not supported on this IPv6 socket");
                }
                let rc_v6 = libc::setsockopt(
                    fd,
                    libc::IPPROTO_IPV6,
                    libc::IPV6_RECVPKTINFO,
                    &on as *const _ as *const libc::c_void,
                    std::mem::size_of::<libc::c_int>() as libc::socklen_t,
                );
                if rc_v6 != 0 {
                    tracing::debug!(fd, "IPV6_RECVPKTINFO not supported by this socket/platform");
                }
            }
            _ => {}
        }
    }
}

/// Control-message scratch buffer big enough for one `in6_pktinfo` cmsg plus
/// header and alignment padding.
pub const CMSG_BUF_LEN: usize = 128;

/// Inspects a just-received `msghdr`'s control data for a `PKTINFO` message.
/// Returns `None` on any of: truncated control data, zero or more-than-one
/// control message, or a control message that isn't a recognized `PKTINFO`
/// (`spec.md` §4.A contract for `store_pktinfo`).
///
/// # Safety
/// `msg_hdr` must be a `msghdr` that was just populated by `recvmsg` on the
/// same control buffer referenced by `msg_hdr.msg_control`.
pub unsafe fn store_pktinfo(msg_hdr: &libc::msghdr, msg_flags: libc::c_int) -> Option<LocalAddrInfo> {
    if msg_flags & libc::MSG_CTRUNC != 0 {
        return None;
    }
    if msg_hdr.msg_controllen == 0 {
        return None;
    }

    let mut seen: Option<LocalAddrInfo> = None;
    let mut count = 0u32;
    let mut cmsg = libc::CMSG_FIRSTHDR(msg_hdr);
    while !cmsg.is_null() {
        count += 1;
        let hdr = &*cmsg;
        match (hdr.cmsg_level, hdr.cmsg_type) {
            (libc::IPPROTO_IP, libc::IP_PKTINFO) => {
                let data = libc::CMSG_DATA(cmsg) as *const libc::in_pktinfo;
                let info = &*data;
                let octets = info.ipi_addr.s_addr.to_ne_bytes();
                seen = Some(LocalAddrInfo {
                    addr: IpAddr::V4(Ipv4Addr::from(octets)),
                    ifindex: info.ipi_ifindex,
                });
            }
            (libc::IPPROTO_IPV6, libc::IPV6_PKTINFO) => {
                let data = libc::CMSG_DATA(cmsg) as *const libc::in6_pktinfo;
                let info = &*data;
                seen = Some(LocalAddrInfo {
                    addr: IpAddr::V6(Ipv6Addr::from(info.ipi6_addr.s6_addr)),
                    ifindex: info.ipi6_ifindex as i32,
                });
            }
            _ => {}
        }
        cmsg = libc::CMSG_NXTHDR(msg_hdr as *const _ as *mut _, cmsg);
    }

    if count != 1 {
        return None;
    }
    seen
}

/// Writes a `PKTINFO` control message into `cmsg_buf` matching `info`'s
/// address family. Returns the number of bytes used (0 on failure, e.g. the
/// buffer is too small). Mirrors `svc_dg_store_pktinfo` dispatching to the
/// v4/v6 builders.
pub fn set_pktinfo(cmsg_buf: &mut [u8], info: &LocalAddrInfo) -> usize {
    match info.addr {
        IpAddr::V4(v4) => {
            let space = unsafe { libc::CMSG_SPACE(std::mem::size_of::<libc::in_pktinfo>() as u32) as usize };
            if cmsg_buf.len() < space {
                return 0;
            }
            unsafe {
                let hdr = cmsg_buf.as_mut_ptr() as *mut libc::cmsghdr;
                (*hdr).cmsg_level = libc::IPPROTO_IP;
                (*hdr).cmsg_type = libc::IP_PKTINFO;
                (*hdr).cmsg_len = libc::CMSG_LEN(std::mem::size_of::<libc::in_pktinfo>() as u32) as _;
                let data = libc::CMSG_DATA(hdr) as *mut libc::in_pktinfo;
                (*data).ipi_ifindex = info.ifindex;
                (*data).ipi_spec_dst = libc::in_addr {
                    s_addr: u32::from_ne_bytes(v4.octets()),
                };
                (*data).ipi_addr = libc::in_addr { s_addr: 0 };
            }
            space
        }
        IpAddr::V6(v6) => {
            let space = unsafe { libc::CMSG_SPACE(std::mem::size_of::<libc::in6_pktinfo>() as u32) as usize };
            if cmsg_buf.len() < space {
                return 0;
            }
            unsafe {
                let hdr = cmsg_buf.as_mut_ptr() as *mut libc::cmsghdr;
                (*hdr).cmsg_level = libc::IPPROTO_IPV6;
                (*hdr).cmsg_type = libc::IPV6_PKTINFO;
                (*hdr).cmsg_len = libc::CMSG_LEN(std::mem::size_of::<libc::in6_pktinfo>() as u32) as _;
                let data = libc::CMSG_DATA(hdr) as *mut libc::in6_pktinfo;
                (*data).ipi6_ifindex = info.ifindex as _;
                (*data).ipi6_addr = libc::in6_addr { s6_addr: v6.octets() };
            }
            space
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a `msghdr` carrying one synthetic `IP_PKTINFO` cmsg with
    /// `ipi_addr` set to `addr` — the field the kernel fills on receive,
    /// distinct from `ipi_spec_dst` that `set_pktinfo` writes for an
    /// outgoing reply, so this is hand-built rather than round-tripped
    /// through `set_pktinfo`.
    fn build_ipv4_pktinfo_cmsg(buf: &mut [u8], addr: Ipv4Addr) -> libc::msghdr {
        unsafe {
            let hdr = buf.as_mut_ptr() as *mut libc::cmsghdr;
            (*hdr).cmsg_level = libc::IPPROTO_IP;
            (*hdr).cmsg_type = libc::IP_PKTINFO;
            (*hdr).cmsg_len = libc::CMSG_LEN(std::mem::size_of::<libc::in_pktinfo>() as u32) as _;
            let data = libc::CMSG_DATA(hdr) as *mut libc::in_pktinfo;
            (*data).ipi_ifindex = 0;
            (*data).ipi_spec_dst = libc::in_addr { s_addr: 0 };
            (*data).ipi_addr = libc::in_addr {
                s_addr: u32::from_ne_bytes(addr.octets()),
            };
        }
        build_msghdr(buf)
    }

    fn build_msghdr(control: &mut [u8]) -> libc::msghdr {
        let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
        msg.msg_control = control.as_mut_ptr() as *mut libc::c_void;
        msg.msg_controllen = control.len() as _;
        msg
    }

    #[test]
    fn store_pktinfo_decodes_single_ipv4_cmsg() {
        let mut buf = [0u8; CMSG_BUF_LEN];
        let space = unsafe { libc::CMSG_SPACE(std::mem::size_of::<libc::in_pktinfo>() as u32) as usize };
        let mut msg = build_ipv4_pktinfo_cmsg(&mut buf[..space], Ipv4Addr::new(127, 0, 0, 1));
        msg.msg_controllen = space as _;

        let info = unsafe { store_pktinfo(&msg, 0) }.expect("a well-formed single cmsg must decode");
        assert_eq!(info.addr, IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)));
    }

    /// S6 — `MSG_CTRUNC` on the received datagram means the control data is
    /// truncated and must not be trusted, regardless of what it contains.
    #[test]
    fn store_pktinfo_rejects_truncated_control_data() {
        let mut buf = [0u8; CMSG_BUF_LEN];
        let space = unsafe { libc::CMSG_SPACE(std::mem::size_of::<libc::in_pktinfo>() as u32) as usize };
        let mut msg = build_ipv4_pktinfo_cmsg(&mut buf[..space], Ipv4Addr::new(10, 0, 0, 1));
        msg.msg_controllen = space as _;

        assert!(unsafe { store_pktinfo(&msg, libc::MSG_CTRUNC) }.is_none());
    }

    #[test]
    fn store_pktinfo_rejects_empty_control_buffer() {
        let mut buf = [0u8; 0];
        let msg = build_msghdr(&mut buf);
        assert!(unsafe { store_pktinfo(&msg, 0) }.is_none());
    }
}
