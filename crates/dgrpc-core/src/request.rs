//! Per-call request context (`spec.md` §3 "Request context").

use crate::addr::StoredAddr;
use crate::pktinfo::LocalAddrInfo;

/// The fields of a decoded call header the cache and dispatcher need.
/// Deliberately not a full RPC call message — message decode is component G
/// (the codec seam), an external collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallHeader {
    pub xid: u32,
    pub prog: u32,
    pub vers: u32,
    pub proc_: u32,
}

/// Stack/arena-allocated per-call state handed from `recv` through dispatch
/// to `reply`.
#[derive(Clone)]
pub struct RequestContext {
    pub call: Option<CallHeader>,
    pub peer_addr: StoredAddr,
    pub local_addr: Option<LocalAddrInfo>,
    /// 64-bit fingerprint over the first `min(256, len)` bytes of the
    /// datagram. Not the cache key (`spec.md` §9 "Non-restartable checksum").
    pub cksum: u64,
    /// Opaque authentication handle, passed through to the auth wrap/unwrap
    /// seam untouched by the transport core.
    pub auth_handle: u64,
    /// Raw bytes past the call header, captured verbatim by `recv`. Still
    /// auth-wrapped until `getargs` unwraps it (`spec.md` §4.D step 9).
    pub body: Vec<u8>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self {
            call: None,
            peer_addr: StoredAddr::default(),
            local_addr: None,
            cksum: 0,
            auth_handle: 0,
            body: Vec::new(),
        }
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
