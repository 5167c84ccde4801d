//! `getargs`/`freeargs` — the two provided operations that sit between
//! `recv` and the procedure call (`spec.md` §3 op-vector list; §4.D step 9
//! "the dispatcher will invoke `getargs`, then the procedure, then
//! `reply`").
//!
//! Unlike `recv`/`reply`, these aren't invoked by a generic loop on every
//! endpoint uniformly — a real RPC stub decodes its own procedure's
//! argument type, so the call site is the dispatcher (`control::
//! default_dispatch`, or a custom `dispatch` overlay hook). This module just
//! provides the two ops; wiring them in is the dispatcher's job.

use crate::endpoint::Endpoint;
use crate::request::RequestContext;

/// Unwraps `ctx.body` (the raw bytes past the call header, captured
/// verbatim by `recv`) through the endpoint's auth flavor. Returns `None` on
/// an auth unwrap failure — callers should treat that the same as a decode
/// failure and skip the procedure (`spec.md` §7 "all failures are
/// boolean/absent returns").
pub fn getargs(endpoint: &Endpoint, ctx: &RequestContext) -> Option<Vec<u8>> {
    endpoint.auth.unwrap(ctx.auth_handle, &ctx.body)
}

/// Releases the decoded-argument buffer. Idempotent: calling it twice, or on
/// a context that never ran `getargs`, is a no-op.
pub fn freeargs(ctx: &mut RequestContext) -> bool {
    ctx.body.clear();
    ctx.body.shrink_to_fit();
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{FixedHeaderCodec, NullAuth};
    use crate::endpoint::{create_or_lookup, CreateOpts};
    use socket2::{Domain, Socket, Type};
    use std::net::SocketAddr;
    use std::sync::Arc;

    fn endpoint() -> Arc<Endpoint> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, None).unwrap();
        socket.bind(&"127.0.0.1:0".parse::<SocketAddr>().unwrap().into()).unwrap();
        create_or_lookup(
            socket,
            CreateOpts {
                send_sz: 0,
                recv_sz: 0,
                close_on_destroy: true,
                codec: Arc::new(FixedHeaderCodec),
                auth: Arc::new(NullAuth),
            },
        )
        .unwrap()
    }

    #[test]
    fn getargs_unwraps_body_through_null_auth() {
        let ep = endpoint();
        let mut ctx = RequestContext::new();
        ctx.body = b"hello".to_vec();
        let args = getargs(&ep, &ctx).unwrap();
        assert_eq!(args, b"hello");
    }

    #[test]
    fn freeargs_clears_the_body_buffer() {
        let mut ctx = RequestContext::new();
        ctx.body = b"payload".to_vec();
        assert!(freeargs(&mut ctx));
        assert!(ctx.body.is_empty());
    }
}
