//! Control surface — component F, and the op-vector overlay that backs it.
//!
//! `spec.md` §9 flags the reference's single mutable, process-wide op-vector
//! as worth re-expressing for a language with real ownership: here the core
//! ops (`recv`/`stat`/`getargs`/`reply`/`freeargs`/`destroy`/`control`) are
//! plain free functions — there is nothing to install, so nothing to lock —
//! and only the three upper-layer hooks (`getreq`, `dispatch`,
//! `free_user_data`) live in a per-endpoint overlay. `OP_LOCK` now guards
//! only overlay installation, per that redesign note.

use std::sync::Arc;

use crate::endpoint::{Endpoint, EndpointStatus, OP_LOCK};
use crate::flags;
use crate::request::RequestContext;

pub type GetReqHook = Arc<dyn Fn(&Arc<Endpoint>, &mut RequestContext) -> bool + Send + Sync>;
/// Custom dispatch hooks own the full procedure sequence: call `args::
/// getargs` to unwrap `ctx.body` before consuming it, and `args::freeargs`
/// once the procedure output has been handed to `reply` (`spec.md` §4.D
/// step 9). `default_dispatch` below is the reference sequence to follow.
pub type DispatchHook = Arc<dyn Fn(Arc<Endpoint>, RequestContext) + Send + Sync>;
pub type FreeUserDataHook = Arc<dyn Fn(&Endpoint) + Send + Sync>;

#[derive(Default, Clone)]
pub struct Overlay {
    pub getreq: Option<GetReqHook>,
    pub dispatch: Option<DispatchHook>,
    pub free_user_data: Option<FreeUserDataHook>,
}

/// Installs the dispatch hook invoked whenever `recv` returns `true`. Held
/// under `OP_LOCK` for the duration of the install (`spec.md` §5).
pub fn set_dispatch(endpoint: &Endpoint, hook: DispatchHook) {
    let _guard = OP_LOCK.lock().unwrap();
    endpoint.overlay.write().unwrap().dispatch = Some(hook);
}

pub fn set_getreq(endpoint: &Endpoint, hook: GetReqHook) {
    let _guard = OP_LOCK.lock().unwrap();
    endpoint.overlay.write().unwrap().getreq = Some(hook);
}

pub fn set_free_user_data(endpoint: &Endpoint, hook: FreeUserDataHook) {
    let _guard = OP_LOCK.lock().unwrap();
    endpoint.overlay.write().unwrap().free_user_data = Some(hook);
}

/// Small pairs-of-accessors protocol over flags and buffer sizes
/// (`spec.md` §4.F). Unknown request codes have no representation in this
/// enum — the type system rejects them at the call site rather than at
/// runtime, which is this crate's reading of "unknown codes return false."
#[derive(Clone, Copy, Debug)]
pub enum ControlRequest {
    GetFlags,
    SetFlags(u32),
    GetRecvSz,
    GetSendSz,
    /// `stat` op-vector entry (`spec.md` §4.C "Status").
    Stat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlResponse {
    Flags(u32),
    Size(usize),
    Ack,
    Status(EndpointStatus),
}

pub fn control(endpoint: &Endpoint, req: ControlRequest) -> Option<ControlResponse> {
    match req {
        ControlRequest::GetFlags => Some(ControlResponse::Flags(endpoint.flags.get())),
        ControlRequest::SetFlags(bits) => {
            endpoint.flags.set(bits);
            Some(ControlResponse::Ack)
        }
        ControlRequest::GetRecvSz => Some(ControlResponse::Size(endpoint.recv_sz)),
        ControlRequest::GetSendSz => Some(ControlResponse::Size(endpoint.send_sz)),
        ControlRequest::Stat => Some(ControlResponse::Status(endpoint.stat())),
    }
}

/// Default `getreq`/`dispatch` glue used when no overlay hook has been
/// installed: unwraps the call body via `getargs`, echoes it back as an
/// accepted reply, then releases the argument buffer via `freeargs` —
/// the sequence `spec.md` §4.D step 9 describes ("the dispatcher will
/// invoke `getargs`, then the procedure, then `reply`"). Stands in for "the
/// runtime's dispatch glue" `spec.md` §6 calls the default.
fn default_dispatch(endpoint: Arc<Endpoint>, mut ctx: RequestContext) {
    // `reply` owns releasing the recv interlock handed off by `recv`
    // (`spec.md` §4.E step 8), so every path through here — including a
    // `getargs` failure — must still reach it.
    let call = match ctx.call {
        Some(c) => c,
        None => return,
    };
    let reply = match crate::args::getargs(&endpoint, &ctx) {
        Some(args) => crate::codec::ReplyMessage {
            xid: call.xid,
            status: crate::codec::ReplyStatus::Accepted,
            results: args,
        },
        None => {
            tracing::debug!(xid = call.xid, "getargs failed, rejecting call");
            crate::codec::ReplyMessage {
                xid: call.xid,
                status: crate::codec::ReplyStatus::Rejected,
                results: Vec::new(),
            }
        }
    };
    let _ = crate::reply::reply(&endpoint, &ctx, &reply);
    crate::args::freeargs(&mut ctx);
}

/// Thread-per-endpoint worker body (`spec.md` §5 scheduling model): loop
/// `recv` → on a call, invoke the installed `getreq`/`dispatch` overlay (or
/// the default echo dispatcher) → stop once `DESTROYED` is observed.
pub fn drive_endpoint(endpoint: &Arc<Endpoint>) {
    loop {
        if endpoint.flags.is_set(flags::DESTROYED) {
            return;
        }
        let mut ctx = RequestContext::new();
        let needs_dispatch = crate::recv::recv(endpoint, &mut ctx);
        if endpoint.flags.is_set(flags::DESTROYED) {
            return;
        }
        if !needs_dispatch {
            continue;
        }

        let overlay = endpoint.overlay.read().unwrap().clone();
        if let Some(getreq) = overlay.getreq.as_ref() {
            if !getreq(endpoint, &mut ctx) {
                continue;
            }
        }
        crate::metrics::METRICS
            .calls_dispatched
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        match overlay.dispatch {
            Some(dispatch) => dispatch(Arc::clone(endpoint), ctx),
            None => default_dispatch(Arc::clone(endpoint), ctx),
        }
    }
}
