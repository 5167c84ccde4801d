//! Transport endpoint — component C.
//!
//! Per-fd state shared between the recv path (event-loop driven) and the
//! reply path (dispatch-worker driven). Grounded on the `SVCXPRT`/`svc_dg_data`
//! pairing and `svc_dg_ncreatef`/`svc_dg_destroy` in the reference
//! transport this crate is modeled on.

use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, IntoRawFd, RawFd};
use std::sync::{Arc, Mutex, OnceLock, RwLock, Weak};

use lock_api::RawMutex as _;
use parking_lot::RawMutex;
use socket2::Socket;

use crate::cache::Cache;
use crate::codec::{AuthWrap, CallCodec};
use crate::control::Overlay;
use crate::event_loop::EventRegistrar;
use crate::flags::{self, Flags};

/// Process-wide registry of live endpoints keyed by raw fd, standing in for
/// the reference's atomically refcounted `svc_xprt_lookup` table. `Arc`'s
/// strong count is the spec's `refcount` field; there is no separate manual
/// counter.
static ENDPOINTS: Mutex<Vec<(RawFd, Weak<Endpoint>)>> = Mutex::new(Vec::new());

/// Guards installation of an endpoint's op-vector overlay (`spec.md` §5
/// "op-vector lock is a single process-wide mutex"). Per the REDESIGN FLAG
/// in `spec.md` §9, the core ops (`recv`/`stat`/`getargs`/`reply`/
/// `freeargs`/`destroy`/`control`) are a fixed table and need no lock at
/// all; only overlay installation (`getreq`/`dispatch`/`free_user_data`)
/// goes through this lock.
pub(crate) static OP_LOCK: Mutex<()> = Mutex::new(());

/// Creation-time parameters (`spec.md` §4.C).
pub struct CreateOpts {
    pub send_sz: usize,
    pub recv_sz: usize,
    pub close_on_destroy: bool,
    pub codec: Arc<dyn CallCodec>,
    pub auth: Arc<dyn AuthWrap>,
}

pub struct Endpoint {
    /// Taken out by `destroy()`, which either drops it (closing the fd) or
    /// detaches it via `IntoRawFd` (leaking the fd on purpose) depending on
    /// `flags::CLOSE_ON_DESTROY`. Every other path reaches the fd through
    /// `fd`/`fd()`, never through this field.
    socket: Mutex<Option<Socket>>,
    fd: RawFd,
    pub(crate) send_sz: usize,
    pub(crate) recv_sz: usize,
    pub(crate) io_sz: usize,
    pub(crate) io_buf: Mutex<Vec<u8>>,
    pub(crate) local_addr: SocketAddr,
    pub(crate) recv_lock: RawMutex,
    pub(crate) send_lock: RawMutex,
    pub(crate) flags: Flags,
    pub(crate) cache: OnceLock<Cache>,
    pub(crate) codec: Arc<dyn CallCodec>,
    pub(crate) auth: Arc<dyn AuthWrap>,
    pub(crate) overlay: RwLock<Overlay>,
    /// Set once at registration time, cleared by `destroy()` once unregistered.
    registrar: Mutex<Option<Arc<dyn EventRegistrar>>>,
}

/// Endpoint lifecycle state exposed to `stat` (`spec.md` §4.C "Status").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EndpointStatus {
    Idle,
    Destroyed,
}

impl Endpoint {
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn io_sz(&self) -> usize {
        self.io_sz
    }

    pub fn cache(&self) -> Option<&Cache> {
        self.cache.get()
    }

    /// One-shot cache installation (`spec.md` §6 "Cache enablement is a
    /// one-shot per endpoint... re-enablement is rejected").
    pub fn enable_cache(&self, size: usize) -> bool {
        match self.cache.set(Cache::new(size)) {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(fd = self.fd, "duplicate-reply cache already enabled for this endpoint");
                false
            }
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.flags.is_set(flags::DESTROYED)
    }

    /// Get/set op-vector slots and flags under the op-vector lock
    /// (`spec.md` §4.F).
    pub fn control(&self, req: crate::control::ControlRequest) -> Option<crate::control::ControlResponse> {
        crate::control::control(self, req)
    }

    /// Status op (`spec.md` §4.C "Status"): if `BLOCKED` was set by this
    /// caller, release the outstanding recv interlock, then report whether
    /// `DESTROYED` is now set. `send_lock` is narrowly scoped inside
    /// `send_datagram` only (never held across a call boundary, per the
    /// duplex-lock design in `SPEC_FULL.md` §9) — there is nothing
    /// outstanding on the send side to release from here.
    pub fn stat(&self) -> EndpointStatus {
        if self.flags.is_set(flags::BLOCKED) {
            self.flags.clear(flags::BLOCKED);
            unsafe {
                self.recv_lock.unlock();
            }
        }
        if self.flags.is_set(flags::DESTROYED) {
            EndpointStatus::Destroyed
        } else {
            EndpointStatus::Idle
        }
    }

    /// Records the registrar `destroy()` should unregister from. Called by
    /// `event_loop::register_endpoint` once registration succeeds.
    pub(crate) fn set_registrar(&self, registrar: Arc<dyn EventRegistrar>) {
        *self.registrar.lock().unwrap() = Some(registrar);
    }
}

/// Atomically finds an existing endpoint for `fd` (bumping its refcount via
/// `Arc::clone`) or installs a freshly created one (`spec.md` §4.C
/// "Creation").
pub fn create_or_lookup(socket: Socket, opts: CreateOpts) -> anyhow::Result<Arc<Endpoint>> {
    let fd = socket.as_raw_fd();
    let mut registry = ENDPOINTS.lock().unwrap();
    registry.retain(|(_, weak)| weak.strong_count() > 0);
    if let Some((_, weak)) = registry.iter().find(|(f, _)| *f == fd) {
        if let Some(existing) = weak.upgrade() {
            return Ok(existing);
        }
    }

    let local_addr: SocketAddr = socket
        .local_addr()
        .map_err(anyhow::Error::from)?
        .as_socket()
        .ok_or_else(|| anyhow::anyhow!("bound address is not an IPv4/IPv6 socket address"))?;

    let family = match local_addr {
        SocketAddr::V4(_) => libc::AF_INET,
        SocketAddr::V6(_) => libc::AF_INET6,
    };

    let (send_sz, recv_sz, io_sz) = crate::sizing::resolve_sizes(opts.send_sz, opts.recv_sz, family)
        .ok_or_else(|| anyhow::anyhow!("requested send/recv size resolved to zero"))?;

    crate::pktinfo::enable_pktinfo(fd, family);

    let endpoint = Arc::new(Endpoint {
        socket: Mutex::new(Some(socket)),
        fd,
        send_sz,
        recv_sz,
        io_sz,
        io_buf: Mutex::new(vec![0u8; io_sz]),
        local_addr,
        recv_lock: RawMutex::INIT,
        send_lock: RawMutex::INIT,
        flags: Flags::new(),
        cache: OnceLock::new(),
        codec: opts.codec,
        auth: opts.auth,
        overlay: RwLock::new(Overlay::default()),
        registrar: Mutex::new(None),
    });

    if opts.close_on_destroy {
        endpoint.flags.set(flags::CLOSE_ON_DESTROY);
    }

    let already_initialized = endpoint.flags.test_and_set(flags::INITIALIZED);
    debug_assert!(!already_initialized, "freshly allocated endpoint cannot already be initialized");

    registry.push((fd, Arc::downgrade(&endpoint)));
    Ok(endpoint)
}

/// Tears the endpoint down once no references remain and destruction is
/// requested. Idempotent on the `DESTROYED` flag (`spec.md` §4.C
/// "Destruction", invariant #7).
pub fn destroy(endpoint: &Arc<Endpoint>) {
    if endpoint.flags.test_and_set(flags::DESTROYED) {
        return;
    }
    let fd = endpoint.fd;
    ENDPOINTS.lock().unwrap().retain(|(f, _)| *f != fd);

    if let Some(registrar) = endpoint.registrar.lock().unwrap().take() {
        registrar.unregister(fd);
    }

    if let Some(socket) = endpoint.socket.lock().unwrap().take() {
        if endpoint.flags.is_set(flags::CLOSE_ON_DESTROY) {
            drop(socket);
        } else {
            let _ = socket.into_raw_fd();
        }
    }

    if let Some(free) = endpoint.overlay.read().unwrap().free_user_data.clone() {
        free(endpoint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{FixedHeaderCodec, NullAuth};
    use socket2::{Domain, Type};

    fn fresh_endpoint(close_on_destroy: bool) -> Arc<Endpoint> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, None).unwrap();
        socket.bind(&"127.0.0.1:0".parse::<SocketAddr>().unwrap().into()).unwrap();
        create_or_lookup(
            socket,
            CreateOpts {
                send_sz: 0,
                recv_sz: 0,
                close_on_destroy,
                codec: Arc::new(FixedHeaderCodec),
                auth: Arc::new(NullAuth),
            },
        )
        .unwrap()
    }

    /// Invariant #7: two destroys on one endpoint execute the teardown at
    /// most once.
    #[test]
    fn destroy_is_idempotent() {
        let endpoint = fresh_endpoint(true);
        destroy(&endpoint);
        assert!(endpoint.is_destroyed());
        destroy(&endpoint);
        assert!(endpoint.is_destroyed());
    }

    #[test]
    fn close_on_destroy_flag_is_set_from_create_opts() {
        let endpoint = fresh_endpoint(true);
        assert!(endpoint.flags.is_set(flags::CLOSE_ON_DESTROY));

        let other = fresh_endpoint(false);
        assert!(!other.flags.is_set(flags::CLOSE_ON_DESTROY));
        destroy(&other);
    }
}
