//! Event-loop seam — component H (added).
//!
//! `spec.md` §1/§6 treats "the event-loop / poller that notifies readability
//! of file descriptors" as an external collaborator. This module is the
//! trait the transport core registers/unregisters endpoints against, plus a
//! `NullRegistrar` for unit tests and a thread-per-endpoint default the demo
//! binary runs — not a multiplexing reactor.

use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::endpoint::Endpoint;

/// Opaque channel-affinity token the runtime uses to group endpoints onto
/// the same worker/poll loop (`spec.md` §6 "event-loop registration with
/// channel-affinity").
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EventChannelId(pub u32);

pub const DEFAULT_CHANNEL: EventChannelId = EventChannelId(0);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegistrationPolicy {
    /// Register unless the caller explicitly opted out at creation.
    Default,
    ForceRegister,
    NoRegister,
}

pub trait EventRegistrar: Send + Sync {
    /// Registers `endpoint` for readability notifications on `channel`.
    /// Returns `false` if the policy or collaborator rejects registration.
    fn register(&self, endpoint: &Arc<Endpoint>, channel: EventChannelId, policy: RegistrationPolicy) -> bool;

    fn unregister(&self, fd: RawFd);
}

/// Registers `endpoint` with `registrar` and, on success, records the
/// registrar on the endpoint so `destroy()` can call `unregister` back
/// (`spec.md` §4.C Destruction: "unregisters from the event loop").
///
/// `EventRegistrar::register` takes `&self` rather than `self: Arc<Self>` to
/// stay object-safe on stable Rust, so the endpoint can't recover an `Arc`
/// to itself from inside the trait method — this free function is the
/// wiring point instead.
pub fn register_endpoint(
    registrar: &Arc<dyn EventRegistrar>,
    endpoint: &Arc<Endpoint>,
    channel: EventChannelId,
    policy: RegistrationPolicy,
) -> bool {
    if !registrar.register(endpoint, channel, policy) {
        return false;
    }
    endpoint.set_registrar(Arc::clone(registrar));
    true
}

/// No-op registrar for unit tests that drive `recv`/`reply` directly without
/// an event loop.
pub struct NullRegistrar;

impl EventRegistrar for NullRegistrar {
    fn register(&self, _endpoint: &Arc<Endpoint>, _channel: EventChannelId, policy: RegistrationPolicy) -> bool {
        !matches!(policy, RegistrationPolicy::NoRegister)
    }

    fn unregister(&self, _fd: RawFd) {}
}

/// Spawns one OS thread per registered endpoint; each thread loops calling
/// the endpoint's `getreq`/`dispatch` overlay (or the default dispatcher)
/// whenever `recv` signals a call is ready. Demo-grade stand-in for a real
/// poller, matching the scheduling model in `spec.md` §5 ("parallel OS
/// threads... the receive path may block in the kernel").
pub struct ThreadPerEndpointLoop {
    handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Default for ThreadPerEndpointLoop {
    fn default() -> Self {
        Self {
            handles: std::sync::Mutex::new(Vec::new()),
        }
    }
}

impl ThreadPerEndpointLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join_all(&self) {
        let mut handles = self.handles.lock().unwrap();
        for h in handles.drain(..) {
            let _ = h.join();
        }
    }
}

impl EventRegistrar for ThreadPerEndpointLoop {
    fn register(&self, endpoint: &Arc<Endpoint>, _channel: EventChannelId, policy: RegistrationPolicy) -> bool {
        if matches!(policy, RegistrationPolicy::NoRegister) {
            return false;
        }
        let endpoint = Arc::clone(endpoint);
        let handle = std::thread::Builder::new()
            .name(format!("dgrpc-ep-{}", endpoint.fd()))
            .spawn(move || crate::control::drive_endpoint(&endpoint))
            .expect("spawn endpoint worker thread");
        self.handles.lock().unwrap().push(handle);
        true
    }

    fn unregister(&self, fd: RawFd) {
        tracing::debug!(fd, "endpoint unregistered from thread-per-endpoint loop");
    }
}
