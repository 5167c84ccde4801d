//! End-to-end scenarios over real loopback UDP sockets (`spec.md` §8 S1-S5).
//!
//! Each test drives a full endpoint through `ThreadPerEndpointLoop`, talking
//! to it from a plain `std::net::UdpSocket` client — no mocked transport.

use std::net::{SocketAddr, UdpSocket};
use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dgrpc_core::{
    create_or_lookup, register_endpoint, ControlRequest, ControlResponse, CreateOpts, EventChannelId,
    EventRegistrar, FixedHeaderCodec, LocalAddrInfo, NullAuth, RegistrationPolicy, ThreadPerEndpointLoop,
    DEFAULT_CHANNEL,
};
use socket2::{Domain, Socket, Type};

fn spawn_endpoint(cache_size: Option<usize>) -> (Arc<dgrpc_core::Endpoint>, SocketAddr, Arc<dyn EventRegistrar>) {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, None).unwrap();
    socket.bind(&"127.0.0.1:0".parse::<SocketAddr>().unwrap().into()).unwrap();

    let endpoint = create_or_lookup(
        socket,
        CreateOpts {
            send_sz: 0,
            recv_sz: 0,
            close_on_destroy: true,
            codec: Arc::new(FixedHeaderCodec),
            auth: Arc::new(NullAuth),
        },
    )
    .unwrap();

    if let Some(size) = cache_size {
        assert!(endpoint.enable_cache(size));
    }

    let addr = endpoint.local_addr();
    let event_loop: Arc<dyn EventRegistrar> = Arc::new(ThreadPerEndpointLoop::new());
    assert!(register_endpoint(&event_loop, &endpoint, DEFAULT_CHANNEL, RegistrationPolicy::Default));
    (endpoint, addr, event_loop)
}

fn client() -> UdpSocket {
    let sock = UdpSocket::bind("127.0.0.1:0").unwrap();
    sock.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
    sock
}

fn build_call(xid: u32, prog: u32, vers: u32, proc_: u32, body: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16 + body.len());
    buf.extend_from_slice(&xid.to_be_bytes());
    buf.extend_from_slice(&prog.to_be_bytes());
    buf.extend_from_slice(&vers.to_be_bytes());
    buf.extend_from_slice(&proc_.to_be_bytes());
    buf.extend_from_slice(body);
    buf
}

/// S1 — a well-formed call gets dispatched and answered with a matching xid.
#[test]
fn happy_call_round_trips_with_matching_xid() {
    let (_endpoint, addr, _loop) = spawn_endpoint(None);
    let sock = client();

    let call = build_call(0xCAFEBABE, 100003, 3, 1, b"hello");
    sock.send_to(&call, addr).unwrap();

    let mut buf = [0u8; 256];
    let (n, _from) = sock.recv_from(&mut buf).expect("expected a reply");
    assert!(n >= 8);
    let xid = u32::from_be_bytes(buf[0..4].try_into().unwrap());
    let status = u32::from_be_bytes(buf[4..8].try_into().unwrap());
    assert_eq!(xid, 0xCAFEBABE);
    assert_eq!(status, 0, "default dispatcher accepts every call");
}

/// S2 — retransmitting the exact same call is answered from the duplicate-
/// reply cache rather than being redispatched.
#[test]
fn retransmit_is_served_from_cache_without_redispatch() {
    let (_endpoint, addr, _loop) = spawn_endpoint(Some(8));
    let sock = client();

    let call = build_call(0x1234, 100003, 3, 1, b"ping");

    sock.send_to(&call, addr).unwrap();
    let mut buf = [0u8; 256];
    let (n1, _) = sock.recv_from(&mut buf).unwrap();
    let first_reply = buf[..n1].to_vec();

    let before = dgrpc_core::METRICS.snapshot();

    sock.send_to(&call, addr).unwrap();
    let (n2, _) = sock.recv_from(&mut buf).unwrap();
    let second_reply = buf[..n2].to_vec();

    let after = dgrpc_core::METRICS.snapshot();

    assert_eq!(first_reply, second_reply);
    assert_eq!(after.cache_hits, before.cache_hits + 1);
    assert_eq!(
        after.calls_dispatched, before.calls_dispatched,
        "a cache hit must not reach the dispatcher"
    );
}

/// S5 — a datagram shorter than the 16-byte call header minimum is dropped
/// silently; the endpoint keeps serving subsequent well-formed calls.
#[test]
fn short_datagram_is_dropped_and_endpoint_stays_usable() {
    let (_endpoint, addr, _loop) = spawn_endpoint(None);
    let sock = client();

    sock.send_to(&[1u8, 2, 3], addr).unwrap();

    let mut buf = [0u8; 64];
    assert!(
        sock.recv_from(&mut buf).is_err(),
        "a short datagram must not produce a reply"
    );

    let call = build_call(0x42, 1, 1, 1, b"");
    sock.send_to(&call, addr).unwrap();
    let (n, _) = sock.recv_from(&mut buf).expect("endpoint must still answer valid calls");
    let xid = u32::from_be_bytes(buf[0..4].try_into().unwrap());
    assert!(n >= 8);
    assert_eq!(xid, 0x42);
}

/// S4 — the local address a call arrived on (via `IP_PKTINFO`) is captured
/// and available to the dispatcher.
#[test]
fn pktinfo_captures_local_address_on_loopback() {
    let (endpoint, addr, _loop) = spawn_endpoint(None);
    let captured: Arc<Mutex<Option<LocalAddrInfo>>> = Arc::new(Mutex::new(None));
    let captured_for_hook = Arc::clone(&captured);

    dgrpc_core::control::set_dispatch(
        &endpoint,
        Arc::new(move |ep, ctx| {
            *captured_for_hook.lock().unwrap() = ctx.local_addr;
            let reply = dgrpc_core::ReplyMessage {
                xid: ctx.call.unwrap().xid,
                status: dgrpc_core::ReplyStatus::Accepted,
                results: Vec::new(),
            };
            let _ = dgrpc_core::reply::reply(&ep, &ctx, &reply);
        }),
    );

    let sock = client();
    let call = build_call(0x9, 1, 1, 1, b"");
    sock.send_to(&call, addr).unwrap();
    let mut buf = [0u8; 64];
    sock.recv_from(&mut buf).expect("expected a reply");

    let info = captured.lock().unwrap().expect("PKTINFO should have been captured on loopback");
    assert_eq!(info.addr, "127.0.0.1".parse::<std::net::IpAddr>().unwrap());
}

#[test]
fn control_surface_reports_flags_and_sizes() {
    let (endpoint, _addr, _loop) = spawn_endpoint(None);

    match endpoint.control(ControlRequest::GetFlags) {
        Some(ControlResponse::Flags(bits)) => assert_eq!(bits & 0x1, 0x1, "INITIALIZED must be set after creation"),
        other => panic!("unexpected response: {other:?}"),
    }

    match endpoint.control(ControlRequest::GetRecvSz) {
        Some(ControlResponse::Size(sz)) => assert!(sz > 0),
        other => panic!("unexpected response: {other:?}"),
    }
}

/// Registrar test double that just counts `unregister` calls, standing in
/// for a real poller to prove `destroy` reaches it (`spec.md` §4.C
/// Destruction: "unregisters from the event loop").
struct CountingRegistrar {
    unregistered: Mutex<Vec<RawFd>>,
}

impl CountingRegistrar {
    fn new() -> Self {
        Self {
            unregistered: Mutex::new(Vec::new()),
        }
    }
}

impl EventRegistrar for CountingRegistrar {
    fn register(&self, _endpoint: &Arc<dgrpc_core::Endpoint>, _channel: EventChannelId, _policy: RegistrationPolicy) -> bool {
        true
    }

    fn unregister(&self, fd: RawFd) {
        self.unregistered.lock().unwrap().push(fd);
    }
}

#[test]
fn destroy_unregisters_from_the_event_loop() {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, None).unwrap();
    socket.bind(&"127.0.0.1:0".parse::<SocketAddr>().unwrap().into()).unwrap();

    let endpoint = create_or_lookup(
        socket,
        CreateOpts {
            send_sz: 0,
            recv_sz: 0,
            close_on_destroy: true,
            codec: Arc::new(FixedHeaderCodec),
            auth: Arc::new(NullAuth),
        },
    )
    .unwrap();
    let fd = endpoint.fd();

    let concrete = Arc::new(CountingRegistrar::new());
    let registrar: Arc<dyn EventRegistrar> = concrete.clone();
    assert!(register_endpoint(&registrar, &endpoint, DEFAULT_CHANNEL, RegistrationPolicy::Default));
    assert!(concrete.unregistered.lock().unwrap().is_empty());

    dgrpc_core::destroy(&endpoint);

    assert_eq!(*concrete.unregistered.lock().unwrap(), vec![fd]);
}
