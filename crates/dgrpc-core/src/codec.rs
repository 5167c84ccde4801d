//! Codec and auth seam — component G (added).
//!
//! `spec.md` §1 places call/reply header codec and auth wrap/unwrap firmly
//! out of scope ("external collaborators"). This module defines the traits
//! the transport core calls into, plus one minimal reference implementation
//! used by the demo binary and the integration tests — not a real XDR
//! encoding, deliberately.

use crate::request::CallHeader;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplyStatus {
    Accepted,
    Rejected,
}

/// What the dispatcher hands to the reply path once a procedure has run.
pub struct ReplyMessage {
    pub xid: u32,
    pub status: ReplyStatus,
    /// Opaque procedure output, encoded through the auth wrapper when
    /// `status == Accepted` (`spec.md` §4.E step 2).
    pub results: Vec<u8>,
}

/// Positioned decode/encode of the standardized call/reply messages
/// (`spec.md` §6 "Required collaborators").
pub trait CallCodec: Send + Sync {
    /// Decodes a call header from the front of `buf`. Returns the header and
    /// the byte offset where the call body begins, or `None` on malformed
    /// input.
    fn decode_call(&self, buf: &[u8]) -> Option<(CallHeader, usize)>;

    /// Encodes the reply header (and, for an accepted reply, the
    /// already-auth-wrapped result bytes) into `out`, starting at offset 0.
    /// Returns the number of bytes written, or `None` on encode failure.
    fn encode_reply(&self, out: &mut [u8], reply: &ReplyMessage, wrapped_results: Option<&[u8]>) -> Option<usize>;
}

/// Auth flavor wrap/unwrap, keyed on the request's auth handle
/// (`spec.md` §6).
pub trait AuthWrap: Send + Sync {
    fn wrap(&self, auth_handle: u64, results: &[u8]) -> Option<Vec<u8>>;
    fn unwrap(&self, auth_handle: u64, body: &[u8]) -> Option<Vec<u8>>;
}

/// `AUTH_NONE`-equivalent: always succeeds, copies bytes through untouched.
/// Used by the demo binary and tests; not a real authentication flavor.
pub struct NullAuth;

impl AuthWrap for NullAuth {
    fn wrap(&self, _auth_handle: u64, results: &[u8]) -> Option<Vec<u8>> {
        Some(results.to_vec())
    }

    fn unwrap(&self, _auth_handle: u64, body: &[u8]) -> Option<Vec<u8>> {
        Some(body.to_vec())
    }
}

/// Fixed-width header: `xid, prog, vers, proc` (big-endian u32 each) followed
/// by the opaque call body. Reply header: `xid, status` (0 = accepted, 1 =
/// rejected) followed by the auth-wrapped result bytes. Sized well above the
/// wire format's 16-byte minimum.
pub const CALL_HEADER_LEN: usize = 16;
pub const REPLY_HEADER_LEN: usize = 8;

pub struct FixedHeaderCodec;

impl CallCodec for FixedHeaderCodec {
    fn decode_call(&self, buf: &[u8]) -> Option<(CallHeader, usize)> {
        if buf.len() < CALL_HEADER_LEN {
            return None;
        }
        let xid = u32::from_be_bytes(buf[0..4].try_into().ok()?);
        let prog = u32::from_be_bytes(buf[4..8].try_into().ok()?);
        let vers = u32::from_be_bytes(buf[8..12].try_into().ok()?);
        let proc_ = u32::from_be_bytes(buf[12..16].try_into().ok()?);
        Some((CallHeader { xid, prog, vers, proc_ }, CALL_HEADER_LEN))
    }

    fn encode_reply(&self, out: &mut [u8], reply: &ReplyMessage, wrapped_results: Option<&[u8]>) -> Option<usize> {
        let body = wrapped_results.unwrap_or(&[]);
        let total = REPLY_HEADER_LEN + body.len();
        if out.len() < total {
            return None;
        }
        out[0..4].copy_from_slice(&reply.xid.to_be_bytes());
        let status: u32 = match reply.status {
            ReplyStatus::Accepted => 0,
            ReplyStatus::Rejected => 1,
        };
        out[4..8].copy_from_slice(&status.to_be_bytes());
        out[REPLY_HEADER_LEN..total].copy_from_slice(body);
        Some(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_call_header() {
        let codec = FixedHeaderCodec;
        let mut buf = vec![0u8; 20];
        buf[0..4].copy_from_slice(&0x11111111u32.to_be_bytes());
        buf[4..8].copy_from_slice(&100003u32.to_be_bytes());
        buf[8..12].copy_from_slice(&3u32.to_be_bytes());
        buf[12..16].copy_from_slice(&1u32.to_be_bytes());
        let (call, consumed) = codec.decode_call(&buf).unwrap();
        assert_eq!(call.xid, 0x11111111);
        assert_eq!(call.prog, 100003);
        assert_eq!(consumed, CALL_HEADER_LEN);
    }

    #[test]
    fn rejects_short_buffer() {
        let codec = FixedHeaderCodec;
        assert!(codec.decode_call(&[0u8; 4]).is_none());
    }

    #[test]
    fn null_auth_round_trips() {
        let auth = NullAuth;
        let wrapped = auth.wrap(0, b"hello").unwrap();
        let unwrapped = auth.unwrap(0, &wrapped).unwrap();
        assert_eq!(unwrapped, b"hello");
    }
}
