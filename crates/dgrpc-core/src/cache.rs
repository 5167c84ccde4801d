//! Duplicate-reply cache — component B.
//!
//! A fingerprint→reply store with FIFO eviction and in-place buffer
//! rotation, grounded on `svc_dg_cache_set`/`svc_dg_cache_get` and
//! `svc_dg_enablecache` in the reference transport. Entries live in a flat
//! arena sized to the cache's capacity; the arena index doubles as the FIFO
//! slot (the reference's `fifo[size]` ring of owning pointers), so eviction
//! is "look at `entries[next_victim]`" rather than following a separate
//! ring of pointers.
//!
//! All cache instances in a process share one lock (`spec.md` §5 "Cache
//! lock is a single process-wide mutex"), mirroring the reference's single
//! `dupreq_lock` guarding every `svc_dg` transport's cache. `CacheInner` is
//! therefore wrapped in an `UnsafeCell` rather than its own per-instance
//! lock; every public method takes `CACHE_LOCK` first. The invariant that
//! makes this sound: `inner` is touched only while `CACHE_LOCK` is held.

use std::cell::UnsafeCell;
use std::sync::Mutex;

use crate::addr::StoredAddr;
use crate::request::CallHeader;

/// Chain density: each logical slot gets `SPARSENESS` bucket entries to
/// reduce collision chains. The reference uses 4.
const SPARSENESS: usize = 4;

static CACHE_LOCK: Mutex<()> = Mutex::new(());

#[derive(Clone, PartialEq, Eq)]
struct CacheKey {
    xid: u32,
    prog: u32,
    vers: u32,
    proc_: u32,
    peer_addr: StoredAddr,
}

impl CacheKey {
    fn hash(&self, modulus: usize) -> usize {
        let fields = [
            self.xid as u64,
            self.prog as u64,
            self.vers as u64,
            self.proc_ as u64,
        ];
        (crate::hash::mix_fields(103, &fields, self.peer_addr.as_bytes()) as usize) % modulus
    }
}

struct CacheEntry {
    key: CacheKey,
    reply_bytes: Vec<u8>,
    next_in_bucket: Option<u32>,
}

struct CacheInner {
    entries: Vec<Option<CacheEntry>>,
    buckets: Vec<Option<u32>>,
    next_victim: usize,
    pending_prog: u32,
    pending_vers: u32,
    pending_proc: u32,
}

impl CacheInner {
    fn unlink(&mut self, loc: usize, idx: u32) -> bool {
        let mut cur = self.buckets[loc];
        let mut prev: Option<u32> = None;
        while let Some(c) = cur {
            let next = self.entries[c as usize].as_ref().unwrap().next_in_bucket;
            if c == idx {
                match prev {
                    Some(p) => self.entries[p as usize].as_mut().unwrap().next_in_bucket = next,
                    None => self.buckets[loc] = next,
                }
                return true;
            }
            prev = Some(c);
            cur = next;
        }
        false
    }
}

/// A bounded duplicate-reply cache, installed once per endpoint via
/// `enable_cache` (`spec.md` §6 "Cache enablement is a one-shot").
pub struct Cache {
    inner: UnsafeCell<CacheInner>,
    capacity: usize,
}

// Safety: every access to `inner` happens only while `CACHE_LOCK` is held,
// enforced by routing all reads/writes through `Cache`'s methods.
unsafe impl Sync for Cache {}
unsafe impl Send for Cache {}

impl Cache {
    pub fn new(capacity: usize) -> Self {
        let mut entries = Vec::with_capacity(capacity);
        entries.resize_with(capacity, || None);
        Self {
            inner: UnsafeCell::new(CacheInner {
                entries,
                buckets: vec![None; capacity * SPARSENESS],
                next_victim: 0,
                pending_prog: 0,
                pending_vers: 0,
                pending_proc: 0,
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Looks up a call by `(xid, prog, vers, proc, peer_addr)`. On miss,
    /// records `(prog, vers, proc)` so a later `set` on the same endpoint can
    /// complete the key without re-reading the call (`spec.md` §4.B).
    pub fn get(&self, call: &CallHeader, peer: StoredAddr) -> Option<Vec<u8>> {
        let _guard = CACHE_LOCK.lock().unwrap();
        // Safety: guard held.
        let inner = unsafe { &mut *self.inner.get() };
        let key = CacheKey {
            xid: call.xid,
            prog: call.prog,
            vers: call.vers,
            proc_: call.proc_,
            peer_addr: peer,
        };
        let loc = key.hash(inner.buckets.len());
        let mut cur = inner.buckets[loc];
        while let Some(idx) = cur {
            let entry = inner.entries[idx as usize].as_ref().unwrap();
            if entry.key == key {
                return Some(entry.reply_bytes.clone());
            }
            cur = entry.next_in_bucket;
        }
        inner.pending_prog = call.prog;
        inner.pending_vers = call.vers;
        inner.pending_proc = call.proc_;
        None
    }

    /// Inserts the just-sent reply after a successful send. Rotates
    /// `io_buf` with the evicted/freshly allocated buffer in place so the
    /// transmitted bytes become the cache's storage without a copy
    /// (`spec.md` §4.B steps 1-7, invariant #4).
    pub fn set(&self, io_buf: &mut Vec<u8>, io_sz: usize, sent_len: usize, xid: u32, peer: StoredAddr) -> bool {
        let _guard = CACHE_LOCK.lock().unwrap();
        let inner = unsafe { &mut *self.inner.get() };
        let victim_idx = inner.next_victim;
        let mut reuse_buf = None;
        if let Some(old) = inner.entries[victim_idx].take() {
            let old_loc = old.key.hash(inner.buckets.len());
            if !inner.unlink(old_loc, victim_idx as u32) {
                tracing::warn!(
                    slot = victim_idx,
                    "duplicate-reply cache corruption: victim missing from its bucket chain, aborting insert"
                );
                inner.entries[victim_idx] = Some(old);
                return false;
            }
            reuse_buf = Some(old.reply_bytes);
        }

        let mut newbuf = reuse_buf.unwrap_or_else(|| Vec::with_capacity(io_sz));
        newbuf.clear();
        newbuf.resize(io_sz, 0);

        io_buf.truncate(sent_len);
        std::mem::swap(io_buf, &mut newbuf);
        // `newbuf` now holds exactly the transmitted bytes; `io_buf` is the
        // endpoint's fresh working buffer.

        let key = CacheKey {
            xid,
            prog: inner.pending_prog,
            vers: inner.pending_vers,
            proc_: inner.pending_proc,
            peer_addr: peer,
        };
        let loc = key.hash(inner.buckets.len());
        let entry = CacheEntry {
            key,
            reply_bytes: newbuf,
            next_in_bucket: inner.buckets[loc],
        };
        inner.buckets[loc] = Some(victim_idx as u32);
        inner.entries[victim_idx] = Some(entry);
        inner.next_victim = (inner.next_victim + 1) % inner.entries.len();
        true
    }

    /// Number of currently occupied slots, for diagnostics/tests.
    pub fn occupied(&self) -> usize {
        let _guard = CACHE_LOCK.lock().unwrap();
        let inner = unsafe { &*self.inner.get() };
        inner.entries.iter().filter(|e| e.is_some()).count()
    }
}
