//! Neighbour translator (component H): IPv6-to-MAC resolution.
//!
//! The reference suspends a fibril on a condition variable with a timeout
//! while another fibril (servicing the inbound advertisement) wakes it.
//! This crate has no fibrils to suspend, so the state machine is turned
//! inside out: [`NeighbourCache::translate`] is a non-blocking step
//! function a caller re-invokes (from the router, itself re-invoked by the
//! host's cooperative loop) until it reports a hit or a timeout, with the
//! in-flight solicitation and its deadline tracked internally so repeat
//! calls coalesce into the same wait rather than re-soliciting each time.

use alloc::collections::BTreeMap;

use spin::Mutex;

use crate::addr::MacAddr;
use crate::clock::Tick;

type V6Bytes = [u8; 16];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslateOutcome {
    /// The MAC was already known.
    Hit(MacAddr),
    /// No entry and no solicitation in flight; the caller must send an NDP
    /// neighbour solicitation and call `translate` again to start waiting.
    NeedSolicit,
    /// A solicitation is already in flight; call again before giving up.
    Pending,
    /// The wait deadline passed without an advertisement arriving.
    TimedOut,
}

struct Pending {
    deadline: Tick,
}

#[derive(Default)]
pub struct NeighbourCache {
    entries: Mutex<BTreeMap<V6Bytes, MacAddr>>,
    pending: Mutex<BTreeMap<V6Bytes, Pending>>,
}

impl NeighbourCache {
    pub fn new() -> NeighbourCache {
        NeighbourCache {
            entries: Mutex::new(BTreeMap::new()),
            pending: Mutex::new(BTreeMap::new()),
        }
    }

    /// Inserts or replaces an entry (from an advertisement, solicitation,
    /// or static configuration). Displaces any solicitation in flight for
    /// the same address.
    pub fn add(&self, addr: V6Bytes, mac: MacAddr) {
        self.entries.lock().insert(addr, mac);
        self.pending.lock().remove(&addr);
        log::debug!("neighbour cache: added entry");
    }

    pub fn remove(&self, addr: &V6Bytes) {
        self.entries.lock().remove(addr);
    }

    pub fn lookup(&self, addr: &V6Bytes) -> Option<MacAddr> {
        self.entries.lock().get(addr).copied()
    }

    /// One step of resolving `target`. `timeout_millis` is the window a
    /// fresh solicitation is allowed (≈3 s per §5); `now` is the caller's
    /// current tick.
    pub fn translate(&self, target: V6Bytes, now: Tick, timeout_millis: u64) -> TranslateOutcome {
        if let Some(mac) = self.lookup(&target) {
            return TranslateOutcome::Hit(mac);
        }

        let mut pending = self.pending.lock();
        match pending.get(&target) {
            None => {
                pending.insert(target, Pending {
                    deadline: now.saturating_add(timeout_millis),
                });
                TranslateOutcome::NeedSolicit
            }
            Some(p) => {
                if now >= p.deadline {
                    pending.remove(&target);
                    TranslateOutcome::TimedOut
                } else {
                    TranslateOutcome::Pending
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TARGET: V6Bytes = [
        0xfe, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xfe, 0, 0, 2,
    ];
    const MAC: MacAddr = [0x02, 0, 0, 0, 0, 2];

    #[test]
    fn fresh_lookup_requests_solicitation_then_waits() {
        let cache = NeighbourCache::new();
        assert_eq!(cache.translate(TARGET, Tick(0), 3000), TranslateOutcome::NeedSolicit);
        assert_eq!(cache.translate(TARGET, Tick(100), 3000), TranslateOutcome::Pending);
    }

    #[test]
    fn advertisement_resolves_pending_wait() {
        let cache = NeighbourCache::new();
        cache.translate(TARGET, Tick(0), 3000);
        cache.add(TARGET, MAC);
        assert_eq!(cache.translate(TARGET, Tick(500), 3000), TranslateOutcome::Hit(MAC));
    }

    #[test]
    fn times_out_after_deadline() {
        let cache = NeighbourCache::new();
        cache.translate(TARGET, Tick(0), 3000);
        assert_eq!(cache.translate(TARGET, Tick(3001), 3000), TranslateOutcome::TimedOut);
        // A further attempt starts a fresh solicitation window.
        assert_eq!(cache.translate(TARGET, Tick(3001), 3000), TranslateOutcome::NeedSolicit);
    }

    #[test]
    fn never_returns_mac_that_was_not_inserted() {
        let cache = NeighbourCache::new();
        assert!(cache.lookup(&TARGET).is_none());
        cache.translate(TARGET, Tick(0), 3000);
        assert!(matches!(
            cache.translate(TARGET, Tick(1), 3000),
            TranslateOutcome::Pending
        ));
    }
}
