//! Reassembly engine (component F): buffers IPv4 fragments per
//! `(src, dest, proto, ident)` and delivers the datagram once complete.

use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use crate::addr::InetAddr;
use crate::clock::Tick;
use crate::error::{InetError, Result};
use crate::pdu::Packet;

/// Total datagram size beyond this many bytes is rejected with `Overflow`
/// (`8 * 2^13`, the largest value the 13-bit fragment-offset field can
/// address at the 8-byte unit).
const MAX_DATAGRAM_SIZE: usize = 8 * (1 << 13);

type GroupKey = (InetAddr, InetAddr, u8, u16);

struct Fragment {
    frag_offset: usize,
    mf: bool,
    data: Vec<u8>,
    tos: u8,
    link_id: u64,
    /// Order this fragment was queued in, independent of its sorted
    /// position; used to resolve overlaps first-writer-wins.
    arrival_seq: u64,
}

struct Group {
    fragments: Vec<Fragment>,
    src: InetAddr,
    dest: InetAddr,
    proto: u8,
    created: Tick,
}

pub struct ReassemblyEngine {
    groups: Mutex<BTreeMap<GroupKey, Group>>,
    next_seq: Mutex<u64>,
    lifetime_millis: u64,
}

impl ReassemblyEngine {
    pub fn new(lifetime_millis: u64) -> ReassemblyEngine {
        ReassemblyEngine {
            groups: Mutex::new(BTreeMap::new()),
            next_seq: Mutex::new(0),
            lifetime_millis,
        }
    }

    /// Queues one fragment. Returns `Ok(Some(datagram))` if this completed
    /// the group, `Ok(None)` if more fragments are needed, or `Err` if the
    /// reassembled datagram would exceed the representable size.
    pub fn queue(&self, packet: &Packet, now: Tick) -> Result<Option<Packet>> {
        let key = (packet.src, packet.dest, packet.proto, packet.ident);

        let mut groups = self.groups.lock();

        let mut seq = self.next_seq.lock();
        let arrival_seq = *seq;
        *seq += 1;
        drop(seq);

        let group = groups.entry(key).or_insert_with(|| Group {
            fragments: Vec::new(),
            src: packet.src,
            dest: packet.dest,
            proto: packet.proto,
            created: now,
        });

        insert_sorted(
            &mut group.fragments,
            Fragment {
                frag_offset: packet.frag_offset,
                mf: packet.mf,
                data: packet.data.clone(),
                tos: packet.tos,
                link_id: packet.link_id,
                arrival_seq,
            },
        );

        let complete_idx = completeness_terminal(&group.fragments);

        if let Some(idx) = complete_idx {
            let group = groups.remove(&key).unwrap();
            return deliver(group, idx);
        }

        Ok(None)
    }

    /// Drops groups whose first fragment arrived more than the configured
    /// lifetime before `now`. A host calls this periodically; `queue` does
    /// not call it implicitly so that a single-threaded test can control
    /// exactly when aging happens.
    pub fn sweep(&self, now: Tick) -> usize {
        let mut groups = self.groups.lock();
        let before = groups.len();
        groups.retain(|_, g| now.elapsed_since(g.created) <= self.lifetime_millis);
        before - groups.len()
    }

    pub fn pending_groups(&self) -> usize {
        self.groups.lock().len()
    }
}

fn insert_sorted(fragments: &mut Vec<Fragment>, frag: Fragment) {
    let pos = fragments
        .iter()
        .position(|f| f.frag_offset >= frag.frag_offset)
        .unwrap_or(fragments.len());
    fragments.insert(pos, frag);
}

/// Walks fragments in sorted order (already the list's order) and returns
/// the index of the terminating (`mf == false`) fragment iff the group is
/// complete: offset-0 start, no gaps between consecutive fragments.
fn completeness_terminal(fragments: &[Fragment]) -> Option<usize> {
    if fragments.is_empty() || fragments[0].frag_offset != 0 {
        return None;
    }

    let mut prev_end = fragments[0].frag_offset + fragments[0].data.len();
    if !fragments[0].mf {
        return Some(0);
    }

    for (i, frag) in fragments.iter().enumerate().skip(1) {
        if frag.frag_offset > prev_end {
            return None;
        }
        prev_end = core::cmp::max(prev_end, frag.frag_offset + frag.data.len());
        if !frag.mf {
            return Some(i);
        }
    }

    None
}

fn deliver(group: Group, terminal_idx: usize) -> Result<Option<Packet>> {
    let terminal = &group.fragments[terminal_idx];
    let dgram_size = terminal.frag_offset + terminal.data.len();

    if dgram_size > MAX_DATAGRAM_SIZE {
        return Err(InetError::Overflow);
    }

    let mut buf = vec![0u8; dgram_size];
    let mut filled = vec![false; dgram_size];

    // First-writer-wins: walk fragments in arrival order, not sorted
    // order, and only write bytes nothing has claimed yet.
    let mut by_arrival: Vec<&Fragment> = group.fragments.iter().collect();
    by_arrival.sort_by_key(|f| f.arrival_seq);

    for frag in by_arrival {
        let start = frag.frag_offset;
        let end = core::cmp::min(dgram_size, start + frag.data.len());
        if end <= start {
            continue;
        }
        for i in start..end {
            if !filled[i] {
                buf[i] = frag.data[i - start];
                filled[i] = true;
            }
        }
    }

    let envelope = group
        .fragments
        .iter()
        .find(|f| f.frag_offset == 0)
        .unwrap_or(terminal);

    Ok(Some(Packet {
        link_id: envelope.link_id,
        src: group.src,
        dest: group.dest,
        tos: envelope.tos,
        proto: group.proto,
        ttl: 0,
        ident: 0,
        df: false,
        mf: false,
        frag_offset: 0,
        data: buf,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frag(src: InetAddr, dest: InetAddr, proto: u8, ident: u16, offset: usize, mf: bool, data: &[u8]) -> Packet {
        Packet {
            link_id: 1,
            src,
            dest,
            tos: 0,
            proto,
            ttl: 64,
            ident,
            df: false,
            mf,
            frag_offset: offset,
            data: data.to_vec(),
        }
    }

    #[test]
    fn single_complete_fragment_delivers_immediately() {
        let engine = ReassemblyEngine::new(60_000);
        let src = InetAddr::parse("10.0.0.1").unwrap();
        let dest = InetAddr::parse("10.0.0.2").unwrap();
        let pkt = frag(src, dest, 254, 1, 0, false, b"hello");
        let out = engine.queue(&pkt, Tick(0)).unwrap();
        assert_eq!(out.unwrap().data, b"hello");
        assert_eq!(engine.pending_groups(), 0);
    }

    #[test]
    fn out_of_order_fragments_reassemble() {
        let engine = ReassemblyEngine::new(60_000);
        let src = InetAddr::parse("10.0.0.1").unwrap();
        let dest = InetAddr::parse("10.0.0.2").unwrap();

        let full: Vec<u8> = (0..300u32).map(|i| (i % 256) as u8).collect();
        let last = frag(src, dest, 254, 42, 160, false, &full[160..300]);
        let first = frag(src, dest, 254, 42, 0, true, &full[0..80]);
        let middle = frag(src, dest, 254, 42, 80, true, &full[80..160]);

        assert!(engine.queue(&last, Tick(0)).unwrap().is_none());
        assert!(engine.queue(&first, Tick(0)).unwrap().is_none());
        let out = engine.queue(&middle, Tick(0)).unwrap().unwrap();
        assert_eq!(out.data, full);
    }

    #[test]
    fn overlap_resolves_first_writer_wins() {
        let engine = ReassemblyEngine::new(60_000);
        let src = InetAddr::parse("10.0.0.1").unwrap();
        let dest = InetAddr::parse("10.0.0.2").unwrap();

        // First fragment (arrives first) claims bytes [0,16) with 0xAA.
        let first = frag(src, dest, 254, 9, 0, true, &[0xAAu8; 16]);
        // Second fragment overlaps [8,24) with 0xBB, arrives second.
        let second = frag(src, dest, 254, 9, 8, false, &[0xBBu8; 16]);

        assert!(engine.queue(&first, Tick(0)).unwrap().is_none());
        let out = engine.queue(&second, Tick(0)).unwrap().unwrap();

        assert_eq!(&out.data[0..8], &[0xAAu8; 8]);
        // Bytes [8,16) were already filled by the first fragment.
        assert_eq!(&out.data[8..16], &[0xAAu8; 8]);
        assert_eq!(&out.data[16..24], &[0xBBu8; 8]);
    }

    #[test]
    fn gap_never_completes() {
        let engine = ReassemblyEngine::new(60_000);
        let src = InetAddr::parse("10.0.0.1").unwrap();
        let dest = InetAddr::parse("10.0.0.2").unwrap();

        let first = frag(src, dest, 254, 3, 0, true, &[1u8; 8]);
        let far = frag(src, dest, 254, 3, 32, false, &[2u8; 8]);
        assert!(engine.queue(&first, Tick(0)).unwrap().is_none());
        assert!(engine.queue(&far, Tick(0)).unwrap().is_none());
        assert_eq!(engine.pending_groups(), 1);
    }

    #[test]
    fn sweep_ages_out_stale_groups() {
        let engine = ReassemblyEngine::new(1_000);
        let src = InetAddr::parse("10.0.0.1").unwrap();
        let dest = InetAddr::parse("10.0.0.2").unwrap();

        let first = frag(src, dest, 254, 5, 0, true, &[1u8; 8]);
        engine.queue(&first, Tick(0)).unwrap();
        assert_eq!(engine.pending_groups(), 1);

        assert_eq!(engine.sweep(Tick(2_000)), 1);
        assert_eq!(engine.pending_groups(), 0);
    }
}
