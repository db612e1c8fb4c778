//! Static-route table (component D): named destination-network to router
//! entries, matched by longest prefix.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use spin::Mutex;

use crate::addr::{InetAddr, InetNaddr};
use crate::error::{InetError, Result};

#[derive(Debug, Clone)]
pub struct SrouteInfo {
    pub id: u64,
    pub dest: InetNaddr,
    pub router: InetAddr,
    pub name: String,
}

struct SrouteEntry {
    dest: InetNaddr,
    router: InetAddr,
    name: String,
}

#[derive(Default)]
pub struct SrouteTable {
    next_id: Mutex<u64>,
    entries: Mutex<BTreeMap<u64, SrouteEntry>>,
}

impl SrouteTable {
    pub fn new() -> SrouteTable {
        SrouteTable {
            next_id: Mutex::new(1),
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn create(&self, name: &str, dest: InetNaddr, router: InetAddr) -> Result<u64> {
        let mut entries = self.entries.lock();
        if entries.values().any(|e| e.name == name) {
            return Err(InetError::Duplicate);
        }

        let mut next_id = self.next_id.lock();
        let id = *next_id;
        *next_id += 1;
        drop(next_id);

        entries.insert(
            id,
            SrouteEntry {
                dest,
                router,
                name: String::from(name),
            },
        );
        Ok(id)
    }

    pub fn delete(&self, id: u64) -> Result<()> {
        self.entries
            .lock()
            .remove(&id)
            .map(|_| ())
            .ok_or(InetError::NotFound)
    }

    pub fn get(&self, id: u64) -> Result<SrouteInfo> {
        let entries = self.entries.lock();
        let e = entries.get(&id).ok_or(InetError::NotFound)?;
        Ok(SrouteInfo {
            id,
            dest: e.dest,
            router: e.router,
            name: e.name.clone(),
        })
    }

    pub fn get_id(&self, name: &str) -> Result<u64> {
        let entries = self.entries.lock();
        entries
            .iter()
            .find(|(_, e)| e.name == name)
            .map(|(id, _)| *id)
            .ok_or(InetError::NotFound)
    }

    pub fn list_ids(&self) -> Vec<u64> {
        self.entries.lock().keys().copied().collect()
    }

    /// Longest-prefix match against `addr`; ties broken by most-recently
    /// added (entries are walked in ascending id order and a tying
    /// candidate replaces the incumbent).
    pub fn find(&self, addr: &InetAddr) -> Option<SrouteInfo> {
        let entries = self.entries.lock();
        let mut best: Option<(u64, &SrouteEntry)> = None;

        for (id, e) in entries.iter() {
            if e.dest.addr.version() != addr.version() {
                continue;
            }
            if !e.dest.compare_mask(addr) {
                continue;
            }
            let better = match best {
                None => true,
                Some((_, b)) => e.dest.prefix >= b.dest.prefix,
            };
            if better {
                best = Some((*id, e));
            }
        }

        best.map(|(id, e)| SrouteInfo {
            id,
            dest: e.dest,
            router: e.router,
            name: e.name.clone(),
        })
    }
}
