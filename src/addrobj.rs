//! Address-object table (component C): named logical addresses bound to a
//! link.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use spin::Mutex;

use crate::addr::{InetAddr, InetNaddr};
use crate::error::{InetError, Result};

/// How [`AddrObjTable::find`] matches a candidate address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindMode {
    /// `compare_mask`: the address falls within the object's network.
    Network,
    /// Exact match including prefix length.
    Exact,
}

#[derive(Debug, Clone)]
pub struct AddrObjInfo {
    pub id: u64,
    pub naddr: InetNaddr,
    pub link_id: u64,
    pub name: String,
    pub temp: bool,
}

struct AddrObjEntry {
    naddr: InetNaddr,
    link_id: u64,
    name: String,
    temp: bool,
}

/// Outcome of a delete that a caller must act on outside this table's lock:
/// whether the DHCP bootstrap hook (§4.L) should now fire for the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub retrigger_dhcp: bool,
    pub link_id: u64,
}

#[derive(Default)]
pub struct AddrObjTable {
    next_id: Mutex<u64>,
    entries: Mutex<BTreeMap<u64, AddrObjEntry>>,
}

impl AddrObjTable {
    pub fn new() -> AddrObjTable {
        AddrObjTable {
            next_id: Mutex::new(1),
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Inserts an address object. Does not touch the link driver; the
    /// caller is responsible for calling `IpLink::addr_add` and for rolling
    /// this entry back (via [`AddrObjTable::delete`]) if that fails, so
    /// that the link-table lock and this table's lock are never held
    /// together.
    pub fn create(&self, name: &str, naddr: InetNaddr, link_id: u64, temp: bool) -> Result<u64> {
        let mut entries = self.entries.lock();
        if entries
            .values()
            .any(|e| e.link_id == link_id && e.name == name)
        {
            return Err(InetError::Duplicate);
        }

        let mut next_id = self.next_id.lock();
        let id = *next_id;
        *next_id += 1;
        drop(next_id);

        entries.insert(
            id,
            AddrObjEntry {
                naddr,
                link_id,
                name: String::from(name),
                temp,
            },
        );

        log::debug!("address object {} created: {} on link {}", id, naddr.format(), link_id);
        Ok(id)
    }

    /// Removes the entry. Returns whether the DHCP hook should retrigger:
    /// true iff this was the last non-temp address on its link (the caller
    /// decides separately whether that link is ethernet-class).
    pub fn delete(&self, id: u64) -> Result<DeleteOutcome> {
        let mut entries = self.entries.lock();
        let removed = entries.remove(&id).ok_or(InetError::NotFound)?;

        let retrigger_dhcp = !removed.temp
            && !entries
                .values()
                .any(|e| e.link_id == removed.link_id && !e.temp);

        Ok(DeleteOutcome {
            retrigger_dhcp,
            link_id: removed.link_id,
        })
    }

    pub fn get(&self, id: u64) -> Result<AddrObjInfo> {
        let entries = self.entries.lock();
        let e = entries.get(&id).ok_or(InetError::NotFound)?;
        Ok(AddrObjInfo {
            id,
            naddr: e.naddr,
            link_id: e.link_id,
            name: e.name.clone(),
            temp: e.temp,
        })
    }

    pub fn get_id(&self, name: &str, link_id: u64) -> Result<u64> {
        let entries = self.entries.lock();
        entries
            .iter()
            .find(|(_, e)| e.link_id == link_id && e.name == name)
            .map(|(id, _)| *id)
            .ok_or(InetError::NotFound)
    }

    pub fn list_ids(&self) -> Vec<u64> {
        self.entries.lock().keys().copied().collect()
    }

    pub fn find(&self, addr: &InetAddr, mode: FindMode) -> Option<AddrObjInfo> {
        let entries = self.entries.lock();
        entries.iter().find_map(|(id, e)| {
            let matches = match mode {
                FindMode::Network => e.naddr.compare_mask(addr),
                FindMode::Exact => e.naddr.host_addr() == *addr,
            };
            matches.then(|| AddrObjInfo {
                id: *id,
                naddr: e.naddr,
                link_id: e.link_id,
                name: e.name.clone(),
                temp: e.temp,
            })
        })
    }

    pub fn find_by_name(&self, name: &str, link_id: u64) -> Option<AddrObjInfo> {
        let entries = self.entries.lock();
        entries.iter().find_map(|(id, e)| {
            (e.link_id == link_id && e.name == name).then(|| AddrObjInfo {
                id: *id,
                naddr: e.naddr,
                link_id: e.link_id,
                name: e.name.clone(),
                temp: e.temp,
            })
        })
    }

    pub fn count_nontemp_by_link(&self, link_id: u64) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|e| e.link_id == link_id && !e.temp)
            .count()
    }

    /// Non-`temp` entries, for persistence (§4.K).
    pub fn list_persistent(&self) -> Vec<AddrObjInfo> {
        self.entries
            .lock()
            .iter()
            .filter(|(_, e)| !e.temp)
            .map(|(id, e)| AddrObjInfo {
                id: *id,
                naddr: e.naddr,
                link_id: e.link_id,
                name: e.name.clone(),
                temp: e.temp,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn naddr(s: &str) -> InetNaddr {
        InetNaddr::parse(s).unwrap()
    }

    #[test]
    fn create_rejects_duplicate_name_on_same_link() {
        let t = AddrObjTable::new();
        t.create("eth0", naddr("10.0.0.1/24"), 1, false).unwrap();
        assert_eq!(
            t.create("eth0", naddr("10.0.0.2/24"), 1, false).unwrap_err(),
            InetError::Duplicate
        );
        // Same name on a different link is fine.
        t.create("eth0", naddr("10.0.0.1/24"), 2, false).unwrap();
    }

    #[test]
    fn delete_retriggers_dhcp_only_when_last_nontemp_goes() {
        let t = AddrObjTable::new();
        let a = t.create("a", naddr("10.0.0.1/24"), 1, false).unwrap();
        let b = t.create("b", naddr("10.0.0.2/24"), 1, false).unwrap();

        let outcome = t.delete(a).unwrap();
        assert!(!outcome.retrigger_dhcp);

        let outcome = t.delete(b).unwrap();
        assert!(outcome.retrigger_dhcp);
        assert_eq!(outcome.link_id, 1);
    }

    #[test]
    fn find_network_vs_exact() {
        let t = AddrObjTable::new();
        t.create("a", naddr("192.0.2.0/24"), 1, false).unwrap();

        let addr = InetAddr::parse("192.0.2.42").unwrap();
        assert!(t.find(&addr, FindMode::Network).is_some());
        assert!(t.find(&addr, FindMode::Exact).is_none());

        let exact = InetAddr::parse("192.0.2.0").unwrap();
        assert!(t.find(&exact, FindMode::Exact).is_some());
    }

    #[test]
    fn list_persistent_skips_temp() {
        let t = AddrObjTable::new();
        t.create("perm", naddr("10.0.0.1/24"), 1, false).unwrap();
        t.create("lo", naddr("127.0.0.1/24"), 1, true).unwrap();
        let saved = t.list_persistent();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].name, "perm");
    }
}
