//! Configuration service (component K): CRUD surface plus the
//! tree-of-attributes persistence schema.
//!
//! This module only shapes and walks the attribute tree; the backend that
//! actually serialises it to a file is out of scope (§1) and is reached
//! through the [`ConfigStore`] trait.

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use spin::Mutex;

use crate::addr::{InetAddr, InetNaddr};
use crate::addrobj::AddrObjTable;
use crate::error::{InetError, Result};
use crate::link::LinkRegistry;
use crate::sroute::SrouteTable;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
    Str(String),
    U64(u64),
}

/// One node of a sif-style tree-of-attributes document.
#[derive(Debug, Clone, Default)]
pub struct AttrNode {
    pub attrs: BTreeMap<String, AttrValue>,
    pub children: Vec<(String, AttrNode)>,
}

impl AttrNode {
    fn set_str(&mut self, key: &str, value: String) {
        self.attrs.insert(String::from(key), AttrValue::Str(value));
    }

    fn set_u64(&mut self, key: &str, value: u64) {
        self.attrs.insert(String::from(key), AttrValue::U64(value));
    }

    fn str_attr(&self, key: &str) -> Result<&str> {
        match self.attrs.get(key) {
            Some(AttrValue::Str(s)) => Ok(s.as_str()),
            _ => Err(InetError::Invalid),
        }
    }
}

/// Persistence backend contract: load/save an [`AttrNode`] tree. The only
/// concrete implementation this crate ships is [`MemoryConfigStore`], a
/// test double; a host binds the real file-backed store.
pub trait ConfigStore {
    fn load(&self) -> Result<AttrNode>;
    fn save(&self, root: &AttrNode) -> Result<()>;
}

/// In-process `ConfigStore` used by tests (and usable as a scratch store
/// by a host that has not wired up the real backend yet).
#[derive(Default)]
pub struct MemoryConfigStore {
    doc: Mutex<Option<AttrNode>>,
}

impl MemoryConfigStore {
    pub fn new() -> MemoryConfigStore {
        MemoryConfigStore { doc: Mutex::new(None) }
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load(&self) -> Result<AttrNode> {
        self.doc.lock().clone().ok_or(InetError::NotFound)
    }

    fn save(&self, root: &AttrNode) -> Result<()> {
        *self.doc.lock() = Some(root.clone());
        Ok(())
    }
}

/// Builds the persisted document from the current non-`temp` address
/// objects and static routes (§4.K invariant 5: never persists `temp`
/// entries).
pub fn build_tree(addr_table: &AddrObjTable, sroute_table: &SrouteTable, links: &LinkRegistry) -> AttrNode {
    let mut root = AttrNode::default();

    let mut addresses = AttrNode::default();
    for a in addr_table.list_persistent() {
        let link_name = links.service_name(a.link_id).unwrap_or_default();
        let mut node = AttrNode::default();
        node.set_u64("id", a.id);
        node.set_str("naddr", a.naddr.format());
        node.set_str("link", link_name);
        node.set_str("name", a.name);
        addresses.children.push(("address".to_string(), node));
    }
    root.children.push(("addresses".to_string(), addresses));

    let mut sroutes = AttrNode::default();
    for id in sroute_table.list_ids() {
        let r = match sroute_table.get(id) {
            Ok(r) => r,
            Err(_) => continue,
        };
        let mut node = AttrNode::default();
        node.set_u64("id", r.id);
        node.set_str("dest", r.dest.format());
        node.set_str("router", r.router.format());
        node.set_str("name", r.name);
        sroutes.children.push(("route".to_string(), node));
    }
    root.children.push(("static-routes".to_string(), sroutes));

    root
}

/// Loads address objects and static routes from `root` into the given
/// tables, resolving each address object's `link` attribute (a service
/// name) back to the currently-open link with that name.
pub fn load_tree(
    root: &AttrNode,
    addr_table: &AddrObjTable,
    sroute_table: &SrouteTable,
    links: &LinkRegistry,
) -> Result<()> {
    for (name, node) in &root.children {
        match name.as_str() {
            "addresses" => {
                for (child_name, child) in &node.children {
                    if child_name != "address" {
                        continue;
                    }
                    let naddr = InetNaddr::parse(child.str_attr("naddr")?)?;
                    let link_name = child.str_attr("link")?;
                    let link_id = links.find_id_by_name(link_name)?;
                    let entry_name = child.str_attr("name")?;
                    addr_table.create(entry_name, naddr, link_id, false)?;
                }
            }
            "static-routes" => {
                for (child_name, child) in &node.children {
                    if child_name != "route" {
                        continue;
                    }
                    let dest = InetNaddr::parse(child.str_attr("dest")?)?;
                    let router = InetAddr::parse(child.str_attr("router")?)?;
                    let entry_name = child.str_attr("name")?;
                    sroute_table.create(entry_name, dest, router)?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::IpLink;
    use alloc::boxed::Box;

    struct StubLink;
    impl IpLink for StubLink {
        fn get_mtu(&self) -> u32 {
            1500
        }
        fn get_mac48(&self) -> Option<crate::addr::MacAddr> {
            None
        }
        fn addr_add(&self, _addr: InetAddr) -> Result<()> {
            Ok(())
        }
        fn addr_remove(&self, _addr: InetAddr) -> Result<()> {
            Ok(())
        }
        fn send(&self, _src: u32, _dest: u32, _data: &[u8]) -> Result<()> {
            Ok(())
        }
        fn send6(&self, _dest_mac: crate::addr::MacAddr, _data: &[u8]) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn round_trips_addresses_and_routes_through_a_memory_store() {
        let links = LinkRegistry::new();
        links.discover(1, "lo".to_string(), Box::new(StubLink)).unwrap();

        let addr_table = AddrObjTable::new();
        addr_table
            .create("lo", InetNaddr::parse("::1/128").unwrap(), 1, false)
            .unwrap();
        addr_table
            .create("temp-only", InetNaddr::parse("127.0.0.1/24").unwrap(), 1, true)
            .unwrap();

        let sroute_table = SrouteTable::new();
        sroute_table
            .create(
                "default",
                InetNaddr::parse("0.0.0.0/0").unwrap(),
                InetAddr::parse("10.0.0.1").unwrap(),
            )
            .unwrap();

        let store = MemoryConfigStore::new();
        let tree = build_tree(&addr_table, &sroute_table, &links);
        store.save(&tree).unwrap();

        let addr_table2 = AddrObjTable::new();
        let sroute_table2 = SrouteTable::new();
        let loaded = store.load().unwrap();
        load_tree(&loaded, &addr_table2, &sroute_table2, &links).unwrap();

        assert_eq!(addr_table2.list_ids().len(), 1);
        assert!(addr_table2.find_by_name("lo", 1).is_some());
        assert_eq!(sroute_table2.list_ids().len(), 1);
        assert!(sroute_table2.get_id("default").is_ok());
    }
}
