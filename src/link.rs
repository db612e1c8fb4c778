//! Link registry (component B): discovers IPLinks, caches MAC/MTU, and
//! exposes the abstract downward interface the rest of the service sends
//! through.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;

use spin::Mutex;

use crate::addr::{InetAddr, MacAddr};
use crate::error::{InetError, Result};

/// The downward-facing per-device interface. A host binds one of these to
/// each concrete link driver; this crate only calls through the trait.
pub trait IpLink {
    fn get_mtu(&self) -> u32;
    fn get_mac48(&self) -> Option<MacAddr>;
    fn addr_add(&self, addr: InetAddr) -> Result<()>;
    fn addr_remove(&self, addr: InetAddr) -> Result<()>;
    /// IPv4 send path.
    fn send(&self, src: u32, dest: u32, data: &[u8]) -> Result<()>;
    /// IPv6 send path: the neighbour MAC is already resolved.
    fn send6(&self, dest_mac: MacAddr, data: &[u8]) -> Result<()>;
}

struct LinkRecord {
    service_name: String,
    default_mtu: u32,
    mac: Option<MacAddr>,
    mac_valid: bool,
    link: Box<dyn IpLink + Send>,
}

/// Prefix identifying an ethernet-class link service name (drives the DHCP
/// bootstrap hook in §4.L).
pub const ETHERNET_SERVICE_PREFIX: &str = "net/eth";

/// What a newly discovered link looks like, returned so the caller can
/// decide what auto-configured address objects to create without this
/// module having to reach into the address-object table (lock order: link
/// before address-object, never both held at once).
#[derive(Debug, Clone, Copy)]
pub struct DiscoveredLink {
    pub link_id: u64,
    pub is_first_link: bool,
    pub mac: Option<MacAddr>,
    pub mac_valid: bool,
    pub default_mtu: u32,
    pub is_ethernet: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct LinkInfo {
    pub default_mtu: u32,
    pub mac: Option<MacAddr>,
    pub mac_valid: bool,
}

#[derive(Default)]
pub struct LinkRegistry {
    links: Mutex<BTreeMap<u64, LinkRecord>>,
}

impl LinkRegistry {
    pub fn new() -> LinkRegistry {
        LinkRegistry {
            links: Mutex::new(BTreeMap::new()),
        }
    }

    /// Opens a newly discovered IPLink service, queries its MTU/MAC, and
    /// registers it. Fails with `AddressTaken` if `link_id` is already open.
    pub fn discover(
        &self,
        link_id: u64,
        service_name: String,
        link: Box<dyn IpLink + Send>,
    ) -> Result<DiscoveredLink> {
        let mut links = self.links.lock();
        if links.contains_key(&link_id) {
            return Err(InetError::AddressTaken);
        }

        let default_mtu = link.get_mtu();
        let mac = link.get_mac48();
        let mac_valid = mac.is_some();
        let is_first_link = links.is_empty();
        let is_ethernet = service_name.starts_with(ETHERNET_SERVICE_PREFIX);

        links.insert(
            link_id,
            LinkRecord {
                service_name,
                default_mtu,
                mac,
                mac_valid,
                link,
            },
        );

        log::info!(
            "link {} discovered: mtu={} mac_valid={}",
            link_id,
            default_mtu,
            mac_valid
        );

        Ok(DiscoveredLink {
            link_id,
            is_first_link,
            mac,
            mac_valid,
            default_mtu,
            is_ethernet,
        })
    }

    pub fn info(&self, link_id: u64) -> Result<LinkInfo> {
        let links = self.links.lock();
        let rec = links.get(&link_id).ok_or(InetError::NotFound)?;
        Ok(LinkInfo {
            default_mtu: rec.default_mtu,
            mac: rec.mac,
            mac_valid: rec.mac_valid,
        })
    }

    pub fn service_name(&self, link_id: u64) -> Result<String> {
        let links = self.links.lock();
        links
            .get(&link_id)
            .map(|r| r.service_name.clone())
            .ok_or(InetError::NotFound)
    }

    pub fn list_ids(&self) -> alloc::vec::Vec<u64> {
        self.links.lock().keys().copied().collect()
    }

    pub fn find_id_by_name(&self, service_name: &str) -> Result<u64> {
        self.links
            .lock()
            .iter()
            .find(|(_, r)| r.service_name == service_name)
            .map(|(id, _)| *id)
            .ok_or(InetError::NotFound)
    }

    pub fn send_v4(&self, link_id: u64, src: u32, dest: u32, data: &[u8]) -> Result<()> {
        let links = self.links.lock();
        let rec = links.get(&link_id).ok_or(InetError::NotFound)?;
        rec.link.send(src, dest, data).map_err(|_| InetError::LinkFailure)
    }

    pub fn send_v6(&self, link_id: u64, dest_mac: MacAddr, data: &[u8]) -> Result<()> {
        let links = self.links.lock();
        let rec = links.get(&link_id).ok_or(InetError::NotFound)?;
        rec.link
            .send6(dest_mac, data)
            .map_err(|_| InetError::LinkFailure)
    }

    pub fn addr_add(&self, link_id: u64, addr: InetAddr) -> Result<()> {
        let links = self.links.lock();
        let rec = links.get(&link_id).ok_or(InetError::NotFound)?;
        rec.link.addr_add(addr)
    }

    pub fn addr_remove(&self, link_id: u64, addr: InetAddr) -> Result<()> {
        let links = self.links.lock();
        let rec = links.get(&link_id).ok_or(InetError::NotFound)?;
        rec.link.addr_remove(addr)
    }
}

/// Maps an IPv6 multicast group address to its Ethernet multicast MAC:
/// `33:33:` followed by the group's last four bytes (RFC 2464 §7).
pub fn multicast_mac_from_v6(group: [u8; 16]) -> MacAddr {
    [0x33, 0x33, group[12], group[13], group[14], group[15]]
}

/// Derives a link-local IPv6 address (`fe80::/64`) from a MAC address using
/// the modified-EUI-64 procedure: insert `ff:fe` in the middle of the MAC
/// and flip the universal/local bit of the first octet.
pub fn link_local_from_mac(mac: MacAddr) -> InetAddr {
    let mut addr = [0u8; 16];
    addr[0] = 0xfe;
    addr[1] = 0x80;
    addr[8] = mac[0] ^ 0x02;
    addr[9] = mac[1];
    addr[10] = mac[2];
    addr[11] = 0xff;
    addr[12] = 0xfe;
    addr[13] = mac[3];
    addr[14] = mac[4];
    addr[15] = mac[5];
    InetAddr::V6(addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubLink {
        mtu: u32,
        mac: Option<MacAddr>,
    }

    impl IpLink for StubLink {
        fn get_mtu(&self) -> u32 {
            self.mtu
        }
        fn get_mac48(&self) -> Option<MacAddr> {
            self.mac
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
        fn send6(&self, _dest_mac: MacAddr, _data: &[u8]) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn first_link_is_flagged() {
        let reg = LinkRegistry::new();
        let d = reg
            .discover(
                1,
                String::from("net/eth0"),
                Box::new(StubLink {
                    mtu: 1500,
                    mac: Some([0x02, 0, 0, 0, 0, 1]),
                }),
            )
            .unwrap();
        assert!(d.is_first_link);
        assert!(d.is_ethernet);
        assert!(d.mac_valid);

        let d2 = reg
            .discover(
                2,
                String::from("net/loopback"),
                Box::new(StubLink { mtu: 16384, mac: None }),
            )
            .unwrap();
        assert!(!d2.is_first_link);
        assert!(!d2.is_ethernet);
        assert!(!d2.mac_valid);
    }

    #[test]
    fn duplicate_discovery_fails() {
        let reg = LinkRegistry::new();
        reg.discover(1, String::from("net/eth0"), Box::new(StubLink { mtu: 1500, mac: None }))
            .unwrap();
        assert_eq!(
            reg.discover(1, String::from("net/eth0"), Box::new(StubLink { mtu: 1500, mac: None }))
                .unwrap_err(),
            InetError::AddressTaken
        );
    }

    #[test]
    fn multicast_mac_takes_the_last_four_group_bytes() {
        let group = [0xffu8, 0x02, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1, 0xff, 0x12, 0x34, 0x56];
        assert_eq!(multicast_mac_from_v6(group), [0x33, 0x33, 0xff, 0x12, 0x34, 0x56]);
    }

    #[test]
    fn eui64_flips_universal_local_bit() {
        let mac = [0x00, 0x11, 0x22, 0x33, 0x44, 0x55];
        let addr = link_local_from_mac(mac);
        let bytes = addr.as_v6().unwrap();
        assert_eq!(&bytes[0..2], &[0xfe, 0x80]);
        assert_eq!(bytes[8], 0x02);
        assert_eq!(&bytes[9..16], &[0x11, 0x22, 0xff, 0xfe, 0x44, 0x55]);
    }
}
