//! Service aggregate (component M): owns every table and exposes the
//! dispatch methods a transport binding calls into. This crate does not
//! implement an IPC transport itself (§4.M); a host decodes whatever
//! session protocol it speaks and calls these methods.

use alloc::boxed::Box;
use alloc::string::String;

use crate::addr::{IpVersion, InetAddr, InetNaddr, MacAddr};
use crate::addrobj::{AddrObjInfo, AddrObjTable, FindMode};
use crate::clock::Tick;
use crate::config::{self, AttrNode, ConfigStore};
use crate::dhcp::DhcpHook;
use crate::error::{InetError, Result};
use crate::icmp::{self, IcmpAction};
use crate::link::{self, IpLink, LinkRegistry, ETHERNET_SERVICE_PREFIX};
use crate::ntrans::NeighbourCache;
use crate::pdu::{self, NdpFlags, NdpMessage, Packet, IP_PROTO_ICMP, IP_PROTO_ICMPV6};
use crate::reassembly::ReassemblyEngine;
use crate::registry::{ClientRegistry, EventSink, PingRegistry};
use crate::router::{self, Inbound, Router, SendV6Outcome};
use crate::service_config::ServiceConfig;
use crate::sroute::SrouteTable;

/// Result of a client or ping send that may depend on neighbour
/// resolution still in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    NeedSolicit,
    Pending,
}

pub struct InetService {
    pub links: LinkRegistry,
    pub addrobj: AddrObjTable,
    pub sroute: SrouteTable,
    pub reassembly: ReassemblyEngine,
    pub ntrans: NeighbourCache,
    pub clients: ClientRegistry,
    pub pings: PingRegistry,
    router: Router,
    dhcp: Box<dyn DhcpHook + Send>,
    config: ServiceConfig,
}

impl InetService {
    pub fn new(config: ServiceConfig, dhcp: Box<dyn DhcpHook + Send>) -> InetService {
        InetService {
            links: LinkRegistry::new(),
            addrobj: AddrObjTable::new(),
            sroute: SrouteTable::new(),
            reassembly: ReassemblyEngine::new(config.reassembly_lifetime_millis),
            ntrans: NeighbourCache::new(),
            clients: ClientRegistry::new(),
            pings: PingRegistry::new(),
            router: Router::new(),
            dhcp,
            config,
        }
    }

    /// Opens a newly appeared link and auto-configures it: the very first
    /// link ever discovered gets the fixed loopback addresses, an
    /// ethernet-class link gets a link-local address derived from its MAC
    /// and, if it ends up with no persisted non-`temp` address, a DHCP
    /// request (§4.L). Gating on discovery order (not on the link's
    /// service-name class) matches `original_source`'s `first_link`/
    /// `first_link6` flags.
    pub fn discover_link(&self, link_id: u64, service_name: String, link: Box<dyn IpLink + Send>) -> Result<()> {
        let discovered = self.links.discover(link_id, service_name, link)?;

        if discovered.is_first_link {
            self.add_address_internal("lo4", InetNaddr::new(InetAddr::V4(0x7f00_0001), self.config.loopback_prefix_v4)?, link_id, false)?;
            self.add_address_internal("lo6", InetNaddr::new(InetAddr::V6(LOOPBACK_V6), self.config.loopback_prefix_v6)?, link_id, false)?;
        } else if let Some(mac) = discovered.mac.filter(|_| discovered.mac_valid) {
            let local = link::link_local_from_mac(mac);
            self.add_address_internal("link-local", InetNaddr::new(local, self.config.link_local_prefix_v6)?, link_id, true)?;
        }

        if discovered.is_ethernet && self.addrobj.count_nontemp_by_link(link_id) == 0 {
            self.dhcp.link_add(link_id)?;
        }

        Ok(())
    }

    fn add_address_internal(&self, name: &str, naddr: InetNaddr, link_id: u64, temp: bool) -> Result<()> {
        let id = self.addrobj.create(name, naddr, link_id, temp)?;
        if let Err(e) = self.links.addr_add(link_id, naddr.host_addr()) {
            let _ = self.addrobj.delete(id);
            return Err(e);
        }
        Ok(())
    }

    /// Creates a configuration-driven address object (§4.C).
    pub fn create_address(&self, name: &str, naddr: InetNaddr, link_id: u64) -> Result<u64> {
        let id = self.addrobj.create(name, naddr, link_id, false)?;
        if let Err(e) = self.links.addr_add(link_id, naddr.host_addr()) {
            let _ = self.addrobj.delete(id);
            return Err(e);
        }
        Ok(id)
    }

    /// Deletes an address object, retriggering the DHCP hook when it was
    /// the last non-`temp` address on an ethernet-class link.
    pub fn delete_address(&self, id: u64) -> Result<()> {
        let info = self.addrobj.get(id)?;
        let outcome = self.addrobj.delete(id)?;
        let _ = self.links.addr_remove(outcome.link_id, info.naddr.host_addr());

        if outcome.retrigger_dhcp {
            if let Ok(name) = self.links.service_name(outcome.link_id) {
                if name.starts_with(ETHERNET_SERVICE_PREFIX) {
                    self.dhcp.link_remove(outcome.link_id)?;
                }
            }
        }
        Ok(())
    }

    pub fn find_address(&self, addr: &InetAddr, mode: FindMode) -> Option<AddrObjInfo> {
        self.addrobj.find(addr, mode)
    }

    pub fn create_route(&self, name: &str, dest: InetNaddr, router_addr: InetAddr) -> Result<u64> {
        self.sroute.create(name, dest, router_addr)
    }

    pub fn delete_route(&self, id: u64) -> Result<()> {
        self.sroute.delete(id)
    }

    pub fn register_client(&self, protocol: u8, sink: Box<dyn EventSink + Send>) {
        self.clients.register(protocol, sink);
    }

    pub fn unregister_client(&self, protocol: u8) {
        self.clients.unregister(protocol);
    }

    /// Sends a payload under the given protocol on behalf of a client
    /// (§4.M `inet_send`). `now`/timeout only matter for IPv6, where
    /// neighbour resolution may still be in flight.
    #[allow(clippy::too_many_arguments)]
    pub fn send_client(
        &self,
        dest: InetAddr,
        proto: u8,
        tos: u8,
        ttl: u8,
        df: bool,
        payload: &[u8],
        now: Tick,
    ) -> Result<SendOutcome> {
        match dest {
            InetAddr::V4(_) => {
                self.router
                    .send_v4(&self.links, &self.addrobj, &self.sroute, dest, tos, proto, ttl, df, payload)?;
                Ok(SendOutcome::Sent)
            }
            InetAddr::V6(_) => self.send_v6_with_solicit(dest, tos, proto, ttl, payload, now),
        }
    }

    /// Sends a payload directly on a named link, bypassing route
    /// resolution entirely (§4.G.1). Only IPv4 supports this shortcut; the
    /// caller supplies `src` itself since there is no route to resolve it
    /// from.
    #[allow(clippy::too_many_arguments)]
    pub fn send_client_on_link(
        &self,
        iplink_id: u64,
        src: InetAddr,
        dest: InetAddr,
        proto: u8,
        tos: u8,
        ttl: u8,
        df: bool,
        payload: &[u8],
    ) -> Result<()> {
        let datagram = pdu::Datagram {
            iplink_id,
            src,
            dest,
            tos_or_class: tos,
            data: payload.to_vec(),
        };
        self.router.route_v4(&self.links, &self.addrobj, &self.sroute, &datagram, proto, ttl, df)
    }

    fn send_v6_with_solicit(&self, dest: InetAddr, tos: u8, proto: u8, ttl: u8, payload: &[u8], now: Tick) -> Result<SendOutcome> {
        let outcome = self.router.send_v6(
            &self.links,
            &self.addrobj,
            &self.sroute,
            &self.ntrans,
            dest,
            tos,
            proto,
            ttl,
            payload,
            now,
            self.config.ndp_timeout_millis,
        )?;
        match outcome {
            SendV6Outcome::Sent => Ok(SendOutcome::Sent),
            SendV6Outcome::Pending => Ok(SendOutcome::Pending),
            SendV6Outcome::NeedSolicit { link_id, target } => {
                self.solicit(link_id, target)?;
                Ok(SendOutcome::NeedSolicit)
            }
        }
    }

    /// Emits an NDP neighbour solicitation for `target` to its
    /// solicited-node multicast group on `link_id`.
    fn solicit(&self, link_id: u64, target: [u8; 16]) -> Result<()> {
        let info = self.links.info(link_id)?;
        let mac = info.mac.filter(|_| info.mac_valid).ok_or(InetError::LinkFailure)?;

        let source = self
            .addrobj
            .find(&InetAddr::V6(target), FindMode::Network)
            .map(|a| a.naddr.host_addr().as_v6())
            .flatten()
            .unwrap_or(target);

        let msg = NdpMessage {
            msg_type: pdu::ICMPV6_NEIGHBOR_SOLICIT,
            flags: NdpFlags::empty(),
            target,
            option_type: pdu::NDP_OPT_SOURCE_LINK_ADDR,
            mac,
        };
        let group = router::solicited_node_multicast(target);
        let payload = pdu::encode_ndp(&msg, source, group);
        let dest_mac = link::multicast_mac_from_v6(group);

        let buf = pdu::encode_ipv6(&payload, source, group, 0, IP_PROTO_ICMPV6, 255, info.default_mtu as usize)?;
        self.links.send_v6(link_id, dest_mac, &buf)
    }

    pub fn ping_send_v4(&self, sink: Box<dyn EventSink + Send>, dest: InetAddr, seq_no: u16, data: &[u8]) -> Result<u16> {
        icmp::ping_send_v4(&self.router, &self.links, &self.addrobj, &self.sroute, &self.pings, sink, dest, seq_no, data)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn ping_send_v6(
        &self,
        sink: Box<dyn EventSink + Send>,
        dest: InetAddr,
        seq_no: u16,
        data: &[u8],
        now: Tick,
    ) -> Result<(u16, SendOutcome)> {
        let (ident, outcome) = icmp::ping_send_v6(
            &self.router,
            &self.links,
            &self.addrobj,
            &self.sroute,
            &self.ntrans,
            &self.pings,
            sink,
            dest,
            seq_no,
            data,
            now,
            self.config.ndp_timeout_millis,
        )?;
        let outcome = match outcome {
            SendV6Outcome::Sent => SendOutcome::Sent,
            SendV6Outcome::Pending => SendOutcome::Pending,
            SendV6Outcome::NeedSolicit { link_id, target } => {
                self.solicit(link_id, target)?;
                SendOutcome::NeedSolicit
            }
        };
        Ok((ident, outcome))
    }

    /// Entry point for a raw datagram arriving on `link_id`. `src_mac`, if
    /// the link driver can report it, seeds the neighbour cache from any
    /// inbound IPv6 traffic so that a reply to it never has to solicit.
    pub fn handle_link_recv(&self, link_id: u64, version: IpVersion, raw: &[u8], src_mac: Option<MacAddr>, now: Tick) -> Result<()> {
        match router::receive(&self.addrobj, &self.reassembly, raw, link_id, version, now)? {
            Inbound::NotForUs | Inbound::Pending => Ok(()),
            Inbound::Deliver(packet) => self.dispatch(packet, src_mac, now),
        }
    }

    fn dispatch(&self, packet: Packet, src_mac: Option<MacAddr>, now: Tick) -> Result<()> {
        if let (InetAddr::V6(src6), Some(mac)) = (packet.src, src_mac) {
            self.ntrans.add(src6, mac);
        }

        match packet.proto {
            IP_PROTO_ICMP => match icmp::handle_icmpv4(&self.pings, &packet)? {
                IcmpAction::Reply { payload } => {
                    self.router
                        .send_v4(&self.links, &self.addrobj, &self.sroute, packet.src, 0, IP_PROTO_ICMP, 255, false, &payload)
                }
                IcmpAction::Handled | IcmpAction::Ignored => Ok(()),
            },
            IP_PROTO_ICMPV6 => {
                let local_mac = self.links.info(packet.link_id).ok().and_then(|i| i.mac.filter(|_| i.mac_valid));
                match icmp::handle_icmpv6(&self.ntrans, &self.pings, local_mac, &packet)? {
                    IcmpAction::Reply { payload } => {
                        match self.send_v6_with_solicit(packet.src, 0, IP_PROTO_ICMPV6, 255, &payload, now) {
                            Ok(_) => Ok(()),
                            Err(e) => Err(e),
                        }
                    }
                    IcmpAction::Handled | IcmpAction::Ignored => Ok(()),
                }
            }
            proto => match self.clients.deliver(proto, packet.tos, packet.link_id, packet.src, packet.dest, &packet.data) {
                Ok(()) | Err(InetError::NotFound) => Ok(()),
                Err(e) => Err(e),
            },
        }
    }

    /// Drops reassembly groups that have outlived their lifetime. A host
    /// calls this on a periodic tick.
    pub fn sweep_reassembly(&self, now: Tick) -> usize {
        self.reassembly.sweep(now)
    }

    pub fn save_config(&self, store: &dyn ConfigStore) -> Result<()> {
        let tree = config::build_tree(&self.addrobj, &self.sroute, &self.links);
        store.save(&tree)
    }

    pub fn load_config(&self, store: &dyn ConfigStore) -> Result<()> {
        let tree: AttrNode = store.load()?;
        config::load_tree(&tree, &self.addrobj, &self.sroute, &self.links)
    }
}

const LOOPBACK_V6: [u8; 16] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1];
