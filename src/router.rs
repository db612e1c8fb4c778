//! Router (component G): egress (route resolution, per-datagram ident
//! allocation, fragmentation) and ingress (decode, local-destination test,
//! reassemble-or-deliver-or-drop).

use spin::Mutex;

use crate::addr::{InetAddr, IpVersion, MAC_ZERO};
use crate::addrobj::{AddrObjTable, FindMode};
use crate::clock::Tick;
use crate::error::{InetError, Result};
use crate::link::LinkRegistry;
use crate::ntrans::{NeighbourCache, TranslateOutcome};
use crate::pdu::{self, Datagram, Ipv4EncodeParams, Packet, IPV4_HEADER_SIZE};
use crate::reassembly::ReassemblyEngine;
use crate::sroute::SrouteTable;

/// A resolved next hop: which link to send on, which local address to use
/// as the IP source, and which address to hand to the link layer (the
/// final destination if on-link, otherwise the gateway).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub link_id: u64,
    pub src: InetAddr,
    pub next_hop: InetAddr,
}

/// Finds a direct (on-link) route first, falling back to the longest
/// matching static route and then requiring the gateway itself be on-link.
pub fn resolve_route(addrobj: &AddrObjTable, sroute: &SrouteTable, dest: InetAddr) -> Result<Route> {
    if let Some(direct) = addrobj.find(&dest, FindMode::Network) {
        return Ok(Route {
            link_id: direct.link_id,
            src: direct.naddr.host_addr(),
            next_hop: dest,
        });
    }

    let route = sroute.find(&dest).ok_or(InetError::NoRoute)?;
    let via = addrobj
        .find(&route.router, FindMode::Network)
        .ok_or(InetError::NoRoute)?;
    Ok(Route {
        link_id: via.link_id,
        src: via.naddr.host_addr(),
        next_hop: route.router,
    })
}

/// Outcome of an IPv6 send attempt that depends on neighbour resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendV6Outcome {
    Sent,
    /// No neighbour entry and no solicitation in flight yet; the caller
    /// must emit an NDP neighbour solicitation for `target` on `link_id`
    /// and retry.
    NeedSolicit { link_id: u64, target: [u8; 16] },
    /// A solicitation is already in flight; retry later.
    Pending,
}

/// What the caller should do with a decoded ingress datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Deliver(Packet),
    Pending,
    /// Destination matched no local address, broadcast, or multicast
    /// group this node has joined.
    NotForUs,
}

pub struct Router {
    next_ident: Mutex<u16>,
}

impl Default for Router {
    fn default() -> Router {
        Router::new()
    }
}

impl Router {
    pub fn new() -> Router {
        Router {
            next_ident: Mutex::new(1),
        }
    }

    /// Allocates one ident, shared across every fragment of the datagram
    /// it is about to be split into (§4.E, diverging from a per-fragment
    /// allocation).
    fn alloc_ident(&self) -> u16 {
        let mut next = self.next_ident.lock();
        let id = *next;
        *next = next.wrapping_add(1);
        id
    }

    /// Egress entry point for an IPv4 [`Datagram`] (§4.G.1). If
    /// `datagram.iplink_id` is non-zero this bypasses route resolution
    /// entirely: it looks the link up directly and hands it a single
    /// packet built from `datagram.src`/`datagram.dest` as given, with no
    /// fragmentation loop. Otherwise it falls through to [`Router::send_v4`],
    /// which resolves a route the usual way.
    pub fn route_v4(
        &self,
        links: &LinkRegistry,
        addrobj: &AddrObjTable,
        sroute: &SrouteTable,
        datagram: &Datagram,
        proto: u8,
        ttl: u8,
        df: bool,
    ) -> Result<()> {
        if datagram.iplink_id == 0 {
            return self.send_v4(
                links,
                addrobj,
                sroute,
                datagram.dest,
                datagram.tos_or_class,
                proto,
                ttl,
                df,
                &datagram.data,
            );
        }

        let src_v4 = datagram.src.as_v4().ok_or(InetError::Invalid)?;
        let dest_v4 = datagram.dest.as_v4().ok_or(InetError::Invalid)?;
        let info = links.info(datagram.iplink_id)?;
        let mtu = info.default_mtu as usize;
        let ident = self.alloc_ident();

        let (buf, _next) = pdu::encode_ipv4(Ipv4EncodeParams {
            payload: &datagram.data,
            src: src_v4,
            dest: dest_v4,
            tos: datagram.tos_or_class,
            proto,
            ttl,
            ident,
            df,
            offset: 0,
            mtu,
        })?;
        links.send_v4(datagram.iplink_id, src_v4, dest_v4, &buf)
    }

    /// Resolves a route, allocates one ident, and walks the MTU-bounded
    /// fragment loop, handing each fragment to the resolved link.
    pub fn send_v4(
        &self,
        links: &LinkRegistry,
        addrobj: &AddrObjTable,
        sroute: &SrouteTable,
        dest: InetAddr,
        tos: u8,
        proto: u8,
        ttl: u8,
        df: bool,
        payload: &[u8],
    ) -> Result<()> {
        let route = resolve_route(addrobj, sroute, dest)?;
        let dest_v4 = dest.as_v4().ok_or(InetError::Invalid)?;
        let src_v4 = route.src.as_v4().ok_or(InetError::Invalid)?;
        let next_hop_v4 = route.next_hop.as_v4().ok_or(InetError::Invalid)?;

        let info = links.info(route.link_id)?;
        let mtu = info.default_mtu as usize;

        if df && payload.len() > mtu.saturating_sub(IPV4_HEADER_SIZE) {
            return Err(InetError::Overflow);
        }

        let ident = self.alloc_ident();
        let mut offset = 0;
        loop {
            let (buf, next) = pdu::encode_ipv4(Ipv4EncodeParams {
                payload,
                src: src_v4,
                dest: dest_v4,
                tos,
                proto,
                ttl,
                ident,
                df,
                offset,
                mtu,
            })?;
            links.send_v4(route.link_id, src_v4, next_hop_v4, &buf)?;
            offset = next;
            if offset >= payload.len() {
                break;
            }
        }

        Ok(())
    }

    /// IPv6 send: this revision never fragments (§4.E), so a payload that
    /// does not fit under the link MTU fails with `Overflow` rather than
    /// being split.
    #[allow(clippy::too_many_arguments)]
    pub fn send_v6(
        &self,
        links: &LinkRegistry,
        addrobj: &AddrObjTable,
        sroute: &SrouteTable,
        ntrans: &NeighbourCache,
        dest: InetAddr,
        traffic_class: u8,
        proto: u8,
        ttl: u8,
        payload: &[u8],
        now: Tick,
        ndp_timeout_millis: u64,
    ) -> Result<SendV6Outcome> {
        let route = resolve_route(addrobj, sroute, dest)?;
        let dest_v6 = dest.as_v6().ok_or(InetError::Invalid)?;
        let src_v6 = route.src.as_v6().ok_or(InetError::Invalid)?;
        let next_hop_v6 = route.next_hop.as_v6().ok_or(InetError::Invalid)?;

        let info = links.info(route.link_id)?;

        // §4.H step 1: a link with no MAC (loopback) resolves to the zero
        // MAC immediately, skipping neighbour translation entirely.
        let mac = if !info.mac_valid {
            MAC_ZERO
        } else {
            match ntrans.translate(next_hop_v6, now, ndp_timeout_millis) {
                TranslateOutcome::Hit(mac) => mac,
                TranslateOutcome::NeedSolicit => {
                    return Ok(SendV6Outcome::NeedSolicit {
                        link_id: route.link_id,
                        target: next_hop_v6,
                    })
                }
                TranslateOutcome::Pending => return Ok(SendV6Outcome::Pending),
                TranslateOutcome::TimedOut => return Err(InetError::NoRoute),
            }
        };

        let buf = pdu::encode_ipv6(payload, src_v6, dest_v6, traffic_class, proto, ttl, info.default_mtu as usize)?;
        links.send_v6(route.link_id, mac, &buf)?;
        Ok(SendV6Outcome::Sent)
    }
}

/// The solicited-node multicast address `ff02::1:ffXX:XXXX` derived from
/// the low 24 bits of a unicast address.
pub fn solicited_node_multicast(host: [u8; 16]) -> [u8; 16] {
    let mut m = [0u8; 16];
    m[0] = 0xff;
    m[1] = 0x02;
    m[11] = 0x01;
    m[12] = 0xff;
    m[13] = host[13];
    m[14] = host[14];
    m[15] = host[15];
    m
}

fn is_solicited_node_match(addrobj: &AddrObjTable, dest: [u8; 16]) -> bool {
    addrobj.list_ids().into_iter().any(|id| {
        addrobj
            .get(id)
            .ok()
            .and_then(|info| info.naddr.host_addr().as_v6())
            .map(|host| solicited_node_multicast(host) == dest)
            .unwrap_or(false)
    })
}

/// Whether `dest` is an address this node must accept: exact match against
/// a local address object, the IPv4 broadcast address, the IPv6
/// all-nodes multicast group, or a solicited-node group for a local
/// address.
pub fn local_destination(addrobj: &AddrObjTable, dest: InetAddr) -> bool {
    match dest {
        InetAddr::V4(_) => {
            dest == InetAddr::V4_BROADCAST || addrobj.find(&dest, FindMode::Exact).is_some()
        }
        InetAddr::V6(bytes) => {
            dest == InetAddr::V6_ALL_NODES
                || is_solicited_node_match(addrobj, bytes)
                || addrobj.find(&dest, FindMode::Exact).is_some()
        }
    }
}

/// Decodes one ingress PDU, drops it if not locally owned, and otherwise
/// either delivers it immediately or hands it to the reassembler.
pub fn receive(
    addrobj: &AddrObjTable,
    reassembly: &ReassemblyEngine,
    raw: &[u8],
    link_id: u64,
    version: IpVersion,
    now: Tick,
) -> Result<Inbound> {
    let mut packet = match version {
        IpVersion::V4 => pdu::decode_ipv4(raw)?,
        IpVersion::V6 => pdu::decode_ipv6(raw)?,
    };
    packet.link_id = link_id;

    if !local_destination(addrobj, packet.dest) {
        return Ok(Inbound::NotForUs);
    }

    if packet.frag_offset == 0 && !packet.mf {
        return Ok(Inbound::Deliver(packet));
    }

    match reassembly.queue(&packet, now)? {
        Some(complete) => Ok(Inbound::Deliver(complete)),
        None => Ok(Inbound::Pending),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::InetNaddr;
    use crate::link::IpLink;
    use alloc::boxed::Box;
    use alloc::string::ToString;
    use alloc::vec;

    struct StubLink {
        mtu: u32,
        mac: Option<crate::addr::MacAddr>,
    }
    impl IpLink for StubLink {
        fn get_mtu(&self) -> u32 {
            self.mtu
        }
        fn get_mac48(&self) -> Option<crate::addr::MacAddr> {
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
        fn send6(&self, _dest_mac: crate::addr::MacAddr, _data: &[u8]) -> Result<()> {
            Ok(())
        }
    }

    fn setup() -> (LinkRegistry, AddrObjTable, SrouteTable) {
        let links = LinkRegistry::new();
        links
            .discover(
                1,
                "net/eth0".to_string(),
                Box::new(StubLink { mtu: 1500, mac: Some([0x02, 0, 0, 0, 0, 1]) }),
            )
            .unwrap();
        links
            .discover(
                2,
                "net/eth1".to_string(),
                Box::new(StubLink { mtu: 1500, mac: Some([0x02, 0, 0, 0, 0, 2]) }),
            )
            .unwrap();

        let addrobj = AddrObjTable::new();
        addrobj
            .create("eth0", InetNaddr::parse("10.0.0.1/24").unwrap(), 1, false)
            .unwrap();
        addrobj
            .create("eth1", InetNaddr::parse("192.168.1.1/24").unwrap(), 2, false)
            .unwrap();

        let sroute = SrouteTable::new();
        (links, addrobj, sroute)
    }

    #[test]
    fn resolves_direct_route_on_matching_subnet() {
        let (_links, addrobj, sroute) = setup();
        let route = resolve_route(&addrobj, &sroute, InetAddr::parse("10.0.0.42").unwrap()).unwrap();
        assert_eq!(route.link_id, 1);
        assert_eq!(route.next_hop, InetAddr::parse("10.0.0.42").unwrap());
    }

    #[test]
    fn falls_back_to_static_route_for_off_link_destination() {
        let (_links, addrobj, sroute) = setup();
        sroute
            .create(
                "default",
                InetNaddr::parse("0.0.0.0/0").unwrap(),
                InetAddr::parse("192.168.1.254").unwrap(),
            )
            .unwrap();

        let route = resolve_route(&addrobj, &sroute, InetAddr::parse("8.8.8.8").unwrap()).unwrap();
        assert_eq!(route.link_id, 2);
        assert_eq!(route.next_hop, InetAddr::parse("192.168.1.254").unwrap());
    }

    #[test]
    fn no_route_when_gateway_itself_is_off_link() {
        let (_links, addrobj, sroute) = setup();
        sroute
            .create(
                "bad",
                InetNaddr::parse("0.0.0.0/0").unwrap(),
                InetAddr::parse("172.16.0.1").unwrap(),
            )
            .unwrap();
        assert_eq!(
            resolve_route(&addrobj, &sroute, InetAddr::parse("8.8.8.8").unwrap()).unwrap_err(),
            InetError::NoRoute
        );
    }

    #[test]
    fn send_v4_fragments_across_the_link_mtu() {
        let (links, addrobj, sroute) = setup();
        let router = Router::new();
        let payload = vec![7u8; 300];
        router
            .send_v4(
                &links,
                &addrobj,
                &sroute,
                InetAddr::parse("10.0.0.42").unwrap(),
                0,
                254,
                64,
                false,
                &payload,
            )
            .unwrap();
    }

    #[test]
    fn send_v4_with_df_rejects_oversized_payload() {
        let (links, addrobj, sroute) = setup();
        let router = Router::new();
        let payload = vec![7u8; 10_000];
        assert_eq!(
            router
                .send_v4(
                    &links,
                    &addrobj,
                    &sroute,
                    InetAddr::parse("10.0.0.42").unwrap(),
                    0,
                    254,
                    64,
                    true,
                    &payload,
                )
                .unwrap_err(),
            InetError::Overflow
        );
    }

    #[test]
    fn local_destination_matches_exact_broadcast_and_solicited_node() {
        let (_links, addrobj, _sroute) = setup();
        assert!(local_destination(&addrobj, InetAddr::parse("10.0.0.1").unwrap()));
        assert!(local_destination(&addrobj, InetAddr::V4_BROADCAST));
        assert!(!local_destination(&addrobj, InetAddr::parse("10.0.0.99").unwrap()));

        let addrobj6 = AddrObjTable::new();
        addrobj6
            .create("eth0", InetNaddr::parse("fe80::1/64").unwrap(), 1, true)
            .unwrap();
        let host = [0xfeu8, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1];
        let group = InetAddr::V6(solicited_node_multicast(host));
        assert!(local_destination(&addrobj6, group));
        assert!(local_destination(&addrobj6, InetAddr::V6_ALL_NODES));
    }

    #[test]
    fn receive_drops_packets_not_addressed_locally() {
        let (_links, addrobj, _sroute) = setup();
        let reassembly = ReassemblyEngine::new(60_000);

        let (buf, _) = pdu::encode_ipv4(Ipv4EncodeParams {
            payload: b"hi",
            src: 0x0a000005,
            dest: InetAddr::parse("10.0.0.200").unwrap().as_v4().unwrap(),
            tos: 0,
            proto: 254,
            ttl: 64,
            ident: 1,
            df: false,
            offset: 0,
            mtu: 1500,
        })
        .unwrap();

        let outcome = receive(&addrobj, &reassembly, &buf, 1, IpVersion::V4, Tick(0)).unwrap();
        assert_eq!(outcome, Inbound::NotForUs);
    }

    #[test]
    fn receive_delivers_unfragmented_packet_addressed_to_us() {
        let (_links, addrobj, _sroute) = setup();
        let reassembly = ReassemblyEngine::new(60_000);

        let (buf, _) = pdu::encode_ipv4(Ipv4EncodeParams {
            payload: b"hi",
            src: 0x0a000005,
            dest: InetAddr::parse("10.0.0.1").unwrap().as_v4().unwrap(),
            tos: 0,
            proto: 254,
            ttl: 64,
            ident: 1,
            df: false,
            offset: 0,
            mtu: 1500,
        })
        .unwrap();

        let outcome = receive(&addrobj, &reassembly, &buf, 1, IpVersion::V4, Tick(0)).unwrap();
        match outcome {
            Inbound::Deliver(pkt) => assert_eq!(pkt.data, b"hi"),
            other => panic!("expected Deliver, got {:?}", other),
        }
    }

    #[test]
    fn route_v4_with_iplink_id_bypasses_route_resolution() {
        let (links, _addrobj, _sroute) = setup();
        let addrobj_empty = AddrObjTable::new();
        let sroute_empty = SrouteTable::new();
        let router = Router::new();

        // No address object and no static route exist for this destination
        // at all, so `send_v4` would fail with `NoRoute`; `route_v4` with a
        // non-zero `iplink_id` must bypass that resolution entirely.
        let datagram = Datagram {
            iplink_id: 1,
            src: InetAddr::parse("10.0.0.1").unwrap(),
            dest: InetAddr::parse("203.0.113.7").unwrap(),
            tos_or_class: 0,
            data: vec![1, 2, 3],
        };
        router
            .route_v4(&links, &addrobj_empty, &sroute_empty, &datagram, 254, 64, false)
            .unwrap();
    }

    #[test]
    fn route_v4_without_iplink_id_falls_back_to_route_resolution() {
        let (links, addrobj, sroute) = setup();
        let router = Router::new();

        let datagram = Datagram {
            iplink_id: 0,
            src: InetAddr::V4_ANY,
            dest: InetAddr::parse("10.0.0.42").unwrap(),
            tos_or_class: 0,
            data: vec![1, 2, 3],
        };
        router
            .route_v4(&links, &addrobj, &sroute, &datagram, 254, 64, false)
            .unwrap();
    }

    #[test]
    fn send_v6_to_a_mac_less_link_resolves_zero_mac_without_soliciting() {
        let links = LinkRegistry::new();
        links
            .discover(1, "net/loopback".to_string(), Box::new(StubLink { mtu: 16384, mac: None }))
            .unwrap();

        let addrobj = AddrObjTable::new();
        addrobj
            .create("lo", InetNaddr::parse("::1/128").unwrap(), 1, false)
            .unwrap();
        let sroute = SrouteTable::new();
        let ntrans = NeighbourCache::new();
        let router = Router::new();

        let outcome = router
            .send_v6(
                &links,
                &addrobj,
                &sroute,
                &ntrans,
                InetAddr::parse("::1").unwrap(),
                0,
                254,
                64,
                b"hi",
                Tick(0),
                3_000,
            )
            .unwrap();
        assert_eq!(outcome, SendV6Outcome::Sent);
    }
}
