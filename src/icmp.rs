//! ICMP/ICMPv6 dispatch (component I): echo request/reply handling, NDP
//! solicitation/advertisement processing, and outbound ping sessions.

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;

use crate::addr::{checksum_calc, InetAddr, MacAddr, CHECKSUM_INIT};
use crate::addrobj::AddrObjTable;
use crate::clock::Tick;
use crate::error::{InetError, Result};
use crate::link::LinkRegistry;
use crate::ntrans::NeighbourCache;
use crate::pdu::{
    self, NdpFlags, NdpMessage, Packet, ICMPV6_NEIGHBOR_ADVERT, ICMPV6_NEIGHBOR_SOLICIT,
    IP_PROTO_ICMP, IP_PROTO_ICMPV6, NDP_OPT_TARGET_LINK_ADDR,
};
use crate::registry::{EventSink, PingRegistry};
use crate::router::{self, Router, SendV6Outcome};
use crate::sroute::SrouteTable;

pub const ICMP_ECHO_REQUEST: u8 = 8;
pub const ICMP_ECHO_REPLY: u8 = 0;
pub const ICMPV6_ECHO_REQUEST: u8 = 128;
pub const ICMPV6_ECHO_REPLY: u8 = 129;

const ICMP_HEADER_SIZE: usize = 8;

/// A decoded echo request or reply (the same 8-byte header shape on both
/// IPv4 and IPv6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoMessage {
    pub msg_type: u8,
    pub ident: u16,
    pub seq_no: u16,
    pub data: Vec<u8>,
}

fn encode_echo(msg_type: u8, ident: u16, seq_no: u16, data: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; ICMP_HEADER_SIZE + data.len()];
    buf[0] = msg_type;
    buf[1] = 0;
    buf[4..6].copy_from_slice(&ident.to_be_bytes());
    buf[6..8].copy_from_slice(&seq_no.to_be_bytes());
    buf[ICMP_HEADER_SIZE..].copy_from_slice(data);
    buf
}

fn decode_echo(buf: &[u8]) -> Result<EchoMessage> {
    if buf.len() < ICMP_HEADER_SIZE {
        return Err(InetError::Invalid);
    }
    Ok(EchoMessage {
        msg_type: buf[0],
        ident: u16::from_be_bytes([buf[4], buf[5]]),
        seq_no: u16::from_be_bytes([buf[6], buf[7]]),
        data: buf[ICMP_HEADER_SIZE..].to_vec(),
    })
}

/// Encodes an ICMPv4 echo request/reply, checksum over the body only.
pub fn encode_icmp_echo(msg_type: u8, ident: u16, seq_no: u16, data: &[u8]) -> Vec<u8> {
    let mut buf = encode_echo(msg_type, ident, seq_no, data);
    let cs = checksum_calc(CHECKSUM_INIT, &buf);
    buf[2..4].copy_from_slice(&cs.to_be_bytes());
    buf
}

/// Encodes an ICMPv6 echo request/reply; the checksum is extended over the
/// pseudo-header so the source/destination addresses must be known.
pub fn encode_icmpv6_echo(msg_type: u8, ident: u16, seq_no: u16, data: &[u8], src: [u8; 16], dest: [u8; 16]) -> Vec<u8> {
    let mut buf = encode_echo(msg_type, ident, seq_no, data);
    let phdr = pdu::icmpv6_pseudo_header(src, dest, buf.len() as u32);
    let cs = checksum_calc(checksum_calc(CHECKSUM_INIT, &phdr), &buf);
    buf[2..4].copy_from_slice(&cs.to_be_bytes());
    buf
}

/// What handling an inbound ICMP(v4) datagram produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IcmpAction {
    /// A reply must be routed back to `packet.src`.
    Reply { payload: Vec<u8> },
    /// Delivered to a registered ping session or otherwise consumed.
    Handled,
    /// A type this revision does not act on.
    Ignored,
}

/// Dispatches a reassembled ICMPv4 datagram: answers echo requests and
/// routes echo replies to the matching ping session.
pub fn handle_icmpv4(pings: &PingRegistry, packet: &Packet) -> Result<IcmpAction> {
    if checksum_calc(CHECKSUM_INIT, &packet.data) != 0 {
        return Err(InetError::Invalid);
    }
    let msg = decode_echo(&packet.data)?;
    match msg.msg_type {
        ICMP_ECHO_REQUEST => Ok(IcmpAction::Reply {
            payload: encode_icmp_echo(ICMP_ECHO_REPLY, msg.ident, msg.seq_no, &msg.data),
        }),
        ICMP_ECHO_REPLY => {
            let _ = pings.deliver(msg.ident, msg.seq_no, packet.src, packet.dest, &msg.data);
            Ok(IcmpAction::Handled)
        }
        _ => Ok(IcmpAction::Ignored),
    }
}

/// Dispatches a reassembled ICMPv6 datagram: echo request/reply plus NDP
/// solicitation/advertisement. `local_mac` is this node's MAC on the
/// packet's arrival link, needed to answer a solicitation.
pub fn handle_icmpv6(
    ntrans: &NeighbourCache,
    pings: &PingRegistry,
    local_mac: Option<MacAddr>,
    packet: &Packet,
) -> Result<IcmpAction> {
    let src6 = packet.src.as_v6().ok_or(InetError::Invalid)?;
    let dest6 = packet.dest.as_v6().ok_or(InetError::Invalid)?;

    let phdr = pdu::icmpv6_pseudo_header(src6, dest6, packet.data.len() as u32);
    if checksum_calc(checksum_calc(CHECKSUM_INIT, &phdr), &packet.data) != 0 {
        return Err(InetError::Invalid);
    }

    if packet.data.is_empty() {
        return Err(InetError::Invalid);
    }

    match packet.data[0] {
        ICMPV6_ECHO_REQUEST => {
            let msg = decode_echo(&packet.data)?;
            Ok(IcmpAction::Reply {
                payload: encode_icmpv6_echo(ICMPV6_ECHO_REPLY, msg.ident, msg.seq_no, &msg.data, dest6, src6),
            })
        }
        ICMPV6_ECHO_REPLY => {
            let msg = decode_echo(&packet.data)?;
            let _ = pings.deliver(msg.ident, msg.seq_no, packet.src, packet.dest, &msg.data);
            Ok(IcmpAction::Handled)
        }
        ICMPV6_NEIGHBOR_SOLICIT => {
            let ndp = pdu::decode_ndp(&packet.data)?;
            ntrans.add(src6, ndp.mac);
            match local_mac {
                Some(mac) => {
                    let advert = NdpMessage {
                        msg_type: ICMPV6_NEIGHBOR_ADVERT,
                        flags: NdpFlags::SOLICITED | NdpFlags::OVERRIDE,
                        target: ndp.target,
                        option_type: NDP_OPT_TARGET_LINK_ADDR,
                        mac,
                    };
                    Ok(IcmpAction::Reply {
                        payload: pdu::encode_ndp(&advert, ndp.target, src6),
                    })
                }
                None => Ok(IcmpAction::Handled),
            }
        }
        ICMPV6_NEIGHBOR_ADVERT => {
            let ndp = pdu::decode_ndp(&packet.data)?;
            ntrans.add(ndp.target, ndp.mac);
            Ok(IcmpAction::Handled)
        }
        _ => Ok(IcmpAction::Ignored),
    }
}

/// Starts an outbound IPv4 ping: registers a session and sends the echo
/// request. Returns the allocated ident (the caller matches replies on it).
pub fn ping_send_v4(
    router: &Router,
    links: &LinkRegistry,
    addrobj: &AddrObjTable,
    sroute: &SrouteTable,
    pings: &PingRegistry,
    sink: Box<dyn EventSink + Send>,
    dest: InetAddr,
    seq_no: u16,
    data: &[u8],
) -> Result<u16> {
    let ident = pings.register(sink);
    let payload = encode_icmp_echo(ICMP_ECHO_REQUEST, ident, seq_no, data);
    router.send_v4(links, addrobj, sroute, dest, 0, IP_PROTO_ICMP, 64, false, &payload)?;
    Ok(ident)
}

/// Starts an outbound IPv6 ping. May return `Ok` with the session already
/// registered even when the first attempt only triggers neighbour
/// solicitation (`SendV6Outcome::NeedSolicit`); the caller re-sends once
/// resolution completes using the same ident.
#[allow(clippy::too_many_arguments)]
pub fn ping_send_v6(
    router: &Router,
    links: &LinkRegistry,
    addrobj: &AddrObjTable,
    sroute: &SrouteTable,
    ntrans: &NeighbourCache,
    pings: &PingRegistry,
    sink: Box<dyn EventSink + Send>,
    dest: InetAddr,
    seq_no: u16,
    data: &[u8],
    now: Tick,
    ndp_timeout_millis: u64,
) -> Result<(u16, SendV6Outcome)> {
    let route = router::resolve_route(addrobj, sroute, dest)?;
    let src6 = route.src.as_v6().ok_or(InetError::Invalid)?;
    let dest6 = dest.as_v6().ok_or(InetError::Invalid)?;

    let ident = pings.register(sink);
    let payload = encode_icmpv6_echo(ICMPV6_ECHO_REQUEST, ident, seq_no, data, src6, dest6);
    let outcome = router.send_v6(
        links,
        addrobj,
        sroute,
        ntrans,
        dest,
        0,
        IP_PROTO_ICMPV6,
        255,
        &payload,
        now,
        ndp_timeout_millis,
    )?;
    Ok((ident, outcome))
}
