//! PDU codec (component E): IPv4/IPv6 header encode/decode with per-fragment
//! framing, plus the NDP wire format used over ICMPv6.

use alloc::vec;
use alloc::vec::Vec;

use crate::addr::{checksum_calc, InetAddr, MacAddr, CHECKSUM_INIT};
use crate::error::{InetError, Result};

pub const IPV4_HEADER_SIZE: usize = 20;
pub const IPV6_HEADER_SIZE: usize = 40;
pub const IP_PROTO_ICMP: u8 = 1;
pub const IP_PROTO_ICMPV6: u8 = 58;

/// Upper bound for the 13-bit fragment-offset field, in 8-byte units.
const FRAGOFF_LIMIT: usize = 1 << 13;
const FRAG_UNIT: usize = 8;

/// A decoded (or about-to-be-encoded) IP-layer packet, the internal
/// representation threaded between the router, the reassembler and the
/// protocol handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub link_id: u64,
    pub src: InetAddr,
    pub dest: InetAddr,
    pub tos: u8,
    pub proto: u8,
    pub ttl: u8,
    pub ident: u16,
    pub df: bool,
    pub mf: bool,
    /// Byte offset of this fragment's payload within the original
    /// datagram; always a multiple of 8.
    pub frag_offset: usize,
    pub data: Vec<u8>,
}

/// The carrier handed across the client/ping-to-router boundary (§3). A
/// non-zero `iplink_id` asks the router to bypass route resolution and
/// hand the packet straight to that link (§4.G.1); `0` means "resolve a
/// route the usual way".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub iplink_id: u64,
    pub src: InetAddr,
    pub dest: InetAddr,
    pub tos_or_class: u8,
    pub data: Vec<u8>,
}

/// Inputs to a single IPv4 fragment-encode call.
pub struct Ipv4EncodeParams<'a> {
    pub payload: &'a [u8],
    pub src: u32,
    pub dest: u32,
    pub tos: u8,
    pub proto: u8,
    pub ttl: u8,
    pub ident: u16,
    pub df: bool,
    /// Byte offset into `payload` this call should start emitting from.
    pub offset: usize,
    pub mtu: usize,
}

/// Encodes one IPv4 fragment starting at `params.offset`. Returns the
/// serialised PDU and the offset the next call should resume from; when
/// the returned offset equals `payload.len()` this was the last fragment
/// (`mf` was written as false).
pub fn encode_ipv4(params: Ipv4EncodeParams) -> Result<(Vec<u8>, usize)> {
    if params.mtu < IPV4_HEADER_SIZE {
        return Err(InetError::Invalid);
    }

    debug_assert_eq!(params.offset % FRAG_UNIT, 0, "fragment offset must be 8-byte aligned");

    let foff = params.offset / FRAG_UNIT;
    if foff >= FRAGOFF_LIMIT {
        return Err(InetError::Overflow);
    }

    let mut spc_avail = params.mtu - IPV4_HEADER_SIZE;
    spc_avail -= spc_avail % FRAG_UNIT;

    let remaining = params.payload.len() - params.offset;
    let xfer = core::cmp::min(remaining, spc_avail);
    let next_offset = params.offset + xfer;
    let mf = next_offset < params.payload.len();

    let total_length = IPV4_HEADER_SIZE + xfer;
    if total_length > u16::MAX as usize {
        return Err(InetError::Overflow);
    }

    let mut buf = vec![0u8; total_length];
    buf[0] = (4 << 4) | 5;
    buf[1] = params.tos;
    buf[2..4].copy_from_slice(&(total_length as u16).to_be_bytes());
    buf[4..6].copy_from_slice(&params.ident.to_be_bytes());

    let flags_frag: u16 = ((params.df as u16) << 14) | ((mf as u16) << 13) | (foff as u16);
    buf[6..8].copy_from_slice(&flags_frag.to_be_bytes());

    buf[8] = params.ttl;
    buf[9] = params.proto;
    // buf[10..12] checksum left zero for the calculation below.
    buf[12..16].copy_from_slice(&params.src.to_be_bytes());
    buf[16..20].copy_from_slice(&params.dest.to_be_bytes());

    let cs = checksum_calc(CHECKSUM_INIT, &buf[0..IPV4_HEADER_SIZE]);
    buf[10..12].copy_from_slice(&cs.to_be_bytes());

    buf[IPV4_HEADER_SIZE..].copy_from_slice(&params.payload[params.offset..next_offset]);

    Ok((buf, next_offset))
}

/// Decodes a single IPv4 PDU (one fragment, or a complete unfragmented
/// datagram) into a [`Packet`]. `link_id` is attached by the caller.
pub fn decode_ipv4(buf: &[u8]) -> Result<Packet> {
    if buf.len() < IPV4_HEADER_SIZE {
        return Err(InetError::Invalid);
    }

    let version = buf[0] >> 4;
    if version != 4 {
        return Err(InetError::Invalid);
    }
    let ihl = (buf[0] & 0x0f) as usize * 4;
    if ihl < IPV4_HEADER_SIZE || ihl > buf.len() {
        return Err(InetError::Invalid);
    }

    let tos = buf[1];
    let total_length = u16::from_be_bytes([buf[2], buf[3]]) as usize;
    if total_length < ihl || total_length > buf.len() {
        return Err(InetError::Invalid);
    }

    let ident = u16::from_be_bytes([buf[4], buf[5]]);
    let flags_frag = u16::from_be_bytes([buf[6], buf[7]]);
    let df = flags_frag & 0x4000 != 0;
    let mf = flags_frag & 0x2000 != 0;
    let frag_offset = ((flags_frag & 0x1fff) as usize) * FRAG_UNIT;

    let ttl = buf[8];
    let proto = buf[9];
    let src = u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]);
    let dest = u32::from_be_bytes([buf[16], buf[17], buf[18], buf[19]]);

    let data = buf[ihl..total_length].to_vec();

    Ok(Packet {
        link_id: 0,
        src: InetAddr::V4(src),
        dest: InetAddr::V4(dest),
        tos,
        proto,
        ttl,
        ident,
        df,
        mf,
        frag_offset,
        data,
    })
}

/// Encodes a complete (unfragmented) IPv6 datagram. IPv6 fragmentation is
/// not produced in this revision (§4.E); if `payload` does not fit below
/// `mtu` this fails with `Overflow` rather than silently truncating.
pub fn encode_ipv6(
    payload: &[u8],
    src: [u8; 16],
    dest: [u8; 16],
    traffic_class: u8,
    proto: u8,
    ttl: u8,
    mtu: usize,
) -> Result<Vec<u8>> {
    if mtu < IPV6_HEADER_SIZE || payload.len() > mtu - IPV6_HEADER_SIZE {
        return Err(InetError::Overflow);
    }
    if payload.len() > u16::MAX as usize {
        return Err(InetError::Overflow);
    }

    let mut buf = vec![0u8; IPV6_HEADER_SIZE + payload.len()];
    let version_tc_flow: u32 = (6u32 << 28) | ((traffic_class as u32) << 20);
    buf[0..4].copy_from_slice(&version_tc_flow.to_be_bytes());
    buf[4..6].copy_from_slice(&(payload.len() as u16).to_be_bytes());
    buf[6] = proto;
    buf[7] = ttl;
    buf[8..24].copy_from_slice(&src);
    buf[24..40].copy_from_slice(&dest);
    buf[IPV6_HEADER_SIZE..].copy_from_slice(payload);

    Ok(buf)
}

/// Decodes an IPv6 PDU. Fragmentation metadata is always reported as "not
/// fragmented" (§4.E).
pub fn decode_ipv6(buf: &[u8]) -> Result<Packet> {
    if buf.len() < IPV6_HEADER_SIZE {
        return Err(InetError::Invalid);
    }
    let version = buf[0] >> 4;
    if version != 6 {
        return Err(InetError::Invalid);
    }

    let payload_len = u16::from_be_bytes([buf[4], buf[5]]) as usize;
    if IPV6_HEADER_SIZE + payload_len > buf.len() {
        return Err(InetError::Invalid);
    }

    let proto = buf[6];
    let ttl = buf[7];
    let mut src = [0u8; 16];
    src.copy_from_slice(&buf[8..24]);
    let mut dest = [0u8; 16];
    dest.copy_from_slice(&buf[24..40]);

    let data = buf[IPV6_HEADER_SIZE..IPV6_HEADER_SIZE + payload_len].to_vec();

    Ok(Packet {
        link_id: 0,
        src: InetAddr::V6(src),
        dest: InetAddr::V6(dest),
        tos: 0,
        proto,
        ttl,
        ident: 0,
        df: false,
        mf: false,
        frag_offset: 0,
        data,
    })
}

/// Builds the 40-byte ICMPv6 pseudo-header used to extend a checksum over
/// an ICMPv6 message: source, destination, upper-layer length, three zero
/// bytes, next-header (58).
pub fn icmpv6_pseudo_header(src: [u8; 16], dest: [u8; 16], upper_len: u32) -> [u8; 40] {
    let mut p = [0u8; 40];
    p[0..16].copy_from_slice(&src);
    p[16..32].copy_from_slice(&dest);
    p[32..36].copy_from_slice(&upper_len.to_be_bytes());
    p[39] = IP_PROTO_ICMPV6;
    p
}

pub const ICMPV6_NEIGHBOR_SOLICIT: u8 = 135;
pub const ICMPV6_NEIGHBOR_ADVERT: u8 = 136;
pub const NDP_OPT_SOURCE_LINK_ADDR: u8 = 1;
pub const NDP_OPT_TARGET_LINK_ADDR: u8 = 2;

bitflags::bitflags! {
    /// Neighbour-advertisement flags (only meaningful on advertisements).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NdpFlags: u8 {
        /// Sent in response to a solicitation, not unsolicited.
        const SOLICITED = 0x40;
        /// Overrides any existing cache entry for the target.
        const OVERRIDE = 0x20;
    }
}

const NDP_MESSAGE_SIZE: usize = 32;

/// A neighbour-solicitation or neighbour-advertisement body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NdpMessage {
    pub msg_type: u8,
    pub flags: NdpFlags,
    pub target: [u8; 16],
    pub option_type: u8,
    pub mac: MacAddr,
}

/// Encodes an NDP message plus its ICMPv6 checksum (computed over the
/// pseudo-header followed by the message body).
pub fn encode_ndp(msg: &NdpMessage, src_v6: [u8; 16], dest_v6: [u8; 16]) -> Vec<u8> {
    let mut buf = vec![0u8; NDP_MESSAGE_SIZE];
    buf[0] = msg.msg_type;
    buf[1] = 0;
    buf[4] = msg.flags.bits();
    buf[8..24].copy_from_slice(&msg.target);
    buf[24] = msg.option_type;
    buf[25] = 1; // option length, in 8-octet units
    buf[26..32].copy_from_slice(&msg.mac);

    let phdr = icmpv6_pseudo_header(src_v6, dest_v6, buf.len() as u32);
    let cs_phdr = checksum_calc(CHECKSUM_INIT, &phdr);
    let cs_all = checksum_calc(cs_phdr, &buf);
    buf[2..4].copy_from_slice(&cs_all.to_be_bytes());

    buf
}

pub fn decode_ndp(buf: &[u8]) -> Result<NdpMessage> {
    if buf.len() < NDP_MESSAGE_SIZE {
        return Err(InetError::Invalid);
    }
    let msg_type = buf[0];
    if msg_type != ICMPV6_NEIGHBOR_SOLICIT && msg_type != ICMPV6_NEIGHBOR_ADVERT {
        return Err(InetError::Invalid);
    }
    let flags = NdpFlags::from_bits_truncate(buf[4]);
    let mut target = [0u8; 16];
    target.copy_from_slice(&buf[8..24]);
    let option_type = buf[24];
    let mut mac = [0u8; 6];
    mac.copy_from_slice(&buf[26..32]);

    Ok(NdpMessage {
        msg_type,
        flags,
        target,
        option_type,
        mac,
    })
}
