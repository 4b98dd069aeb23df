//! Route message wire format (RTM_NEWROUTE / RTM_DELROUTE / RTM_GETROUTE).
//!
//! Covers the fixed `rtmsg` body and the attribute set SPEC_FULL.md §4.1/§4.6
//! requires: DST/GATEWAY/VIA/OIF/PRIORITY/PREFSRC/TABLE/METRICS, the
//! MULTIPATH nexthop-record sequence, and the MPLS NEWDST/ENCAP/ENCAP_TYPE
//! trio. Decode is a plain attribute walk (no dependency on a generic
//! parser-combinator trait); encode goes through [`MessageBuilder`] directly
//! since the nesting (MULTIPATH records, ENCAP subtrees) is naturally
//! expressed with `nest_start`/`nest_end`.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::netlink::attr::{AttrIter, get};
use crate::netlink::builder::MessageBuilder;
use crate::netlink::error::{Error, Result};

/// `rtattr` type constants used on route messages.
pub mod rta {
    pub const DST: u16 = 1;
    pub const SRC: u16 = 2;
    pub const IIF: u16 = 3;
    pub const OIF: u16 = 4;
    pub const GATEWAY: u16 = 5;
    pub const PRIORITY: u16 = 6;
    pub const PREFSRC: u16 = 7;
    pub const METRICS: u16 = 8;
    pub const MULTIPATH: u16 = 9;
    pub const FLOW: u16 = 11;
    pub const TABLE: u16 = 15;
    pub const MARK: u16 = 16;
    pub const VIA: u16 = 18;
    pub const NEWDST: u16 = 19;
    pub const PREF: u16 = 20;
    pub const ENCAP_TYPE: u16 = 21;
    pub const ENCAP: u16 = 22;
    pub const EXPIRES: u16 = 23;
}

/// `RTA_METRICS` sub-attribute for MTU.
const RTAX_MTU: u16 = 2;

/// `RTA_ENCAP_TYPE` value for an MPLS tunnel encap.
const LWTUNNEL_ENCAP_MPLS: u16 = 1;

/// `MPLS_IPTUNNEL_DST`: the label stack nested inside `RTA_ENCAP`.
const MPLS_IPTUNNEL_DST: u16 = 1;
/// `MPLS_IPTUNNEL_TTL`: optional TTL override nested inside `RTA_ENCAP`.
const MPLS_IPTUNNEL_TTL: u16 = 2;

pub const RTNH_F_ONLINK: u8 = 4;

pub const AF_MPLS: u8 = 28;

/// Address family for a route body. Mirrors `AF_INET`/`AF_INET6`/`AF_MPLS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RouteFamily {
    Inet = libc::AF_INET as u8,
    Inet6 = libc::AF_INET6 as u8,
    Mpls = AF_MPLS,
}

/// `rtm_protocol` values relevant to this daemon (SPEC_FULL.md §6).
pub mod proto {
    pub const UNSPEC: u8 = 0;
    pub const REDIRECT: u8 = 1;
    pub const KERNEL: u8 = 2;
    pub const BOOT: u8 = 3;
    pub const STATIC: u8 = 4;
    pub const ZEBRA: u8 = 11;
    pub const ISIS: u8 = 187;
    pub const BGP: u8 = 186;
    pub const OSPF: u8 = 188;
    pub const RIP: u8 = 189;
    pub const RIPNG: u8 = 190;
}

/// `rtm_type` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RouteType {
    Unspec = 0,
    Unicast = 1,
    Local = 2,
    Broadcast = 3,
    Anycast = 4,
    Multicast = 5,
    Blackhole = 6,
    Unreachable = 7,
    Prohibit = 8,
    Throw = 9,
}

/// `rtm_scope` values.
pub mod scope {
    pub const UNIVERSE: u8 = 0;
    pub const SITE: u8 = 200;
    pub const LINK: u8 = 253;
    pub const HOST: u8 = 254;
    pub const NOWHERE: u8 = 255;
}

/// `rtm_table` special values (SPEC_FULL.md §6).
pub mod table {
    pub const UNSPEC: u8 = 0;
    pub const COMPAT: u8 = 252;
    pub const DEFAULT: u8 = 253;
    pub const MAIN: u8 = 254;
    pub const LOCAL: u8 = 255;
}

pub mod flags {
    /// Kernel-cloned route (discarded by ingest per §4.7).
    pub const RTM_F_CLONED: u32 = 0x200;
}

/// Fixed `rtmsg` header, 12 bytes, as it appears on the wire.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct RtMsg {
    pub rtm_family: u8,
    pub rtm_dst_len: u8,
    pub rtm_src_len: u8,
    pub rtm_tos: u8,
    pub rtm_table: u8,
    pub rtm_protocol: u8,
    pub rtm_scope: u8,
    pub rtm_type: u8,
    pub rtm_flags: u32,
}

impl RtMsg {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_bytes(&self) -> &[u8] {
        <Self as IntoBytes>::as_bytes(self)
    }

    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        Self::ref_from_prefix(data)
            .map(|(r, _)| r)
            .map_err(|_| Error::Truncated {
                expected: Self::SIZE,
                actual: data.len(),
            })
    }
}

/// One decoded nexthop record from an `RTA_MULTIPATH` attribute.
#[derive(Debug, Clone, Default)]
pub struct DecodedNextHop {
    pub flags: u8,
    /// `rtnh_hops`, the raw wire weight byte (actual weight is `hops + 1`).
    pub hops: u8,
    pub ifindex: u32,
    pub gateway: Option<IpAddr>,
    pub via: Option<IpAddr>,
}

/// A fully decoded route message, attributes included.
#[derive(Debug, Clone, Default)]
pub struct RouteMessage {
    pub header: RtMsg,
    pub destination: Option<IpAddr>,
    pub source: Option<IpAddr>,
    pub iif: Option<u32>,
    pub oif: Option<u32>,
    pub gateway: Option<IpAddr>,
    pub via: Option<IpAddr>,
    pub priority: Option<u32>,
    pub prefsrc: Option<IpAddr>,
    /// Resolved table id: `RTA_TABLE` if present, else `rtm_table`.
    pub table: u32,
    pub mtu: Option<u32>,
    pub multipath: Vec<DecodedNextHop>,
    /// MPLS label stack from `RTA_NEWDST` (outer family MPLS) or the
    /// `MPLS_IPTUNNEL_DST` attribute nested under `RTA_ENCAP` (outer family
    /// v4/v6, MPLS tunnel encap).
    pub label_stack: Vec<u32>,
}

impl RouteMessage {
    pub fn is_ipv4(&self) -> bool {
        self.header.rtm_family == libc::AF_INET as u8
    }

    pub fn is_ipv6(&self) -> bool {
        self.header.rtm_family == libc::AF_INET6 as u8
    }

    pub fn is_mpls(&self) -> bool {
        self.header.rtm_family == AF_MPLS
    }

    pub fn is_cloned(&self) -> bool {
        self.header.rtm_flags & flags::RTM_F_CLONED != 0
    }

    pub fn dst_len(&self) -> u8 {
        self.header.rtm_dst_len
    }

    /// Parse a route message payload (the bytes after the `nlmsghdr`).
    pub fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() < RtMsg::SIZE {
            return Err(Error::Truncated {
                expected: RtMsg::SIZE,
                actual: payload.len(),
            });
        }
        let header = *RtMsg::from_bytes(&payload[..RtMsg::SIZE])?;
        let mut msg = RouteMessage {
            header,
            table: header.rtm_table as u32,
            ..Default::default()
        };

        for (attr_type, data) in AttrIter::new(&payload[RtMsg::SIZE..]) {
            match attr_type {
                rta::DST => msg.destination = Some(parse_addr(data, header.rtm_family)?),
                rta::SRC => msg.source = Some(parse_addr(data, header.rtm_family)?),
                rta::IIF => msg.iif = Some(get::u32_ne(data)?),
                rta::OIF => msg.oif = Some(get::u32_ne(data)?),
                rta::GATEWAY => msg.gateway = Some(parse_addr(data, header.rtm_family)?),
                rta::VIA => msg.via = Some(parse_via(data)?),
                rta::PRIORITY => msg.priority = Some(get::u32_ne(data)?),
                rta::PREFSRC => msg.prefsrc = Some(parse_addr(data, header.rtm_family)?),
                rta::TABLE => msg.table = get::u32_ne(data)?,
                rta::METRICS => {
                    for (mtype, mdata) in AttrIter::new(data) {
                        if mtype == RTAX_MTU {
                            msg.mtu = Some(get::u32_ne(mdata)?);
                        }
                    }
                }
                rta::MULTIPATH => msg.multipath = parse_multipath(data, header.rtm_family)?,
                rta::NEWDST => msg.label_stack = parse_label_stack(data)?,
                rta::ENCAP => {
                    for (etype, edata) in AttrIter::new(data) {
                        if etype == MPLS_IPTUNNEL_DST {
                            msg.label_stack = parse_label_stack(edata)?;
                        }
                    }
                }
                _ => {}
            }
        }

        Ok(msg)
    }
}

fn parse_addr(data: &[u8], family: u8) -> Result<IpAddr> {
    match family as i32 {
        libc::AF_INET => {
            if data.len() < 4 {
                return Err(Error::InvalidAttribute("truncated IPv4 address".into()));
            }
            Ok(IpAddr::V4(Ipv4Addr::new(data[0], data[1], data[2], data[3])))
        }
        libc::AF_INET6 => {
            if data.len() < 16 {
                return Err(Error::InvalidAttribute("truncated IPv6 address".into()));
            }
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&data[..16]);
            Ok(IpAddr::V6(Ipv6Addr::from(octets)))
        }
        _ => Err(Error::InvalidAttribute(format!(
            "unsupported address family {family}"
        ))),
    }
}

/// `RTA_VIA`: `{u16 family, addr[4 or 16]}` — a gateway whose family may
/// differ from the route's outer family (SPEC_FULL.md §4.1).
fn parse_via(data: &[u8]) -> Result<IpAddr> {
    if data.len() < 2 {
        return Err(Error::InvalidAttribute("truncated RTA_VIA".into()));
    }
    let family = u16::from_ne_bytes([data[0], data[1]]);
    parse_addr(&data[2..], family as u8)
}

fn parse_multipath(data: &[u8], family: u8) -> Result<Vec<DecodedNextHop>> {
    const RTNH_HDRLEN: usize = 8;
    let mut out = Vec::new();
    let mut rest = data;

    while rest.len() >= RTNH_HDRLEN {
        let rtnh_len = u16::from_ne_bytes([rest[0], rest[1]]) as usize;
        if rtnh_len < RTNH_HDRLEN || rtnh_len > rest.len() {
            break;
        }
        let rtnh_flags = rest[2];
        let rtnh_hops = rest[3];
        let ifindex = u32::from_ne_bytes([rest[4], rest[5], rest[6], rest[7]]);

        let mut nh = DecodedNextHop {
            flags: rtnh_flags,
            hops: rtnh_hops,
            ifindex,
            gateway: None,
            via: None,
        };

        for (attr_type, attr_data) in AttrIter::new(&rest[RTNH_HDRLEN..rtnh_len]) {
            match attr_type {
                rta::GATEWAY => nh.gateway = Some(parse_addr(attr_data, family)?),
                rta::VIA => nh.via = Some(parse_via(attr_data)?),
                _ => {}
            }
        }

        out.push(nh);

        let aligned = (rtnh_len + 3) & !3;
        if aligned >= rest.len() {
            break;
        }
        rest = &rest[aligned..];
    }

    Ok(out)
}

/// Label stack entries are 32-bit big-endian: label[31:12] tc[11:9] bos[8] ttl[7:0].
fn parse_label_stack(data: &[u8]) -> Result<Vec<u32>> {
    let mut labels = Vec::new();
    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let word = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        let label = word >> 12;
        labels.push(label);
        if word & 0x100 != 0 {
            break; // BOS
        }
    }
    Ok(labels)
}

/// Pack a label stack entry. `bos` is set on the last label by the caller.
pub fn pack_label_entry(label: u32, bos: bool, ttl: u8) -> u32 {
    ((label & 0xF_FFFF) << 12) | (if bos { 0x100 } else { 0 }) | ttl as u32
}

/// Nexthop shape accepted by [`write_route`] and [`write_multipath_record`].
/// Kept separate from `address::Nexthop` so the wire codec has no
/// dependency on the RIB's richer nexthop type — it only needs exactly the
/// fields that show up on the wire.
#[derive(Debug, Clone, Default)]
pub struct WireNextHop {
    pub ifindex: Option<u32>,
    pub gateway: Option<IpAddr>,
    /// Set when the gateway's family differs from the route's outer family
    /// (cross-family substitution, encoded as `RTA_VIA`).
    pub via: Option<IpAddr>,
    pub onlink: bool,
    pub weight: u8,
}

/// Parameters for building an ADD/DEL/REPLACE route request (C6).
#[derive(Debug, Clone)]
pub struct RouteRequest {
    pub family: RouteFamily,
    pub dst_len: u8,
    pub destination: Option<IpAddr>,
    pub table: u32,
    pub protocol: u8,
    pub scope: u8,
    pub route_type: RouteType,
    pub priority: u32,
    pub mtu: Option<u32>,
    pub prefsrc: Option<IpAddr>,
    /// Singlepath nexthop, used when `multipath.len() <= 1`.
    pub nexthop: Option<WireNextHop>,
    /// Multipath nexthop set (already deduplicated by the caller per
    /// `are_first_hops_same`, SPEC_FULL.md §4.6).
    pub multipath: Vec<WireNextHop>,
    /// Outgoing MPLS label stack (`RTA_NEWDST` when family is MPLS, else a
    /// nested `RTA_ENCAP`/`RTA_ENCAP_TYPE` pair).
    pub label_stack: Vec<u32>,
}

/// Encode a route request body + attributes into `builder` (C1 `build`).
pub fn write_route(builder: &mut MessageBuilder, req: &RouteRequest) {
    // ONLINK for a singlepath route is carried on `rtm_flags` itself, not
    // on a per-nexthop record (that's the multipath encoding, handled in
    // `write_multipath_record`); per `original_source/zebra/rt_netlink.c`'s
    // singlepath path, it must be set here or the kernel never sees it.
    let singlepath_onlink = req.multipath.len() <= 1
        && req
            .nexthop
            .as_ref()
            .or(req.multipath.first())
            .is_some_and(|nh| nh.onlink);

    let header = RtMsg {
        rtm_family: req.family as u8,
        rtm_dst_len: req.dst_len,
        rtm_src_len: 0,
        rtm_tos: 0,
        rtm_table: if req.table < 256 { req.table as u8 } else { table::COMPAT },
        rtm_protocol: req.protocol,
        rtm_scope: req.scope,
        rtm_type: req.route_type as u8,
        rtm_flags: if singlepath_onlink { RTNH_F_ONLINK as u32 } else { 0 },
    };
    builder.append(&header);

    if let Some(dst) = req.destination {
        write_addr_attr(builder, rta::DST, dst);
    }
    builder.append_attr_u32(rta::PRIORITY, req.priority);
    if req.table >= 256 {
        builder.append_attr_u32(rta::TABLE, req.table);
    }
    if let Some(mtu) = req.mtu {
        let nest = builder.nest_start(rta::METRICS);
        builder.append_attr_u32(RTAX_MTU, mtu);
        builder.nest_end(nest);
    }

    if !req.label_stack.is_empty() {
        write_label_attrs(builder, req.family, &req.label_stack);
    }

    if req.multipath.len() > 1 {
        let nest = builder.nest_start(rta::MULTIPATH);
        for nh in &req.multipath {
            write_multipath_record(builder, nh);
        }
        builder.nest_end(nest);
    } else if let Some(nh) = req.nexthop.as_ref().or(req.multipath.first()) {
        write_singlepath_nexthop(builder, nh);
        if let Some(src) = req.prefsrc {
            write_addr_attr(builder, rta::PREFSRC, src);
        }
    }
}

fn write_singlepath_nexthop(builder: &mut MessageBuilder, nh: &WireNextHop) {
    if let Some(via) = nh.via {
        write_via_attr(builder, via);
    } else if let Some(gw) = nh.gateway {
        write_addr_attr(builder, rta::GATEWAY, gw);
    }
    if let Some(ifindex) = nh.ifindex {
        builder.append_attr_u32(rta::OIF, ifindex);
    }
}

fn write_multipath_record(builder: &mut MessageBuilder, nh: &WireNextHop) {
    let token = builder.rtnh_start();

    if let Some(via) = nh.via {
        write_via_attr(builder, via);
    } else if let Some(gw) = nh.gateway {
        write_addr_attr(builder, rta::GATEWAY, gw);
    }

    let flags = if nh.onlink { RTNH_F_ONLINK } else { 0 };
    let hops = nh.weight.saturating_sub(1);
    let ifindex = nh.ifindex.unwrap_or(0);
    builder.rtnh_end(token, flags, hops, ifindex);
}

fn write_addr_attr(builder: &mut MessageBuilder, attr_type: u16, addr: IpAddr) {
    match addr {
        IpAddr::V4(v4) => builder.append_attr(attr_type, &v4.octets()),
        IpAddr::V6(v6) => builder.append_attr(attr_type, &v6.octets()),
    }
}

fn write_via_attr(builder: &mut MessageBuilder, addr: IpAddr) {
    let mut data = Vec::with_capacity(18);
    let family: u16 = match addr {
        IpAddr::V4(_) => libc::AF_INET as u16,
        IpAddr::V6(_) => libc::AF_INET6 as u16,
    };
    data.extend_from_slice(&family.to_ne_bytes());
    match addr {
        IpAddr::V4(v4) => data.extend_from_slice(&v4.octets()),
        IpAddr::V6(v6) => data.extend_from_slice(&v6.octets()),
    }
    builder.append_attr(rta::VIA, &data);
}

fn write_label_attrs(builder: &mut MessageBuilder, family: RouteFamily, labels: &[u32]) {
    let mut packed = Vec::with_capacity(labels.len() * 4);
    for (i, &label) in labels.iter().enumerate() {
        let bos = i + 1 == labels.len();
        packed.extend_from_slice(&pack_label_entry(label, bos, 0).to_be_bytes());
    }

    if matches!(family, RouteFamily::Mpls) {
        builder.append_attr(rta::NEWDST, &packed);
    } else {
        builder.append_attr_u16(rta::ENCAP_TYPE, LWTUNNEL_ENCAP_MPLS);
        let nest = builder.nest_start(rta::ENCAP);
        builder.append_attr(MPLS_IPTUNNEL_DST, &packed);
        let _ = MPLS_IPTUNNEL_TTL; // reserved for a future TTL override knob
        builder.nest_end(nest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn roundtrip_singlepath_v4() {
        let req = RouteRequest {
            family: RouteFamily::Inet,
            dst_len: 8,
            destination: Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 0))),
            table: 254,
            protocol: proto::STATIC,
            scope: scope::UNIVERSE,
            route_type: RouteType::Unicast,
            priority: 20,
            mtu: None,
            prefsrc: None,
            nexthop: Some(WireNextHop {
                ifindex: Some(2),
                gateway: Some(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1))),
                via: None,
                onlink: false,
                weight: 1,
            }),
            multipath: Vec::new(),
            label_stack: Vec::new(),
        };

        let mut builder = MessageBuilder::new(24, 0);
        write_route(&mut builder, &req);
        let msg = builder.finish();
        let payload = &msg[crate::netlink::message::NLMSG_HDRLEN..];

        let parsed = RouteMessage::parse(payload).unwrap();
        assert!(parsed.is_ipv4());
        assert_eq!(parsed.dst_len(), 8);
        assert_eq!(parsed.destination, req.destination);
        assert_eq!(parsed.gateway, Some(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1))));
        assert_eq!(parsed.oif, Some(2));
        assert_eq!(parsed.priority, Some(20));
        assert_eq!(parsed.table, 254);
    }

    #[test]
    fn roundtrip_multipath() {
        let req = RouteRequest {
            family: RouteFamily::Inet,
            dst_len: 24,
            destination: Some(IpAddr::V4(Ipv4Addr::new(198, 51, 100, 0))),
            table: 254,
            protocol: proto::BGP,
            scope: scope::UNIVERSE,
            route_type: RouteType::Unicast,
            priority: 20,
            mtu: None,
            prefsrc: None,
            nexthop: None,
            multipath: vec![
                WireNextHop {
                    ifindex: Some(2),
                    gateway: Some(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1))),
                    via: None,
                    onlink: false,
                    weight: 1,
                },
                WireNextHop {
                    ifindex: Some(3),
                    gateway: Some(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 2))),
                    via: None,
                    onlink: false,
                    weight: 1,
                },
            ],
            label_stack: Vec::new(),
        };

        let mut builder = MessageBuilder::new(24, 0);
        write_route(&mut builder, &req);
        let msg = builder.finish();
        let payload = &msg[crate::netlink::message::NLMSG_HDRLEN..];

        let parsed = RouteMessage::parse(payload).unwrap();
        assert_eq!(parsed.multipath.len(), 2);
        assert_eq!(
            parsed.multipath[0].gateway,
            Some(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)))
        );
        assert_eq!(parsed.multipath[0].ifindex, 2);
        assert_eq!(
            parsed.multipath[1].gateway,
            Some(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 2)))
        );
    }

    #[test]
    fn mpls_label_stack_roundtrip() {
        let labels = [100u32, 200u32];
        let mut packed = Vec::new();
        for (i, &label) in labels.iter().enumerate() {
            let bos = i + 1 == labels.len();
            packed.extend_from_slice(&pack_label_entry(label, bos, 0).to_be_bytes());
        }
        let decoded = parse_label_stack(&packed).unwrap();
        assert_eq!(decoded, vec![100, 200]);
    }

    #[test]
    fn via_cross_family_roundtrip() {
        let addr = IpAddr::V6("fe80::1".parse().unwrap());
        let mut builder = MessageBuilder::new(24, 0);
        write_via_attr(&mut builder, addr);
        let msg = builder.finish();
        let payload = &msg[crate::netlink::message::NLMSG_HDRLEN..];
        let (_attr_type, data) = AttrIter::new(payload).next().unwrap();
        assert_eq!(parse_via(data).unwrap(), addr);
    }
}
