//! Kernel Event Ingest (C7): classifies unsolicited route/mroute/bridge
//! notifications from the notify socket and turns them into RIB mutations
//! or discards them (base spec §4.7).

use std::net::IpAddr;

use crate::address::{Nexthop, NexthopFlags, NexthopKind, Prefix};
use crate::netlink::attr::{AttrIter, get};
use crate::netlink::error::{Error, Result};
use crate::netlink::message::NlMsgType;
use crate::netlink::messages::route::{self, RouteMessage};
use crate::protocol_map;
use crate::rib::{Origin, ReFlags, RouteEntry};

/// Resolves a wire table id to a VRF id. Implemented by the VRF registry
/// (`vrf::VrfRegistry`); kept as a trait here so `ingest` has no module
/// dependency on `vrf`.
pub trait TableLookup {
    fn resolve_table(&self, table: u32) -> Option<u32>;
}

/// Outcome of classifying one route notification.
#[derive(Debug)]
pub enum Classification {
    /// CLONED/REDIRECT/KERNEL-origin/MPLS-family, or an unregistered table
    /// id — discarded without touching the RIB.
    Ignored,
    /// Self-owned protocol id on ADD: we authored this route, so the
    /// notification is dropped (base spec §4.7 / §9 Open Question a).
    SelfAuthoredAdd,
    /// Install or replace the RIB entry for `prefix` in `vrf_id`.
    Upsert { vrf_id: u32, prefix: Prefix, entry: RouteEntry },
    /// Remove the (origin, instance) entry for `prefix` in `vrf_id`.
    Delete {
        vrf_id: u32,
        prefix: Prefix,
        origin: Origin,
        instance: u16,
    },
}

/// Kernel-ingested routes all use instance 0; the daemon has no concept
/// of "instances" for routes it did not itself author.
const INGEST_INSTANCE: u16 = 0;

/// Classify a parsed route notification. `msg_type` is the outer
/// `nlmsghdr.nlmsg_type` (`RTM_NEWROUTE` or `RTM_DELROUTE`).
pub fn classify(msg: &RouteMessage, msg_type: u16, tables: &impl TableLookup) -> Classification {
    if msg.is_cloned() {
        return Classification::Ignored;
    }
    if msg.header.rtm_protocol == route::proto::REDIRECT {
        return Classification::Ignored;
    }
    if msg.header.rtm_protocol == route::proto::KERNEL {
        return Classification::Ignored;
    }
    if msg.is_mpls() {
        return Classification::Ignored;
    }

    let Some(vrf_id) = tables.resolve_table(msg.table) else {
        return Classification::Ignored;
    };

    let is_del = msg_type == NlMsgType::RTM_DELROUTE;
    let self_owned = protocol_map::is_self_originated(msg.header.rtm_protocol);

    if self_owned && !is_del {
        return Classification::SelfAuthoredAdd;
    }

    let Ok(prefix) = build_prefix(msg) else {
        return Classification::Ignored;
    };

    if is_del {
        // A self-owned DEL must resolve back to the Origin the RIB entry was
        // actually inserted under (Static/Bgp/...), or the trie lookup keyed
        // on (origin, instance) misses and the route is never removed.
        let origin = if self_owned {
            protocol_map::origin_for(msg.header.rtm_protocol).unwrap_or(Origin::Kernel)
        } else {
            Origin::Kernel
        };
        return Classification::Delete {
            vrf_id,
            prefix,
            origin,
            instance: INGEST_INSTANCE,
        };
    }

    Classification::Upsert {
        vrf_id,
        prefix,
        entry: build_route_entry(msg, vrf_id, self_owned),
    }
}

fn build_prefix(msg: &RouteMessage) -> Result<Prefix> {
    match msg.destination {
        Some(IpAddr::V4(addr)) => Prefix::new_v4(addr, msg.dst_len()),
        Some(IpAddr::V6(addr)) => Prefix::new_v6(addr, msg.dst_len()),
        None if msg.is_ipv4() => Prefix::new_v4(std::net::Ipv4Addr::UNSPECIFIED, msg.dst_len()),
        None if msg.is_ipv6() => Prefix::new_v6(std::net::Ipv6Addr::UNSPECIFIED, msg.dst_len()),
        None => Err(Error::Malformed("route message has no usable family".into())),
    }
}

fn build_route_entry(msg: &RouteMessage, vrf_id: u32, self_owned: bool) -> RouteEntry {
    let mut flags = ReFlags::empty();
    if self_owned {
        flags.insert(ReFlags::SELFROUTE);
    }

    let nexthops = if !msg.multipath.is_empty() {
        msg.multipath
            .iter()
            .map(|nh| {
                let kind = match (nh.gateway.or(nh.via), nh.ifindex) {
                    (Some(IpAddr::V4(a)), idx) if idx != 0 => NexthopKind::V4GatewayIfindex(a, idx),
                    (Some(IpAddr::V4(a)), _) => NexthopKind::V4Gateway(a),
                    (Some(IpAddr::V6(a)), idx) if idx != 0 => NexthopKind::V6GatewayIfindex(a, idx),
                    (Some(IpAddr::V6(a)), _) => NexthopKind::V6Gateway(a),
                    (None, idx) => NexthopKind::Ifindex(idx),
                };
                let mut nexthop = Nexthop::new(kind);
                nexthop.flags.insert(NexthopFlags::ACTIVE);
                nexthop.flags.insert(NexthopFlags::FIB);
                nexthop
            })
            .collect()
    } else {
        let kind = match (msg.gateway, msg.oif) {
            (Some(IpAddr::V4(a)), Some(idx)) => NexthopKind::V4GatewayIfindex(a, idx),
            (Some(IpAddr::V4(a)), None) => NexthopKind::V4Gateway(a),
            (Some(IpAddr::V6(a)), Some(idx)) => NexthopKind::V6GatewayIfindex(a, idx),
            (Some(IpAddr::V6(a)), None) => NexthopKind::V6Gateway(a),
            (None, Some(idx)) => NexthopKind::Ifindex(idx),
            (None, None) => NexthopKind::Blackhole,
        };
        let mut nexthop = Nexthop::new(kind);
        nexthop.flags.insert(NexthopFlags::ACTIVE);
        nexthop.flags.insert(NexthopFlags::FIB);
        vec![nexthop]
    };

    RouteEntry {
        origin: Origin::Kernel,
        instance: INGEST_INSTANCE,
        distance: 255,
        metric: msg.priority.unwrap_or(0),
        mtu: msg.mtu,
        tag: 0,
        vrf_id,
        table_id: msg.table,
        uptime: std::time::Instant::now(),
        flags,
        nexthops,
        refcount: 0,
        sequence: 0,
    }
}

/// A decoded multicast (S,G) cache notification (base spec §4.7).
#[derive(Debug, Clone)]
pub struct McastNotification {
    pub iif: u32,
    pub source: IpAddr,
    pub group: IpAddr,
    pub oifs: Vec<u32>,
    pub last_used: u64,
}

/// A one-shot sink for the next multicast notification. Takes itself so a
/// caller cannot register twice without re-arming.
pub trait McastSink {
    fn deliver(self: Box<Self>, notification: McastNotification);
}

mod mroute_attr {
    pub const SRC: u16 = 2;
    pub const DST: u16 = 1;
    pub const IIF: u16 = 3;
    pub const OIF_LIST: u16 = 9;
    pub const LAST_USED: u16 = 23;
}

/// Parse a multicast cache notification payload and, if a sink is
/// registered, deliver it and consume the sink; otherwise drop silently.
pub fn parse_mcast(payload: &[u8], sink: Option<Box<dyn McastSink>>) -> Result<()> {
    const HDRLEN: usize = route::RtMsg::SIZE;
    if payload.len() < HDRLEN {
        return Err(Error::Truncated {
            expected: HDRLEN,
            actual: payload.len(),
        });
    }
    let family = payload[0];

    let mut iif = 0u32;
    let mut source = None;
    let mut group = None;
    let mut oifs = Vec::new();
    let mut last_used = 0u64;

    for (attr_type, data) in AttrIter::new(&payload[HDRLEN..]) {
        match attr_type {
            mroute_attr::IIF => iif = get::u32_ne(data)?,
            mroute_attr::SRC => source = Some(parse_family_addr(data, family)?),
            mroute_attr::DST => group = Some(parse_family_addr(data, family)?),
            mroute_attr::LAST_USED => last_used = get::u32_ne(data)? as u64,
            mroute_attr::OIF_LIST => {
                for chunk in data.chunks_exact(4) {
                    oifs.push(u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
                }
            }
            _ => {}
        }
    }

    let (Some(source), Some(group)) = (source, group) else {
        return Err(Error::Malformed("mroute notification missing src/group".into()));
    };

    if let Some(sink) = sink {
        sink.deliver(McastNotification {
            iif,
            source,
            group,
            oifs,
            last_used,
        });
    }
    Ok(())
}

fn parse_family_addr(data: &[u8], family: u8) -> Result<IpAddr> {
    match family as i32 {
        libc::AF_INET => {
            if data.len() < 4 {
                return Err(Error::InvalidAttribute("truncated IPv4 address".into()));
            }
            Ok(IpAddr::V4(std::net::Ipv4Addr::new(data[0], data[1], data[2], data[3])))
        }
        libc::AF_INET6 => {
            if data.len() < 16 {
                return Err(Error::InvalidAttribute("truncated IPv6 address".into()));
            }
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&data[..16]);
            Ok(IpAddr::V6(std::net::Ipv6Addr::from(octets)))
        }
        _ => Err(Error::InvalidAttribute(format!("unsupported family {family}"))),
    }
}
