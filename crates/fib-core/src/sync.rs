//! FIB Synchronizer (C6): turns a RIB selection change into a kernel
//! ADD/DEL/REPLACE request (base spec §4.6).

use std::net::{IpAddr, Ipv4Addr};

use crate::address::{Nexthop, NexthopKind, Prefix};
use crate::netlink::messages::route::{self, RouteFamily, RouteRequest, RouteType, WireNextHop};
use crate::protocol_map;
use crate::rib::{ReFlags, RouteEntry};

/// A fixed daemon-chosen metric used on every request's `PRIORITY`
/// attribute (base spec §4.6, confirmed by end-to-end scenario 1).
pub const DEFAULT_PRIORITY: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Add,
    Del,
    Replace,
}

/// The four-case `install(old, new)` decision (base spec §4.6).
///
/// Returns `None` for the no-op case or when the effective nexthop
/// candidate count is zero (the caller logs and does not transmit, per
/// base spec §4.6 nexthop-counting rule).
pub fn install(
    prefix: &Prefix,
    old: Option<&RouteEntry>,
    new: Option<&RouteEntry>,
    multipath_num: u8,
) -> Option<(Action, RouteRequest)> {
    match (old, new) {
        (None, None) => None,
        (None, Some(entry)) => build_request(prefix, entry, multipath_num, true)
            .map(|req| (Action::Add, req)),
        (Some(entry), None) => build_request(prefix, entry, multipath_num, false)
            .map(|req| (Action::Del, req)),
        (Some(_), Some(entry)) => build_request(prefix, entry, multipath_num, true)
            .map(|req| (Action::Replace, req)),
    }
}

fn build_request(
    prefix: &Prefix,
    entry: &RouteEntry,
    multipath_num: u8,
    for_add: bool,
) -> Option<RouteRequest> {
    let family = family_of(prefix);
    let candidates = candidate_nexthops(entry, for_add);
    if candidates.is_empty() {
        return None;
    }

    let deduped = suppress_duplicate_first_hops(candidates);
    let limited: Vec<&Nexthop> = deduped.into_iter().take(multipath_num.max(1) as usize).collect();

    let route_type = if entry.flags.contains(ReFlags::BLACKHOLE) {
        RouteType::Blackhole
    } else if entry.flags.contains(ReFlags::REJECT) {
        RouteType::Unreachable
    } else {
        RouteType::Unicast
    };

    let wire_nexthops: Vec<WireNextHop> = limited.iter().map(|nh| to_wire_nexthop(family, nh)).collect();

    let prefsrc = limited
        .first()
        .and_then(|nh| nh.configured_source());

    let label_stack: Vec<u32> = limited
        .first()
        .map(|nh| {
            nh.label_stack
                .iter()
                .filter(|l| !l.is_implicit_null())
                .map(|l| l.value())
                .collect()
        })
        .unwrap_or_default();

    let (nexthop, multipath) = if wire_nexthops.len() <= 1 || multipath_num <= 1 {
        (wire_nexthops.into_iter().next(), Vec::new())
    } else {
        (None, wire_nexthops)
    };

    Some(RouteRequest {
        family,
        dst_len: prefix.len(),
        destination: destination_of(prefix),
        table: entry.table_id,
        protocol: protocol_map::kernel_proto_id(entry.origin),
        scope: route::scope::UNIVERSE,
        route_type,
        priority: DEFAULT_PRIORITY,
        mtu: entry.mtu,
        prefsrc,
        nexthop,
        multipath,
        label_stack,
    })
}

/// Candidates per base spec §4.6: skip recursive markers always; for ADD
/// skip anything not ACTIVE, for DEL skip anything not FIB.
fn candidate_nexthops(entry: &RouteEntry, for_add: bool) -> Vec<&Nexthop> {
    entry
        .nexthops
        .iter()
        .filter(|nh| !nh.is_recursive())
        .filter(|nh| if for_add { nh.is_active() } else { nh.is_fib() })
        .collect()
}

/// Normalized first hop used for duplicate suppression (base spec §4.6
/// `are_first_hops_same`, Open Question b).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FirstHop {
    V4(std::net::Ipv4Addr),
    V6(std::net::Ipv6Addr),
    IfindexOnly(u32),
    None,
}

fn first_hop_of(nh: &Nexthop) -> FirstHop {
    match nh.kind {
        NexthopKind::Ifindex(idx) => FirstHop::IfindexOnly(idx),
        NexthopKind::V4Gateway(a) | NexthopKind::V4GatewayIfindex(a, _) => FirstHop::V4(a),
        NexthopKind::V6Gateway(a) | NexthopKind::V6GatewayIfindex(a, _) => FirstHop::V6(a),
        NexthopKind::Blackhole => FirstHop::None,
    }
}

fn suppress_duplicate_first_hops<'a>(candidates: Vec<&'a Nexthop>) -> Vec<&'a Nexthop> {
    let mut kept: Vec<&Nexthop> = Vec::new();
    for nh in candidates {
        let hop = first_hop_of(nh);
        if kept.iter().any(|k| first_hop_of(k) == hop) {
            continue;
        }
        kept.push(nh);
    }
    kept
}

fn effective_ifindex(nh: &Nexthop) -> Option<u32> {
    nh.ifindex().or_else(|| nh.children.first().and_then(Nexthop::ifindex))
}

fn family_of(prefix: &Prefix) -> RouteFamily {
    match prefix {
        Prefix::V4(..) => RouteFamily::Inet,
        Prefix::V6(..) => RouteFamily::Inet6,
        Prefix::Mpls(_) => RouteFamily::Mpls,
    }
}

fn destination_of(prefix: &Prefix) -> Option<IpAddr> {
    match prefix {
        Prefix::V4(addr, _) => Some(IpAddr::V4(*addr)),
        Prefix::V6(addr, _) => Some(IpAddr::V6(*addr)),
        Prefix::Mpls(_) => None,
    }
}

/// Encode a resolved nexthop for the wire, substituting the BGP-unnumbered
/// trick address when the route's outer family differs from the
/// gateway's family (base spec §4.6).
fn to_wire_nexthop(outer: RouteFamily, nh: &Nexthop) -> WireNextHop {
    let ifindex = effective_ifindex(nh);
    match (outer, nh.gateway()) {
        (RouteFamily::Inet, Some(IpAddr::V6(_))) => WireNextHop {
            ifindex,
            gateway: Some(IpAddr::V4(Ipv4Addr::new(169, 254, 0, 1))),
            via: None,
            onlink: true,
            weight: 1,
        },
        (RouteFamily::Inet, Some(gw @ IpAddr::V4(_))) | (RouteFamily::Inet6, Some(gw @ IpAddr::V6(_))) => {
            WireNextHop {
                ifindex,
                gateway: Some(gw),
                via: None,
                onlink: false,
                weight: 1,
            }
        }
        (_, Some(gw)) => WireNextHop {
            ifindex,
            gateway: None,
            via: Some(gw),
            onlink: false,
            weight: 1,
        },
        (_, None) => WireNextHop {
            ifindex,
            gateway: None,
            via: None,
            onlink: false,
            weight: 1,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{NexthopFlags, NexthopKind};
    use crate::rib::Origin;
    use std::net::{Ipv4Addr, Ipv6Addr};
    use std::time::Instant;

    fn base_entry(nexthops: Vec<Nexthop>) -> RouteEntry {
        RouteEntry {
            origin: Origin::Static,
            instance: 0,
            distance: 1,
            metric: 0,
            mtu: None,
            tag: 0,
            vrf_id: 0,
            table_id: 254,
            uptime: Instant::now(),
            flags: ReFlags::SELECTED,
            nexthops,
            refcount: 0,
            sequence: 0,
        }
    }

    fn active_gateway(addr: Ipv4Addr, ifindex: u32) -> Nexthop {
        let mut nh = Nexthop::new(NexthopKind::V4Gateway(addr));
        nh.flags.insert(NexthopFlags::ACTIVE);
        let mut child = Nexthop::new(NexthopKind::Ifindex(ifindex));
        child.flags.insert(NexthopFlags::ACTIVE);
        nh.children = vec![child];
        nh
    }

    #[test]
    fn no_op_when_both_null() {
        assert!(install(&Prefix::new_v4(Ipv4Addr::new(10, 0, 0, 0), 8).unwrap(), None, None, 1).is_none());
    }

    #[test]
    fn add_only_builds_add_action() {
        let prefix = Prefix::new_v4(Ipv4Addr::new(10, 0, 0, 0), 8).unwrap();
        let entry = base_entry(vec![active_gateway(Ipv4Addr::new(192, 0, 2, 1), 2)]);
        let (action, req) = install(&prefix, None, Some(&entry), 1).unwrap();
        assert_eq!(action, Action::Add);
        assert_eq!(req.priority, DEFAULT_PRIORITY);
        assert_eq!(req.protocol, protocol_map::STATIC);
    }

    #[test]
    fn zero_candidates_yields_no_request() {
        let prefix = Prefix::new_v4(Ipv4Addr::new(10, 0, 0, 0), 8).unwrap();
        let entry = base_entry(vec![Nexthop::new(NexthopKind::V4Gateway(Ipv4Addr::new(192, 0, 2, 1)))]);
        assert!(install(&prefix, None, Some(&entry), 1).is_none());
    }

    #[test]
    fn duplicate_first_hops_suppressed() {
        let prefix = Prefix::new_v4(Ipv4Addr::new(198, 51, 100, 0), 24).unwrap();
        let a = active_gateway(Ipv4Addr::new(192, 0, 2, 1), 2);
        let mut b = Nexthop::new(NexthopKind::V4GatewayIfindex(Ipv4Addr::new(192, 0, 2, 1), 2));
        b.flags.insert(NexthopFlags::ACTIVE);
        let c = active_gateway(Ipv4Addr::new(198, 51, 100, 1), 3);
        let entry = base_entry(vec![a, b, c]);

        let (_, req) = install(&prefix, None, Some(&entry), 8).unwrap();
        assert_eq!(req.multipath.len(), 2);
    }

    #[test]
    fn bgp_unnumbered_substitutes_link_local_trick_address() {
        let prefix = Prefix::new_v4(Ipv4Addr::new(10, 0, 0, 0), 8).unwrap();
        let mut nh = Nexthop::new(NexthopKind::V6Gateway(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1)));
        nh.flags.insert(NexthopFlags::ACTIVE);
        let mut child = Nexthop::new(NexthopKind::Ifindex(2));
        child.flags.insert(NexthopFlags::ACTIVE);
        nh.children = vec![child];
        let entry = base_entry(vec![nh]);

        let (_, req) = install(&prefix, None, Some(&entry), 1).unwrap();
        let wire = req.nexthop.unwrap();
        assert_eq!(wire.gateway, Some(IpAddr::V4(Ipv4Addr::new(169, 254, 0, 1))));
        assert!(wire.onlink);
        assert_eq!(wire.ifindex, Some(2));
    }

    #[test]
    fn del_only_requires_fib_flag() {
        let prefix = Prefix::new_v4(Ipv4Addr::new(10, 0, 0, 0), 8).unwrap();
        let mut nh = active_gateway(Ipv4Addr::new(192, 0, 2, 1), 2);
        assert!(install(&prefix, Some(&base_entry(vec![nh.clone()])), None, 1).is_none());

        nh.flags.insert(NexthopFlags::FIB);
        let entry = base_entry(vec![nh]);
        let (action, _) = install(&prefix, Some(&entry), None, 1).unwrap();
        assert_eq!(action, Action::Del);
    }
}
