//! Nexthop Resolver (C5): recursive resolution of a gateway address to an
//! outgoing interface, by longest-prefix match against the owning VRF's
//! RIB (base spec §4.5).

use std::net::IpAddr;

use crate::Error;
use crate::address::{Nexthop, NexthopFlags, NexthopKind, Prefix};
use crate::rib::{Origin, RouteEntry, Trie};

/// Recursion bound shared with invariant 2 (base spec §8): a chain longer
/// than this is treated as a cycle.
pub const MAX_DEPTH: u8 = 32;

/// Resolve a single nexthop against `trie` (the owning VRF's per-family
/// RIB). `resolve_via_default` gates whether a 0-length prefix may serve
/// as a resolution target.
pub fn resolve(nh: &mut Nexthop, trie: &Trie, resolve_via_default: bool) -> crate::Result<()> {
    resolve_inner(nh, trie, resolve_via_default, 0)
}

/// Resolve every nexthop in `nexthops` independently and collect the
/// results (base spec §4.5 "for multipath resolution, resolve each
/// nexthop independently").
pub fn resolve_multipath(
    nexthops: &mut [Nexthop],
    trie: &Trie,
    resolve_via_default: bool,
) -> crate::Result<()> {
    for nh in nexthops {
        resolve(nh, trie, resolve_via_default)?;
    }
    Ok(())
}

fn resolve_inner(
    nh: &mut Nexthop,
    trie: &Trie,
    resolve_via_default: bool,
    depth: u8,
) -> crate::Result<()> {
    if depth > MAX_DEPTH {
        return Err(Error::Unresolvable("recursion depth exceeded".into()));
    }

    if nh.is_blackhole() {
        nh.flags.insert(NexthopFlags::ACTIVE);
        return Ok(());
    }

    if nh.ifindex().is_some() && nh.gateway().is_none() {
        // Directly attached: a bare ifindex nexthop needs no resolution.
        nh.flags.insert(NexthopFlags::ACTIVE);
        return Ok(());
    }

    let Some(gateway) = nh.gateway() else {
        return Err(Error::Unresolvable("nexthop has no gateway to resolve".into()));
    };

    if nh.ifindex().is_some() {
        // Gateway + ifindex: the kernel already knows the egress interface,
        // still ACTIVE without a recursive lookup.
        nh.flags.insert(NexthopFlags::ACTIVE);
        return Ok(());
    }

    let query = host_query(gateway)?;
    let node = trie
        .lookup_longest(&query)
        .ok_or_else(|| Error::Unresolvable(format!("no route covers gateway {gateway}")))?;

    if !resolve_via_default && node.prefix.is_default() {
        return Err(Error::Unresolvable(
            "resolution target is the default route and resolve-via-default is off".into(),
        ));
    }

    let selected = node
        .selected()
        .ok_or_else(|| Error::Unresolvable(format!("gateway {gateway} has no selected route")))?;

    if selected.origin == Origin::Connected {
        resolve_onto_connected(nh, selected)
    } else {
        resolve_onto_recursive(nh, selected, trie, resolve_via_default, depth)
    }
}

fn host_query(gateway: IpAddr) -> crate::Result<Prefix> {
    match gateway {
        IpAddr::V4(v4) => Prefix::new_v4(v4, 32),
        IpAddr::V6(v6) => Prefix::new_v6(v6, 128),
    }
}

fn resolve_onto_connected(nh: &mut Nexthop, connected: &RouteEntry) -> crate::Result<()> {
    let parent = connected
        .nexthops
        .first()
        .ok_or_else(|| Error::Unresolvable("connected route has no nexthop".into()))?;
    let ifindex = parent
        .ifindex()
        .ok_or_else(|| Error::Unresolvable("connected route has no usable interface".into()))?;

    nh.flags.insert(NexthopFlags::ACTIVE);
    if let Some(src) = preferred_source(nh, parent) {
        nh.src = Some(src);
    }

    let mut child = Nexthop::new(NexthopKind::Ifindex(ifindex));
    child.flags.insert(NexthopFlags::ACTIVE);
    nh.children = vec![child];
    Ok(())
}

fn resolve_onto_recursive(
    nh: &mut Nexthop,
    selected: &RouteEntry,
    trie: &Trie,
    resolve_via_default: bool,
    depth: u8,
) -> crate::Result<()> {
    nh.flags.insert(NexthopFlags::RECURSIVE);

    let mut children = Vec::with_capacity(selected.nexthops.len());
    for parent in &selected.nexthops {
        let mut child = parent.clone();
        resolve_inner(&mut child, trie, resolve_via_default, depth + 1)?;
        children.push(child);
    }

    if children.iter().any(Nexthop::is_active) {
        nh.flags.insert(NexthopFlags::ACTIVE);
    } else {
        nh.flags.remove(NexthopFlags::ACTIVE);
    }
    nh.children = children;
    Ok(())
}

/// Preferred source in priority order (base spec §4.5): `rmap_src`, then
/// `src`, then inherited from the resolved connected nexthop.
fn preferred_source(nh: &Nexthop, connected: &Nexthop) -> Option<IpAddr> {
    nh.configured_source().or(connected.configured_source())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rib::{ReFlags, RouteEntry};
    use std::net::Ipv4Addr;
    use std::time::Instant;

    fn connected_entry(ifindex: u32) -> RouteEntry {
        let mut nh = Nexthop::new(NexthopKind::Ifindex(ifindex));
        nh.flags.insert(NexthopFlags::ACTIVE);
        RouteEntry {
            origin: Origin::Connected,
            instance: 0,
            distance: 0,
            metric: 0,
            mtu: None,
            tag: 0,
            vrf_id: 0,
            table_id: 254,
            uptime: Instant::now(),
            flags: ReFlags::SELECTED,
            nexthops: vec![nh],
            refcount: 0,
            sequence: 0,
        }
    }

    #[test]
    fn resolves_against_connected_route() {
        let mut trie = Trie::new();
        let connected = Prefix::new_v4(Ipv4Addr::new(192, 0, 2, 0), 24).unwrap();
        trie.add(connected, connected_entry(2));

        let mut nh = Nexthop::new(NexthopKind::V4Gateway(Ipv4Addr::new(192, 0, 2, 1)));
        resolve(&mut nh, &trie, false).unwrap();

        assert!(nh.is_active());
        assert_eq!(nh.children.len(), 1);
        assert_eq!(nh.children[0].ifindex(), Some(2));
    }

    #[test]
    fn unresolvable_without_covering_route() {
        let trie = Trie::new();
        let mut nh = Nexthop::new(NexthopKind::V4Gateway(Ipv4Addr::new(192, 0, 2, 1)));
        assert!(resolve(&mut nh, &trie, false).is_err());
    }

    #[test]
    fn default_route_blocked_without_resolve_via_default() {
        let mut trie = Trie::new();
        let default_route = Prefix::new_v4(Ipv4Addr::new(0, 0, 0, 0), 0).unwrap();
        trie.add(default_route, connected_entry(2));

        let mut nh = Nexthop::new(NexthopKind::V4Gateway(Ipv4Addr::new(192, 0, 2, 1)));
        assert!(resolve(&mut nh, &trie, false).is_err());

        let mut nh2 = Nexthop::new(NexthopKind::V4Gateway(Ipv4Addr::new(192, 0, 2, 1)));
        resolve(&mut nh2, &trie, true).unwrap();
        assert!(nh2.is_active());
    }

    #[test]
    fn bare_ifindex_is_already_active() {
        let trie = Trie::new();
        let mut nh = Nexthop::new(NexthopKind::Ifindex(5));
        resolve(&mut nh, &trie, false).unwrap();
        assert!(nh.is_active());
    }
}
