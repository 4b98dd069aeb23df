//! Routing Information Base (C4): per-(VRF, family) radix trie of prefixes,
//! each owning an ordered list of route entries and a selection policy.
//!
//! The trie is a generation-counted arena rather than a true PATRICIA/radix
//! structure: nodes are keyed by [`Prefix`] in a `HashMap`, with an arena
//! index assigned to each node so external callers can hold a
//! [`PrefixHandle`] across mutations without borrowing the trie (SPEC_FULL.md
//! §9's "arena + index for the radix trie" design note). A stale handle
//! (its node removed and the slot reused) is detectable via the generation
//! mismatch rather than silently aliasing a different prefix.

use std::collections::HashMap;
use std::time::Instant;

use crate::address::{Nexthop, Prefix};

/// Route origin, used for administrative distance defaults and the final
/// origin-order tiebreaker (base spec glossary: "connected < kernel-imported
/// < static < protocol routes by distance").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Origin {
    Connected,
    Kernel,
    Static,
    Bgp,
    Ospf,
    Isis,
    Rip,
    Ripng,
}

/// Route entry flags (base spec §3).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReFlags(u8);

impl ReFlags {
    pub const SELECTED: Self = Self(1 << 0);
    pub const BLACKHOLE: Self = Self(1 << 1);
    pub const REJECT: Self = Self(1 << 2);
    pub const SELFROUTE: Self = Self(1 << 3);
    pub const INTERNAL_BGP: Self = Self(1 << 4);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn contains(self, flag: Self) -> bool {
        self.0 & flag.0 == flag.0
    }

    pub fn insert(&mut self, flag: Self) {
        self.0 |= flag.0;
    }

    pub fn remove(&mut self, flag: Self) {
        self.0 &= !flag.0;
    }
}

/// One origin's contribution to a prefix (base spec §3 "Route Entry").
#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub origin: Origin,
    pub instance: u16,
    pub distance: u8,
    pub metric: u32,
    pub mtu: Option<u32>,
    pub tag: u32,
    pub vrf_id: u32,
    pub table_id: u32,
    pub uptime: Instant,
    pub flags: ReFlags,
    pub nexthops: Vec<Nexthop>,
    pub refcount: u32,
    /// Insertion order within the owning node; final tiebreaker after
    /// distance and origin-order.
    pub(crate) sequence: u64,
}

impl RouteEntry {
    pub fn is_selected(&self) -> bool {
        self.flags.contains(ReFlags::SELECTED)
    }

    /// At least one nexthop resolved to a usable interface.
    pub fn has_active_nexthop(&self) -> bool {
        self.nexthops.iter().any(|nh| nh.is_active())
    }

    fn key(&self) -> (Origin, u16) {
        (self.origin, self.instance)
    }
}

/// One node in the per-(VRF, family) trie: a prefix and its RE candidates.
///
/// Invariant: at most one entry has `ReFlags::SELECTED` set (base spec §4.4
/// invariant 1).
#[derive(Debug, Clone)]
pub struct PrefixNode {
    pub prefix: Prefix,
    entries: Vec<RouteEntry>,
    version: u64,
    lock_count: u32,
    next_sequence: u64,
}

impl PrefixNode {
    fn new(prefix: Prefix) -> Self {
        Self {
            prefix,
            entries: Vec::new(),
            version: 0,
            lock_count: 0,
            next_sequence: 0,
        }
    }

    pub fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn selected(&self) -> Option<&RouteEntry> {
        self.entries.iter().find(|e| e.is_selected())
    }

    fn is_empty_and_unlocked(&self) -> bool {
        self.entries.is_empty() && self.lock_count == 0
    }
}

/// A stable reference to a [`PrefixNode`] across trie mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrefixHandle {
    index: u32,
    generation: u32,
}

struct Slot {
    generation: u32,
    node: Option<PrefixNode>,
}

/// Result of a mutation that may change the node's selected RE. The caller
/// threads `old`/`new` through the resolver (C5) and synchronizer (C6) —
/// see SPEC_FULL.md §2's flow description; the RIB itself has no
/// dependency on either.
#[derive(Debug, Clone)]
pub struct SelectionChange {
    pub prefix: Prefix,
    pub old: Option<RouteEntry>,
    pub new: Option<RouteEntry>,
}

/// Per-(VRF, family) radix trie of prefixes.
#[derive(Default)]
pub struct Trie {
    slots: Vec<Slot>,
    free: Vec<u32>,
    index: HashMap<Prefix, u32>,
    max_version: u64,
}

impl Trie {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_version(&self) -> u64 {
        self.max_version
    }

    fn slot_index(&mut self, prefix: Prefix) -> u32 {
        if let Some(&idx) = self.index.get(&prefix) {
            return idx;
        }
        let node = PrefixNode::new(prefix);
        if let Some(idx) = self.free.pop() {
            self.slots[idx as usize].node = Some(node);
            self.index.insert(prefix, idx);
            idx
        } else {
            let idx = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                node: Some(node),
            });
            self.index.insert(prefix, idx);
            idx
        }
    }

    fn handle_for(&self, idx: u32) -> PrefixHandle {
        PrefixHandle {
            index: idx,
            generation: self.slots[idx as usize].generation,
        }
    }

    fn node_mut(&mut self, handle: PrefixHandle) -> Option<&mut PrefixNode> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.node.as_mut()
    }

    pub fn node(&self, handle: PrefixHandle) -> Option<&PrefixNode> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.node.as_ref()
    }

    /// Insert or replace the RE for `(entry.origin, entry.instance)` at
    /// `prefix`, then recompute selection (base spec §4.4 `add`).
    pub fn add(&mut self, prefix: Prefix, mut entry: RouteEntry) -> SelectionChange {
        let idx = self.slot_index(prefix);
        let handle = self.handle_for(idx);
        let node = self.node_mut(handle).expect("just created or looked up");

        entry.sequence = node.next_sequence;
        node.next_sequence += 1;

        let previous_selected = node.selected().cloned();
        if let Some(pos) = node.entries.iter().position(|e| e.key() == entry.key()) {
            node.entries[pos] = entry;
        } else {
            node.entries.push(entry);
        }
        node.version += 1;
        self.max_version = self.max_version.max(node.version);

        let new_selected = recompute_selection(node);
        SelectionChange {
            prefix,
            old: previous_selected,
            new: new_selected,
        }
    }

    /// Atomic insert of a pre-built RE with its nexthop list already
    /// populated (used by kernel ingest, base spec §4.4 `add_multipath`).
    pub fn add_multipath(&mut self, prefix: Prefix, entry: RouteEntry) -> SelectionChange {
        self.add(prefix, entry)
    }

    /// Remove the RE for `(origin, instance)` at `prefix`, recompute
    /// selection, and drop the node if it becomes empty and unlocked.
    pub fn delete(&mut self, prefix: Prefix, origin: Origin, instance: u16) -> SelectionChange {
        let Some(&idx) = self.index.get(&prefix) else {
            return SelectionChange {
                prefix,
                old: None,
                new: None,
            };
        };
        let handle = self.handle_for(idx);
        let node = self.node_mut(handle).expect("index is consistent");

        let previous_selected = node.selected().cloned();
        node.entries.retain(|e| e.key() != (origin, instance));
        node.version += 1;
        self.max_version = self.max_version.max(node.version);

        let new_selected = recompute_selection(node);
        let should_remove = node.is_empty_and_unlocked();

        if should_remove {
            self.remove_node(idx);
        }

        SelectionChange {
            prefix,
            old: previous_selected,
            new: new_selected,
        }
    }

    fn remove_node(&mut self, idx: u32) {
        if let Some(slot) = self.slots.get_mut(idx as usize) {
            if let Some(node) = slot.node.take() {
                self.index.remove(&node.prefix);
            }
            slot.generation += 1;
            self.free.push(idx);
        }
    }

    /// Increment the lock count, returning a handle that must be passed to
    /// [`unlock`](Self::unlock) when the external reference is dropped.
    pub fn lock(&mut self, prefix: Prefix) -> Option<PrefixHandle> {
        let &idx = self.index.get(&prefix)?;
        let handle = self.handle_for(idx);
        self.node_mut(handle)?.lock_count += 1;
        Some(handle)
    }

    /// Decrement the lock count; removes the node if it is now empty and
    /// unlocked (base spec §4.4 invariant 5, §5 "deferred-delete semantics").
    pub fn unlock(&mut self, handle: PrefixHandle) {
        let Some(node) = self.node_mut(handle) else {
            return;
        };
        node.lock_count = node.lock_count.saturating_sub(1);
        if node.is_empty_and_unlocked() {
            self.remove_node(handle.index);
        }
    }

    pub fn lookup_exact(&self, prefix: &Prefix) -> Option<&PrefixNode> {
        let &idx = self.index.get(prefix)?;
        self.slots[idx as usize].node.as_ref()
    }

    /// Longest-prefix match against `query`: the most specific stored
    /// prefix that contains `query`.
    pub fn lookup_longest(&self, query: &Prefix) -> Option<&PrefixNode> {
        self.index
            .keys()
            .filter(|candidate| candidate.contains(query))
            .max_by_key(|candidate| candidate.len())
            .and_then(|candidate| self.lookup_exact(candidate))
    }

    /// All stored prefixes at least as specific as `prefix` (i.e. `prefix`
    /// contains them) — base spec §4.4 `iter_prefix_longer`.
    pub fn iter_prefix_longer<'a>(&'a self, prefix: &'a Prefix) -> impl Iterator<Item = &'a PrefixNode> + 'a {
        self.index
            .keys()
            .filter(move |candidate| prefix.contains(candidate))
            .filter_map(move |candidate| self.lookup_exact(candidate))
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

/// Pick the best RE at `node`: minimal (distance, origin-order, insertion
/// order) among entries with ≥1 active nexthop, update SELECTED flags, and
/// return the new selection (base spec §4.4 "Selection").
fn recompute_selection(node: &mut PrefixNode) -> Option<RouteEntry> {
    for entry in &mut node.entries {
        entry.flags.remove(ReFlags::SELECTED);
    }

    let winner_index = node
        .entries
        .iter()
        .enumerate()
        .filter(|(_, e)| e.has_active_nexthop())
        .min_by_key(|(_, e)| (e.distance, e.origin, e.sequence))
        .map(|(i, _)| i);

    if let Some(i) = winner_index {
        node.entries[i].flags.insert(ReFlags::SELECTED);
        Some(node.entries[i].clone())
    } else {
        None
    }
}

/// Configured static route (base spec §3), owned by config until injected
/// into the RIB by the resolver.
#[derive(Debug, Clone)]
pub struct StaticRoute {
    pub prefix: Prefix,
    pub kind: StaticRouteKind,
    pub ifindex: Option<u32>,
    pub tag: u32,
    pub distance: u8,
    pub vrf_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaticRouteKind {
    V4Gateway(std::net::Ipv4Addr),
    V6Gateway(std::net::Ipv6Addr),
    Ifindex,
    Blackhole,
}

/// A VRF's two per-family tries plus the static-route trie (base spec §3
/// "VRF"). One family pair covers the address families this daemon
/// forwards for; MPLS prefixes share the v4/v6 key space's `Prefix::Mpls`
/// variant and are stored in `mpls`.
#[derive(Default)]
pub struct Rib {
    pub v4: Trie,
    pub v6: Trie,
    pub mpls: Trie,
    pub static_v4: Trie,
    pub static_v6: Trie,
}

impl Rib {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trie_for(&self, prefix: &Prefix) -> &Trie {
        match prefix {
            Prefix::V4(..) => &self.v4,
            Prefix::V6(..) => &self.v6,
            Prefix::Mpls(_) => &self.mpls,
        }
    }

    pub fn trie_for_mut(&mut self, prefix: &Prefix) -> &mut Trie {
        match prefix {
            Prefix::V4(..) => &mut self.v4,
            Prefix::V6(..) => &mut self.v6,
            Prefix::Mpls(_) => &mut self.mpls,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{NexthopFlags, NexthopKind};
    use std::net::Ipv4Addr;

    fn active_nexthop() -> Nexthop {
        let mut nh = Nexthop::new(NexthopKind::V4Gateway(Ipv4Addr::new(192, 0, 2, 1)));
        nh.flags.insert(NexthopFlags::ACTIVE);
        nh
    }

    fn entry(origin: Origin, distance: u8) -> RouteEntry {
        RouteEntry {
            origin,
            instance: 0,
            distance,
            metric: 0,
            mtu: None,
            tag: 0,
            vrf_id: 0,
            table_id: 254,
            uptime: Instant::now(),
            flags: ReFlags::empty(),
            nexthops: vec![active_nexthop()],
            refcount: 0,
            sequence: 0,
        }
    }

    #[test]
    fn add_selects_lowest_distance() {
        let mut trie = Trie::new();
        let prefix = Prefix::new_v4(Ipv4Addr::new(10, 0, 0, 0), 8).unwrap();

        trie.add(prefix, entry(Origin::Bgp, 20));
        let change = trie.add(prefix, entry(Origin::Static, 1));

        assert!(change.new.unwrap().origin == Origin::Static);
        let node = trie.lookup_exact(&prefix).unwrap();
        assert_eq!(node.entries().len(), 2);
        assert!(node.selected().unwrap().origin == Origin::Static);
    }

    #[test]
    fn delete_removes_empty_node() {
        let mut trie = Trie::new();
        let prefix = Prefix::new_v4(Ipv4Addr::new(10, 0, 0, 0), 8).unwrap();
        trie.add(prefix, entry(Origin::Static, 1));
        trie.delete(prefix, Origin::Static, 0);
        assert!(trie.lookup_exact(&prefix).is_none());
        assert!(trie.is_empty());
    }

    #[test]
    fn locked_node_survives_delete() {
        let mut trie = Trie::new();
        let prefix = Prefix::new_v4(Ipv4Addr::new(10, 0, 0, 0), 8).unwrap();
        trie.add(prefix, entry(Origin::Static, 1));
        let handle = trie.lock(prefix).unwrap();
        trie.delete(prefix, Origin::Static, 0);
        assert!(trie.lookup_exact(&prefix).is_some());
        trie.unlock(handle);
        assert!(trie.lookup_exact(&prefix).is_none());
    }

    #[test]
    fn lookup_longest_prefers_more_specific() {
        let mut trie = Trie::new();
        let broad = Prefix::new_v4(Ipv4Addr::new(10, 0, 0, 0), 8).unwrap();
        let narrow = Prefix::new_v4(Ipv4Addr::new(10, 0, 0, 0), 24).unwrap();
        trie.add(broad, entry(Origin::Static, 1));
        trie.add(narrow, entry(Origin::Static, 1));

        let query = Prefix::new_v4(Ipv4Addr::new(10, 0, 0, 5), 32).unwrap();
        let found = trie.lookup_longest(&query).unwrap();
        assert_eq!(found.prefix, narrow);
    }

    #[test]
    fn no_active_nexthop_means_no_selection() {
        let mut trie = Trie::new();
        let prefix = Prefix::new_v4(Ipv4Addr::new(10, 0, 0, 0), 8).unwrap();
        let mut e = entry(Origin::Static, 1);
        e.nexthops.clear();
        let change = trie.add(prefix, e);
        assert!(change.new.is_none());
    }

    #[test]
    fn stale_handle_detected_after_reuse() {
        let mut trie = Trie::new();
        let prefix = Prefix::new_v4(Ipv4Addr::new(10, 0, 0, 0), 8).unwrap();
        trie.add(prefix, entry(Origin::Static, 1));
        let handle = trie.lock(prefix).unwrap();
        trie.unlock(handle);
        trie.delete(prefix, Origin::Static, 0);
        assert!(trie.node(handle).is_none());
    }
}
