//! Address model (C3): prefixes, nexthop variants, and MPLS labels.
//!
//! Pure value types. Equality is bitwise; prefix ordering is
//! length-then-bits. None of this module talks to a socket.

use std::cmp::Ordering;
use std::net::{Ipv4Addr, Ipv6Addr};

use crate::netlink::interface_ref::InterfaceRef;

/// Maximum label stack depth carried by a single nexthop.
pub const MAX_LABELS: usize = 32;

/// A 20-bit MPLS label, with the reserved low range (0-15) tracked by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MplsLabel(u32);

impl MplsLabel {
    /// Largest value a 20-bit label can hold.
    pub const MAX: u32 = (1 << 20) - 1;

    pub const IPV4_EXPLICIT_NULL: u32 = 0;
    pub const ROUTER_ALERT: u32 = 1;
    pub const IPV6_EXPLICIT_NULL: u32 = 2;
    /// Suppresses outer encapsulation; stripped from the encoded stack but
    /// never alters OIF/gateway (SPEC_FULL.md §4.6, base spec §8 boundary
    /// behavior).
    pub const IMPLICIT_NULL: u32 = 3;

    /// Construct a label, rejecting out-of-range values (`Error::Invalid`).
    pub fn new(value: u32) -> crate::Result<Self> {
        if value > Self::MAX {
            return Err(crate::Error::Invalid(format!(
                "label {value} exceeds 20-bit range"
            )));
        }
        Ok(Self(value))
    }

    pub fn value(self) -> u32 {
        self.0
    }

    /// Reserved labels are 0 through 15 per RFC 3032.
    pub fn is_reserved(self) -> bool {
        self.0 < 16
    }

    pub fn is_implicit_null(self) -> bool {
        self.0 == Self::IMPLICIT_NULL
    }
}

/// A route destination: an IPv4/IPv6 network or a single MPLS label.
///
/// Invariant: for `V4`/`V6`, host bits below `len` are zero — enforced at
/// construction by [`Prefix::new_v4`]/[`Prefix::new_v6`], which mask them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Prefix {
    V4(Ipv4Addr, u8),
    V6(Ipv6Addr, u8),
    Mpls(MplsLabel),
}

impl Prefix {
    pub fn new_v4(addr: Ipv4Addr, len: u8) -> crate::Result<Self> {
        if len > 32 {
            return Err(crate::Error::Invalid(format!("v4 prefix length {len} > 32")));
        }
        Ok(Self::V4(mask_v4(addr, len), len))
    }

    pub fn new_v6(addr: Ipv6Addr, len: u8) -> crate::Result<Self> {
        if len > 128 {
            return Err(crate::Error::Invalid(format!(
                "v6 prefix length {len} > 128"
            )));
        }
        Ok(Self::V6(mask_v6(addr, len), len))
    }

    pub fn mpls(label: MplsLabel) -> Self {
        Self::Mpls(label)
    }

    pub fn len(&self) -> u8 {
        match self {
            Self::V4(_, len) => *len,
            Self::V6(_, len) => *len,
            Self::Mpls(_) => 20,
        }
    }

    pub fn is_v4(&self) -> bool {
        matches!(self, Self::V4(..))
    }

    pub fn is_v6(&self) -> bool {
        matches!(self, Self::V6(..))
    }

    pub fn is_mpls(&self) -> bool {
        matches!(self, Self::Mpls(_))
    }

    pub fn is_default(&self) -> bool {
        matches!(self, Self::V4(_, 0) | Self::V6(_, 0))
    }

    /// True iff `self`'s leading `self.len()` bits equal `other`'s same
    /// bits — the base-spec §4.3 "prefix-match" test, used with `self` as
    /// the more specific (candidate) prefix and `other` as the query.
    pub fn contains(&self, other: &Prefix) -> bool {
        match (self, other) {
            (Self::V4(a, alen), Self::V4(b, _)) => {
                *alen == 0 || mask_v4(*b, *alen) == mask_v4(*a, *alen)
            }
            (Self::V6(a, alen), Self::V6(b, _)) => {
                *alen == 0 || mask_v6(*b, *alen) == mask_v6(*a, *alen)
            }
            _ => false,
        }
    }
}

/// Length-then-bits ordering (base spec §4.3): shorter prefixes sort first,
/// ties broken by the numeric value of the address/label.
impl PartialOrd for Prefix {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Prefix {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::V4(a, alen), Self::V4(b, blen)) => alen.cmp(blen).then(a.cmp(b)),
            (Self::V6(a, alen), Self::V6(b, blen)) => alen.cmp(blen).then(a.cmp(b)),
            (Self::Mpls(a), Self::Mpls(b)) => a.cmp(b),
            (Self::V4(..), _) => Ordering::Less,
            (_, Self::V4(..)) => Ordering::Greater,
            (Self::V6(..), _) => Ordering::Less,
            (_, Self::V6(..)) => Ordering::Greater,
        }
    }
}

fn mask_v4(addr: Ipv4Addr, len: u8) -> Ipv4Addr {
    if len >= 32 {
        return addr;
    }
    let mask = !0u32 << (32 - len);
    Ipv4Addr::from(u32::from(addr) & mask)
}

fn mask_v6(addr: Ipv6Addr, len: u8) -> Ipv6Addr {
    if len >= 128 {
        return addr;
    }
    let mask = !0u128 << (128 - len);
    Ipv6Addr::from(u128::from(addr) & mask)
}

/// Nexthop state flags (base spec §3).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NexthopFlags(u8);

impl NexthopFlags {
    pub const ACTIVE: Self = Self(1 << 0);
    pub const FIB: Self = Self(1 << 1);
    pub const ONLINK: Self = Self(1 << 2);
    pub const RECURSIVE: Self = Self(1 << 3);

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

impl std::ops::BitOr for NexthopFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// The tagged nexthop variants from base spec §3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NexthopKind {
    Ifindex(u32),
    V4Gateway(Ipv4Addr),
    V4GatewayIfindex(Ipv4Addr, u32),
    V6Gateway(Ipv6Addr),
    V6GatewayIfindex(Ipv6Addr, u32),
    Blackhole,
}

/// A nexthop: its variant plus the shared attributes every variant carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nexthop {
    pub kind: NexthopKind,
    pub flags: NexthopFlags,
    /// Route-map-derived source override; takes precedence over `src`.
    pub rmap_src: Option<std::net::IpAddr>,
    /// Config-supplied preferred source.
    pub src: Option<std::net::IpAddr>,
    pub label_stack: Vec<MplsLabel>,
    /// Resolved child chain, populated by the resolver (C5) when this
    /// nexthop's gateway resolves recursively. Owned, not shared — see
    /// SPEC_FULL.md §9 "recursive nexthops as owned trees".
    pub children: Vec<Nexthop>,
}

impl Nexthop {
    pub fn new(kind: NexthopKind) -> Self {
        Self {
            kind,
            flags: NexthopFlags::empty(),
            rmap_src: None,
            src: None,
            label_stack: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn ifindex(&self) -> Option<u32> {
        match self.kind {
            NexthopKind::Ifindex(idx)
            | NexthopKind::V4GatewayIfindex(_, idx)
            | NexthopKind::V6GatewayIfindex(_, idx) => Some(idx),
            _ => None,
        }
    }

    pub fn gateway(&self) -> Option<std::net::IpAddr> {
        match self.kind {
            NexthopKind::V4Gateway(a) | NexthopKind::V4GatewayIfindex(a, _) => {
                Some(std::net::IpAddr::V4(a))
            }
            NexthopKind::V6Gateway(a) | NexthopKind::V6GatewayIfindex(a, _) => {
                Some(std::net::IpAddr::V6(a))
            }
            _ => None,
        }
    }

    pub fn is_blackhole(&self) -> bool {
        matches!(self.kind, NexthopKind::Blackhole)
    }

    pub fn is_recursive(&self) -> bool {
        self.flags.contains(NexthopFlags::RECURSIVE)
    }

    pub fn is_active(&self) -> bool {
        self.flags.contains(NexthopFlags::ACTIVE)
    }

    pub fn is_fib(&self) -> bool {
        self.flags.contains(NexthopFlags::FIB)
    }

    /// Push a label onto the stack, bounded by [`MAX_LABELS`].
    pub fn push_label(&mut self, label: MplsLabel) -> crate::Result<()> {
        if self.label_stack.len() >= MAX_LABELS {
            return Err(crate::Error::Invalid(format!(
                "label stack exceeds MAX_LABELS ({MAX_LABELS})"
            )));
        }
        self.label_stack.push(label);
        Ok(())
    }

    /// Preferred source in priority order: `rmap_src` then `src`. Neither
    /// present means "inherit from the resolved connected prefix", which
    /// only the resolver (C5) can determine.
    pub fn configured_source(&self) -> Option<std::net::IpAddr> {
        self.rmap_src.or(self.src)
    }
}

/// Resolve an [`InterfaceRef`] to the ifindex carried by a nexthop, when the
/// nexthop names one directly. Named for use by `resolver`/`sync` call
/// sites that accept either form.
pub fn interface_ref_of(nexthop: &Nexthop) -> Option<InterfaceRef> {
    nexthop.ifindex().map(InterfaceRef::index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v4_prefix_masks_host_bits() {
        let p = Prefix::new_v4(Ipv4Addr::new(10, 1, 2, 3), 8).unwrap();
        assert_eq!(p, Prefix::V4(Ipv4Addr::new(10, 0, 0, 0), 8));
    }

    #[test]
    fn v4_prefix_rejects_bad_length() {
        assert!(Prefix::new_v4(Ipv4Addr::new(10, 0, 0, 0), 33).is_err());
    }

    #[test]
    fn prefix_ordering_is_length_then_bits() {
        let a = Prefix::new_v4(Ipv4Addr::new(10, 0, 0, 0), 8).unwrap();
        let b = Prefix::new_v4(Ipv4Addr::new(10, 0, 0, 0), 16).unwrap();
        assert!(a < b);
    }

    #[test]
    fn contains_checks_leading_bits() {
        let candidate = Prefix::new_v4(Ipv4Addr::new(192, 0, 2, 0), 24).unwrap();
        let query = Prefix::new_v4(Ipv4Addr::new(192, 0, 2, 1), 32).unwrap();
        assert!(candidate.contains(&query));
        let other = Prefix::new_v4(Ipv4Addr::new(198, 51, 100, 1), 32).unwrap();
        assert!(!candidate.contains(&other));
    }

    #[test]
    fn implicit_null_is_recognized() {
        let label = MplsLabel::new(3).unwrap();
        assert!(label.is_implicit_null());
        assert!(label.is_reserved());
    }

    #[test]
    fn label_rejects_out_of_range() {
        assert!(MplsLabel::new(MplsLabel::MAX + 1).is_err());
    }

    #[test]
    fn label_stack_bounded() {
        let mut nh = Nexthop::new(NexthopKind::Ifindex(1));
        for i in 0..MAX_LABELS {
            nh.push_label(MplsLabel::new(100 + i as u32).unwrap()).unwrap();
        }
        assert!(nh.push_label(MplsLabel::new(9999).unwrap()).is_err());
    }

    #[test]
    fn preferred_source_prefers_rmap() {
        let mut nh = Nexthop::new(NexthopKind::V4Gateway(Ipv4Addr::new(192, 0, 2, 1)));
        nh.src = Some("192.0.2.9".parse().unwrap());
        nh.rmap_src = Some("192.0.2.10".parse().unwrap());
        assert_eq!(nh.configured_source(), nh.rmap_src);
    }
}
