//! Origin ↔ kernel protocol id table (base spec §6). Fixed by protocol
//! convention, not runtime configuration — plain data and a lookup
//! function, no injected dependency.

use crate::rib::Origin;

pub const BGP: u8 = 186;
pub const OSPF: u8 = 188;
pub const ISIS: u8 = 187;
pub const RIP: u8 = 189;
pub const RIPNG: u8 = 190;
pub const STATIC: u8 = 4;
/// "Default/other" — the ZEBRA-equivalent catch-all proto id.
pub const DEFAULT: u8 = 11;

/// Map a daemon [`Origin`] to the kernel protocol id the daemon uses when
/// it authors a route for that origin.
///
/// `Origin::Connected`/`Origin::Kernel` never originate wire requests (they
/// describe routes the kernel already owns), so they fall back to
/// [`DEFAULT`] — callers that build ADD/REPLACE requests only do so for
/// origins this daemon actively synchronizes.
pub fn kernel_proto_id(origin: Origin) -> u8 {
    match origin {
        Origin::Bgp => BGP,
        Origin::Ospf => OSPF,
        Origin::Isis => ISIS,
        Origin::Rip => RIP,
        Origin::Ripng => RIPNG,
        Origin::Static => STATIC,
        Origin::Connected | Origin::Kernel => DEFAULT,
    }
}

/// A route is self-originated when its wire protocol id equals any of the
/// daemon-owned ids above (base spec §6).
pub fn is_self_originated(wire_proto_id: u8) -> bool {
    matches!(
        wire_proto_id,
        BGP | OSPF | ISIS | RIP | RIPNG | STATIC | DEFAULT
    )
}

/// Reverse of [`kernel_proto_id`]: map a wire protocol id back to the
/// [`Origin`] a self-authored RIB entry for it would have been inserted
/// under. `None` for `DEFAULT` (the catch-all id carries no single origin
/// to recover) and for anything not self-originated.
pub fn origin_for(wire_proto_id: u8) -> Option<Origin> {
    match wire_proto_id {
        BGP => Some(Origin::Bgp),
        OSPF => Some(Origin::Ospf),
        ISIS => Some(Origin::Isis),
        RIP => Some(Origin::Rip),
        RIPNG => Some(Origin::Ripng),
        STATIC => Some(Origin::Static),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_maps_to_four() {
        assert_eq!(kernel_proto_id(Origin::Static), 4);
    }

    #[test]
    fn self_originated_recognizes_all_owned_ids() {
        for id in [BGP, OSPF, ISIS, RIP, RIPNG, STATIC, DEFAULT] {
            assert!(is_self_originated(id));
        }
    }

    #[test]
    fn unrelated_proto_id_is_external() {
        assert!(!is_self_originated(2)); // RTPROT_KERNEL
    }

    #[test]
    fn origin_for_reverses_kernel_proto_id() {
        for origin in [
            Origin::Bgp,
            Origin::Ospf,
            Origin::Isis,
            Origin::Rip,
            Origin::Ripng,
            Origin::Static,
        ] {
            assert_eq!(origin_for(kernel_proto_id(origin)), Some(origin));
        }
    }

    #[test]
    fn origin_for_is_none_for_default_and_external_ids() {
        assert_eq!(origin_for(DEFAULT), None);
        assert_eq!(origin_for(2), None); // RTPROT_KERNEL
    }
}
