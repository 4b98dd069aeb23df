//! Bridge/EVPN Adjunct (C8): FDB learning-interface validation and
//! local/remote VxLAN MAC reconciliation (base spec §4.8).

use std::net::Ipv4Addr;

use crate::netlink::attr::{AttrIter, get};
use crate::netlink::builder::MessageBuilder;
use crate::netlink::error::{Error, Result};
use crate::netlink::message::{NLM_F_ACK, NLM_F_CREATE, NLM_F_REPLACE, NLM_F_REQUEST, NlMsgType};

/// `rtm_family` for FDB/neighbor messages carrying bridge entries.
pub const AF_BRIDGE: u8 = 7;

mod nda {
    pub const LLADDR: u16 = 2;
    pub const DST: u16 = 7;
    pub const MASTER: u16 = 10;
    pub const VLAN: u16 = 5;
}

/// `ndm_state` bit for a statically configured (non-expiring) FDB entry.
const NUD_PERMANENT: u16 = 0x80;

/// Which kind of interface an FDB notification's learning interface is
/// (base spec §9 l2if variant set resolution).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterfaceKind {
    Vxlan,
    Bridge,
    BridgeSlave,
    Other,
}

/// Lookup of interface properties the bridge adjunct needs, supplied by
/// the interface/link layer (out of scope here per base spec §1).
pub trait InterfaceInfo {
    /// `None` if the interface does not exist.
    fn kind(&self, ifindex: u32) -> Option<InterfaceKind>;
    /// Whether `ifindex` is a bridge slave belonging to an EVPN-enabled VRF.
    fn is_evpn_bridge_slave(&self, ifindex: u32) -> bool;
}

/// Where a learned MAC is anchored (base spec §3 `origin`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacOrigin {
    /// Learned on a local bridge-slave port.
    Local,
    /// Learned on a VxLAN interface, announced by a remote VTEP.
    RemoteVxlan,
}

#[derive(Debug, Clone)]
pub struct MacEntry {
    pub mac: [u8; 6],
    pub vlan: Option<u16>,
    pub origin: MacOrigin,
    /// Interface the MAC was actually learned on (`ndmsg.ifindex`) —
    /// the bridge-slave or VxLAN port, not the master bridge.
    pub learning_ifindex: u32,
    pub bridge_ifindex: u32,
    /// Remote VTEP IPv4 address (`NDA_DST`), set only when `origin` is
    /// [`MacOrigin::RemoteVxlan`].
    pub remote_vtep: Option<Ipv4Addr>,
}

#[derive(Debug, Clone)]
pub enum FdbEvent {
    /// Program (or refresh) a local MAC on `mac_entry`.
    LocalUpsert(MacEntry),
    /// A remote peer announced ownership; withdraw any local entry.
    WithdrawLocal(MacEntry),
    /// A remote-owning peer withdrew; consider readvertising if the
    /// daemon still has the local entry (caller checks its own table).
    ReconsiderRemote(MacEntry),
    RemoveLocal(MacEntry),
}

/// Decoded `RTM_NEWNEIGH`/`RTM_DELNEIGH` FDB body.
struct FdbMessage {
    ifindex: u32,
    state: u16,
    lladdr: Option<[u8; 6]>,
    dst: Option<Ipv4Addr>,
    vlan: Option<u16>,
    master: Option<u32>,
}

fn parse_fdb(payload: &[u8]) -> Result<FdbMessage> {
    // ndmsg: { family:u8, pad:u8x3, ifindex:i32, state:u16, flags:u8, type:u8 }
    const HDRLEN: usize = 12;
    if payload.len() < HDRLEN {
        return Err(Error::Truncated {
            expected: HDRLEN,
            actual: payload.len(),
        });
    }
    let ifindex = i32::from_ne_bytes([payload[4], payload[5], payload[6], payload[7]]) as u32;
    let state = u16::from_ne_bytes([payload[8], payload[9]]);

    let mut lladdr = None;
    let mut dst = None;
    let mut vlan = None;
    let mut master = None;

    for (attr_type, data) in AttrIter::new(&payload[HDRLEN..]) {
        match attr_type {
            nda::LLADDR => {
                if data.len() != 6 {
                    return Err(Error::InvalidAttribute(format!(
                        "NDA_LLADDR must be 6 bytes, got {}",
                        data.len()
                    )));
                }
                let mut mac = [0u8; 6];
                mac.copy_from_slice(data);
                lladdr = Some(mac);
            }
            nda::DST => {
                if data.len() == 4 {
                    dst = Some(Ipv4Addr::new(data[0], data[1], data[2], data[3]));
                }
            }
            nda::VLAN => vlan = Some(get::u16_ne(data)?),
            nda::MASTER => master = Some(get::u32_ne(data)?),
            _ => {}
        }
    }

    Ok(FdbMessage {
        ifindex,
        state,
        lladdr,
        dst,
        vlan,
        master,
    })
}

/// Classify an FDB notification into the reconciliation action to take,
/// per base spec §4.8. Returns `None` for entries that should be
/// silently dropped (not a bridge-slave learning interface, PERMANENT,
/// or a malformed LLADDR).
pub fn classify(
    payload: &[u8],
    family: u8,
    msg_type: u16,
    interfaces: &impl InterfaceInfo,
) -> Result<Option<FdbEvent>> {
    if family != AF_BRIDGE {
        return Ok(None);
    }

    let fdb = parse_fdb(payload)?;

    if !interfaces.is_evpn_bridge_slave(fdb.ifindex) {
        return Ok(None);
    }
    if fdb.state & NUD_PERMANENT != 0 {
        return Ok(None);
    }
    let Some(mac) = fdb.lladdr else {
        return Ok(None);
    };

    let is_vxlan = interfaces.kind(fdb.ifindex) == Some(InterfaceKind::Vxlan);
    let is_del = msg_type == NlMsgType::RTM_DELNEIGH;
    let origin = if is_vxlan { MacOrigin::RemoteVxlan } else { MacOrigin::Local };

    let entry = MacEntry {
        mac,
        vlan: fdb.vlan,
        origin,
        learning_ifindex: fdb.ifindex,
        bridge_ifindex: fdb.master.unwrap_or(fdb.ifindex),
        remote_vtep: if is_vxlan { fdb.dst } else { None },
    };

    Ok(Some(match (is_del, is_vxlan) {
        (false, true) => FdbEvent::WithdrawLocal(entry),
        (false, false) => FdbEvent::LocalUpsert(entry),
        (true, true) => FdbEvent::ReconsiderRemote(entry),
        (true, false) => FdbEvent::RemoveLocal(entry),
    }))
}

/// Build an `RTM_NEWNEIGH` request programming a remote VTEP's MAC into
/// the kernel bridge FDB (base spec §4.8 "Programming remote MACs").
pub fn build_remote_mac_request(mac: [u8; 6], vtep: Ipv4Addr, bridge_ifindex: u32, vlan: Option<u16>) -> MessageBuilder {
    let mut builder = MessageBuilder::new(
        NlMsgType::RTM_NEWNEIGH,
        NLM_F_REQUEST | NLM_F_ACK | NLM_F_CREATE | NLM_F_REPLACE,
    );

    #[repr(C)]
    struct NdMsg {
        family: u8,
        pad: [u8; 3],
        ifindex: i32,
        state: u16,
        flags: u8,
        kind: u8,
    }
    let ndm = NdMsg {
        family: AF_BRIDGE,
        pad: [0; 3],
        ifindex: bridge_ifindex as i32,
        state: 0x40, // NUD_REACHABLE-equivalent for a programmed FDB entry
        flags: 0x02, // NTF_SELF
        kind: 0,
    };
    let bytes = unsafe {
        std::slice::from_raw_parts(&ndm as *const NdMsg as *const u8, std::mem::size_of::<NdMsg>())
    };
    builder.append_bytes(bytes);

    builder.append_attr(nda::LLADDR, &mac);
    builder.append_attr(nda::DST, &vtep.octets());
    builder.append_attr_u32(nda::MASTER, bridge_ifindex);
    if let Some(vlan) = vlan {
        builder.append_attr_u16(nda::VLAN, vlan);
    }
    builder
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::netlink::message::NLMSG_HDRLEN;

    struct FixedInterfaces {
        kind: InterfaceKind,
        is_evpn_slave: bool,
    }

    impl InterfaceInfo for FixedInterfaces {
        fn kind(&self, _ifindex: u32) -> Option<InterfaceKind> {
            Some(self.kind)
        }
        fn is_evpn_bridge_slave(&self, _ifindex: u32) -> bool {
            self.is_evpn_slave
        }
    }

    fn fdb_payload(mac: [u8; 6], state: u16, dst: Option<Ipv4Addr>) -> Vec<u8> {
        let mut builder = MessageBuilder::new(NlMsgType::RTM_NEWNEIGH, 0);
        #[repr(C)]
        struct NdMsg {
            family: u8,
            pad: [u8; 3],
            ifindex: i32,
            state: u16,
            flags: u8,
            kind: u8,
        }
        let ndm = NdMsg {
            family: AF_BRIDGE,
            pad: [0; 3],
            ifindex: 5,
            state,
            flags: 0,
            kind: 0,
        };
        let bytes = unsafe {
            std::slice::from_raw_parts(&ndm as *const NdMsg as *const u8, std::mem::size_of::<NdMsg>())
        };
        builder.append_bytes(bytes);
        builder.append_attr(nda::LLADDR, &mac);
        if let Some(dst) = dst {
            builder.append_attr(nda::DST, &dst.octets());
        }
        let msg = builder.finish();
        msg[NLMSG_HDRLEN..].to_vec()
    }

    #[test]
    fn non_bridge_slave_is_ignored() {
        let payload = fdb_payload([1, 2, 3, 4, 5, 6], 0, None);
        let interfaces = FixedInterfaces { kind: InterfaceKind::Bridge, is_evpn_slave: false };
        assert!(classify(&payload, AF_BRIDGE, NlMsgType::RTM_NEWNEIGH, &interfaces).unwrap().is_none());
    }

    #[test]
    fn permanent_entry_is_ignored() {
        let payload = fdb_payload([1, 2, 3, 4, 5, 6], NUD_PERMANENT, None);
        let interfaces = FixedInterfaces { kind: InterfaceKind::BridgeSlave, is_evpn_slave: true };
        assert!(classify(&payload, AF_BRIDGE, NlMsgType::RTM_NEWNEIGH, &interfaces).unwrap().is_none());
    }

    #[test]
    fn vxlan_add_withdraws_local() {
        let payload = fdb_payload([1, 2, 3, 4, 5, 6], 0, Some(Ipv4Addr::new(192, 0, 2, 9)));
        let interfaces = FixedInterfaces { kind: InterfaceKind::Vxlan, is_evpn_slave: true };
        let event = classify(&payload, AF_BRIDGE, NlMsgType::RTM_NEWNEIGH, &interfaces).unwrap().unwrap();
        assert!(matches!(event, FdbEvent::WithdrawLocal(_)));
    }

    #[test]
    fn local_add_upserts() {
        let payload = fdb_payload([1, 2, 3, 4, 5, 6], 0, None);
        let interfaces = FixedInterfaces { kind: InterfaceKind::BridgeSlave, is_evpn_slave: true };
        let event = classify(&payload, AF_BRIDGE, NlMsgType::RTM_NEWNEIGH, &interfaces).unwrap().unwrap();
        assert!(matches!(event, FdbEvent::LocalUpsert(_)));
    }

    #[test]
    fn vxlan_del_reconsiders_remote() {
        let payload = fdb_payload([1, 2, 3, 4, 5, 6], 0, None);
        let interfaces = FixedInterfaces { kind: InterfaceKind::Vxlan, is_evpn_slave: true };
        let event = classify(&payload, AF_BRIDGE, NlMsgType::RTM_DELNEIGH, &interfaces).unwrap().unwrap();
        assert!(matches!(event, FdbEvent::ReconsiderRemote(_)));
    }

    #[test]
    fn missing_lladdr_is_ignored() {
        let mut builder = MessageBuilder::new(NlMsgType::RTM_NEWNEIGH, 0);
        #[repr(C)]
        struct NdMsg {
            family: u8,
            pad: [u8; 3],
            ifindex: i32,
            state: u16,
            flags: u8,
            kind: u8,
        }
        let ndm = NdMsg { family: AF_BRIDGE, pad: [0; 3], ifindex: 5, state: 0, flags: 0, kind: 0 };
        let bytes = unsafe {
            std::slice::from_raw_parts(&ndm as *const NdMsg as *const u8, std::mem::size_of::<NdMsg>())
        };
        builder.append_bytes(bytes);
        let msg = builder.finish();
        let payload = msg[NLMSG_HDRLEN..].to_vec();
        let interfaces = FixedInterfaces { kind: InterfaceKind::BridgeSlave, is_evpn_slave: true };
        assert!(classify(&payload, AF_BRIDGE, NlMsgType::RTM_NEWNEIGH, &interfaces).unwrap().is_none());
    }
}
