//! VRF registry (base spec §3 "VRF"): the default VRF always exists;
//! additional VRFs are keyed by id and matched to wire table ids by
//! linear scan (base spec §6 "Table mapping": "VRFs are matched by
//! iterating known VRFs and comparing their registered table id").

use crate::ingest::TableLookup;
use crate::netlink::connection::Connection;
use crate::netlink::messages::route::table;
use crate::rib::Rib;
use crate::{Error, Result};

/// VRF id of the always-present default VRF.
pub const DEFAULT_VRF_ID: u32 = 0;

/// Two sockets a VRF owns (base spec §4.2 "Two sockets are maintained
/// per VRF"): one for synchronous request/response, one subscribed to
/// asynchronous notifications.
pub struct VrfSockets {
    pub command: Connection,
    pub notify: Connection,
}

impl VrfSockets {
    pub fn open() -> Result<Self> {
        Ok(Self {
            command: Connection::new()?,
            notify: Connection::new()?,
        })
    }
}

/// A virtual routing/forwarding instance: id, name, main table id, and
/// its own RIB (base spec §3).
pub struct Vrf {
    pub id: u32,
    pub name: String,
    pub table_id: u32,
    pub rib: Rib,
    pub sockets: VrfSockets,
}

impl Vrf {
    fn new(id: u32, name: impl Into<String>, table_id: u32) -> Result<Self> {
        Ok(Self {
            id,
            name: name.into(),
            table_id,
            rib: Rib::new(),
            sockets: VrfSockets::open()?,
        })
    }
}

/// Owns every [`Vrf`], keyed by id, and resolves wire table ids to a VRF
/// (base spec §6): the default VRF's table is the kernel "main" table
/// (254); unknown table ids within the main range fall back to it.
pub struct VrfRegistry {
    vrfs: Vec<Vrf>,
}

impl VrfRegistry {
    /// Construct the registry with the default VRF already present
    /// (base spec §3 "The default VRF always exists").
    pub fn new() -> Result<Self> {
        let default_vrf = Vrf::new(DEFAULT_VRF_ID, "default", table::MAIN as u32)?;
        Ok(Self {
            vrfs: vec![default_vrf],
        })
    }

    pub fn create(&mut self, id: u32, name: impl Into<String>, table_id: u32) -> Result<&mut Vrf> {
        if self.vrfs.iter().any(|v| v.id == id) {
            return Err(Error::Invalid(format!("VRF id {id} already registered")));
        }
        self.vrfs.push(Vrf::new(id, name, table_id)?);
        Ok(self.vrfs.last_mut().expect("just pushed"))
    }

    /// Remove a VRF. Callers are responsible for surfacing `Cancelled` to
    /// any request keyed to it (base spec §5 "Cancellation") before
    /// calling this.
    pub fn remove(&mut self, id: u32) -> Option<Vrf> {
        if id == DEFAULT_VRF_ID {
            return None;
        }
        let pos = self.vrfs.iter().position(|v| v.id == id)?;
        Some(self.vrfs.remove(pos))
    }

    pub fn get(&self, id: u32) -> Option<&Vrf> {
        self.vrfs.iter().find(|v| v.id == id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut Vrf> {
        self.vrfs.iter_mut().find(|v| v.id == id)
    }

    pub fn default_vrf(&self) -> &Vrf {
        self.get(DEFAULT_VRF_ID).expect("default VRF always exists")
    }

    pub fn default_vrf_mut(&mut self) -> &mut Vrf {
        self.get_mut(DEFAULT_VRF_ID).expect("default VRF always exists")
    }

    pub fn iter(&self) -> impl Iterator<Item = &Vrf> {
        self.vrfs.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Vrf> {
        self.vrfs.iter_mut()
    }

    /// Resolve a wire table id to a VRF id (base spec §6 "Table mapping").
    /// Unknown table ids in the main-table range fall back to the
    /// default VRF; anything else with no registered owner resolves to
    /// `None` (ingest then consults `Context::is_valid_kernel_table`).
    pub fn resolve_table(&self, wire_table: u32) -> Option<u32> {
        if let Some(vrf) = self.vrfs.iter().find(|v| v.table_id == wire_table) {
            return Some(vrf.id);
        }
        if wire_table == table::MAIN as u32 || wire_table == table::DEFAULT as u32 {
            return Some(DEFAULT_VRF_ID);
        }
        None
    }
}

impl TableLookup for VrfRegistry {
    fn resolve_table(&self, table: u32) -> Option<u32> {
        VrfRegistry::resolve_table(self, table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_vrf_exists_on_construction() {
        let registry = VrfRegistry::new().unwrap();
        assert_eq!(registry.default_vrf().id, DEFAULT_VRF_ID);
        assert_eq!(registry.default_vrf().table_id, table::MAIN as u32);
    }

    #[test]
    fn default_vrf_cannot_be_removed() {
        let mut registry = VrfRegistry::new().unwrap();
        assert!(registry.remove(DEFAULT_VRF_ID).is_none());
    }

    #[test]
    fn resolves_registered_table_id() {
        let mut registry = VrfRegistry::new().unwrap();
        registry.create(7, "blue", 100).unwrap();
        assert_eq!(registry.resolve_table(100), Some(7));
    }

    #[test]
    fn unknown_table_in_main_range_falls_back_to_default() {
        let registry = VrfRegistry::new().unwrap();
        assert_eq!(registry.resolve_table(table::DEFAULT as u32), Some(DEFAULT_VRF_ID));
    }

    #[test]
    fn duplicate_vrf_id_rejected() {
        let mut registry = VrfRegistry::new().unwrap();
        registry.create(7, "blue", 100).unwrap();
        assert!(registry.create(7, "blue-again", 101).is_err());
    }
}
