//! FIB synchronization core: keeps the kernel's forwarding table lined up
//! with a set of routing origins (BGP, OSPF, IS-IS, static, ...).
//!
//! The crate is organized by the role each module plays in that pipeline:
//!
//! - [`netlink`] — C1 wire codec and C2 transport (`NETLINK_ROUTE` only).
//! - [`address`] — C3 prefix/nexthop data model.
//! - [`rib`] — C4 per-VRF radix trie and route selection.
//! - [`resolver`] — C5 recursive nexthop resolution.
//! - [`protocol_map`] — origin ↔ kernel protocol id table (§6).
//! - [`sync`] — C6 FIB synchronizer (`install` decision table).
//! - [`ingest`] — C7 kernel event classification and VRF routing.
//! - [`bridge`] — C8 bridge/EVPN MAC-FDB adjunct.
//! - [`vrf`] — VRF registry and per-VRF socket pairs.
//! - [`config`] — startup configuration surface.
//!
//! ```ignore
//! use clap::Parser;
//! use fib_core::config::{Cli, Context};
//! use fib_core::vrf::VrfRegistry;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> fib_core::Result<()> {
//!     let ctx = Context::from_cli(&Cli::parse())?;
//!     let mut vrfs = VrfRegistry::new()?;
//!     // event loop: command/notify sockets per VRF, driven by tokio::select!
//!     Ok(())
//! }
//! ```

pub mod address;
pub mod bridge;
pub mod config;
pub mod ingest;
pub mod netlink;
pub mod protocol_map;
pub mod resolver;
pub mod rib;
pub mod sync;
pub mod vrf;

pub use netlink::{Connection, Error, Result};
