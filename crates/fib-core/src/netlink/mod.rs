//! Netlink wire codec and transport (C1/C2).
//!
//! This module implements exactly the `NETLINK_ROUTE` surface the FIB
//! synchronizer needs: message/attribute framing ([`message`], [`attr`]),
//! a request builder ([`builder`]), request/response correlation
//! ([`connection`]), and the route message codec ([`messages::route`]).
//!
//! ```ignore
//! use fib_core::netlink::connection::{Connection, dump_request};
//! use fib_core::netlink::message::NlMsgType;
//!
//! let conn = Connection::new()?;
//! let routes = conn.dump(dump_request(NlMsgType::RTM_GETROUTE)).await?;
//! ```

pub mod attr;
pub mod builder;
pub mod connection;
pub mod error;
pub mod interface_ref;
pub mod message;
pub mod messages;
pub mod socket;

pub use attr::{AttrIter, NlAttr};
pub use builder::{MessageBuilder, NestToken};
pub use connection::Connection;
pub use error::{Error, Result};
pub use interface_ref::InterfaceRef;
pub use message::{MessageIter, NLMSG_HDRLEN, NlMsgHdr, NlMsgType};
pub use socket::{NetlinkSocket, rtnetlink_groups};
